pub use parking_lot;

pub(crate) const MEMBERSHIP_CONFIG: &str = include_str!("../membership.toml");

pub mod address;
pub mod clock;
pub mod cluster_event;
pub mod coordinator;
pub mod downing;
pub mod error;
pub mod ext;
pub mod failure_detector;
pub mod gossip;
pub mod member;
pub(crate) mod membership_state;
pub mod reachability;
pub mod settings;
pub mod unique_address;
pub mod version;
