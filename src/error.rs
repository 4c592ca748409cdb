use thiserror::Error;

use crate::member::MemberStatus;
use crate::unique_address::UniqueAddress;

/// Precondition failures surfaced to callers. Tombstone violations, stale
/// reachability updates and downing requests for unknown members are not
/// errors: they are logged at debug and ignored.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum MembershipError {
    #[error("invalid member status transition [{from} -> {to}] for [{node}]")]
    InvalidTransition {
        node: UniqueAddress,
        from: MemberStatus,
        to: MemberStatus,
    },
    #[error("cannot compare member age across data centers [{a_dc}] and [{b_dc}]")]
    CrossDatacenterAgeCompare { a_dc: String, b_dc: String },
    #[error("member [{node}] must have exactly one data center role, found [{found}]")]
    MissingDatacenterRole { node: UniqueAddress, found: usize },
}
