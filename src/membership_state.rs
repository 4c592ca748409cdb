use std::collections::BTreeSet;
use std::sync::OnceLock;

use ahash::HashSet;

use crate::ext::MaybeRef;
use crate::gossip::Gossip;
use crate::hashset;
use crate::member::{Member, MemberByAgeOrderingRef, MemberStatus};
use crate::reachability::Reachability;
use crate::unique_address::UniqueAddress;

/// The local node's current view: the latest merged gossip plus the
/// coordinator-local reachability table. Pure queries only; mutation goes
/// through the coordinator.
#[derive(Debug, Clone)]
pub(crate) struct MembershipState {
    pub(crate) latest_gossip: Gossip,
    pub(crate) reachability: Reachability,
    pub(crate) self_unique_address: UniqueAddress,
    pub(crate) self_dc: String,
}

impl MembershipState {
    pub(crate) fn new(
        latest_gossip: Gossip,
        reachability: Reachability,
        self_unique_address: UniqueAddress,
        self_dc: String,
    ) -> Self {
        Self {
            latest_gossip,
            reachability,
            self_unique_address,
            self_dc,
        }
    }

    pub(crate) fn self_member(&self) -> MaybeRef<Member> {
        self.latest_gossip.member(&self.self_unique_address)
    }

    pub(crate) fn members(&self) -> &BTreeSet<Member> {
        &self.latest_gossip.members
    }

    pub(crate) fn dc_members<'a>(&'a self, data_center: &str) -> BTreeSet<&'a Member> {
        self.members()
            .iter()
            .filter(|m| m.data_center() == data_center)
            .collect()
    }

    pub(crate) fn unreachable_members(&self) -> HashSet<&Member> {
        let unreachable = self.reachability.all_unreachable();
        self.members()
            .iter()
            .filter(|m| unreachable.contains(&m.unique_address))
            .collect()
    }

    pub(crate) fn is_leader(&self, node: &UniqueAddress) -> bool {
        self.leader().map_or(false, |leader| leader == node)
    }

    pub(crate) fn leader(&self) -> Option<&UniqueAddress> {
        self.dc_leader(&self.self_dc)
    }

    pub(crate) fn dc_leader(&self, data_center: &str) -> Option<&UniqueAddress> {
        self.leader_of(self.dc_members(data_center))
    }

    pub(crate) fn role_leader(&self, role: &str) -> Option<&UniqueAddress> {
        let members = self
            .dc_members(&self.self_dc)
            .into_iter()
            .filter(|m| m.has_role(role))
            .collect();
        self.leader_of(members)
    }

    /// Smallest member under the leader ordering among the reachable, not
    /// downed candidates. Members in leader-eligible statuses win over any
    /// member still joining or already on the way out.
    pub(crate) fn leader_of<'a>(&self, members: BTreeSet<&'a Member>) -> Option<&'a UniqueAddress> {
        let candidates: BTreeSet<_> = members
            .into_iter()
            .filter(|m| {
                !matches!(m.status, MemberStatus::Down)
                    && (m.unique_address == self.self_unique_address
                        || self.reachability.is_reachable(&m.unique_address))
            })
            .collect();
        candidates
            .iter()
            .find(|m| Self::leader_member_status().contains(&m.status))
            .or_else(|| {
                candidates
                    .iter()
                    .min_by(|a, b| Member::leader_status_ordering(a, b))
            })
            .map(|m| &m.unique_address)
    }

    /// Oldest member of the data center, excluding members already downed.
    pub(crate) fn oldest<'a>(&'a self, data_center: &str) -> Option<&'a Member> {
        self.dc_members(data_center)
            .into_iter()
            .filter(|m| !matches!(m.status, MemberStatus::Down))
            .map(MemberByAgeOrderingRef)
            .min()
            .map(|m| m.0)
    }

    /// Convergence is possible unless some member the failure detector flags
    /// unreachable still has a live status. `WeaklyUp` members never block;
    /// `Down` and `Exiting` members are about to be pruned and are ignored.
    pub(crate) fn is_convergence_possible(&self) -> bool {
        !self
            .reachability
            .all_unreachable()
            .into_iter()
            .any(|node| {
                let status = self.latest_gossip.member(node).status;
                Self::convergence_blocking_member_status().contains(&status)
            })
    }

    pub(crate) fn leader_member_status() -> &'static HashSet<MemberStatus> {
        static LEADER_MEMBER_STATUS: OnceLock<HashSet<MemberStatus>> = OnceLock::new();
        LEADER_MEMBER_STATUS.get_or_init(|| {
            hashset! {
                MemberStatus::Up,
                MemberStatus::Leaving,
                MemberStatus::PreparingForShutdown,
                MemberStatus::ReadyForShutdown,
            }
        })
    }

    pub(crate) fn convergence_blocking_member_status() -> &'static HashSet<MemberStatus> {
        static CONVERGENCE_BLOCKING_MEMBER_STATUS: OnceLock<HashSet<MemberStatus>> =
            OnceLock::new();
        CONVERGENCE_BLOCKING_MEMBER_STATUS.get_or_init(|| {
            hashset! {
                MemberStatus::Joining,
                MemberStatus::Up,
                MemberStatus::Leaving,
            }
        })
    }

    pub(crate) fn remove_unreachable_with_member_status() -> &'static HashSet<MemberStatus> {
        static REMOVE_UNREACHABLE_WITH_MEMBER_STATUS: OnceLock<HashSet<MemberStatus>> =
            OnceLock::new();
        REMOVE_UNREACHABLE_WITH_MEMBER_STATUS.get_or_init(|| {
            hashset! {
                MemberStatus::Down,
                MemberStatus::Exiting,
            }
        })
    }
}
