use std::fmt::{Display, Formatter};

use ahash::{HashMap, HashMapExt, HashSet};
use itertools::Itertools;

use crate::unique_address::UniqueAddress;

/// Coordinator-local view of which members the failure detector currently
/// flags as unreachable. Not gossiped; reachability influences downing and
/// the WeaklyUp rule but never mutates member status by itself.
#[derive(Debug, Clone, Default)]
pub struct Reachability {
    records: HashMap<UniqueAddress, ReachabilityStatus>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReachabilityStatus {
    Reachable,
    Unreachable,
}

impl Reachability {
    pub fn status_of(&self, node: &UniqueAddress) -> ReachabilityStatus {
        self.records
            .get(node)
            .copied()
            .unwrap_or(ReachabilityStatus::Reachable)
    }

    pub fn is_reachable(&self, node: &UniqueAddress) -> bool {
        self.status_of(node) == ReachabilityStatus::Reachable
    }

    pub fn unreachable_change(&self, node: UniqueAddress) -> Reachability {
        let mut reachability = self.clone();
        reachability
            .records
            .insert(node, ReachabilityStatus::Unreachable);
        reachability
    }

    /// A node seen again collapses back to the implicit reachable default.
    pub fn reachable_change(&self, node: &UniqueAddress) -> Reachability {
        let mut reachability = self.clone();
        reachability.records.remove(node);
        reachability
    }

    pub fn all_unreachable(&self) -> HashSet<&UniqueAddress> {
        self.records
            .iter()
            .filter_map(|(node, status)| {
                matches!(status, ReachabilityStatus::Unreachable).then_some(node)
            })
            .collect()
    }

    pub fn is_all_reachable(&self) -> bool {
        self.records
            .values()
            .all(|status| matches!(status, ReachabilityStatus::Reachable))
    }

    pub fn remove<'a>(&self, nodes: impl IntoIterator<Item = &'a UniqueAddress>) -> Reachability {
        let mut reachability = self.clone();
        for node in nodes {
            reachability.records.remove(node);
        }
        reachability
    }
}

impl Display for Reachability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let records = self
            .records
            .iter()
            .map(|(node, status)| format!("{} -> {:?}", node, status))
            .sorted()
            .join(", ");
        write!(f, "Reachability({})", records)
    }
}
