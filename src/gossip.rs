use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::ext::MaybeRef;
use crate::member::{Member, MemberStatus};
use crate::unique_address::UniqueAddress;

/// Snapshot of one node's membership view, as disseminated to peers. Framing
/// and transport are not defined here; this is the snapshot contents
/// contract.
#[derive(Debug, Clone, Default, Encode, Decode, Serialize, Deserialize)]
pub struct Gossip {
    pub members: BTreeSet<Member>,
    /// Nodes that reached `Removed` and must never be revived, with the
    /// removal timestamp in epoch millis.
    pub tombstones: HashMap<UniqueAddress, i64>,
}

impl Gossip {
    pub fn new(members: BTreeSet<Member>, tombstones: HashMap<UniqueAddress, i64>) -> Self {
        Self {
            members,
            tombstones,
        }
    }

    pub fn member(&self, node: &UniqueAddress) -> MaybeRef<Member> {
        self.members
            .iter()
            .find(|m| m.unique_address == *node)
            .map(MaybeRef::Ref)
            .unwrap_or_else(|| MaybeRef::Own(Member::removed(node.clone())))
    }

    pub fn has_member(&self, node: &UniqueAddress) -> bool {
        self.members.iter().any(|m| m.unique_address == *node)
    }

    pub fn is_tombstoned(&self, node: &UniqueAddress) -> bool {
        self.tombstones.contains_key(node)
    }

    pub fn is_multi_dc(&self) -> bool {
        match self.members.first() {
            None => false,
            Some(first) => self
                .members
                .iter()
                .any(|m| m.data_center() != first.data_center()),
        }
    }

    /// Reconcile with a remote view: tombstones united keeping the later
    /// timestamp, members resolved by the priority merge.
    pub fn merge(&self, that: &Gossip) -> Gossip {
        let mut merged_tombstones = self.tombstones.clone();
        for (node, timestamp) in &that.tombstones {
            merged_tombstones
                .entry(node.clone())
                .and_modify(|t| *t = (*t).max(*timestamp))
                .or_insert(*timestamp);
        }
        let merged_members =
            Member::pick_highest_priority(&self.members, &that.members, &merged_tombstones);
        Gossip::new(merged_members, merged_tombstones)
    }

    /// Replace (or insert) the record for `member`'s unique address.
    pub fn update(&self, member: Member) -> Gossip {
        let mut gossip = self.clone();
        gossip.members.remove(&member);
        gossip.members.insert(member);
        gossip
    }

    /// Prune the node from the member set and tombstone it.
    pub fn remove(&self, node: &UniqueAddress, removal_timestamp: i64) -> Gossip {
        let mut gossip = self.clone();
        gossip.members.retain(|m| m.unique_address != *node);
        gossip.tombstones.insert(node.clone(), removal_timestamp);
        gossip
    }

    pub fn prune_tombstones(&self, remove_earlier_than: i64) -> Gossip {
        let mut gossip = self.clone();
        gossip
            .tombstones
            .retain(|_, timestamp| *timestamp > remove_earlier_than);
        gossip
    }

    pub(crate) fn assert_invariants(&self) {
        assert!(
            !self
                .members
                .iter()
                .any(|m| matches!(m.status, MemberStatus::Removed)),
            "Live members must not have status [{}]",
            MemberStatus::Removed
        );
        assert!(
            !self
                .members
                .iter()
                .any(|m| self.tombstones.contains_key(&m.unique_address)),
            "Tombstoned nodes must not be part of the member set"
        );
    }
}

impl Display for Gossip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Gossip(members = [{}], tombstones = [{}])",
            self.members.iter().join(", "),
            self.tombstones
                .iter()
                .map(|(node, timestamp)| format!("{} -> {}", node, timestamp))
                .sorted()
                .join(", "),
        )
    }
}

/// A gossip snapshot together with its sender. Envelopes from tombstoned
/// senders are dropped by the coordinator.
#[derive(Debug, Clone, Encode, Decode, Serialize, Deserialize)]
pub struct GossipEnvelope {
    pub from: UniqueAddress,
    pub gossip: Gossip,
}

impl GossipEnvelope {
    pub fn new(from: UniqueAddress, gossip: Gossip) -> Self {
        Self { from, gossip }
    }
}

impl Display for GossipEnvelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GossipEnvelope(from = {}, gossip = {})", self.from, self.gossip)
    }
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeSet, HashMap, HashSet};

    use super::Gossip;
    use crate::address::Address;
    use crate::member::{Member, MemberStatus};
    use crate::unique_address::UniqueAddress;
    use crate::version::AppVersion;

    fn ua(host: &str, uid: i64) -> UniqueAddress {
        UniqueAddress::new(
            Address::new("tcp", "cluster", Some(host.to_string()), Some(2552)),
            uid,
        )
    }

    fn member(host: &str, uid: i64, status: MemberStatus) -> Member {
        let mut member = Member::joining(
            ua(host, uid),
            HashSet::from_iter(["dc-default".to_string()]),
            AppVersion::zero().clone(),
        )
        .unwrap();
        member.status = status;
        member
    }

    fn gossip(members: &[Member]) -> Gossip {
        Gossip::new(members.iter().cloned().collect(), HashMap::new())
    }

    #[test]
    fn merge_tombstones_keeping_the_later_timestamp() {
        let node = ua("x", 1);
        let one = Gossip::new(BTreeSet::new(), HashMap::from_iter([(node.clone(), 100)]));
        let another = Gossip::new(BTreeSet::new(), HashMap::from_iter([(node.clone(), 200)]));
        assert_eq!(one.merge(&another).tombstones[&node], 200);
        assert_eq!(another.merge(&one).tombstones[&node], 200);
    }

    #[test]
    fn merge_drops_members_tombstoned_by_the_other_side() {
        let node = ua("x", 1);
        let one = gossip(&[member("x", 1, MemberStatus::Up)]);
        let another = Gossip::new(BTreeSet::new(), HashMap::from_iter([(node.clone(), 100)]));
        let merged = one.merge(&another);
        assert!(merged.members.is_empty());
        assert!(merged.is_tombstoned(&node));
    }

    #[test]
    fn update_replaces_the_record_for_the_same_node() {
        let gossip = gossip(&[member("x", 1, MemberStatus::Joining)]);
        let updated = gossip.update(member("x", 1, MemberStatus::Up));
        assert_eq!(updated.members.len(), 1);
        assert_eq!(updated.members.first().unwrap().status, MemberStatus::Up);
    }

    #[test]
    fn remove_tombstones_the_node() {
        let node = ua("x", 1);
        let gossip = gossip(&[member("x", 1, MemberStatus::Down)]);
        let removed = gossip.remove(&node, 42);
        assert!(!removed.has_member(&node));
        assert_eq!(removed.tombstones[&node], 42);
        removed.assert_invariants();
    }

    #[test]
    fn prune_expired_tombstones() {
        let gossip = Gossip::new(
            BTreeSet::new(),
            HashMap::from_iter([(ua("x", 1), 100), (ua("y", 2), 300)]),
        );
        let pruned = gossip.prune_tombstones(200);
        assert_eq!(pruned.tombstones.len(), 1);
        assert!(pruned.is_tombstoned(&ua("y", 2)));
    }

    #[test]
    fn fall_back_to_a_removed_placeholder_for_unknown_members() {
        let gossip = gossip(&[]);
        let placeholder = gossip.member(&ua("x", 1));
        assert_eq!(placeholder.status, MemberStatus::Removed);
    }
}
