use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap as StdHashMap, HashSet as StdHashSet};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use ahash::{HashMap, HashMapExt, HashSet};
use bincode::{Decode, Encode};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::MembershipError;
use crate::hashmap;
use crate::hashset;
use crate::membership_state::MembershipState;
use crate::settings::MembershipSettings;
use crate::unique_address::UniqueAddress;
use crate::version::AppVersion;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize)]
pub enum MemberStatus {
    Joining,
    WeaklyUp,
    Up,
    Leaving,
    Exiting,
    Down,
    Removed,
    PreparingForShutdown,
    ReadyForShutdown,
}

impl MemberStatus {
    pub fn allowed_transitions() -> &'static HashMap<MemberStatus, HashSet<MemberStatus>> {
        static ALLOWED_TRANSITIONS: OnceLock<HashMap<MemberStatus, HashSet<MemberStatus>>> =
            OnceLock::new();
        ALLOWED_TRANSITIONS.get_or_init(|| {
            hashmap! {
                MemberStatus::Joining => hashset! {
                    MemberStatus::WeaklyUp,
                    MemberStatus::Up,
                    MemberStatus::Leaving,
                    MemberStatus::Down,
                    MemberStatus::Removed,
                },
                MemberStatus::WeaklyUp => hashset! {
                    MemberStatus::Up,
                    MemberStatus::Leaving,
                    MemberStatus::Down,
                    MemberStatus::Removed,
                },
                MemberStatus::Up => hashset! {
                    MemberStatus::Leaving,
                    MemberStatus::Down,
                    MemberStatus::Removed,
                    MemberStatus::PreparingForShutdown,
                },
                MemberStatus::Leaving => hashset! {
                    MemberStatus::Exiting,
                    MemberStatus::Down,
                    MemberStatus::Removed,
                },
                MemberStatus::Exiting => hashset! {
                    MemberStatus::Removed,
                    MemberStatus::Down,
                },
                MemberStatus::Down => hashset! {
                    MemberStatus::Removed,
                },
                MemberStatus::PreparingForShutdown => hashset! {
                    MemberStatus::ReadyForShutdown,
                    MemberStatus::Removed,
                    MemberStatus::Leaving,
                    MemberStatus::Down,
                },
                MemberStatus::ReadyForShutdown => hashset! {
                    MemberStatus::Removed,
                    MemberStatus::Leaving,
                    MemberStatus::Down,
                },
                MemberStatus::Removed => hashset! {},
            }
        })
    }

    pub fn can_transition(from: MemberStatus, to: MemberStatus) -> bool {
        Self::allowed_transitions()
            .get(&from)
            .map_or(false, |allowed| allowed.contains(&to))
    }

    /// Precedence used when two gossip views disagree about the same node:
    /// the lifecycle is monotonic, so the further-along status is durable
    /// truth.
    pub(crate) fn merge_rank(&self) -> u8 {
        match self {
            MemberStatus::Removed => 8,
            MemberStatus::ReadyForShutdown => 7,
            MemberStatus::Down => 6,
            MemberStatus::Exiting => 5,
            MemberStatus::Leaving => 4,
            MemberStatus::PreparingForShutdown => 3,
            MemberStatus::Up => 2,
            MemberStatus::WeaklyUp => 1,
            MemberStatus::Joining => 0,
        }
    }
}

impl Display for MemberStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberStatus::Joining => write!(f, "Joining"),
            MemberStatus::WeaklyUp => write!(f, "WeaklyUp"),
            MemberStatus::Up => write!(f, "Up"),
            MemberStatus::Leaving => write!(f, "Leaving"),
            MemberStatus::Exiting => write!(f, "Exiting"),
            MemberStatus::Down => write!(f, "Down"),
            MemberStatus::Removed => write!(f, "Removed"),
            MemberStatus::PreparingForShutdown => write!(f, "PreparingForShutdown"),
            MemberStatus::ReadyForShutdown => write!(f, "ReadyForShutdown"),
        }
    }
}

/// Cluster member. Identity, equality and hashing are the unique address
/// alone; status, up-number and version are resolved by the gossip merger
/// when two views disagree.
#[derive(Debug, Clone, Encode, Decode, Serialize, Deserialize)]
pub struct Member {
    pub unique_address: UniqueAddress,
    pub up_number: i32,
    pub status: MemberStatus,
    pub roles: StdHashSet<String>,
    pub app_version: AppVersion,
}

impl Member {
    /// A node first contacting the cluster. `up_number` stays at the sentinel
    /// until the leader promotes the member to `Up`.
    pub fn joining(
        unique_address: UniqueAddress,
        roles: StdHashSet<String>,
        app_version: AppVersion,
    ) -> Result<Member, MembershipError> {
        let dc_roles = roles
            .iter()
            .filter(|role| role.starts_with(MembershipSettings::dc_role_prefix()))
            .count();
        if dc_roles != 1 {
            return Err(MembershipError::MissingDatacenterRole {
                node: unique_address,
                found: dc_roles,
            });
        }
        Ok(Member {
            unique_address,
            up_number: i32::MAX,
            status: MemberStatus::Joining,
            roles,
            app_version,
        })
    }

    /// Placeholder for a node that is no longer part of the member set.
    pub fn removed(unique_address: UniqueAddress) -> Member {
        let dc_role = format!(
            "{}{}",
            MembershipSettings::dc_role_prefix(),
            MembershipSettings::default_data_center()
        );
        Member {
            unique_address,
            up_number: i32::MAX,
            status: MemberStatus::Removed,
            roles: StdHashSet::from_iter([dc_role]),
            app_version: AppVersion::zero().clone(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.unique_address.address
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn data_center(&self) -> &str {
        self.roles
            .iter()
            .find_map(|role| role.strip_prefix(MembershipSettings::dc_role_prefix()))
            .unwrap_or(MembershipSettings::default_data_center())
    }

    /// Checked status transition per the lifecycle table.
    pub fn with_status(&self, status: MemberStatus) -> Result<Member, MembershipError> {
        if !MemberStatus::can_transition(self.status, status) {
            return Err(MembershipError::InvalidTransition {
                node: self.unique_address.clone(),
                from: self.status,
                to: status,
            });
        }
        let mut member = self.clone();
        member.status = status;
        Ok(member)
    }

    /// First promotion to `Up`, assigning the up-number the member keeps for
    /// the rest of its life.
    pub fn promote_to_up(&self, up_number: i32) -> Result<Member, MembershipError> {
        if !matches!(
            self.status,
            MemberStatus::Joining | MemberStatus::WeaklyUp
        ) {
            return Err(MembershipError::InvalidTransition {
                node: self.unique_address.clone(),
                from: self.status,
                to: MemberStatus::Up,
            });
        }
        let mut member = self.with_status(MemberStatus::Up)?;
        member.up_number = up_number;
        Ok(member)
    }

    /// Age is only well-defined within one data center: up-number counters of
    /// different data centers may collide.
    pub fn is_older_than(&self, other: &Member) -> Result<bool, MembershipError> {
        Ok(Self::age_ordering(self, other)? == Ordering::Less)
    }

    pub fn age_ordering(a: &Member, b: &Member) -> Result<Ordering, MembershipError> {
        if a.data_center() != b.data_center() {
            return Err(MembershipError::CrossDatacenterAgeCompare {
                a_dc: a.data_center().to_string(),
                b_dc: b.data_center().to_string(),
            });
        }
        let ordering = a
            .up_number
            .cmp(&b.up_number)
            .then_with(|| Address::ordering(a.address(), b.address()));
        Ok(ordering)
    }

    /// Canonical member order: unique address.
    pub fn ordering(a: &Member, b: &Member) -> Ordering {
        a.unique_address.cmp(&b.unique_address)
    }

    /// Canonical order, except that members in statuses that disqualify them
    /// from leading sort strictly after everything else: `Down` last, then
    /// `Exiting`, then `Joining`, then `WeaklyUp`.
    pub fn leader_status_ordering(a: &Member, b: &Member) -> Ordering {
        fn rank(status: MemberStatus) -> u8 {
            match status {
                MemberStatus::Down => 4,
                MemberStatus::Exiting => 3,
                MemberStatus::Joining => 2,
                MemberStatus::WeaklyUp => 1,
                _ => 0,
            }
        }
        rank(a.status)
            .cmp(&rank(b.status))
            .then_with(|| Self::ordering(a, b))
    }

    /// Of two records for the same node, the one whose status is further
    /// along the lifecycle; with equal statuses the older record, so stable
    /// up-numbers survive the merge.
    pub fn highest_priority_of<'a>(m1: &'a Member, m2: &'a Member) -> &'a Member {
        match m1.status.merge_rank().cmp(&m2.status.merge_rank()) {
            Ordering::Greater => m1,
            Ordering::Less => m2,
            Ordering::Equal => match Self::age_ordering(m1, m2) {
                Ok(Ordering::Less) => m1,
                _ => m2,
            },
        }
    }

    /// Reconcile two gossiped member sets into the more-advanced view.
    /// Tombstoned nodes are dropped; a node one side has already pruned after
    /// `Down`/`Exiting` stays pruned. Pure, commutative and associative for a
    /// shared tombstone map, which is what makes gossip convergent.
    pub fn pick_highest_priority(
        one: &BTreeSet<Member>,
        another: &BTreeSet<Member>,
        tombstones: &StdHashMap<UniqueAddress, i64>,
    ) -> BTreeSet<Member> {
        let mut grouped: HashMap<&UniqueAddress, Vec<&Member>> = HashMap::new();
        for member in one.iter().chain(another) {
            grouped
                .entry(&member.unique_address)
                .or_default()
                .push(member);
        }
        let mut picked = BTreeSet::new();
        for (node, group) in grouped {
            if tombstones.contains_key(node) {
                continue;
            }
            match group.as_slice() {
                [member] => {
                    let forgotten_elsewhere = MembershipState::remove_unreachable_with_member_status()
                        .contains(&member.status);
                    if !forgotten_elsewhere {
                        picked.insert((*member).clone());
                    }
                }
                [first, second] => {
                    picked.insert(Self::highest_priority_of(first, second).clone());
                }
                _ => {}
            }
        }
        picked
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.unique_address == other.unique_address
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_address.hash(state);
    }
}

impl PartialOrd for Member {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Member {
    fn cmp(&self, other: &Self) -> Ordering {
        Member::ordering(self, other)
    }
}

impl Display for Member {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Member(address = {}, status = {}, roles = [{}], upNumber = {})",
            self.unique_address,
            self.status,
            self.roles.iter().sorted().join(", "),
            self.up_number,
        )
    }
}

/// Age order over members of one data center. Constructing a set that mixes
/// data centers is a bug and fails loudly.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct MemberByAgeOrderingRef<'a>(pub(crate) &'a Member);

impl<'a> From<&'a Member> for MemberByAgeOrderingRef<'a> {
    fn from(member: &'a Member) -> Self {
        MemberByAgeOrderingRef(member)
    }
}

impl PartialOrd for MemberByAgeOrderingRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemberByAgeOrderingRef<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match Member::age_ordering(self.0, other.0) {
            Ok(ordering) => ordering.then_with(|| self.0.unique_address.cmp(&other.0.unique_address)),
            Err(error) => panic!("{}", error),
        }
    }
}
