use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use ahash::{HashMap, HashSet};
use itertools::Itertools;

use crate::member::{Member, MemberStatus};
use crate::unique_address::UniqueAddress;

/// Domain events published to subscribers after the corresponding state
/// commit, in commit order.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    MemberJoined(Member),
    MemberWeaklyUp(Member),
    MemberUp(Member),
    MemberLeft(Member),
    MemberExited(Member),
    MemberDowned(Member),
    MemberRemoved {
        member: Member,
        previous_status: MemberStatus,
    },
    LeaderChanged(Option<UniqueAddress>),
    UnreachableMember(Member),
    ReachableMember(Member),
}

impl ClusterEvent {
    /// The event matching a member's new status, if the status maps to one.
    pub(crate) fn from_status_change(member: &Member) -> Option<ClusterEvent> {
        let event = match member.status {
            MemberStatus::Joining => ClusterEvent::MemberJoined(member.clone()),
            MemberStatus::WeaklyUp => ClusterEvent::MemberWeaklyUp(member.clone()),
            MemberStatus::Up => ClusterEvent::MemberUp(member.clone()),
            MemberStatus::Leaving => ClusterEvent::MemberLeft(member.clone()),
            MemberStatus::Exiting => ClusterEvent::MemberExited(member.clone()),
            MemberStatus::Down => ClusterEvent::MemberDowned(member.clone()),
            MemberStatus::Removed
            | MemberStatus::PreparingForShutdown
            | MemberStatus::ReadyForShutdown => return None,
        };
        Some(event)
    }

    pub fn member(&self) -> Option<&Member> {
        match self {
            ClusterEvent::MemberJoined(member)
            | ClusterEvent::MemberWeaklyUp(member)
            | ClusterEvent::MemberUp(member)
            | ClusterEvent::MemberLeft(member)
            | ClusterEvent::MemberExited(member)
            | ClusterEvent::MemberDowned(member)
            | ClusterEvent::MemberRemoved { member, .. }
            | ClusterEvent::UnreachableMember(member)
            | ClusterEvent::ReachableMember(member) => Some(member),
            ClusterEvent::LeaderChanged(_) => None,
        }
    }
}

impl Display for ClusterEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterEvent::MemberJoined(member) => write!(f, "MemberJoined({})", member),
            ClusterEvent::MemberWeaklyUp(member) => write!(f, "MemberWeaklyUp({})", member),
            ClusterEvent::MemberUp(member) => write!(f, "MemberUp({})", member),
            ClusterEvent::MemberLeft(member) => write!(f, "MemberLeft({})", member),
            ClusterEvent::MemberExited(member) => write!(f, "MemberExited({})", member),
            ClusterEvent::MemberDowned(member) => write!(f, "MemberDowned({})", member),
            ClusterEvent::MemberRemoved {
                member,
                previous_status,
            } => write!(f, "MemberRemoved({}, previous = {})", member, previous_status),
            ClusterEvent::LeaderChanged(leader) => write!(
                f,
                "LeaderChanged({})",
                leader.as_ref().map_or("None".to_string(), |l| l.to_string())
            ),
            ClusterEvent::UnreachableMember(member) => write!(f, "UnreachableMember({})", member),
            ClusterEvent::ReachableMember(member) => write!(f, "ReachableMember({})", member),
        }
    }
}

/// Immutable snapshot of the coordinator's view, safe to hand to read-side
/// callers.
#[derive(Debug, Clone, Default)]
pub struct CurrentClusterState {
    pub members: BTreeSet<Member>,
    pub unreachable: HashSet<Member>,
    pub leader: Option<UniqueAddress>,
    pub role_leader_map: HashMap<String, Option<UniqueAddress>>,
    pub member_tombstones: HashSet<UniqueAddress>,
}

impl CurrentClusterState {
    pub fn role_leader(&self, role: &str) -> Option<&UniqueAddress> {
        match self.role_leader_map.get(role) {
            Some(Some(leader)) => Some(leader),
            _ => None,
        }
    }

    pub fn all_roles(&self) -> HashSet<&str> {
        self.members
            .iter()
            .flat_map(|m| m.roles.iter().map(String::as_str))
            .collect()
    }

    pub fn all_data_centers(&self) -> HashSet<&str> {
        self.members.iter().map(|m| m.data_center()).collect()
    }
}

impl PartialEq for CurrentClusterState {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
            && self.unreachable == other.unreachable
            && self.leader == other.leader
            && self.role_leader_map == other.role_leader_map
    }
}

impl Eq for CurrentClusterState {}

impl Display for CurrentClusterState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CurrentClusterState {{ members: [{}], unreachable: [{}], leader: {}, role_leader_map: [{}], member_tombstones: [{}] }}",
            self.members.iter().join(", "),
            self.unreachable.iter().sorted().join(", "),
            self.leader.as_ref().map_or("None".to_string(), |l| l.to_string()),
            self.role_leader_map
                .iter()
                .map(|(role, leader)| format!(
                    "{} => {}",
                    role,
                    leader.as_ref().map_or("None".to_string(), |l| l.to_string())
                ))
                .sorted()
                .join(", "),
            self.member_tombstones.iter().sorted().join(", "),
        )
    }
}
