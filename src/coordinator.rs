use std::collections::{BTreeSet, HashSet as StdHashSet};
use std::sync::Arc;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::cluster_event::{ClusterEvent, CurrentClusterState};
use crate::downing::{downing_provider, DowningPolicy};
use crate::error::MembershipError;
use crate::gossip::{Gossip, GossipEnvelope};
use crate::member::{Member, MemberStatus};
use crate::membership_state::MembershipState;
use crate::reachability::Reachability;
use crate::settings::MembershipSettings;
use crate::unique_address::UniqueAddress;
use crate::version::AppVersion;

/// Owner of the local membership view. All mutating operations serialize
/// behind one lock and behave as if they executed atomically in arrival
/// order; subscriber notifications and the downing policy run outside the
/// lock. Queries return immutable snapshots.
#[derive(Debug)]
pub struct MembershipCoordinator {
    settings: MembershipSettings,
    clock: Arc<dyn Clock>,
    downing: Box<dyn DowningPolicy>,
    event_tx: broadcast::Sender<ClusterEvent>,
    inner: Mutex<Inner>,
}

impl MembershipCoordinator {
    pub fn new(
        self_unique_address: UniqueAddress,
        settings: MembershipSettings,
    ) -> anyhow::Result<Self> {
        let downing = downing_provider(&settings)?;
        Ok(Self::with_collaborators(
            self_unique_address,
            settings,
            Arc::new(SystemClock),
            downing,
        ))
    }

    /// Construction with an explicit clock and downing policy, for tests and
    /// embedders with their own collaborators.
    pub fn with_collaborators(
        self_unique_address: UniqueAddress,
        settings: MembershipSettings,
        clock: Arc<dyn Clock>,
        downing: Box<dyn DowningPolicy>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(128);
        let state = MembershipState::new(
            Gossip::default(),
            Reachability::default(),
            self_unique_address,
            settings.self_data_center.clone(),
        );
        let inner = Inner {
            state,
            joining_since: HashMap::new(),
            unreachable_since: HashMap::new(),
            leaving_acks: HashMap::new(),
            exiting_acks: HashMap::new(),
            up_number_counter: 1,
            published_leader: None,
            poisoned: false,
        };
        Self {
            settings,
            clock,
            downing,
            event_tx,
            inner: Mutex::new(inner),
        }
    }

    pub fn self_unique_address(&self) -> UniqueAddress {
        self.inner.lock().state.self_unique_address.clone()
    }

    /// Events are delivered after the corresponding state commit, in commit
    /// order.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.event_tx.subscribe()
    }

    /// Admit the local node into its own view with the configured roles.
    pub fn self_join(&self) -> Result<Vec<ClusterEvent>, MembershipError> {
        let node = self.self_unique_address();
        self.join(
            node,
            self.settings.roles.clone(),
            self.settings.app_version.clone(),
        )
    }

    /// Admit a `Joining` member. Tombstoned addresses are dropped silently;
    /// re-joining with a known uid is a no-op.
    pub fn join(
        &self,
        node: UniqueAddress,
        roles: StdHashSet<String>,
        app_version: AppVersion,
    ) -> Result<Vec<ClusterEvent>, MembershipError> {
        let now = self.clock.now_millis();
        let events = {
            let mut inner = self.inner.lock();
            inner.assert_not_poisoned();
            inner.join(node, roles, app_version, now)?
        };
        self.publish(&events);
        Ok(events)
    }

    /// Start a graceful departure.
    pub fn leave(&self, node: UniqueAddress) -> Vec<ClusterEvent> {
        let events = {
            let mut inner = self.inner.lock();
            inner.assert_not_poisoned();
            inner.leave(node)
        };
        self.publish(&events);
        events
    }

    /// Merge a peer's view into the local one. Idempotent; envelopes from
    /// tombstoned senders are dropped.
    pub fn observe_gossip(&self, envelope: GossipEnvelope) -> Vec<ClusterEvent> {
        let now = self.clock.now_millis();
        let events = {
            let mut inner = self.inner.lock();
            inner.assert_not_poisoned();
            inner.observe_gossip(envelope, now, &self.settings)
        };
        self.publish(&events);
        events
    }

    /// Failure detector verdict for one node. Flaps never mutate member
    /// status; only the downing policy does that.
    pub fn observe_reachability(&self, node: UniqueAddress, reachable: bool) -> Vec<ClusterEvent> {
        let now = self.clock.now_millis();
        let events = {
            let mut inner = self.inner.lock();
            inner.assert_not_poisoned();
            inner.observe_reachability(node, reachable, now)
        };
        self.publish(&events);
        events
    }

    pub fn mark_node_as_unavailable(&self, node: UniqueAddress) -> Vec<ClusterEvent> {
        self.observe_reachability(node, false)
    }

    pub fn mark_node_as_available(&self, node: UniqueAddress) -> Vec<ClusterEvent> {
        self.observe_reachability(node, true)
    }

    /// Downing decision from the policy or an operator. No-op when the node
    /// is already `Down` or gone.
    pub fn apply_downing(&self, node: UniqueAddress) -> Vec<ClusterEvent> {
        let events = {
            let mut inner = self.inner.lock();
            inner.assert_not_poisoned();
            let mut events = vec![];
            inner.down(node, &mut events);
            inner.check_leader_changed(&mut events);
            events
        };
        self.publish(&events);
        events
    }

    /// One leader tick: consult the downing policy, promote waiting joiners,
    /// advance leaving and exiting members, prune removable ones. A no-op on
    /// every node but the current data center leader.
    pub fn leader_actions(&self) -> Vec<ClusterEvent> {
        let now = self.clock.now_millis();
        let (members, unreachable_since) = {
            let inner = self.inner.lock();
            inner.assert_not_poisoned();
            let self_node = inner.state.self_unique_address.clone();
            if !inner.state.is_leader(&self_node) {
                return vec![];
            }
            (
                inner.state.members().clone(),
                inner.unreachable_since.clone(),
            )
        };
        let decisions = self
            .downing
            .nodes_to_down(&members, &unreachable_since, now);
        let events = {
            let mut inner = self.inner.lock();
            inner.assert_not_poisoned();
            inner.leader_actions(decisions, now, &self.settings)
        };
        self.publish(&events);
        events
    }

    pub fn members(&self) -> BTreeSet<Member> {
        self.inner.lock().state.members().clone()
    }

    pub fn self_member(&self) -> Member {
        let inner = self.inner.lock();
        inner.state.self_member().clone()
    }

    pub fn leader(&self) -> Option<UniqueAddress> {
        self.inner.lock().state.leader().cloned()
    }

    pub fn dc_leader(&self, data_center: &str) -> Option<UniqueAddress> {
        self.inner.lock().state.dc_leader(data_center).cloned()
    }

    pub fn role_leader(&self, role: &str) -> Option<UniqueAddress> {
        self.inner.lock().state.role_leader(role).cloned()
    }

    pub fn oldest(&self, data_center: &str) -> Option<Member> {
        self.inner.lock().state.oldest(data_center).cloned()
    }

    pub fn unreachable(&self) -> HashSet<Member> {
        self.inner
            .lock()
            .state
            .unreachable_members()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn is_convergence_possible(&self) -> bool {
        self.inner.lock().state.is_convergence_possible()
    }

    /// The view a node would gossip to a peer right now.
    pub fn gossip_snapshot(&self) -> GossipEnvelope {
        let inner = self.inner.lock();
        GossipEnvelope::new(
            inner.state.self_unique_address.clone(),
            inner.state.latest_gossip.clone(),
        )
    }

    pub fn state(&self) -> CurrentClusterState {
        self.inner.lock().current_state()
    }

    fn publish(&self, events: &[ClusterEvent]) {
        for event in events {
            trace!("publishing {}", event);
            let _ = self.event_tx.send(event.clone());
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: MembershipState,
    /// When each still-joining member was first seen, for the WeaklyUp timer
    /// and the join-order up-number assignment.
    joining_since: HashMap<UniqueAddress, i64>,
    unreachable_since: HashMap<UniqueAddress, i64>,
    /// Which peers' gossiped views have carried a member at `Leaving` or
    /// further.
    leaving_acks: HashMap<UniqueAddress, HashSet<UniqueAddress>>,
    exiting_acks: HashMap<UniqueAddress, HashSet<UniqueAddress>>,
    up_number_counter: i32,
    published_leader: Option<UniqueAddress>,
    poisoned: bool,
}

impl Inner {
    fn assert_not_poisoned(&self) {
        assert!(
            !self.poisoned,
            "membership coordinator poisoned by an invalid transition"
        );
    }

    fn join(
        &mut self,
        node: UniqueAddress,
        roles: StdHashSet<String>,
        app_version: AppVersion,
        now: i64,
    ) -> Result<Vec<ClusterEvent>, MembershipError> {
        if self.state.latest_gossip.is_tombstoned(&node) {
            debug!("ignoring join of tombstoned node {}", node);
            return Ok(vec![]);
        }
        if self.state.latest_gossip.has_member(&node) {
            return Ok(vec![]);
        }
        let member = Member::joining(node.clone(), roles, app_version)?;
        self.state.latest_gossip = self.state.latest_gossip.update(member.clone());
        self.joining_since.insert(node, now);
        let mut events = vec![ClusterEvent::MemberJoined(member)];
        self.check_leader_changed(&mut events);
        Ok(events)
    }

    fn leave(&mut self, node: UniqueAddress) -> Vec<ClusterEvent> {
        let member = match self.state.latest_gossip.members.iter().find(|m| m.unique_address == node) {
            Some(member) => member.clone(),
            None => {
                debug!("ignoring leave of unknown node {}", node);
                return vec![];
            }
        };
        let mut events = vec![];
        match member.status {
            MemberStatus::Joining
            | MemberStatus::WeaklyUp
            | MemberStatus::Up
            | MemberStatus::PreparingForShutdown
            | MemberStatus::ReadyForShutdown => {
                self.apply_transition(&member, MemberStatus::Leaving, &mut events);
                self.check_leader_changed(&mut events);
            }
            _ => {}
        }
        events
    }

    fn observe_gossip(
        &mut self,
        envelope: GossipEnvelope,
        now: i64,
        settings: &MembershipSettings,
    ) -> Vec<ClusterEvent> {
        let GossipEnvelope { from, gossip: remote } = envelope;
        if self.state.latest_gossip.is_tombstoned(&from) {
            debug!("ignoring gossip from tombstoned node {}", from);
            return vec![];
        }
        let malformed = remote.members.iter().any(|m| {
            !m.roles
                .iter()
                .any(|role| role.starts_with(MembershipSettings::dc_role_prefix()))
        });
        if malformed {
            debug!(
                "rejecting gossip from {} carrying a member without a data center role",
                from
            );
            return vec![];
        }
        // The sender vouches for what its view already carries.
        for member in &remote.members {
            let rank = member.status.merge_rank();
            if rank >= MemberStatus::Leaving.merge_rank() {
                self.leaving_acks
                    .entry(member.unique_address.clone())
                    .or_default()
                    .insert(from.clone());
            }
            if rank >= MemberStatus::Exiting.merge_rank() {
                self.exiting_acks
                    .entry(member.unique_address.clone())
                    .or_default()
                    .insert(from.clone());
            }
        }
        let ttl = settings.tombstone_ttl.as_millis() as i64;
        let old = self.state.latest_gossip.clone();
        let merged = old.merge(&remote).prune_tombstones(now - ttl);

        let mut events = vec![];
        for member in &merged.members {
            match old.members.get(member) {
                None => {
                    if let Some(event) = ClusterEvent::from_status_change(member) {
                        events.push(event);
                    }
                }
                Some(previous) if previous.status != member.status => {
                    if let Some(event) = ClusterEvent::from_status_change(member) {
                        events.push(event);
                    }
                }
                _ => {}
            }
        }
        for member in &old.members {
            if !merged.members.contains(member) {
                self.forget(&member.unique_address);
                match member.with_status(MemberStatus::Removed) {
                    Ok(removed) => events.push(ClusterEvent::MemberRemoved {
                        member: removed,
                        previous_status: member.status,
                    }),
                    Err(error) => self.poison(error),
                }
            }
        }
        self.state.latest_gossip = merged;
        self.track_joining(now);
        self.check_leader_changed(&mut events);
        events
    }

    fn observe_reachability(
        &mut self,
        node: UniqueAddress,
        reachable: bool,
        now: i64,
    ) -> Vec<ClusterEvent> {
        if !self.state.latest_gossip.has_member(&node) {
            debug!("ignoring reachability of unknown node {}", node);
            return vec![];
        }
        let member = self.state.latest_gossip.member(&node).clone();
        let mut events = vec![];
        if reachable {
            if !self.state.reachability.is_reachable(&node) {
                self.state.reachability = self.state.reachability.reachable_change(&node);
                self.unreachable_since.remove(&node);
                events.push(ClusterEvent::ReachableMember(member));
            }
        } else if self.state.reachability.is_reachable(&node) {
            self.state.reachability = self.state.reachability.unreachable_change(node.clone());
            self.unreachable_since.insert(node, now);
            events.push(ClusterEvent::UnreachableMember(member));
        }
        self.check_leader_changed(&mut events);
        events
    }

    fn leader_actions(
        &mut self,
        downing_decisions: HashSet<UniqueAddress>,
        now: i64,
        settings: &MembershipSettings,
    ) -> Vec<ClusterEvent> {
        let mut events = vec![];
        let self_node = self.state.self_unique_address.clone();
        if !self.state.is_leader(&self_node) {
            return events;
        }
        let ttl = settings.tombstone_ttl.as_millis() as i64;
        self.state.latest_gossip = self.state.latest_gossip.prune_tombstones(now - ttl);

        for node in downing_decisions {
            self.down(node, &mut events);
        }
        self.promote(now, settings, &mut events);
        self.advance_leaving(&mut events);
        self.prune_removable(now, &mut events);
        self.check_leader_changed(&mut events);
        events
    }

    fn promote(&mut self, now: i64, settings: &MembershipSettings, events: &mut Vec<ClusterEvent>) {
        let self_dc = self.state.self_dc.clone();
        if self.state.reachability.is_all_reachable() {
            let mut candidates: Vec<Member> = self
                .state
                .members()
                .iter()
                .filter(|m| {
                    m.data_center() == self_dc
                        && matches!(m.status, MemberStatus::Joining | MemberStatus::WeaklyUp)
                })
                .cloned()
                .collect();
            self.sort_by_join_order(&mut candidates);
            for candidate in candidates {
                let up_number = self.up_number_counter;
                match candidate.promote_to_up(up_number) {
                    Ok(promoted) => {
                        self.up_number_counter += 1;
                        self.state.latest_gossip = self.state.latest_gossip.update(promoted.clone());
                        events.push(ClusterEvent::MemberUp(promoted));
                    }
                    Err(error) => self.poison(error),
                }
            }
        } else if settings.allow_weakly_up_members {
            let weakly_up_after = settings
                .weakly_up_after
                .map_or(i64::MAX, |d| d.as_millis() as i64);
            let mut candidates: Vec<Member> = self
                .state
                .members()
                .iter()
                .filter(|m| {
                    m.data_center() == self_dc
                        && matches!(m.status, MemberStatus::Joining)
                        && self.state.reachability.is_reachable(&m.unique_address)
                        && self
                            .joining_since
                            .get(&m.unique_address)
                            .map_or(false, |since| now - since >= weakly_up_after)
                })
                .cloned()
                .collect();
            self.sort_by_join_order(&mut candidates);
            for candidate in candidates
                .into_iter()
                .take(settings.weakly_up_batch_limit)
            {
                self.apply_transition(&candidate, MemberStatus::WeaklyUp, events);
            }
        }
    }

    fn advance_leaving(&mut self, events: &mut Vec<ClusterEvent>) {
        let leaving: Vec<Member> = self
            .state
            .members()
            .iter()
            .filter(|m| matches!(m.status, MemberStatus::Leaving))
            .filter(|m| self.acknowledged_by_all_others(&m.unique_address, &self.leaving_acks))
            .cloned()
            .collect();
        for member in leaving {
            self.apply_transition(&member, MemberStatus::Exiting, events);
        }
    }

    fn prune_removable(&mut self, now: i64, events: &mut Vec<ClusterEvent>) {
        let removable: Vec<Member> = self
            .state
            .members()
            .iter()
            .filter(|m| match m.status {
                MemberStatus::Down => true,
                MemberStatus::Exiting => {
                    self.acknowledged_by_all_others(&m.unique_address, &self.exiting_acks)
                        || !self.state.reachability.is_reachable(&m.unique_address)
                }
                _ => false,
            })
            .cloned()
            .collect();
        for member in removable {
            self.state.latest_gossip = self.state.latest_gossip.remove(&member.unique_address, now);
            self.forget(&member.unique_address);
            match member.with_status(MemberStatus::Removed) {
                Ok(removed) => events.push(ClusterEvent::MemberRemoved {
                    member: removed,
                    previous_status: member.status,
                }),
                Err(error) => self.poison(error),
            }
        }
    }

    /// Every current member except the affected node and the local node has
    /// acknowledged, the local node vouching by holding the status in its
    /// own view.
    fn acknowledged_by_all_others(
        &self,
        node: &UniqueAddress,
        acks: &HashMap<UniqueAddress, HashSet<UniqueAddress>>,
    ) -> bool {
        let acked = acks.get(node);
        self.state
            .members()
            .iter()
            .map(|m| &m.unique_address)
            .filter(|ua| *ua != node && **ua != self.state.self_unique_address)
            .all(|ua| acked.map_or(false, |acked| acked.contains(ua)))
    }

    fn down(&mut self, node: UniqueAddress, events: &mut Vec<ClusterEvent>) {
        let member = match self.state.latest_gossip.members.iter().find(|m| m.unique_address == node)
        {
            Some(member) => member.clone(),
            None => {
                debug!("ignoring downing of unknown node {}", node);
                return;
            }
        };
        if matches!(member.status, MemberStatus::Down | MemberStatus::Removed) {
            return;
        }
        self.apply_transition(&member, MemberStatus::Down, events);
    }

    fn apply_transition(
        &mut self,
        member: &Member,
        to: MemberStatus,
        events: &mut Vec<ClusterEvent>,
    ) {
        match member.with_status(to) {
            Ok(updated) => {
                self.state.latest_gossip = self.state.latest_gossip.update(updated.clone());
                if let Some(event) = ClusterEvent::from_status_change(&updated) {
                    events.push(event);
                }
            }
            Err(error) => self.poison(error),
        }
    }

    fn poison(&mut self, error: MembershipError) {
        self.poisoned = true;
        panic!("membership coordinator poisoned: {}", error);
    }

    fn forget(&mut self, node: &UniqueAddress) {
        self.state.reachability = self.state.reachability.remove([node]);
        self.joining_since.remove(node);
        self.unreachable_since.remove(node);
        self.leaving_acks.remove(node);
        self.exiting_acks.remove(node);
    }

    fn track_joining(&mut self, now: i64) {
        let mut still_waiting = HashSet::new();
        for member in &self.state.latest_gossip.members {
            if matches!(member.status, MemberStatus::Joining | MemberStatus::WeaklyUp) {
                still_waiting.insert(member.unique_address.clone());
                self.joining_since
                    .entry(member.unique_address.clone())
                    .or_insert(now);
            }
        }
        self.joining_since.retain(|node, _| still_waiting.contains(node));
    }

    fn sort_by_join_order(&self, candidates: &mut [Member]) {
        candidates.sort_by(|a, b| {
            let a_since = self
                .joining_since
                .get(&a.unique_address)
                .copied()
                .unwrap_or(i64::MAX);
            let b_since = self
                .joining_since
                .get(&b.unique_address)
                .copied()
                .unwrap_or(i64::MAX);
            a_since
                .cmp(&b_since)
                .then_with(|| crate::address::Address::ordering(a.address(), b.address()))
        });
    }

    fn check_leader_changed(&mut self, events: &mut Vec<ClusterEvent>) {
        let leader = self.state.leader().cloned();
        if leader != self.published_leader {
            self.published_leader = leader.clone();
            events.push(ClusterEvent::LeaderChanged(leader));
        }
    }

    fn current_state(&self) -> CurrentClusterState {
        let unreachable: HashSet<Member> =
            self.state.unreachable_members().into_iter().cloned().collect();
        let role_leader_map = self
            .state
            .members()
            .iter()
            .flat_map(|m| m.roles.iter())
            .filter(|role| !role.starts_with(MembershipSettings::dc_role_prefix()))
            .map(|role| {
                (
                    role.clone(),
                    self.state.role_leader(role).cloned(),
                )
            })
            .collect();
        CurrentClusterState {
            members: self.state.members().clone(),
            unreachable,
            leader: self.state.leader().cloned(),
            role_leader_map,
            member_tombstones: self
                .state
                .latest_gossip
                .tombstones
                .keys()
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet as StdHashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use config::{Config, File, FileFormat};

    use super::MembershipCoordinator;
    use crate::address::Address;
    use crate::clock::ManualClock;
    use crate::cluster_event::ClusterEvent;
    use crate::downing::downing_provider;
    use crate::gossip::{Gossip, GossipEnvelope};
    use crate::member::{Member, MemberStatus};
    use crate::settings::MembershipSettings;
    use crate::unique_address::UniqueAddress;
    use crate::version::AppVersion;

    fn ua(host: &str, port: u16, uid: i64) -> UniqueAddress {
        UniqueAddress::new(
            Address::new("tcp", "cluster", Some(host.to_string()), Some(port)),
            uid,
        )
    }

    fn roles() -> StdHashSet<String> {
        StdHashSet::from_iter(["dc-default".to_string()])
    }

    fn settings(toml: &str) -> MembershipSettings {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap();
        MembershipSettings::new(&config).unwrap()
    }

    fn test_settings(weakly_up: &str, downing: &str, auto_down: &str) -> MembershipSettings {
        settings(&format!(
            r#"
            [cluster]
            roles = []
            data-center = "default"
            app-version = "0.0.0"
            allow-weakly-up-members = {weakly_up}
            weakly-up-batch-limit = 1
            downing-provider-class = "{downing}"
            auto-down-unreachable-after = {auto_down}
            tombstone-ttl = {{ secs = 86400, nanos = 0 }}
            leader-actions-interval = {{ secs = 1, nanos = 0 }}
            gossip-interval = {{ secs = 1, nanos = 0 }}
            "#
        ))
    }

    fn coordinator(self_node: UniqueAddress, settings: MembershipSettings) -> (MembershipCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let downing = downing_provider(&settings).unwrap();
        let coordinator = MembershipCoordinator::with_collaborators(
            self_node,
            settings,
            clock.clone(),
            downing,
        );
        (coordinator, clock)
    }

    fn default_coordinator(self_node: UniqueAddress) -> (MembershipCoordinator, Arc<ManualClock>) {
        coordinator(
            self_node,
            test_settings("{ secs = 3, nanos = 0 }", "no-downing", "\"off\""),
        )
    }

    fn statuses(coordinator: &MembershipCoordinator) -> Vec<(UniqueAddress, MemberStatus, i32)> {
        coordinator
            .members()
            .iter()
            .map(|m| (m.unique_address.clone(), m.status, m.up_number))
            .collect()
    }

    /// A three-node cluster with the coordinator's own node as leader.
    fn three_up(
    ) -> (MembershipCoordinator, Arc<ManualClock>, UniqueAddress, UniqueAddress, UniqueAddress)
    {
        let a = ua("a", 2552, 1);
        let b = ua("b", 2552, 2);
        let c = ua("c", 2552, 3);
        let (coordinator, clock) = default_coordinator(a.clone());
        coordinator.self_join().unwrap();
        coordinator
            .join(b.clone(), roles(), AppVersion::zero().clone())
            .unwrap();
        coordinator
            .join(c.clone(), roles(), AppVersion::zero().clone())
            .unwrap();
        coordinator.leader_actions();
        (coordinator, clock, a, b, c)
    }

    #[test]
    fn promote_the_first_member_on_self_join() {
        let node = ua("a", 1000, 1);
        let (coordinator, _) = default_coordinator(node.clone());
        let events = coordinator.self_join().unwrap();
        assert!(matches!(events[0], ClusterEvent::MemberJoined(_)));
        assert_eq!(statuses(&coordinator), [(node.clone(), MemberStatus::Joining, i32::MAX)]);

        coordinator.leader_actions();
        assert_eq!(statuses(&coordinator), [(node.clone(), MemberStatus::Up, 1)]);
        assert_eq!(coordinator.leader(), Some(node));
    }

    #[test]
    fn assign_up_numbers_in_join_order() {
        let a = ua("a", 2552, 1);
        let b = ua("b", 2552, 2);
        let c = ua("c", 2552, 3);
        let (coordinator, clock) = default_coordinator(a.clone());
        coordinator.self_join().unwrap();
        clock.advance(Duration::from_millis(10));
        // b and c join at the same instant, the address order breaks the tie
        coordinator.join(c.clone(), roles(), AppVersion::zero().clone()).unwrap();
        coordinator.join(b.clone(), roles(), AppVersion::zero().clone()).unwrap();
        coordinator.leader_actions();
        assert_eq!(
            statuses(&coordinator),
            [
                (a, MemberStatus::Up, 1),
                (b, MemberStatus::Up, 2),
                (c, MemberStatus::Up, 3),
            ]
        );
    }

    #[test]
    fn ignore_leader_actions_on_non_leader_nodes() {
        let a = ua("a", 2552, 1);
        let b = ua("b", 2552, 2);
        let (coordinator, _) = default_coordinator(b.clone());
        coordinator.self_join().unwrap();
        coordinator.join(a.clone(), roles(), AppVersion::zero().clone()).unwrap();
        // the smaller address a is the leader, not this node
        assert_eq!(coordinator.leader(), Some(a));
        assert!(coordinator.leader_actions().is_empty());
        assert!(statuses(&coordinator)
            .iter()
            .all(|(_, status, _)| *status == MemberStatus::Joining));
    }

    #[test]
    fn promote_waiting_joiners_to_weakly_up_during_a_partition() {
        let (coordinator, clock, _a, b, _c) = three_up();
        let d = ua("d", 2552, 4);
        coordinator.join(d.clone(), roles(), AppVersion::zero().clone()).unwrap();
        coordinator.mark_node_as_unavailable(b.clone());
        assert!(!coordinator.is_convergence_possible());

        // not waited long enough yet
        coordinator.leader_actions();
        assert_eq!(coordinator.members().iter().find(|m| m.unique_address == d).unwrap().status, MemberStatus::Joining);

        clock.advance(Duration::from_secs(3));
        let events = coordinator.leader_actions();
        assert!(events
            .iter()
            .any(|e| matches!(e, ClusterEvent::MemberWeaklyUp(m) if m.unique_address == d)));

        // an unreachable WeaklyUp member is excluded from the convergence
        // requirement, unlike the unreachable Up member b
        coordinator.mark_node_as_available(b.clone());
        coordinator.mark_node_as_unavailable(d.clone());
        assert!(coordinator.is_convergence_possible());

        // after the partition heals the leader promotes to Up
        coordinator.mark_node_as_available(d.clone());
        let events = coordinator.leader_actions();
        assert!(events
            .iter()
            .any(|e| matches!(e, ClusterEvent::MemberUp(m) if m.unique_address == d)));
    }

    #[test]
    fn bound_weakly_up_promotions_per_tick() {
        let (coordinator, clock, _a, b, _c) = three_up();
        let d = ua("d", 2552, 4);
        let e = ua("e", 2552, 5);
        coordinator.join(d.clone(), roles(), AppVersion::zero().clone()).unwrap();
        coordinator.join(e.clone(), roles(), AppVersion::zero().clone()).unwrap();
        coordinator.mark_node_as_unavailable(b);
        clock.advance(Duration::from_secs(3));

        coordinator.leader_actions();
        let weakly_up = |coordinator: &MembershipCoordinator| {
            coordinator
                .members()
                .iter()
                .filter(|m| m.status == MemberStatus::WeaklyUp)
                .count()
        };
        assert_eq!(weakly_up(&coordinator), 1);
        coordinator.leader_actions();
        assert_eq!(weakly_up(&coordinator), 2);
    }

    #[test]
    fn keep_joiners_joining_when_weakly_up_is_off() {
        let a = ua("a", 2552, 1);
        let b = ua("b", 2552, 2);
        let (coordinator, clock) =
            coordinator(a.clone(), test_settings("\"off\"", "no-downing", "\"off\""));
        coordinator.self_join().unwrap();
        coordinator.leader_actions();
        coordinator.join(b.clone(), roles(), AppVersion::zero().clone()).unwrap();
        coordinator.mark_node_as_unavailable(b.clone());

        clock.advance(Duration::from_secs(3600));
        coordinator.leader_actions();
        let member = coordinator.members().iter().find(|m| m.unique_address == b).cloned().unwrap();
        assert_eq!(member.status, MemberStatus::Joining);
    }

    #[test]
    fn auto_down_and_remove_an_unreachable_member() {
        let a = ua("a", 2552, 1);
        let b = ua("b", 2552, 2);
        let c = ua("c", 2552, 3);
        let d = ua("d", 2552, 4);
        let (coordinator, clock) = coordinator(
            a.clone(),
            test_settings(
                "{ secs = 3, nanos = 0 }",
                "auto-down-unreachable",
                "{ secs = 5, nanos = 0 }",
            ),
        );
        coordinator.self_join().unwrap();
        for node in [&b, &c, &d] {
            coordinator.join(node.clone(), roles(), AppVersion::zero().clone()).unwrap();
        }
        coordinator.leader_actions();
        assert_eq!(coordinator.members().len(), 4);

        coordinator.mark_node_as_unavailable(d.clone());
        coordinator.leader_actions();
        assert_eq!(coordinator.members().len(), 4);

        clock.advance(Duration::from_secs(5));
        let events = coordinator.leader_actions();
        assert!(events
            .iter()
            .any(|e| matches!(e, ClusterEvent::MemberDowned(m) if m.unique_address == d)));
        assert!(events.iter().any(|e| matches!(
            e,
            ClusterEvent::MemberRemoved { member, previous_status: MemberStatus::Down }
                if member.unique_address == d
        )));
        assert_eq!(coordinator.members().len(), 3);
        assert!(coordinator.state().member_tombstones.contains(&d));
        assert!(coordinator.unreachable().is_empty());
        assert!(coordinator.is_convergence_possible());
    }

    #[test]
    fn never_readmit_a_tombstoned_node() {
        let (coordinator, _, _a, b, _c) = three_up();
        coordinator.apply_downing(b.clone());
        coordinator.leader_actions();
        assert!(coordinator.state().member_tombstones.contains(&b));

        // direct re-join is dropped
        coordinator.join(b.clone(), roles(), AppVersion::zero().clone()).unwrap();
        assert!(!coordinator.members().iter().any(|m| m.unique_address == b));

        // gossip from the tombstoned node is dropped
        let mut member = Member::joining(b.clone(), roles(), AppVersion::zero().clone()).unwrap();
        member.status = MemberStatus::Up;
        let envelope = GossipEnvelope::new(
            b.clone(),
            Gossip::new([member.clone()].into_iter().collect(), Default::default()),
        );
        assert!(coordinator.observe_gossip(envelope).is_empty());

        // gossip about the tombstoned node is dropped too
        let c = ua("c", 2552, 3);
        let envelope = GossipEnvelope::new(
            c,
            Gossip::new([member].into_iter().collect(), Default::default()),
        );
        coordinator.observe_gossip(envelope);
        assert!(!coordinator.members().iter().any(|m| m.unique_address == b));
    }

    #[test]
    fn merge_remote_views_idempotently() {
        let (coordinator, _, _a, b, c) = three_up();
        let mut remote_member = Member::joining(b.clone(), roles(), AppVersion::zero().clone()).unwrap();
        remote_member.status = MemberStatus::Leaving;
        remote_member.up_number = 2;
        let envelope = GossipEnvelope::new(
            c,
            Gossip::new([remote_member].into_iter().collect(), Default::default()),
        );
        let events = coordinator.observe_gossip(envelope.clone());
        assert!(events
            .iter()
            .any(|e| matches!(e, ClusterEvent::MemberLeft(m) if m.unique_address == b)));
        let again = coordinator.observe_gossip(envelope);
        assert!(again.is_empty());
    }

    #[test]
    fn reject_gossip_carrying_members_without_a_data_center_role() {
        let (coordinator, _, _a, _b, c) = three_up();
        let stranger = ua("x", 2552, 9);
        let mut rogue = Member::joining(stranger.clone(), roles(), AppVersion::zero().clone()).unwrap();
        rogue.roles = StdHashSet::from_iter(["backend".to_string()]);
        let envelope = GossipEnvelope::new(
            c,
            Gossip::new([rogue].into_iter().collect(), Default::default()),
        );
        assert!(coordinator.observe_gossip(envelope).is_empty());
        assert!(!coordinator.members().iter().any(|m| m.unique_address == stranger));
    }

    #[test]
    fn ignore_reachability_of_unknown_nodes() {
        let (coordinator, _) = default_coordinator(ua("a", 2552, 1));
        coordinator.self_join().unwrap();
        let stranger = ua("x", 2552, 99);
        assert!(coordinator.mark_node_as_unavailable(stranger).is_empty());
        assert!(coordinator.unreachable().is_empty());
    }

    #[test]
    fn ignore_downing_of_unknown_nodes() {
        let (coordinator, _) = default_coordinator(ua("a", 2552, 1));
        coordinator.self_join().unwrap();
        let stranger = ua("x", 2552, 99);
        assert!(coordinator.apply_downing(stranger).is_empty());
    }

    #[test]
    fn keep_status_on_reachability_flaps() {
        let (coordinator, _, _a, b, _c) = three_up();
        coordinator.mark_node_as_unavailable(b.clone());
        coordinator.mark_node_as_available(b.clone());
        coordinator.mark_node_as_unavailable(b.clone());
        let member = coordinator.members().iter().find(|m| m.unique_address == b).cloned().unwrap();
        assert_eq!(member.status, MemberStatus::Up);
        assert_eq!(coordinator.unreachable().len(), 1);
    }

    #[test]
    fn advance_leaving_members_once_all_others_acknowledged() {
        let (coordinator, _, a, b, c) = three_up();
        let events = coordinator.leave(b.clone());
        assert!(events
            .iter()
            .any(|e| matches!(e, ClusterEvent::MemberLeft(m) if m.unique_address == b)));

        // c has not seen the departure yet
        coordinator.leader_actions();
        let status_of = |coordinator: &MembershipCoordinator, node: &crate::unique_address::UniqueAddress| {
            coordinator
                .members()
                .iter()
                .find(|m| m.unique_address == *node)
                .map(|m| m.status)
        };
        assert_eq!(status_of(&coordinator, &b), Some(MemberStatus::Leaving));

        // c's view carries b as Leaving, acknowledging it
        let leaving_view = coordinator.gossip_snapshot().gossip;
        coordinator.observe_gossip(GossipEnvelope::new(c.clone(), leaving_view));
        let events = coordinator.leader_actions();
        assert!(events
            .iter()
            .any(|e| matches!(e, ClusterEvent::MemberExited(m) if m.unique_address == b)));
        assert_eq!(status_of(&coordinator, &b), Some(MemberStatus::Exiting));

        // once c has seen Exiting as well the leader removes b
        let exiting_view = coordinator.gossip_snapshot().gossip;
        coordinator.observe_gossip(GossipEnvelope::new(c.clone(), exiting_view));
        let events = coordinator.leader_actions();
        assert!(events.iter().any(|e| matches!(
            e,
            ClusterEvent::MemberRemoved { previous_status: MemberStatus::Exiting, member }
                if member.unique_address == b
        )));
        assert!(!coordinator.members().iter().any(|m| m.unique_address == b));
        assert!(coordinator.state().member_tombstones.contains(&b));
        assert_eq!(coordinator.leader(), Some(a));
    }

    #[test]
    fn publish_events_to_subscribers_after_commit() {
        let node = ua("a", 2552, 1);
        let (coordinator, _) = default_coordinator(node.clone());
        let mut events = coordinator.subscribe();
        coordinator.self_join().unwrap();
        coordinator.leader_actions();

        assert!(matches!(events.try_recv().unwrap(), ClusterEvent::MemberJoined(_)));
        assert!(matches!(events.try_recv().unwrap(), ClusterEvent::LeaderChanged(Some(leader)) if leader == node));
        assert!(matches!(events.try_recv().unwrap(), ClusterEvent::MemberUp(_)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn observe_identical_inputs_in_any_order_and_converge() {
        let a = ua("a", 2552, 1);
        let b = ua("b", 2552, 2);
        let mut up = Member::joining(b.clone(), roles(), AppVersion::zero().clone()).unwrap();
        up.status = MemberStatus::Up;
        up.up_number = 2;
        let mut leaving = up.clone();
        leaving.status = MemberStatus::Leaving;
        let first = GossipEnvelope::new(
            b.clone(),
            Gossip::new([up].into_iter().collect(), Default::default()),
        );
        let second = GossipEnvelope::new(
            b.clone(),
            Gossip::new([leaving].into_iter().collect(), Default::default()),
        );

        let (one, _) = default_coordinator(a.clone());
        one.self_join().unwrap();
        one.observe_gossip(first.clone());
        one.observe_gossip(second.clone());

        let (other, _) = default_coordinator(a.clone());
        other.self_join().unwrap();
        other.observe_gossip(second);
        other.observe_gossip(first);

        assert_eq!(statuses(&one), statuses(&other));
    }

    #[test]
    fn report_the_cluster_state_snapshot() {
        let (coordinator, _, a, b, _c) = three_up();
        coordinator.mark_node_as_unavailable(b.clone());
        let state = coordinator.state();
        assert_eq!(state.members.len(), 3);
        assert_eq!(state.leader, Some(a.clone()));
        assert_eq!(state.unreachable.len(), 1);
        assert!(state.member_tombstones.is_empty());
        assert_eq!(coordinator.oldest("default").map(|m| m.unique_address), Some(a));
    }
}
