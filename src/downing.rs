use std::collections::BTreeSet;
use std::fmt::Debug;
use std::time::Duration;

use ahash::{HashMap, HashSet, HashSetExt};
use anyhow::{anyhow, ensure};

use crate::member::{Member, MemberStatus};
use crate::membership_state::MembershipState;
use crate::settings::MembershipSettings;
use crate::unique_address::UniqueAddress;

/// Decides which unreachable nodes to declare `Down`. Called by the leader on
/// each leader tick, outside the coordinator lock; a decision is final and
/// not retried.
pub trait DowningPolicy: Debug + Send + Sync {
    fn nodes_to_down(
        &self,
        members: &BTreeSet<Member>,
        unreachable_since: &HashMap<UniqueAddress, i64>,
        now_millis: i64,
    ) -> HashSet<UniqueAddress>;
}

/// Leaves downing entirely to operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDowning;

impl DowningPolicy for NoDowning {
    fn nodes_to_down(
        &self,
        _members: &BTreeSet<Member>,
        _unreachable_since: &HashMap<UniqueAddress, i64>,
        _now_millis: i64,
    ) -> HashSet<UniqueAddress> {
        HashSet::new()
    }
}

/// Downs any node that has stayed unreachable longer than the configured
/// margin. Nodes already on the way out are left to the leader's removal
/// actions.
#[derive(Debug, Clone, Copy)]
pub struct AutoDowning {
    pub auto_down_unreachable_after: Duration,
}

impl DowningPolicy for AutoDowning {
    fn nodes_to_down(
        &self,
        members: &BTreeSet<Member>,
        unreachable_since: &HashMap<UniqueAddress, i64>,
        now_millis: i64,
    ) -> HashSet<UniqueAddress> {
        let margin = self.auto_down_unreachable_after.as_millis() as i64;
        members
            .iter()
            .filter(|m| {
                !MembershipState::remove_unreachable_with_member_status().contains(&m.status)
                    && !matches!(m.status, MemberStatus::Removed)
            })
            .filter_map(|m| {
                let since = unreachable_since.get(&m.unique_address)?;
                (now_millis - since >= margin).then(|| m.unique_address.clone())
            })
            .collect()
    }
}

pub const NO_DOWNING: &str = "no-downing";
pub const AUTO_DOWN_UNREACHABLE: &str = "auto-down-unreachable";

/// Selects the downing policy named by `downing-provider-class`.
pub fn downing_provider(
    settings: &MembershipSettings,
) -> anyhow::Result<Box<dyn DowningPolicy>> {
    match settings.downing_provider_class.as_str() {
        NO_DOWNING => Ok(Box::new(NoDowning)),
        AUTO_DOWN_UNREACHABLE => {
            ensure!(
                settings.auto_down_unreachable_after.is_some(),
                "auto-down-unreachable-after must be set for the {} downing provider",
                AUTO_DOWN_UNREACHABLE
            );
            let auto_down_unreachable_after = settings
                .auto_down_unreachable_after
                .ok_or(anyhow!("auto-down-unreachable-after is not found"))?;
            Ok(Box::new(AutoDowning {
                auto_down_unreachable_after,
            }))
        }
        other => Err(anyhow!("unknown downing provider class [{}]", other)),
    }
}
