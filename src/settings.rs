use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, ensure};
use config::{Config, File, FileFormat, Value};
use serde::{Deserialize, Serialize};

use crate::version::AppVersion;
use crate::MEMBERSHIP_CONFIG;

/// Membership configuration, parsed from the `cluster` table. Defaults are
/// embedded from `membership.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipSettings {
    /// Roles of the local member, including the derived data center role.
    pub roles: HashSet<String>,
    pub self_data_center: String,
    pub app_version: AppVersion,
    /// `None` disables WeaklyUp promotion entirely.
    pub weakly_up_after: Option<Duration>,
    pub allow_weakly_up_members: bool,
    pub weakly_up_batch_limit: usize,
    pub downing_provider_class: String,
    pub auto_down_unreachable_after: Option<Duration>,
    pub tombstone_ttl: Duration,
    pub leader_actions_interval: Duration,
    pub gossip_interval: Duration,
}

impl MembershipSettings {
    pub fn dc_role_prefix() -> &'static str {
        "dc-"
    }

    pub fn default_data_center() -> &'static str {
        "default"
    }

    /// The embedded defaults.
    pub fn load() -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(MEMBERSHIP_CONFIG, FileFormat::Toml))
            .build()?;
        Self::new(&config)
    }

    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut cc = config.get_table("cluster")?;
        let mut roles: HashSet<String> = cc
            .remove("roles")
            .ok_or(anyhow!("roles is not found"))?
            .try_deserialize()?;
        ensure!(
            roles
                .iter()
                .all(|role| !role.starts_with(Self::dc_role_prefix())),
            "roles must not start with '{}' as that is reserved for the cluster data-center setting",
            Self::dc_role_prefix()
        );
        let self_data_center = cc
            .remove("data-center")
            .ok_or(anyhow!("data-center is not found"))?
            .into_string()?;
        ensure!(!self_data_center.is_empty(), "data-center must not be empty");
        roles.insert(format!("{}{}", Self::dc_role_prefix(), self_data_center));
        let app_version = cc
            .remove("app-version")
            .ok_or(anyhow!("app-version is not found"))?
            .into_string()?;
        let app_version = AppVersion::new(app_version)?;
        let weakly_up_after = cc
            .remove("allow-weakly-up-members")
            .ok_or(anyhow!("allow-weakly-up-members is not found"))?;
        let weakly_up_after = de_maybe_off(weakly_up_after)?;
        if let Some(weakly_up_after) = weakly_up_after {
            ensure!(
                weakly_up_after > Duration::ZERO,
                "allow-weakly-up-members must be greater than 0"
            );
        }
        let allow_weakly_up_members = weakly_up_after.is_some();
        let weakly_up_batch_limit: usize = cc
            .remove("weakly-up-batch-limit")
            .ok_or(anyhow!("weakly-up-batch-limit is not found"))?
            .try_deserialize()?;
        ensure!(
            weakly_up_batch_limit > 0,
            "weakly-up-batch-limit must be greater than 0"
        );
        let downing_provider_class = cc
            .remove("downing-provider-class")
            .ok_or(anyhow!("downing-provider-class is not found"))?
            .into_string()?;
        ensure!(
            !downing_provider_class.is_empty(),
            "downing-provider-class must not be empty"
        );
        let auto_down_unreachable_after = cc
            .remove("auto-down-unreachable-after")
            .ok_or(anyhow!("auto-down-unreachable-after is not found"))?;
        let auto_down_unreachable_after = de_maybe_off(auto_down_unreachable_after)?;
        if let Some(auto_down_unreachable_after) = auto_down_unreachable_after {
            ensure!(
                auto_down_unreachable_after > Duration::ZERO,
                "auto-down-unreachable-after must be greater than 0"
            );
        }
        let tombstone_ttl: Duration = cc
            .remove("tombstone-ttl")
            .ok_or(anyhow!("tombstone-ttl is not found"))?
            .try_deserialize()?;
        ensure!(
            tombstone_ttl > Duration::ZERO,
            "tombstone-ttl must be greater than 0"
        );
        let leader_actions_interval: Duration = cc
            .remove("leader-actions-interval")
            .ok_or(anyhow!("leader-actions-interval is not found"))?
            .try_deserialize()?;
        ensure!(
            leader_actions_interval > Duration::ZERO,
            "leader-actions-interval must be greater than 0"
        );
        let gossip_interval: Duration = cc
            .remove("gossip-interval")
            .ok_or(anyhow!("gossip-interval is not found"))?
            .try_deserialize()?;
        ensure!(
            gossip_interval > Duration::ZERO,
            "gossip-interval must be greater than 0"
        );
        let settings = Self {
            roles,
            self_data_center,
            app_version,
            weakly_up_after,
            allow_weakly_up_members,
            weakly_up_batch_limit,
            downing_provider_class,
            auto_down_unreachable_after,
            tombstone_ttl,
            leader_actions_interval,
            gossip_interval,
        };
        Ok(settings)
    }
}

/// A duration setting that may be disabled with the string `off`.
fn de_maybe_off(value: Value) -> anyhow::Result<Option<Duration>> {
    if let Ok(s) = value.clone().into_string() {
        if s == "off" {
            return Ok(None);
        }
    }
    Ok(Some(value.try_deserialize()?))
}
