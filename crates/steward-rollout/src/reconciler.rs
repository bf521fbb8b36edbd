//! VersionReconciler — turns live replicas plus desired state into a plan.
//!
//! The reconciler never acts; it returns which replicas to stop, replace,
//! reconfigure and how many to start. Version comparison is full
//! structural equality on [`DeploymentVersion`].

use std::collections::BTreeSet;

use tracing::debug;

use steward_state::{DeploymentVersion, ReplicaId};

use crate::strategy::{RollingConfig, batch_count};

/// A replica that is running or has been asked to start.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveReplica {
    pub replica_id: ReplicaId,
    pub version: DeploymentVersion,
    pub user_config: Option<serde_json::Value>,
    /// Assigned but not yet reported as started.
    pub starting: bool,
    /// Started in place of an outdated replica rather than to add capacity.
    pub replacement: bool,
}

/// What the deployment should look like.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub version: DeploymentVersion,
    pub user_config: Option<serde_json::Value>,
    pub target_replicas: u32,
}

/// Instructions for one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Every replica whose version differs from the desired one.
    pub outdated: BTreeSet<ReplicaId>,
    /// Outdated replicas to stop now and start replacements for.
    pub replace_now: Vec<ReplicaId>,
    /// Replicas on the desired version whose reconfigure payload differs.
    pub reconfigure: Vec<ReplicaId>,
    /// Surplus replicas to stop without replacement.
    pub to_stop: Vec<ReplicaId>,
    /// New replicas to start on the desired version.
    pub to_start: u32,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.replace_now.is_empty()
            && self.reconfigure.is_empty()
            && self.to_stop.is_empty()
            && self.to_start == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct VersionReconciler {
    strategy: RollingConfig,
}

impl VersionReconciler {
    pub fn new(strategy: RollingConfig) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &RollingConfig {
        &self.strategy
    }

    /// Plan one pass. `live` must be in creation order; when replicas have
    /// to go, outdated ones go first, then the newest.
    pub fn reconcile(&self, live: &[LiveReplica], desired: &DesiredState) -> ReconcilePlan {
        let outdated: BTreeSet<ReplicaId> = live
            .iter()
            .filter(|r| r.version != desired.version)
            .map(|r| r.replica_id.clone())
            .collect();

        // Stop order: outdated oldest-first, then current newest-first.
        let mut by_stop_priority: Vec<&LiveReplica> = live
            .iter()
            .filter(|r| outdated.contains(&r.replica_id))
            .collect();
        by_stop_priority.extend(live.iter().rev().filter(|r| !outdated.contains(&r.replica_id)));

        let target = desired.target_replicas as usize;
        let surplus = live.len().saturating_sub(target);
        let to_stop: Vec<ReplicaId> = by_stop_priority
            .iter()
            .take(surplus)
            .map(|r| r.replica_id.clone())
            .collect();
        let kept: Vec<&LiveReplica> = live
            .iter()
            .filter(|r| !to_stop.contains(&r.replica_id))
            .collect();

        // Replacements already in flight count against the batch; plain
        // scale-up starts do not.
        let in_flight = kept
            .iter()
            .filter(|r| r.starting && r.replacement && !outdated.contains(&r.replica_id))
            .count();
        let remaining_outdated: Vec<&LiveReplica> = kept
            .iter()
            .copied()
            .filter(|r| outdated.contains(&r.replica_id))
            .collect();
        let budget = if remaining_outdated.is_empty() {
            0
        } else {
            (self.strategy.batch_size as usize).saturating_sub(in_flight)
        };
        let replace_now: Vec<ReplicaId> = remaining_outdated
            .iter()
            .take(budget)
            .map(|r| r.replica_id.clone())
            .collect();

        let reconfigure: Vec<ReplicaId> = kept
            .iter()
            .filter(|r| !outdated.contains(&r.replica_id) && r.user_config != desired.user_config)
            .map(|r| r.replica_id.clone())
            .collect();

        let remaining = kept.len() - replace_now.len();
        let to_start = target.saturating_sub(remaining) as u32;

        let plan = ReconcilePlan {
            outdated,
            replace_now,
            reconfigure,
            to_stop,
            to_start,
        };
        if !plan.is_noop() {
            debug!(
                outdated = plan.outdated.len(),
                replace = plan.replace_now.len(),
                reconfigure = plan.reconfigure.len(),
                stop = plan.to_stop.len(),
                start = plan.to_start,
                batches_left = batch_count(remaining_outdated.len() as u32, self.strategy.batch_size),
                "reconcile plan"
            );
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use steward_state::{
        DeploymentConfig, DeploymentId, DeploymentInfo, PlacementStrategy, ReplicaConfig,
    };

    fn replica_config() -> ReplicaConfig {
        ReplicaConfig::new("shop.ranker:Ranker")
    }

    fn version_of(config: &DeploymentConfig, replica: &ReplicaConfig) -> DeploymentVersion {
        DeploymentVersion::new(config, replica)
    }

    fn live(ids: &[&str], version: &DeploymentVersion) -> Vec<LiveReplica> {
        ids.iter()
            .map(|id| LiveReplica {
                replica_id: id.to_string(),
                version: version.clone(),
                user_config: None,
                starting: false,
                replacement: false,
            })
            .collect()
    }

    fn desired(version: &DeploymentVersion, target: u32) -> DesiredState {
        DesiredState {
            version: version.clone(),
            user_config: None,
            target_replicas: target,
        }
    }

    #[test]
    fn converged_deployment_is_noop() {
        let v1 = version_of(&DeploymentConfig::default(), &replica_config());
        let plan = VersionReconciler::default().reconcile(&live(&["r0", "r1"], &v1), &desired(&v1, 2));
        assert!(plan.is_noop());
        assert!(plan.outdated.is_empty());
    }

    #[test]
    fn placement_change_marks_every_replica() {
        let base = replica_config();
        let v1 = version_of(&DeploymentConfig::default(), &base);

        // Round-trip the version through DeploymentInfo first.
        let info = DeploymentInfo::new(
            DeploymentId::new("shop", "ranker"),
            DeploymentConfig::default(),
            base.clone(),
            None,
            0,
        );
        let json = serde_json::to_vec(&info).unwrap();
        let restored: DeploymentInfo = serde_json::from_slice(&json).unwrap();
        let running = live(&["r0", "r1", "r2"], &restored.version);
        assert!(
            VersionReconciler::default()
                .reconcile(&running, &desired(&v1, 3))
                .outdated
                .is_empty()
        );

        let mut moved = base;
        moved.placement_group_strategy = Some(PlacementStrategy::StrictSpread);
        let v2 = version_of(&DeploymentConfig::default(), &moved);
        let plan = VersionReconciler::default().reconcile(&running, &desired(&v2, 3));
        assert_eq!(plan.outdated.len(), 3);
    }

    #[test]
    fn rolling_replacement_respects_batch_size() {
        let v1 = version_of(&DeploymentConfig::default(), &replica_config());
        let v2 = version_of(
            &DeploymentConfig {
                max_concurrent_queries: 5,
                ..Default::default()
            },
            &replica_config(),
        );
        let reconciler = VersionReconciler::new(RollingConfig::new(2));

        let plan = reconciler.reconcile(&live(&["r0", "r1", "r2"], &v1), &desired(&v2, 3));
        assert_eq!(plan.replace_now, vec!["r0".to_string(), "r1".to_string()]);
        assert_eq!(plan.to_start, 2);
        assert!(plan.to_stop.is_empty());

        // Two replacements still starting: no budget left this pass.
        let mut running = live(&["r2"], &v1);
        running.extend(live(&["r3", "r4"], &v2).into_iter().map(|mut r| {
            r.starting = true;
            r.replacement = true;
            r
        }));
        let plan = reconciler.reconcile(&running, &desired(&v2, 3));
        assert_eq!(plan.outdated.len(), 1);
        assert!(plan.replace_now.is_empty());
        assert_eq!(plan.to_start, 0);
    }

    #[test]
    fn scale_up_starts_do_not_use_the_rollout_budget() {
        let v1 = version_of(&DeploymentConfig::default(), &replica_config());
        let v2 = version_of(
            &DeploymentConfig {
                max_concurrent_queries: 5,
                ..Default::default()
            },
            &replica_config(),
        );
        let reconciler = VersionReconciler::new(RollingConfig::new(1));

        let mut running = live(&["r0"], &v1);
        running.extend(live(&["r1"], &v2).into_iter().map(|mut r| {
            r.starting = true;
            r
        }));
        running.extend(live(&["r2"], &v2));

        let plan = reconciler.reconcile(&running, &desired(&v2, 3));
        assert_eq!(plan.replace_now, vec!["r0".to_string()]);
        assert_eq!(plan.to_start, 1);
    }

    #[test]
    fn user_config_change_reconfigures_in_place() {
        let v1 = version_of(&DeploymentConfig::default(), &replica_config());
        let mut state = desired(&v1, 2);
        state.user_config = Some(serde_json::json!({"threshold": 0.7}));

        let plan = VersionReconciler::default().reconcile(&live(&["r0", "r1"], &v1), &state);
        assert!(plan.outdated.is_empty());
        assert!(plan.replace_now.is_empty());
        assert_eq!(plan.reconfigure, vec!["r0".to_string(), "r1".to_string()]);
    }

    #[test]
    fn scale_up_starts_missing_replicas() {
        let v1 = version_of(&DeploymentConfig::default(), &replica_config());
        let plan = VersionReconciler::default().reconcile(&live(&["r0"], &v1), &desired(&v1, 4));
        assert_eq!(plan.to_start, 3);
    }

    #[test]
    fn scale_down_stops_outdated_then_newest() {
        let v1 = version_of(&DeploymentConfig::default(), &replica_config());
        let mut init = replica_config();
        init.init_args = Some(serde_json::json!({"model": "b"}));
        let v2 = version_of(&DeploymentConfig::default(), &init);

        let mut running = live(&["r0", "r1", "r2"], &v2);
        running.insert(1, live(&["old"], &v1).remove(0));

        let plan = VersionReconciler::default().reconcile(&running, &desired(&v2, 2));
        assert_eq!(plan.to_stop, vec!["old".to_string(), "r2".to_string()]);
        assert!(plan.replace_now.is_empty());
        assert_eq!(plan.to_start, 0);
    }

    #[test]
    fn target_zero_stops_everything() {
        let v1 = version_of(&DeploymentConfig::default(), &replica_config());
        let plan = VersionReconciler::default().reconcile(&live(&["r0", "r1"], &v1), &desired(&v1, 0));
        assert_eq!(plan.to_stop.len(), 2);
        assert_eq!(plan.to_start, 0);
    }

    #[test]
    fn actor_options_are_part_of_the_version() {
        let base = replica_config();
        let v1 = version_of(&DeploymentConfig::default(), &base);
        let mut gpu = base;
        gpu.actor_options = BTreeMap::from([("num_gpus".to_string(), serde_json::json!(1))]);
        let v2 = version_of(&DeploymentConfig::default(), &gpu);
        assert_ne!(v1, v2);
    }
}
