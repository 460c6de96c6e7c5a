//! Reconciliation logic for SubnetSets.
//!
//! `Reconciler` holds the shared collaborators; the state machine itself
//! lives in [`subnet_set`].

pub mod subnet_set;

use crate::backoff::RequeueTracker;
use crate::cleanup::SubnetCleaner;
use crate::config::Config;
use crate::error::ControllerError;
use crate::lock::ResourceLockRegistry;
use crate::metrics::Metrics;
use crate::store::ClusterStore;
use crate::tags::TAG_SCOPE_SUBNETSET_UID;
use crds::{merge_condition, Condition, ConditionStatus, SubnetSet, SubnetSetStatus, CONDITION_READY};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use vpc_client::{VpcClientTrait, VpcSubnet};

/// Reconciles SubnetSets against the VPC backend.
pub struct Reconciler {
    pub(crate) vpc: Arc<dyn VpcClientTrait>,
    pub(crate) store: Arc<dyn ClusterStore>,
    pub(crate) cleaner: Arc<SubnetCleaner>,
    pub(crate) locks: Arc<ResourceLockRegistry>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) config: Arc<Config>,
    /// Requeue delays per object (namespace/name)
    requeue: RequeueTracker,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cluster", &self.config.cluster_name)
            .field("backing_off", &self.requeue.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler
    pub fn new(
        vpc: Arc<dyn VpcClientTrait>,
        store: Arc<dyn ClusterStore>,
        cleaner: Arc<SubnetCleaner>,
        locks: Arc<ResourceLockRegistry>,
        metrics: Arc<Metrics>,
        config: Arc<Config>,
    ) -> Self {
        let requeue = RequeueTracker::new(config.requeue_min, config.requeue_max);
        Self {
            vpc,
            store,
            cleaner,
            locks,
            metrics,
            config,
            requeue,
        }
    }

    /// Delay before the next attempt for `key`
    pub fn next_requeue(&self, key: &str) -> Duration {
        self.requeue.next_delay(key)
    }

    /// Clears the backoff of `key` after a clean reconciliation
    pub fn reset_requeue(&self, key: &str) {
        self.requeue.reset(key);
    }

    /// Backend Subnets tagged with the SubnetSet `uid`
    pub(crate) async fn owned_subnets(&self, uid: &str) -> Result<Vec<VpcSubnet>, ControllerError> {
        Ok(self.vpc.list_subnets_by_tag(TAG_SCOPE_SUBNETSET_UID, uid).await?)
    }

    /// Applies `mutate` to the status of `set` and writes it back if anything
    /// changed. Returns whether a write happened.
    pub(crate) async fn update_status<F>(&self, set: &SubnetSet, mutate: F) -> Result<bool, ControllerError>
    where
        F: FnOnce(&mut SubnetSetStatus),
    {
        let current = set.status.clone().unwrap_or_default();
        let mut next = current.clone();
        mutate(&mut next);
        if next == current {
            return Ok(false);
        }
        let namespace = set
            .namespace()
            .ok_or_else(|| ControllerError::MissingField("SubnetSet namespace".to_string()))?;
        self.store
            .patch_subnet_set_status(&namespace, &set.name_any(), &next)
            .await?;
        Ok(true)
    }

    /// Records `Ready=False` with `reason`. A failed status write is logged;
    /// the caller returns the original error either way.
    pub(crate) async fn mark_not_ready(&self, set: &SubnetSet, reason: &str, error: &ControllerError) {
        let condition = Condition::new(CONDITION_READY, ConditionStatus::False, reason, error.to_string());
        if let Err(e) = self
            .update_status(set, |status| {
                merge_condition(&mut status.conditions, condition);
            })
            .await
        {
            warn!(
                namespace = %set.namespace().unwrap_or_default(),
                name = %set.name_any(),
                error = %e,
                "Failed to record Ready=False"
            );
        }
    }
}

/// Requeue key of an object
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
