//! Periodic garbage collection of backend Subnets.
//!
//! Independent of reconciliation events, each pass:
//! 1. deletes empty Subnets of live SubnetSets (scale-in)
//! 2. deletes empty Subnets of SubnetSets that no longer exist
//! 3. drops lock entries of identities that are gone
//!
//! Subnets with ports are skipped and counted as failures, never deleted.

use crate::cleanup::SubnetCleaner;
use crate::config::Config;
use crate::error::ControllerError;
use crate::lock::ResourceLockRegistry;
use crate::metrics::Metrics;
use crate::store::ClusterStore;
use crate::tags::{self, TAG_SCOPE_CLUSTER, TAG_SCOPE_NAMESPACE, TAG_SCOPE_SUBNETSET_UID};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vpc_client::{VpcClientTrait, VpcSubnet};

/// Outcome of one collection pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// Subnets deleted
    pub deleted: usize,
    /// Subnets skipped because of ports, or whose deletion failed
    pub failed: usize,
    /// Backend identities without a live SubnetSet
    pub orphaned_identities: usize,
    /// Lock entries reclaimed
    pub locks_reclaimed: usize,
}

/// Periodic sweep of backend Subnets against live SubnetSets
pub struct GarbageCollector {
    vpc: Arc<dyn VpcClientTrait>,
    store: Arc<dyn ClusterStore>,
    cleaner: Arc<SubnetCleaner>,
    locks: Arc<ResourceLockRegistry>,
    metrics: Arc<Metrics>,
    config: Arc<Config>,
}

impl std::fmt::Debug for GarbageCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarbageCollector")
            .field("interval", &self.config.gc_interval)
            .finish_non_exhaustive()
    }
}

impl GarbageCollector {
    /// Creates a collector
    pub fn new(
        vpc: Arc<dyn VpcClientTrait>,
        store: Arc<dyn ClusterStore>,
        cleaner: Arc<SubnetCleaner>,
        locks: Arc<ResourceLockRegistry>,
        metrics: Arc<Metrics>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            vpc,
            store,
            cleaner,
            locks,
            metrics,
            config,
        }
    }

    /// Runs a pass every `gc_interval` until `shutdown` turns true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        info!("Starting garbage collector (interval {:?})", self.config.gc_interval);
        let mut ticker = tokio::time::interval(self.config.gc_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.collect_once().await {
                        Ok(report) => info!(
                            deleted = report.deleted,
                            failed = report.failed,
                            orphaned_identities = report.orphaned_identities,
                            locks_reclaimed = report.locks_reclaimed,
                            "Garbage collection pass finished"
                        ),
                        Err(e) => warn!(error = %e, "Garbage collection pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stopping garbage collector");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Backend Subnets of this cluster (and watched namespace, if any)
    fn in_scope(&self, subnet: &VpcSubnet) -> bool {
        if subnet.tag_value(TAG_SCOPE_CLUSTER) != Some(self.config.cluster_name.as_str()) {
            return false;
        }
        match &self.config.watch_namespace {
            Some(ns) => subnet.tag_value(TAG_SCOPE_NAMESPACE) == Some(ns.as_str()),
            None => true,
        }
    }

    /// One collection pass
    pub async fn collect_once(&self) -> Result<GcReport, ControllerError> {
        let mut report = GcReport::default();

        let sets = self.store.list_subnet_sets().await?;
        let live: HashSet<String> = sets.iter().filter_map(|s| s.uid()).collect();

        for set in &sets {
            let Some(uid) = set.uid() else { continue };
            let owned = match self.vpc.list_subnets_by_tag(TAG_SCOPE_SUBNETSET_UID, &uid).await {
                Ok(owned) => owned,
                Err(e) => {
                    warn!(name = %set.name_any(), uid = %uid, error = %e, "Cannot list Subnets of SubnetSet");
                    report.failed += 1;
                    continue;
                }
            };
            if owned.is_empty() {
                continue;
            }
            let outcome = self.cleaner.delete_subnets(&owned, true).await;
            report.deleted += outcome.deleted.len();
            report.failed += outcome.in_use.len() + outcome.failed.len();
        }

        let mut orphans: BTreeMap<String, Vec<VpcSubnet>> = BTreeMap::new();
        for subnet in self.vpc.list_tagged_subnets(TAG_SCOPE_SUBNETSET_UID).await? {
            if !self.in_scope(&subnet) {
                continue;
            }
            if let Some(uid) = tags::owner_uid(&subnet).filter(|uid| !live.contains(*uid)) {
                orphans.entry(uid.to_string()).or_default().push(subnet);
            }
        }
        report.orphaned_identities = orphans.len();
        for (uid, subnets) in &orphans {
            debug!(uid = %uid, count = subnets.len(), "Deleting Subnets of orphaned SubnetSet");
            let outcome = self.cleaner.delete_subnets(subnets, true).await;
            report.deleted += outcome.deleted.len();
            report.failed += outcome.in_use.len() + outcome.failed.len();
        }

        report.locks_reclaimed = self.locks.retain_live(&live);

        self.metrics.record_gc(true, report.deleted);
        self.metrics.record_gc(false, report.failed);
        Ok(report)
    }
}
