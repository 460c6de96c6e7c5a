//! SubnetSet reconciliation.
//!
//! One pass per notification:
//! 1. gone from the API: remove the backend Subnets it left behind
//! 2. keep the finalizer in step with the binding maps targeting it
//! 3. marked for deletion: delete owned Subnets unless still in use
//! 4. live: default and validate the spec
//! 5. push regenerated tags and DHCP mode to owned Subnets
//! 6. report Ready
//!
//! Passes for one object never overlap, whichever watcher delivers them.
//! Steps 3 to 6 hold the write lock of the SubnetSet UID, so allocations
//! wait for deletion and for spec changes to settle.

use super::{object_key, Reconciler};
use crate::error::ControllerError;
use crate::tags::{self, TAG_SCOPE_CLUSTER, TAG_SCOPE_NAMESPACE, TAG_SCOPE_SUBNETSET_NAME};
use crds::{
    merge_condition, remove_condition, validate_subnet_size, AccessMode, Condition, ConditionStatus, DhcpMode,
    ProvisioningMode, SubnetInfo, SubnetSet, CONDITION_DELETE_FAILURE, CONDITION_READY,
};
use kube::ResourceExt;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use vpc_client::VpcSubnet;

impl Reconciler {
    /// Reconciles the SubnetSet `namespace/name`
    pub async fn reconcile_subnet_set(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        debug!(namespace = %namespace, name = %name, "Reconciling SubnetSet");
        let _serial = self.locks.acquire_write(&object_key(namespace, name)).await;

        let Some(set) = self.store.get_subnet_set(namespace, name).await? else {
            return self.cleanup_removed(namespace, name).await;
        };

        let set = self.sync_finalizer(set).await?;
        let uid = set
            .uid()
            .ok_or_else(|| ControllerError::MissingField("SubnetSet uid".to_string()))?;
        let _guard = self.locks.acquire_write(&uid).await;

        if set.is_deleting() {
            return self.delete_subnet_set(&set).await;
        }

        let result = self.reconcile_live(set).await;
        self.metrics.record_reconcile(result.is_ok());
        result
    }

    async fn reconcile_live(&self, set: SubnetSet) -> Result<(), ControllerError> {
        let set = self.apply_defaults(set).await?;
        let owned = self.sync_backend_tags(&set).await?;
        self.mark_ready(&set, &owned).await
    }

    /// Deletes the backend Subnets of a SubnetSet that no longer exists,
    /// sparing any still claimed by a live SubnetSet.
    ///
    /// The backend is listed before the live SubnetSets: a Subnet created for
    /// a recreated SubnetSet after that listing is never a candidate.
    async fn cleanup_removed(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let candidates = self.vpc.list_subnets_by_tag(TAG_SCOPE_SUBNETSET_NAME, name).await?;

        let live: HashSet<String> = self
            .store
            .list_subnet_sets()
            .await?
            .iter()
            .filter_map(|s| s.uid())
            .collect();

        let leftovers: Vec<VpcSubnet> = candidates
            .into_iter()
            .filter(|s| s.tag_value(TAG_SCOPE_NAMESPACE) == Some(namespace))
            .filter(|s| s.tag_value(TAG_SCOPE_CLUSTER) == Some(self.config.cluster_name.as_str()))
            .filter(|s| tags::owner_uid(s).is_some_and(|uid| !live.contains(uid)))
            .collect();

        if leftovers.is_empty() {
            debug!(namespace = %namespace, name = %name, "SubnetSet is gone and left no Subnets behind");
            return Ok(());
        }

        info!(
            namespace = %namespace,
            name = %name,
            count = leftovers.len(),
            "SubnetSet is gone, deleting its Subnets"
        );
        let result = self.cleaner.delete_subnets(&leftovers, false).await.into_result();
        self.metrics.record_delete(result.is_ok());
        result.map(|_| ())
    }

    /// Adds the finalizer while a binding map targets the SubnetSet and
    /// removes it once none does.
    async fn sync_finalizer(&self, mut set: SubnetSet) -> Result<SubnetSet, ControllerError> {
        let namespace = set.namespace().unwrap_or_default();
        let name = set.name_any();
        let bindings = self.store.list_binding_maps_targeting(&namespace, &name).await?;
        let wanted = !bindings.is_empty();

        if !set.set_finalizer(wanted) {
            return Ok(set);
        }
        info!(
            namespace = %namespace,
            name = %name,
            binding_maps = bindings.len(),
            finalizer = wanted,
            "Updating SubnetSet finalizer"
        );
        self.store.replace_subnet_set(&set).await
    }

    async fn delete_subnet_set(&self, set: &SubnetSet) -> Result<(), ControllerError> {
        let namespace = set.namespace().unwrap_or_default();
        let name = set.name_any();
        let uid = set
            .uid()
            .ok_or_else(|| ControllerError::MissingField("SubnetSet uid".to_string()))?;
        let owned = self.owned_subnets(&uid).await?;

        let mut bound = Vec::new();
        for subnet in &owned {
            if !self.vpc.list_binding_maps_of_subnet(&subnet.path).await?.is_empty() {
                bound.push(ControllerError::BindingInUse(subnet.path.clone()));
            }
        }
        if let Some(err) = ControllerError::aggregate(bound) {
            warn!(namespace = %namespace, name = %name, error = %err, "SubnetSet deletion refused");
            self.record_delete_failure(set, "SubnetBindingInUse", &err).await;
            self.metrics.record_delete(false);
            return Err(err);
        }

        let report = self.cleaner.delete_subnets(&owned, false).await;
        let reason = if report.stale_port() {
            "StalePort"
        } else {
            "SubnetDeleteFailed"
        };
        match report.into_result() {
            Ok(deleted) => {
                info!(namespace = %namespace, name = %name, deleted = deleted.len(), "Deleted SubnetSet Subnets");
                self.metrics.record_delete(true);
                if !set.finalizers().is_empty() {
                    let cleared = self
                        .update_status(set, |status| {
                            remove_condition(&mut status.conditions, CONDITION_DELETE_FAILURE);
                            status.subnets.clear();
                        })
                        .await;
                    if let Err(e) = cleared {
                        warn!(namespace = %namespace, name = %name, error = %e, "Failed to update status after deletion");
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(namespace = %namespace, name = %name, error = %err, "SubnetSet deletion incomplete");
                self.record_delete_failure(set, reason, &err).await;
                self.metrics.record_delete(false);
                Err(err)
            }
        }
    }

    /// Sets `DeleteFailure`. Without any finalizer the object may already be
    /// gone, so nothing is written.
    async fn record_delete_failure(&self, set: &SubnetSet, reason: &str, error: &ControllerError) {
        if set.finalizers().is_empty() {
            return;
        }
        let condition = Condition::new(CONDITION_DELETE_FAILURE, ConditionStatus::True, reason, error.to_string());
        if let Err(e) = self
            .update_status(set, |status| {
                merge_condition(&mut status.conditions, condition);
            })
            .await
        {
            warn!(name = %set.name_any(), error = %e, "Failed to record DeleteFailure");
        }
    }

    /// Fills in `accessMode` and `ipv4SubnetSize` and validates the size.
    /// Pre-created SubnetSets are left alone.
    async fn apply_defaults(&self, mut set: SubnetSet) -> Result<SubnetSet, ControllerError> {
        if set.spec.provisioning_mode() == ProvisioningMode::PreCreated {
            return Ok(set);
        }
        let namespace = set.namespace().unwrap_or_default();
        let mut changed = false;

        if set.spec.access_mode.is_none() {
            set.spec.access_mode = Some(AccessMode::Private);
            changed = true;
        }

        if set.spec.ipv4_subnet_size.is_none() {
            let default_size = self
                .store
                .namespace_network(&namespace)
                .await?
                .and_then(|n| n.default_subnet_size);
            let Some(size) = default_size else {
                let err = ControllerError::NetworkConfigUnresolved(namespace);
                self.mark_not_ready(&set, "NetworkConfigUnresolved", &err).await;
                return Err(err);
            };
            set.spec.ipv4_subnet_size = Some(size);
            changed = true;
        }

        if let Some(size) = set.spec.ipv4_subnet_size {
            if let Err(e) = validate_subnet_size(size, self.config.min_subnet_size) {
                let err = ControllerError::from(e);
                self.mark_not_ready(&set, "InvalidSubnetSize", &err).await;
                return Err(err);
            }
        }

        if changed {
            info!(
                namespace = %namespace,
                name = %set.name_any(),
                access_mode = ?set.spec.access_mode,
                ipv4_subnet_size = ?set.spec.ipv4_subnet_size,
                "Defaulting SubnetSet spec"
            );
            set = self.store.replace_subnet_set(&set).await?;
        }
        Ok(set)
    }

    /// Pushes regenerated tags and the DHCP mode to every owned Subnet whose
    /// backend state differs. Returns the owned Subnets.
    async fn sync_backend_tags(&self, set: &SubnetSet) -> Result<Vec<VpcSubnet>, ControllerError> {
        let uid = set
            .uid()
            .ok_or_else(|| ControllerError::MissingField("SubnetSet uid".to_string()))?;
        let owned = self.owned_subnets(&uid).await?;
        if owned.is_empty() {
            return Ok(owned);
        }

        let generated = tags::build_subnet_set_tags(&self.config.cluster_name, set, self.config.max_subnet_tags)
            .and_then(|tags| {
                if tags.is_empty() {
                    Err(ControllerError::TagGeneration("no tags generated".to_string()))
                } else {
                    Ok(tags)
                }
            });
        let wanted = match generated {
            Ok(tags) => tags,
            Err(err) => {
                self.mark_not_ready(set, "TagGenerationFailed", &err).await;
                return Err(err);
            }
        };
        let dhcp_mode = set.spec.dhcp_mode().unwrap_or(DhcpMode::Deactivated).as_str();

        let mut errors = Vec::new();
        for subnet in &owned {
            let current_mode = subnet.subnet_dhcp_config.as_ref().map(|c| c.mode.as_str());
            if tags::same_tags(&subnet.tags, &wanted) && current_mode == Some(dhcp_mode) {
                continue;
            }
            match self.vpc.update_subnet(&subnet.path, wanted.clone(), dhcp_mode).await {
                Ok(()) => debug!(path = %subnet.path, "Updated Subnet tags"),
                Err(e) => errors.push(ControllerError::from(e)),
            }
        }

        if let Some(err) = ControllerError::aggregate(errors) {
            self.mark_not_ready(set, "SubnetUpdateFailed", &err).await;
            return Err(err);
        }
        Ok(owned)
    }

    async fn mark_ready(&self, set: &SubnetSet, owned: &[VpcSubnet]) -> Result<(), ControllerError> {
        let subnets: Vec<SubnetInfo> = owned
            .iter()
            .map(|s| SubnetInfo {
                path: s.path.clone(),
                network_addresses: s.ip_addresses.clone(),
            })
            .collect();
        let condition = Condition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "SubnetSetReady",
            "SubnetSet is ready",
        );

        let written = self
            .update_status(set, |status| {
                merge_condition(&mut status.conditions, condition);
                remove_condition(&mut status.conditions, CONDITION_DELETE_FAILURE);
                status.subnets = subnets;
            })
            .await?;
        if written {
            info!(namespace = %set.namespace().unwrap_or_default(), name = %set.name_any(), "SubnetSet is ready");
        }
        Ok(())
    }
}
