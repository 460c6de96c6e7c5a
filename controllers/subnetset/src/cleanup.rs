//! Ordered deletion of backend Subnets.
//!
//! Each Subnet is handled under the write lock of its own path, never the
//! parent SubnetSet's, and only once it is confirmed to have no ports, no
//! indexed consumers and no claim still waiting for its port. One failing
//! Subnet does not stop the rest of the batch.

use crate::allocator::PortIndex;
use crate::error::ControllerError;
use crate::lock::ResourceLockRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vpc_client::{VpcClientTrait, VpcSubnet};

/// Outcome of one deletion batch
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Paths deleted
    pub deleted: Vec<String>,
    /// Paths skipped because ports are still attached
    pub in_use: Vec<String>,
    /// Paths whose deletion failed
    pub failed: Vec<String>,
    /// Errors collected along the way, including one per in-use Subnet
    pub errors: Vec<ControllerError>,
}

impl CleanupReport {
    /// True when any Subnet still had ports
    pub fn stale_port(&self) -> bool {
        !self.in_use.is_empty()
    }

    /// Collapses the report into one result
    pub fn into_result(self) -> Result<Vec<String>, ControllerError> {
        match ControllerError::aggregate(self.errors) {
            Some(err) => Err(err),
            None => Ok(self.deleted),
        }
    }
}

/// Deletes batches of backend Subnets
pub struct SubnetCleaner {
    vpc: Arc<dyn VpcClientTrait>,
    locks: Arc<ResourceLockRegistry>,
    ports: Arc<PortIndex>,
}

impl std::fmt::Debug for SubnetCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubnetCleaner").finish_non_exhaustive()
    }
}

enum Outcome {
    Deleted,
    Gone,
    InUse,
}

impl SubnetCleaner {
    /// Creates a cleaner
    pub fn new(vpc: Arc<dyn VpcClientTrait>, locks: Arc<ResourceLockRegistry>, ports: Arc<PortIndex>) -> Self {
        Self { vpc, locks, ports }
    }

    /// Deletes every Subnet of `subnets` that has no ports.
    ///
    /// With `delete_bindings`, backend binding maps referencing a Subnet are
    /// removed before the Subnet itself.
    pub async fn delete_subnets(&self, subnets: &[VpcSubnet], delete_bindings: bool) -> CleanupReport {
        let mut report = CleanupReport::default();
        for subnet in subnets {
            match self.delete_one(&subnet.path, delete_bindings).await {
                Ok(Outcome::Deleted) => report.deleted.push(subnet.path.clone()),
                Ok(Outcome::Gone) => debug!(path = %subnet.path, "Subnet already gone"),
                Ok(Outcome::InUse) => {
                    report.in_use.push(subnet.path.clone());
                    report.errors.push(ControllerError::StalePort(subnet.path.clone()));
                }
                Err(e) => {
                    warn!(path = %subnet.path, error = %e, "Failed to delete Subnet");
                    report.failed.push(subnet.path.clone());
                    report.errors.push(e);
                }
            }
        }
        report
    }

    async fn delete_one(&self, path: &str, delete_bindings: bool) -> Result<Outcome, ControllerError> {
        let _guard = self.locks.acquire_write(path).await;

        // Listings may be stale; decide on the current backend state
        if self.vpc.get_subnet_by_path(path).await?.is_none() {
            return Ok(Outcome::Gone);
        }

        let ports = self.vpc.list_ports_of_subnet(path).await?;
        let pending = self.ports.observe(path, ports.len() as u64);
        let consumers = self.ports.consumers_on(path);
        if !ports.is_empty() || !consumers.is_empty() || pending > 0 {
            info!(
                path = %path,
                ports = ports.len(),
                consumers = consumers.len(),
                pending,
                "Subnet still in use, skipping deletion"
            );
            return Ok(Outcome::InUse);
        }

        if delete_bindings {
            for binding in self.vpc.list_binding_maps_of_subnet(path).await? {
                debug!(path = %path, binding = %binding.path, "Deleting binding map");
                self.vpc.delete_binding_map(&binding.path).await?;
            }
        }

        self.vpc.delete_subnet(path).await?;
        info!(path = %path, "Deleted Subnet");
        Ok(Outcome::Deleted)
    }
}
