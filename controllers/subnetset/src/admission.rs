//! Admission checks for SubnetSet writes.
//!
//! `decide` is the whole validator: it takes the operation, the old and new
//! objects and the requester, and returns allow or deny with a reason. Any
//! lookup that fails denies the request.

use crate::allocator::{resolve_precreated_subnet, PortIndex};
use crate::config::Config;
use crate::error::ControllerError;
use crate::store::ClusterStore;
use crate::tags::TAG_SCOPE_SUBNETSET_UID;
use crds::{ProvisioningMode, SubnetSet};
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use vpc_client::VpcClientTrait;

/// Write being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Object creation
    Create,
    /// Spec or metadata update
    Update,
    /// Object deletion
    Delete,
}

/// One admission review
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Operation under review
    pub operation: Operation,
    /// Stored object (update, delete)
    pub old: Option<SubnetSet>,
    /// Submitted object (create, update)
    pub new: Option<SubnetSet>,
    /// Requesting user
    pub user: String,
}

/// Validator verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write accepted
    Allow,
    /// Write refused, with the reason shown to the requester
    Deny(String),
}

impl Decision {
    /// True for [`Decision::Allow`]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Validates SubnetSet writes before they are committed
pub struct AdmissionValidator {
    store: Arc<dyn ClusterStore>,
    vpc: Arc<dyn VpcClientTrait>,
    ports: Arc<PortIndex>,
    config: Arc<Config>,
}

impl std::fmt::Debug for AdmissionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionValidator")
            .field("system_identity", &self.config.system_identity)
            .finish_non_exhaustive()
    }
}

fn deny(reason: impl Into<String>) -> Result<Decision, ControllerError> {
    Ok(Decision::Deny(reason.into()))
}

fn missing(what: &str) -> ControllerError {
    ControllerError::MissingField(format!("admission request has no {} object", what))
}

impl AdmissionValidator {
    /// Creates a validator
    pub fn new(
        store: Arc<dyn ClusterStore>,
        vpc: Arc<dyn VpcClientTrait>,
        ports: Arc<PortIndex>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            vpc,
            ports,
            config,
        }
    }

    /// Decides whether `request` may be committed
    pub async fn decide(&self, request: &AdmissionRequest) -> Decision {
        let result = match request.operation {
            Operation::Create => match &request.new {
                Some(new) => self.validate_create(new, &request.user).await,
                None => Err(missing("new")),
            },
            Operation::Update => match (&request.old, &request.new) {
                (Some(old), Some(new)) => self.validate_update(old, new, &request.user).await,
                _ => Err(missing("old or new")),
            },
            Operation::Delete => match &request.old {
                Some(old) => self.validate_delete(old, &request.user).await,
                None => Err(missing("old")),
            },
        };

        let decision = result.unwrap_or_else(|e| Decision::Deny(e.to_string()));
        if let Decision::Deny(reason) = &decision {
            info!(operation = ?request.operation, user = %request.user, reason = %reason, "Denied SubnetSet write");
        } else {
            debug!(operation = ?request.operation, user = %request.user, "Allowed SubnetSet write");
        }
        decision
    }

    fn is_system(&self, user: &str) -> bool {
        user == self.config.system_identity
    }

    async fn validate_create(&self, new: &SubnetSet, user: &str) -> Result<Decision, ControllerError> {
        if let Some(size) = new.spec.ipv4_subnet_size {
            if !size.is_power_of_two() {
                return deny(format!("ipv4SubnetSize {} must be a power of 2", size));
            }
        }
        if let Err(e) = new.spec.check_exclusive() {
            return deny(e.to_string());
        }
        if new.is_default() && !self.is_system(user) {
            return deny(format!("default SubnetSet can only be created by {}", self.config.system_identity));
        }
        if let Some(names) = &new.spec.subnet_names {
            if let Some(reason) = self.check_single_vpc(new, names).await? {
                return deny(reason);
            }
        }
        self.check_access_mode(new).await
    }

    /// Pre-created Subnets must all live in one VPC
    async fn check_single_vpc(&self, set: &SubnetSet, names: &[String]) -> Result<Option<String>, ControllerError> {
        let namespace = set.namespace().unwrap_or_default();
        let mut vpcs = BTreeSet::new();
        let mut namespace_vpc: Option<Option<String>> = None;

        for name in names {
            let Some(subnet) = self.store.get_subnet(&namespace, name).await? else {
                return Ok(Some(format!("Subnet {}/{} does not exist", namespace, name)));
            };
            let vpc = match subnet.associated_vpc() {
                Some(path) => path.to_string(),
                None => {
                    if namespace_vpc.is_none() {
                        let candidates = self.vpc.list_vpc_candidates(&namespace).await?;
                        namespace_vpc = Some(candidates.into_iter().next().map(|v| v.path));
                    }
                    match namespace_vpc.as_ref().and_then(Option::as_ref) {
                        Some(path) => path.clone(),
                        None => return Ok(Some(format!("no VPC found for namespace {}", namespace))),
                    }
                }
            };
            vpcs.insert(vpc);
        }

        if vpcs.len() > 1 {
            let listed: Vec<String> = vpcs.into_iter().collect();
            return Ok(Some(format!(
                "Subnets in subnetNames belong to different VPCs: {}",
                listed.join(", ")
            )));
        }
        Ok(None)
    }

    async fn validate_update(&self, old: &SubnetSet, new: &SubnetSet, user: &str) -> Result<Decision, ControllerError> {
        if (old.is_default() || new.is_default()) && !self.is_system(user) {
            return deny(format!("default SubnetSet can only be updated by {}", self.config.system_identity));
        }
        if let Err(e) = new.spec.check_exclusive() {
            return deny(e.to_string());
        }

        // Once established, a mode is kept; dropping back to undetermined
        // would let the next update pick the other one.
        let old_mode = old.spec.provisioning_mode();
        let new_mode = new.spec.provisioning_mode();
        if old_mode != ProvisioningMode::Undetermined && old_mode != new_mode {
            return deny(format!(
                "provisioning mode cannot change from {:?} to {:?}",
                old_mode, new_mode
            ));
        }

        if let Some(old_names) = &old.spec.subnet_names {
            let new_names = new.spec.subnet_names.as_deref().unwrap_or_default();
            if new_names.is_empty() {
                return deny("subnetNames cannot be cleared once set");
            }
            let kept: BTreeSet<&String> = new_names.iter().collect();
            let namespace = new.namespace().unwrap_or_default();
            for removed in old_names.iter().filter(|n| !kept.contains(n)) {
                if let Some(reason) = self.removed_subnet_in_use(&namespace, removed).await? {
                    return deny(reason);
                }
            }
        }

        self.check_access_mode(new).await
    }

    /// Reason a Subnet dropped from `subnetNames` must stay, if any
    async fn removed_subnet_in_use(&self, namespace: &str, name: &str) -> Result<Option<String>, ControllerError> {
        let subnet = match resolve_precreated_subnet(self.store.as_ref(), self.vpc.as_ref(), namespace, name).await {
            Ok(subnet) => subnet,
            Err(ControllerError::SubnetNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if self.ports.is_claimed(&subnet.path) {
            return Ok(Some(format!("Subnet {} is still used by allocated ports", name)));
        }
        let ports = self.store.list_subnet_ports(namespace).await?;
        let attached = ports.iter().any(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.subnet_path.as_deref())
                .is_some_and(|path| path == subnet.path)
        });
        if attached {
            return Ok(Some(format!("Subnet {} is still used by a SubnetPort", name)));
        }
        Ok(None)
    }

    /// The access-mode restriction is not applied here: a SubnetSet admitted
    /// before its namespace became VLAN-backed must stay deletable.
    async fn validate_delete(&self, old: &SubnetSet, user: &str) -> Result<Decision, ControllerError> {
        if old.is_default() && !self.is_system(user) {
            return deny(format!("default SubnetSet can only be deleted by {}", self.config.system_identity));
        }

        let namespace = old.namespace().unwrap_or_default();
        let name = old.name_any();
        let ports = self.store.list_subnet_ports(&namespace).await?;
        if ports.iter().any(|p| p.spec.subnet_set.as_deref() == Some(name.as_str())) {
            return deny(format!("SubnetSet {}/{} still has SubnetPorts", namespace, name));
        }

        if let Some(uid) = old.uid() {
            for subnet in self.vpc.list_subnets_by_tag(TAG_SCOPE_SUBNETSET_UID, &uid).await? {
                if self.ports.is_claimed(&subnet.path) {
                    return deny(format!("Subnet {} of SubnetSet {} still has consumers", subnet.path, name));
                }
            }
        }

        if let Some(kind) = old.default_for() {
            let count = self.store.count_untyped_consumers(&namespace, kind).await?;
            if count > 0 {
                return deny(format!(
                    "default SubnetSet {}/{} still serves {} {} consumer(s)",
                    namespace,
                    name,
                    count,
                    kind.as_str()
                ));
            }
        }
        Ok(Decision::Allow)
    }

    /// Restricted network stacks refuse the configured access modes
    async fn check_access_mode(&self, set: &SubnetSet) -> Result<Decision, ControllerError> {
        let Some(mode) = set.spec.access_mode else {
            return Ok(Decision::Allow);
        };
        if !self.config.restricted_access_modes.contains(&mode) {
            return Ok(Decision::Allow);
        }
        let namespace = set.namespace().unwrap_or_default();
        let restricted = self
            .store
            .namespace_network(&namespace)
            .await?
            .is_some_and(|n| n.network_stack.is_restricted());
        if restricted {
            return deny(format!(
                "accessMode {} is not supported in namespace {} on a VLAN-backed VPC",
                mode.as_str(),
                namespace
            ));
        }
        Ok(Decision::Allow)
    }
}
