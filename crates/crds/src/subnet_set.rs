//! SubnetSet CRD
//!
//! Declares a policy for one or more backend Subnets: either an explicit list
//! of pre-created `Subnet` objects (`subnetNames`) or an auto-provisioned pool
//! shaped by `accessMode`, `ipv4SubnetSize` and `subnetDHCPConfig`.

use crate::condition::Condition;
use crate::error::SpecError;
use crate::labels::{DEFAULT_SUBNETSET_LABEL, DefaultFor, SUBNETSET_FINALIZER};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "SubnetSet",
    namespaced,
    status = "SubnetSetStatus",
    shortname = "subnetset"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSetSpec {
    /// Visibility of auto-provisioned Subnets (defaults to `Private`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

    /// Size of each auto-provisioned Subnet (defaults from the namespace network configuration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_subnet_size: Option<u32>,

    /// DHCP configuration pushed to auto-provisioned Subnets
    #[serde(default, rename = "subnetDHCPConfig", skip_serializing_if = "Option::is_none")]
    pub subnet_dhcp_config: Option<SubnetDhcpConfig>,

    /// Names of pre-created `Subnet` objects in the same namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_names: Option<Vec<String>>,
}

/// Subnet visibility
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Reachable only inside the VPC
    Private,
    /// Reachable from outside the VPC
    Public,
    /// Reachable across the project transit gateway
    #[serde(rename = "PrivateTGW")]
    Project,
    /// Layer-2 only, no IP management
    L2Only,
}

impl AccessMode {
    /// Name as it appears in the CRD
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "Private",
            Self::Public => "Public",
            Self::Project => "PrivateTGW",
            Self::L2Only => "L2Only",
        }
    }

    /// Parses the CRD representation
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Private" => Some(Self::Private),
            "Public" => Some(Self::Public),
            "PrivateTGW" | "Project" => Some(Self::Project),
            "L2Only" => Some(Self::L2Only),
            _ => None,
        }
    }
}

/// DHCP settings of a Subnet
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetDhcpConfig {
    /// DHCP mode; unset leaves the backend default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DhcpMode>,
}

/// DHCP mode of a Subnet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum DhcpMode {
    /// Backend runs a DHCP server
    #[serde(rename = "DHCPServer")]
    Server,
    /// Backend relays DHCP
    #[serde(rename = "DHCPRelay")]
    Relay,
    /// No DHCP
    #[serde(rename = "DHCPDeactivated")]
    Deactivated,
}

impl DhcpMode {
    /// Backend representation of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "DHCP_SERVER",
            Self::Relay => "DHCP_RELAY",
            Self::Deactivated => "DHCP_DEACTIVATED",
        }
    }
}

/// Which of the two mutually exclusive modes a SubnetSet is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMode {
    /// Nothing set yet
    Undetermined,
    /// `subnetNames` set
    PreCreated,
    /// Any of `accessMode`, `ipv4SubnetSize`, `subnetDHCPConfig` set
    AutoProvisioned,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSetStatus {
    /// Ready / DeleteFailure conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Backend Subnets currently owned by this SubnetSet
    #[serde(default)]
    pub subnets: Vec<SubnetInfo>,
}

/// Summary of one backend Subnet
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetInfo {
    /// Backend path
    pub path: String,

    /// CIDRs of the Subnet, once realized
    #[serde(default)]
    pub network_addresses: Vec<String>,
}

impl SubnetSetSpec {
    /// True when any auto-provisioning field is set
    pub fn has_auto_fields(&self) -> bool {
        self.access_mode.is_some() || self.ipv4_subnet_size.is_some() || self.subnet_dhcp_config.is_some()
    }

    /// Current provisioning mode
    pub fn provisioning_mode(&self) -> ProvisioningMode {
        if self.subnet_names.is_some() {
            ProvisioningMode::PreCreated
        } else if self.has_auto_fields() {
            ProvisioningMode::AutoProvisioned
        } else {
            ProvisioningMode::Undetermined
        }
    }

    /// Rejects `subnetNames` combined with any auto-provisioning field
    pub fn check_exclusive(&self) -> Result<(), SpecError> {
        if self.subnet_names.is_some() && self.has_auto_fields() {
            return Err(SpecError::MixedProvisioning);
        }
        Ok(())
    }

    /// DHCP mode, if configured
    pub fn dhcp_mode(&self) -> Option<DhcpMode> {
        self.subnet_dhcp_config.as_ref().and_then(|c| c.mode)
    }
}

/// Checks that `size` is a power of two and at least `min`.
pub fn validate_subnet_size(size: u32, min: u32) -> Result<(), SpecError> {
    if !size.is_power_of_two() {
        return Err(SpecError::NotPowerOfTwo(size));
    }
    if size < min {
        return Err(SpecError::BelowMinimum { size, min });
    }
    Ok(())
}

impl SubnetSet {
    /// Workload kind this SubnetSet is the namespace default for, if any
    pub fn default_for(&self) -> Option<DefaultFor> {
        self.labels()
            .get(DEFAULT_SUBNETSET_LABEL)
            .and_then(|v| DefaultFor::from_label(v))
            .or_else(|| DefaultFor::from_name(&self.name_any()))
    }

    /// True for a namespace default SubnetSet
    pub fn is_default(&self) -> bool {
        self.default_for().is_some()
    }

    /// True when the SubnetSet finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == SUBNETSET_FINALIZER)
    }

    /// Adds or removes the finalizer; returns whether metadata changed.
    pub fn set_finalizer(&mut self, present: bool) -> bool {
        if present == self.has_finalizer() {
            return false;
        }
        let finalizers = self.finalizers_mut();
        if present {
            finalizers.push(SUBNETSET_FINALIZER.to_string());
        } else {
            finalizers.retain(|f| f != SUBNETSET_FINALIZER);
        }
        true
    }

    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn subnet_set(name: &str, spec: SubnetSetSpec) -> SubnetSet {
        let mut set = SubnetSet::new(name, spec);
        set.metadata.namespace = Some("ns1".to_string());
        set
    }

    #[test]
    fn test_provisioning_mode() {
        assert_eq!(SubnetSetSpec::default().provisioning_mode(), ProvisioningMode::Undetermined);

        let auto = SubnetSetSpec {
            ipv4_subnet_size: Some(32),
            ..Default::default()
        };
        assert_eq!(auto.provisioning_mode(), ProvisioningMode::AutoProvisioned);

        let pre = SubnetSetSpec {
            subnet_names: Some(vec!["a".to_string()]),
            ..Default::default()
        };
        assert_eq!(pre.provisioning_mode(), ProvisioningMode::PreCreated);
    }

    #[test]
    fn test_check_exclusive() {
        let mixed = SubnetSetSpec {
            access_mode: Some(AccessMode::Public),
            subnet_names: Some(vec!["a".to_string()]),
            ..Default::default()
        };
        assert_eq!(mixed.check_exclusive(), Err(SpecError::MixedProvisioning));
    }

    #[test]
    fn test_validate_subnet_size() {
        assert!(validate_subnet_size(16, 16).is_ok());
        assert!(validate_subnet_size(64, 16).is_ok());
        assert_eq!(validate_subnet_size(24, 16), Err(SpecError::NotPowerOfTwo(24)));
        assert_eq!(
            validate_subnet_size(8, 16),
            Err(SpecError::BelowMinimum { size: 8, min: 16 })
        );
    }

    #[test]
    fn test_default_for_label_and_name() {
        let mut labelled = subnet_set("custom", SubnetSetSpec::default());
        labelled.metadata.labels = Some(BTreeMap::from([(
            DEFAULT_SUBNETSET_LABEL.to_string(),
            "VirtualMachine".to_string(),
        )]));
        assert_eq!(labelled.default_for(), Some(DefaultFor::VirtualMachine));

        let named = subnet_set("pod-default", SubnetSetSpec::default());
        assert_eq!(named.default_for(), Some(DefaultFor::Pod));

        assert!(!subnet_set("plain", SubnetSetSpec::default()).is_default());
    }

    #[test]
    fn test_set_finalizer_is_idempotent() {
        let mut set = subnet_set("s", SubnetSetSpec::default());
        assert!(set.set_finalizer(true));
        assert!(!set.set_finalizer(true));
        assert!(set.has_finalizer());
        assert!(set.set_finalizer(false));
        assert!(!set.has_finalizer());
    }

    #[test]
    fn test_access_mode_serde_names() {
        let json = serde_json::to_string(&AccessMode::Project).unwrap();
        assert_eq!(json, "\"PrivateTGW\"");
        assert_eq!(AccessMode::parse("Public"), Some(AccessMode::Public));
        assert_eq!(AccessMode::parse("bogus"), None);
    }
}
