//! VPCNetworkConfiguration CRD
//!
//! Cluster-scoped network defaults. Namespaces select one through the
//! `network.microscaler.io/vpc-network-config` annotation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "VPCNetworkConfiguration",
    shortname = "vpcnetconfig"
)]
#[serde(rename_all = "camelCase")]
pub struct VPCNetworkConfigurationSpec {
    /// Default `ipv4SubnetSize` for SubnetSets that leave it unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_subnet_size: Option<u32>,

    /// Network stack of namespaces using this configuration
    #[serde(default)]
    pub network_stack: NetworkStack,

    /// Pre-created VPC path, if not auto-created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc: Option<String>,
}

/// Network stack of a namespace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum NetworkStack {
    /// Full VPC networking
    #[default]
    FullStackVPC,
    /// VPC over VLAN-backed segments; restricted access modes
    VLANBackedVPC,
}

impl NetworkStack {
    /// True for stacks that only accept a subset of access modes
    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::VLANBackedVPC)
    }
}
