//! Subnet CRD
//!
//! A single, explicitly declared Subnet. SubnetSets in pre-created mode list
//! these objects by name in `subnetNames`.

use crate::condition::Condition;
use crate::labels::{ASSOCIATED_RESOURCE_ANNOTATION, ASSOCIATED_VPC_ANNOTATION};
use crate::subnet_set::{AccessMode, SubnetDhcpConfig};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "Subnet",
    namespaced,
    status = "SubnetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Visibility of the Subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,

    /// Number of addresses in the Subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_subnet_size: Option<u32>,

    /// Pinned CIDRs; overrides `ipv4SubnetSize` when set
    #[serde(default)]
    pub ip_addresses: Vec<String>,

    /// DHCP configuration
    #[serde(default, rename = "subnetDHCPConfig", skip_serializing_if = "Option::is_none")]
    pub subnet_dhcp_config: Option<SubnetDhcpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    /// Realized CIDRs
    #[serde(default)]
    pub network_addresses: Vec<String>,

    /// Gateway addresses
    #[serde(default)]
    pub gateway_addresses: Vec<String>,

    /// Ready condition
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Subnet {
    /// Explicit VPC association, if annotated
    pub fn associated_vpc(&self) -> Option<&str> {
        self.annotations().get(ASSOCIATED_VPC_ANNOTATION).map(String::as_str)
    }

    /// Backend path recorded on the object, if annotated
    pub fn associated_resource(&self) -> Option<&str> {
        self.annotations().get(ASSOCIATED_RESOURCE_ANNOTATION).map(String::as_str)
    }
}
