//! SubnetPort CRD
//!
//! A consumer port. It names either a `Subnet` or a `SubnetSet`; a port that
//! names neither is an untyped consumer served by the namespace default
//! VirtualMachine SubnetSet.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "SubnetPort",
    namespaced,
    status = "SubnetPortStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetPortSpec {
    /// Name of the Subnet to attach to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    /// Name of the SubnetSet to allocate from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_set: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetPortStatus {
    /// Backend path of the Subnet the port landed on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_path: Option<String>,

    /// Allocated address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl SubnetPortSpec {
    /// True when the port names neither a Subnet nor a SubnetSet
    pub fn is_untyped(&self) -> bool {
        self.subnet.is_none() && self.subnet_set.is_none()
    }
}
