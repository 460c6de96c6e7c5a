//! SubnetConnectionBindingMap CRD
//!
//! Binds a child Subnet to a parent Subnet or SubnetSet over a VLAN tag. While
//! a binding map targets a SubnetSet, that SubnetSet carries a finalizer.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "network.microscaler.io",
    version = "v1alpha1",
    kind = "SubnetConnectionBindingMap",
    namespaced,
    shortname = "subnetbinding"
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetConnectionBindingMapSpec {
    /// Child Subnet being connected
    pub subnet_name: String,

    /// Parent SubnetSet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subnet_set_name: Option<String>,

    /// Parent Subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subnet_name: Option<String>,

    /// VLAN tag carried on the binding
    pub vlan_traffic_tag: i64,
}

impl SubnetConnectionBindingMap {
    /// True when this binding map targets the named SubnetSet
    pub fn targets_subnet_set(&self, name: &str) -> bool {
        self.spec.target_subnet_set_name.as_deref() == Some(name)
    }
}
