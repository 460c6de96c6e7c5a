//! Well-known labels, annotations and finalizers
//!
//! These keys are shared between the SubnetSet controller, the admission
//! validator and anything else that creates or inspects SubnetSet objects.

/// API group of every CRD in this crate
pub const API_GROUP: &str = "network.microscaler.io";

/// Finalizer held on a SubnetSet while a binding map targets it
pub const SUBNETSET_FINALIZER: &str = "network.microscaler.io/subnetset-finalizer";

/// Marks a SubnetSet as the namespace default for a workload kind.
///
/// Values are `Pod` or `VirtualMachine` (see [`DefaultFor`]).
pub const DEFAULT_SUBNETSET_LABEL: &str = "network.microscaler.io/default-subnetset-for";

/// Well-known name of the default SubnetSet for Pods
pub const DEFAULT_POD_SUBNETSET: &str = "pod-default";

/// Well-known name of the default SubnetSet for VirtualMachines
pub const DEFAULT_VM_SUBNETSET: &str = "vm-default";

/// Explicit VPC association of a pre-created Subnet (VPC path)
pub const ASSOCIATED_VPC_ANNOTATION: &str = "network.microscaler.io/associated-vpc";

/// Backend path of the Subnet realized for a pre-created Subnet object
pub const ASSOCIATED_RESOURCE_ANNOTATION: &str = "network.microscaler.io/associated-resource";

/// Namespace annotation naming the VPCNetworkConfiguration in effect
pub const NETWORK_CONFIG_ANNOTATION: &str = "network.microscaler.io/vpc-network-config";

/// Marks the VPCNetworkConfiguration used by namespaces without an explicit one
pub const DEFAULT_NETWORK_CONFIG_ANNOTATION: &str = "network.microscaler.io/default";

/// Workload kind a default SubnetSet serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultFor {
    /// Pods in the namespace
    Pod,
    /// VirtualMachines (untyped SubnetPorts) in the namespace
    VirtualMachine,
}

impl DefaultFor {
    /// Parses the value of [`DEFAULT_SUBNETSET_LABEL`]
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "Pod" => Some(Self::Pod),
            "VirtualMachine" => Some(Self::VirtualMachine),
            _ => None,
        }
    }

    /// Resolves a well-known default SubnetSet name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            DEFAULT_POD_SUBNETSET => Some(Self::Pod),
            DEFAULT_VM_SUBNETSET => Some(Self::VirtualMachine),
            _ => None,
        }
    }

    /// Label value for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::VirtualMachine => "VirtualMachine",
        }
    }
}
