//! Cluster-resource access.
//!
//! `ClusterStore` is the seam between the engine and the Kubernetes API so
//! that reconciler, allocator, collector and admission logic can be unit
//! tested against an in-memory store.

use crate::error::ControllerError;
use crds::{
    DefaultFor, NetworkStack, Subnet, SubnetConnectionBindingMap, SubnetPort, SubnetSet, SubnetSetStatus,
    VPCNetworkConfiguration, DEFAULT_NETWORK_CONFIG_ANNOTATION, NETWORK_CONFIG_ANNOTATION,
};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// Network settings in effect for a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceNetwork {
    /// Default `ipv4SubnetSize`
    pub default_subnet_size: Option<u32>,
    /// Network stack of the namespace
    pub network_stack: NetworkStack,
}

/// Cluster-resource operations used by the engine
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetches a SubnetSet; `None` when it does not exist
    async fn get_subnet_set(&self, namespace: &str, name: &str) -> Result<Option<SubnetSet>, ControllerError>;

    /// Every SubnetSet in scope
    async fn list_subnet_sets(&self) -> Result<Vec<SubnetSet>, ControllerError>;

    /// Replaces spec and metadata; conflicts surface as errors
    async fn replace_subnet_set(&self, subnet_set: &SubnetSet) -> Result<SubnetSet, ControllerError>;

    /// Writes the status subresource
    async fn patch_subnet_set_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SubnetSetStatus,
    ) -> Result<(), ControllerError>;

    /// Binding maps in `namespace` whose target is the SubnetSet `name`
    async fn list_binding_maps_targeting(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<SubnetConnectionBindingMap>, ControllerError>;

    /// Fetches a Subnet object; `None` when it does not exist
    async fn get_subnet(&self, namespace: &str, name: &str) -> Result<Option<Subnet>, ControllerError>;

    /// SubnetPorts in `namespace`
    async fn list_subnet_ports(&self, namespace: &str) -> Result<Vec<SubnetPort>, ControllerError>;

    /// Consumers in `namespace` that name no Subnet or SubnetSet and so land
    /// on the default SubnetSet for `kind`
    async fn count_untyped_consumers(&self, namespace: &str, kind: DefaultFor) -> Result<usize, ControllerError>;

    /// Network settings of `namespace`; `None` when no configuration applies
    async fn namespace_network(&self, namespace: &str) -> Result<Option<NamespaceNetwork>, ControllerError>;
}

/// `ClusterStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: Option<String>,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Creates a store; `namespace` restricts listings when set
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn subnet_sets(&self, namespace: &str) -> Api<SubnetSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Resolves the VPCNetworkConfiguration named by the namespace, falling
    /// back to the one annotated as default
    async fn network_configuration(
        &self,
        namespace: &str,
    ) -> Result<Option<VPCNetworkConfiguration>, ControllerError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let Some(ns) = namespaces.get_opt(namespace).await? else {
            return Ok(None);
        };

        let configs: Api<VPCNetworkConfiguration> = Api::all(self.client.clone());
        if let Some(name) = ns.annotations().get(NETWORK_CONFIG_ANNOTATION) {
            return Ok(configs.get_opt(name).await?);
        }

        let all = configs.list(&ListParams::default()).await?;
        Ok(all.items.into_iter().find(|c| {
            c.annotations()
                .get(DEFAULT_NETWORK_CONFIG_ANNOTATION)
                .is_some_and(|v| v == "true")
        }))
    }
}

#[async_trait::async_trait]
impl ClusterStore for KubeStore {
    async fn get_subnet_set(&self, namespace: &str, name: &str) -> Result<Option<SubnetSet>, ControllerError> {
        Ok(self.subnet_sets(namespace).get_opt(name).await?)
    }

    async fn list_subnet_sets(&self) -> Result<Vec<SubnetSet>, ControllerError> {
        let api: Api<SubnetSet> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn replace_subnet_set(&self, subnet_set: &SubnetSet) -> Result<SubnetSet, ControllerError> {
        let namespace = subnet_set
            .namespace()
            .ok_or_else(|| ControllerError::MissingField("SubnetSet namespace".to_string()))?;
        let name = subnet_set.name_any();
        debug!(namespace = %namespace, name = %name, "Replacing SubnetSet");
        Ok(self
            .subnet_sets(&namespace)
            .replace(&name, &PostParams::default(), subnet_set)
            .await?)
    }

    async fn patch_subnet_set_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SubnetSetStatus,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({ "status": status });
        self.subnet_sets(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_binding_maps_targeting(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<SubnetConnectionBindingMap>, ControllerError> {
        let api: Api<SubnetConnectionBindingMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter(|m| m.targets_subnet_set(name))
            .collect())
    }

    async fn get_subnet(&self, namespace: &str, name: &str) -> Result<Option<Subnet>, ControllerError> {
        let api: Api<Subnet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_subnet_ports(&self, namespace: &str) -> Result<Vec<SubnetPort>, ControllerError> {
        let api: Api<SubnetPort> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn count_untyped_consumers(&self, namespace: &str, kind: DefaultFor) -> Result<usize, ControllerError> {
        match kind {
            DefaultFor::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                let pods = api.list(&ListParams::default()).await?.items;
                Ok(pods.iter().filter(|p| consumes_pod_network(p)).count())
            }
            DefaultFor::VirtualMachine => Ok(self
                .list_subnet_ports(namespace)
                .await?
                .iter()
                .filter(|p| p.spec.is_untyped())
                .count()),
        }
    }

    async fn namespace_network(&self, namespace: &str) -> Result<Option<NamespaceNetwork>, ControllerError> {
        Ok(self.network_configuration(namespace).await?.map(|c| NamespaceNetwork {
            default_subnet_size: c.spec.default_subnet_size,
            network_stack: c.spec.network_stack,
        }))
    }
}

/// A running Pod that is not on the host network holds a port on the
/// default Pod SubnetSet
fn consumes_pod_network(pod: &Pod) -> bool {
    let host_network = pod.spec.as_ref().and_then(|s| s.host_network).unwrap_or(false);
    let finished = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
    !host_network && !finished
}
