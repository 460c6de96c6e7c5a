//! Test utilities for unit testing the engine
//!
//! `MemoryStore` stands in for the Kubernetes API and `TestEnv` wires every
//! component against it and a `MockVpcClient`.

use crate::admission::AdmissionValidator;
use crate::allocator::{PortCountProbe, PortIndex, SubnetAllocator};
use crate::cleanup::SubnetCleaner;
use crate::config::Config;
use crate::error::ControllerError;
use crate::gc::GarbageCollector;
use crate::lock::ResourceLockRegistry;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::store::{ClusterStore, NamespaceNetwork};
use crate::tags;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vpc_client::{MockVpcClient, Tag, VpcClientTrait, VpcInfo, VpcSubnet};

/// Cluster name used by [`test_config`]
pub const TEST_CLUSTER: &str = "test-cluster";

/// Requester treated as the system identity by [`test_config`]
pub const SYSTEM_USER: &str = "system:serviceaccount:vpc-system:subnet-operator";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Callback run once after a SubnetSet listing is taken
#[derive(Default)]
pub struct ListHook(Mutex<Option<Box<dyn FnOnce() + Send>>>);

impl std::fmt::Debug for ListHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ListHook")
    }
}

/// In-memory `ClusterStore`
#[derive(Debug, Default)]
pub struct MemoryStore {
    subnet_sets: Mutex<BTreeMap<Key, SubnetSet>>,
    subnets: Mutex<BTreeMap<Key, Subnet>>,
    ports: Mutex<Vec<SubnetPort>>,
    binding_maps: Mutex<Vec<SubnetConnectionBindingMap>>,
    networks: Mutex<HashMap<String, NamespaceNetwork>>,
    untyped: Mutex<HashMap<(String, DefaultFor), usize>>,
    replaces: AtomicUsize,
    status_patches: AtomicUsize,
    after_list: ListHook,
}

impl MemoryStore {
    pub fn add_subnet_set(&self, set: SubnetSet) {
        let k = key(&set.namespace().unwrap_or_default(), &set.name_any());
        self.subnet_sets.lock().unwrap().insert(k, set);
    }

    pub fn remove_subnet_set(&self, namespace: &str, name: &str) {
        self.subnet_sets.lock().unwrap().remove(&key(namespace, name));
    }

    pub fn subnet_set(&self, namespace: &str, name: &str) -> Option<SubnetSet> {
        self.subnet_sets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn add_subnet(&self, subnet: Subnet) {
        let k = key(&subnet.namespace().unwrap_or_default(), &subnet.name_any());
        self.subnets.lock().unwrap().insert(k, subnet);
    }

    pub fn add_port(&self, port: SubnetPort) {
        self.ports.lock().unwrap().push(port);
    }

    pub fn add_binding_map(&self, map: SubnetConnectionBindingMap) {
        self.binding_maps.lock().unwrap().push(map);
    }

    pub fn clear_binding_maps(&self) {
        self.binding_maps.lock().unwrap().clear();
    }

    pub fn set_network(&self, namespace: &str, default_subnet_size: Option<u32>, network_stack: NetworkStack) {
        self.networks.lock().unwrap().insert(
            namespace.to_string(),
            NamespaceNetwork {
                default_subnet_size,
                network_stack,
            },
        );
    }

    pub fn set_untyped_consumers(&self, namespace: &str, kind: DefaultFor, count: usize) {
        self.untyped
            .lock()
            .unwrap()
            .insert((namespace.to_string(), kind), count);
    }

    /// Runs `hook` right after the next `list_subnet_sets` snapshot
    pub fn after_next_list(&self, hook: impl FnOnce() + Send + 'static) {
        *self.after_list.0.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn replace_count(&self) -> usize {
        self.replaces.load(Ordering::SeqCst)
    }

    pub fn status_patch_count(&self) -> usize {
        self.status_patches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClusterStore for MemoryStore {
    async fn get_subnet_set(&self, namespace: &str, name: &str) -> Result<Option<SubnetSet>, ControllerError> {
        Ok(self.subnet_set(namespace, name))
    }

    async fn list_subnet_sets(&self) -> Result<Vec<SubnetSet>, ControllerError> {
        let sets: Vec<SubnetSet> = self.subnet_sets.lock().unwrap().values().cloned().collect();
        let hook = self.after_list.0.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(sets)
    }

    async fn replace_subnet_set(&self, subnet_set: &SubnetSet) -> Result<SubnetSet, ControllerError> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        let k = key(&subnet_set.namespace().unwrap_or_default(), &subnet_set.name_any());
        let mut sets = self.subnet_sets.lock().unwrap();
        let current = sets
            .get(&k)
            .ok_or_else(|| ControllerError::SubnetSetNotFound(format!("{}/{}", k.0, k.1)))?;

        // The API server owns status and finishes deletion once no finalizer is left
        let mut stored = subnet_set.clone();
        stored.status = current.status.clone();
        if stored.is_deleting() && stored.finalizers().is_empty() {
            sets.remove(&k);
        } else {
            sets.insert(k, stored.clone());
        }
        Ok(stored)
    }

    async fn patch_subnet_set_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SubnetSetStatus,
    ) -> Result<(), ControllerError> {
        let mut sets = self.subnet_sets.lock().unwrap();
        let set = sets
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ControllerError::SubnetSetNotFound(format!("{}/{}", namespace, name)))?;
        set.status = Some(status.clone());
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_binding_maps_targeting(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<SubnetConnectionBindingMap>, ControllerError> {
        Ok(self
            .binding_maps
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.namespace().as_deref() == Some(namespace) && m.targets_subnet_set(name))
            .cloned()
            .collect())
    }

    async fn get_subnet(&self, namespace: &str, name: &str) -> Result<Option<Subnet>, ControllerError> {
        Ok(self.subnets.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn list_subnet_ports(&self, namespace: &str) -> Result<Vec<SubnetPort>, ControllerError> {
        Ok(self
            .ports
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn count_untyped_consumers(&self, namespace: &str, kind: DefaultFor) -> Result<usize, ControllerError> {
        Ok(self
            .untyped
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), kind))
            .copied()
            .unwrap_or(0))
    }

    async fn namespace_network(&self, namespace: &str) -> Result<Option<NamespaceNetwork>, ControllerError> {
        Ok(self.networks.lock().unwrap().get(namespace).cloned())
    }
}

/// Helper to create a SubnetSet with namespace and uid set
pub fn subnet_set(namespace: &str, name: &str, uid: &str, spec: SubnetSetSpec) -> SubnetSet {
    SubnetSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Marks `set` for deletion
pub fn deleting(mut set: SubnetSet) -> SubnetSet {
    set.metadata.deletion_timestamp = Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
    set
}

/// Helper to create a backend Subnet, tagged with `owner_uid` when given
pub fn vpc_subnet(path: &str, owner_uid: Option<&str>, size: u32) -> VpcSubnet {
    VpcSubnet {
        id: path.rsplit('/').next().unwrap_or_default().to_string(),
        path: path.to_string(),
        display_name: String::new(),
        ipv4_subnet_size: Some(size),
        ip_addresses: Vec::new(),
        access_mode: Some("Private".to_string()),
        subnet_dhcp_config: None,
        tags: owner_uid
            .map(|uid| vec![Tag::new(tags::TAG_SCOPE_SUBNETSET_UID, uid)])
            .unwrap_or_default(),
        parent_path: None,
    }
}

/// Backend Subnet carrying the full tag set generated for `set`
pub fn owned_subnet(path: &str, set: &SubnetSet, size: u32) -> VpcSubnet {
    let mut subnet = vpc_subnet(path, None, size);
    subnet.tags = tags::build_subnet_set_tags(TEST_CLUSTER, set, 26).unwrap();
    subnet
}

/// Helper to create a VPC candidate
pub fn vpc_info(id: &str) -> VpcInfo {
    VpcInfo {
        org_id: "default".to_string(),
        project_id: "default".to_string(),
        vpc_id: id.to_string(),
        path: format!("/orgs/default/projects/default/vpcs/{}", id),
    }
}

/// Helper to create a pre-created Subnet object realized at `path`
pub fn subnet_object(namespace: &str, name: &str, path: &str) -> Subnet {
    Subnet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("subnet-uid-{}", name)),
            annotations: Some(BTreeMap::from([(
                ASSOCIATED_RESOURCE_ANNOTATION.to_string(),
                path.to_string(),
            )])),
            ..Default::default()
        },
        spec: SubnetSpec::default(),
        status: None,
    }
}

/// Helper to create a SubnetPort
pub fn subnet_port(namespace: &str, name: &str, subnet_set: Option<&str>, subnet_path: Option<&str>) -> SubnetPort {
    SubnetPort {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: SubnetPortSpec {
            subnet: None,
            subnet_set: subnet_set.map(str::to_string),
        },
        status: Some(SubnetPortStatus {
            subnet_path: subnet_path.map(str::to_string),
            ip_address: None,
        }),
    }
}

/// Helper to create a binding map targeting the SubnetSet `target`
pub fn binding_map(namespace: &str, name: &str, target: &str) -> SubnetConnectionBindingMap {
    SubnetConnectionBindingMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: SubnetConnectionBindingMapSpec {
            subnet_name: format!("{}-child", name),
            target_subnet_set_name: Some(target.to_string()),
            target_subnet_name: None,
            vlan_traffic_tag: 100,
        },
    }
}

/// Configuration with test defaults
pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "VPC_API_TOKEN" => Some("test-token".to_string()),
        "CLUSTER_NAME" => Some(TEST_CLUSTER.to_string()),
        "SYSTEM_IDENTITY" => Some(SYSTEM_USER.to_string()),
        _ => None,
    })
    .unwrap()
}

/// Every component wired against a mock backend and an in-memory store
pub struct TestEnv {
    pub vpc: MockVpcClient,
    pub store: Arc<MemoryStore>,
    pub locks: Arc<ResourceLockRegistry>,
    pub ports: Arc<PortIndex>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
    pub cleaner: Arc<SubnetCleaner>,
    pub allocator: Arc<SubnetAllocator>,
    pub reconciler: Arc<Reconciler>,
}

impl TestEnv {
    pub fn new() -> Self {
        let vpc = MockVpcClient::new();
        let backend: Arc<dyn VpcClientTrait> = Arc::new(vpc.clone());
        let store = Arc::new(MemoryStore::default());
        let cluster: Arc<dyn ClusterStore> = store.clone();
        let locks = Arc::new(ResourceLockRegistry::new());
        let ports = Arc::new(PortIndex::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = Arc::new(test_config());

        let cleaner = Arc::new(SubnetCleaner::new(backend.clone(), locks.clone(), ports.clone()));
        let allocator = Arc::new(SubnetAllocator::new(
            backend.clone(),
            cluster.clone(),
            locks.clone(),
            ports.clone(),
            metrics.clone(),
            config.cluster_name.clone(),
            config.max_subnet_tags,
        ));
        let reconciler = Arc::new(Reconciler::new(
            backend,
            cluster,
            cleaner.clone(),
            locks.clone(),
            metrics.clone(),
            config.clone(),
        ));

        Self {
            vpc,
            store,
            locks,
            ports,
            metrics,
            config,
            cleaner,
            allocator,
            reconciler,
        }
    }

    fn backend(&self) -> Arc<dyn VpcClientTrait> {
        Arc::new(self.vpc.clone())
    }

    /// Capacity probe honoring the configured reserved addresses
    pub fn probe(&self) -> PortCountProbe {
        self.allocator.port_count_probe(self.config.reserved_ip_count)
    }

    /// Garbage collector over this environment
    pub fn gc(&self) -> GarbageCollector {
        GarbageCollector::new(
            self.backend(),
            self.store.clone(),
            self.cleaner.clone(),
            self.locks.clone(),
            self.metrics.clone(),
            self.config.clone(),
        )
    }

    /// Admission validator over this environment
    pub fn validator(&self) -> AdmissionValidator {
        AdmissionValidator::new(self.store.clone(), self.backend(), self.ports.clone(), self.config.clone())
    }
}
