//! Mock VpcClient for unit testing
//!
//! This module provides an in-memory implementation of VpcClientTrait that can
//! be used in unit tests without a running backend.

use crate::error::VpcError;
use crate::models::*;
use crate::vpc_trait::VpcClientTrait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock VpcClient for testing
///
/// Subnets are kept in path order so listings are deterministic.
#[derive(Clone, Default)]
pub struct MockVpcClient {
    pub(crate) subnets: Arc<Mutex<BTreeMap<String, VpcSubnet>>>,
    pub(crate) ports: Arc<Mutex<HashMap<String, Vec<SubnetPortInfo>>>>,
    pub(crate) vpcs: Arc<Mutex<HashMap<String, Vec<VpcInfo>>>>,
    pub(crate) binding_maps: Arc<Mutex<Vec<BackendBindingMap>>>,
    pub(crate) failing_deletes: Arc<Mutex<HashSet<String>>>,
    pub(crate) fail_all: Arc<Mutex<Option<String>>>,
    pub(crate) create_delay: Arc<Mutex<Option<Duration>>>,
    pub(crate) creates: Arc<AtomicUsize>,
    pub(crate) updates: Arc<Mutex<Vec<(String, Vec<Tag>, String)>>>,
    pub(crate) deleted: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for MockVpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockVpcClient")
            .field("creates", &self.creates.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MockVpcClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subnet to the mock store (for test setup)
    pub fn add_subnet(&self, subnet: VpcSubnet) {
        self.subnets.lock().unwrap().insert(subnet.path.clone(), subnet);
    }

    /// Attach `count` ports to the subnet at `path` (for test setup)
    pub fn set_port_count(&self, path: &str, count: usize) {
        let ports = (0..count)
            .map(|i| SubnetPortInfo {
                id: format!("port-{}", i),
                path: format!("{}/ports/port-{}", path, i),
                display_name: format!("port-{}", i),
                tags: Vec::new(),
            })
            .collect();
        self.ports.lock().unwrap().insert(path.to_string(), ports);
    }

    /// Register the VPCs a namespace may use (for test setup)
    pub fn set_vpcs(&self, namespace: &str, vpcs: Vec<VpcInfo>) {
        self.vpcs.lock().unwrap().insert(namespace.to_string(), vpcs);
    }

    /// Add a backend binding map (for test setup)
    pub fn add_binding_map(&self, binding: BackendBindingMap) {
        self.binding_maps.lock().unwrap().push(binding);
    }

    /// Make `delete_subnet` fail for `path`
    pub fn fail_delete(&self, path: &str) {
        self.failing_deletes.lock().unwrap().insert(path.to_string());
    }

    /// Make every call fail with an API error, or clear the failure with `None`
    pub fn fail_all(&self, message: Option<&str>) {
        *self.fail_all.lock().unwrap() = message.map(str::to_string);
    }

    /// Delay each `create_subnet` call, to widen race windows in tests
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    /// Number of subnets created through the client
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Paths deleted through the client, in order
    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// `(path, tags, dhcp_mode)` of every update, in order
    pub fn updates(&self) -> Vec<(String, Vec<Tag>, String)> {
        self.updates.lock().unwrap().clone()
    }

    /// Snapshot of a stored subnet
    pub fn subnet(&self, path: &str) -> Option<VpcSubnet> {
        self.subnets.lock().unwrap().get(path).cloned()
    }

    /// Number of stored subnets
    pub fn subnet_count(&self) -> usize {
        self.subnets.lock().unwrap().len()
    }

    /// Number of stored binding maps
    pub fn binding_map_count(&self) -> usize {
        self.binding_maps.lock().unwrap().len()
    }

    fn check_available(&self) -> Result<(), VpcError> {
        match self.fail_all.lock().unwrap().as_ref() {
            Some(message) => Err(VpcError::Api(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl VpcClientTrait for MockVpcClient {
    fn base_url(&self) -> &str {
        "http://mock-vpc"
    }

    async fn list_subnets_by_tag(&self, scope: &str, value: &str) -> Result<Vec<VpcSubnet>, VpcError> {
        self.check_available()?;
        Ok(self
            .subnets
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.tags.iter().any(|t| t.scope == scope && t.tag == value))
            .cloned()
            .collect())
    }

    async fn list_tagged_subnets(&self, scope: &str) -> Result<Vec<VpcSubnet>, VpcError> {
        self.check_available()?;
        Ok(self
            .subnets
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.tag_value(scope).is_some())
            .cloned()
            .collect())
    }

    async fn get_subnet_by_path(&self, path: &str) -> Result<Option<VpcSubnet>, VpcError> {
        self.check_available()?;
        Ok(self.subnets.lock().unwrap().get(path).cloned())
    }

    async fn create_subnet(&self, vpc: &VpcInfo, request: CreateSubnetRequest) -> Result<VpcSubnet, VpcError> {
        self.check_available()?;
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let path = format!("{}/subnets/{}", vpc.path, request.id);
        let subnet = VpcSubnet {
            id: request.id,
            path: path.clone(),
            display_name: request.display_name,
            ipv4_subnet_size: request.ipv4_subnet_size,
            ip_addresses: request.ip_addresses,
            access_mode: Some(request.access_mode),
            subnet_dhcp_config: Some(request.subnet_dhcp_config),
            tags: request.tags,
            parent_path: Some(vpc.path.clone()),
        };
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.subnets.lock().unwrap().insert(path, subnet.clone());
        Ok(subnet)
    }

    async fn update_subnet(&self, path: &str, tags: Vec<Tag>, dhcp_mode: &str) -> Result<(), VpcError> {
        self.check_available()?;
        let mut subnets = self.subnets.lock().unwrap();
        let subnet = subnets
            .get_mut(path)
            .ok_or_else(|| VpcError::NotFound(format!("Subnet {} not found", path)))?;
        subnet.tags = tags.clone();
        subnet.subnet_dhcp_config = Some(SubnetDhcpSettings {
            mode: dhcp_mode.to_string(),
        });
        self.updates
            .lock()
            .unwrap()
            .push((path.to_string(), tags, dhcp_mode.to_string()));
        Ok(())
    }

    async fn delete_subnet(&self, path: &str) -> Result<(), VpcError> {
        self.check_available()?;
        if self.failing_deletes.lock().unwrap().contains(path) {
            return Err(VpcError::Api(format!("DELETE {} failed: 500", path)));
        }
        self.subnets.lock().unwrap().remove(path);
        self.ports.lock().unwrap().remove(path);
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn list_ports_of_subnet(&self, subnet_path: &str) -> Result<Vec<SubnetPortInfo>, VpcError> {
        self.check_available()?;
        Ok(self
            .ports
            .lock()
            .unwrap()
            .get(subnet_path)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_vpc_candidates(&self, namespace: &str) -> Result<Vec<VpcInfo>, VpcError> {
        self.check_available()?;
        Ok(self
            .vpcs
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_binding_maps_of_subnet(&self, subnet_path: &str) -> Result<Vec<BackendBindingMap>, VpcError> {
        self.check_available()?;
        Ok(self
            .binding_maps
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.subnet_path == subnet_path)
            .cloned()
            .collect())
    }

    async fn delete_binding_map(&self, path: &str) -> Result<(), VpcError> {
        self.check_available()?;
        self.binding_maps.lock().unwrap().retain(|b| b.path != path);
        Ok(())
    }
}
