//! VpcClient trait for mocking
//!
//! This trait abstracts the VpcClient to enable mocking in unit tests.
//! The concrete VpcClient implements this trait, and tests can use the mock implementation.

use crate::error::VpcError;
use crate::models::*;

/// Trait for VPC backend operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait VpcClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    // Subnets
    async fn list_subnets_by_tag(&self, scope: &str, value: &str) -> Result<Vec<VpcSubnet>, VpcError>;
    /// Every subnet carrying a tag with `scope`, whatever its value
    async fn list_tagged_subnets(&self, scope: &str) -> Result<Vec<VpcSubnet>, VpcError>;
    async fn get_subnet_by_path(&self, path: &str) -> Result<Option<VpcSubnet>, VpcError>;
    async fn create_subnet(&self, vpc: &VpcInfo, request: CreateSubnetRequest) -> Result<VpcSubnet, VpcError>;
    async fn update_subnet(&self, path: &str, tags: Vec<Tag>, dhcp_mode: &str) -> Result<(), VpcError>;
    async fn delete_subnet(&self, path: &str) -> Result<(), VpcError>;

    // Ports
    async fn list_ports_of_subnet(&self, subnet_path: &str) -> Result<Vec<SubnetPortInfo>, VpcError>;

    // VPCs
    async fn list_vpc_candidates(&self, namespace: &str) -> Result<Vec<VpcInfo>, VpcError>;

    // Binding maps
    async fn list_binding_maps_of_subnet(&self, subnet_path: &str) -> Result<Vec<BackendBindingMap>, VpcError>;
    async fn delete_binding_map(&self, path: &str) -> Result<(), VpcError>;
}
