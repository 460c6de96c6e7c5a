//! VPC API client
//!
//! Implements the backend REST API used by the SubnetSet controller.
//! Resources are addressed by their policy path, e.g.
//! `/orgs/default/projects/p1/vpcs/vpc1/subnets/web_1a2b3c4d`.

use crate::common::{HttpClient, API_PREFIX};
use crate::error::VpcError;
use crate::models::*;
use crate::vpc_trait::VpcClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// VPC API client
pub struct VpcClient {
    http: HttpClient,
}

impl std::fmt::Debug for VpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpcClient")
            .field("base_url", &self.http.base_url())
            .finish_non_exhaustive()
    }
}

impl VpcClient {
    /// Create a new VPC client
    ///
    /// # Arguments
    /// * `base_url` - backend base URL (e.g., "https://vpc-manager.vpc-system:443")
    /// * `token` - bearer token for authentication
    pub fn new(base_url: String, token: String) -> Result<Self, VpcError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(VpcError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }

    /// Validate the token and connectivity with a lightweight authenticated request.
    pub async fn validate_token(&self) -> Result<(), VpcError> {
        debug!("Validating VPC API token and connectivity");
        let _: serde_json::Value = self.http.get(&format!("{}/node/status", API_PREFIX)).await?;
        debug!("Token validated successfully");
        Ok(())
    }

    async fn search_subnets(&self, filters: &[(&str, &str)]) -> Result<Vec<VpcSubnet>, VpcError> {
        self.http
            .fetch_all_pages(&format!("{}/search/subnets", API_PREFIX), filters)
            .await
    }
}

#[async_trait::async_trait]
impl VpcClientTrait for VpcClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn list_subnets_by_tag(&self, scope: &str, value: &str) -> Result<Vec<VpcSubnet>, VpcError> {
        self.search_subnets(&[("tag_scope", scope), ("tag", value)]).await
    }

    async fn list_tagged_subnets(&self, scope: &str) -> Result<Vec<VpcSubnet>, VpcError> {
        self.search_subnets(&[("tag_scope", scope)]).await
    }

    async fn get_subnet_by_path(&self, path: &str) -> Result<Option<VpcSubnet>, VpcError> {
        match self.http.get::<VpcSubnet>(path).await {
            Ok(subnet) => Ok(Some(subnet)),
            Err(VpcError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_subnet(&self, vpc: &VpcInfo, request: CreateSubnetRequest) -> Result<VpcSubnet, VpcError> {
        let path = format!("{}/subnets/{}", vpc.path, request.id);
        let body = serde_json::to_value(&request)?;
        debug!(path = %path, "Creating subnet");
        self.http.put(&path, &body).await
    }

    async fn update_subnet(&self, path: &str, tags: Vec<Tag>, dhcp_mode: &str) -> Result<(), VpcError> {
        let body = serde_json::json!({
            "tags": tags,
            "subnet_dhcp_config": SubnetDhcpSettings { mode: dhcp_mode.to_string() },
        });
        self.http.patch(path, &body).await
    }

    async fn delete_subnet(&self, path: &str) -> Result<(), VpcError> {
        match self.http.delete(path).await {
            Err(VpcError::NotFound(_)) => {
                debug!(path = %path, "Subnet already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn list_ports_of_subnet(&self, subnet_path: &str) -> Result<Vec<SubnetPortInfo>, VpcError> {
        self.http.fetch_all_pages(&format!("{}/ports", subnet_path), &[]).await
    }

    async fn list_vpc_candidates(&self, namespace: &str) -> Result<Vec<VpcInfo>, VpcError> {
        self.http
            .fetch_all_pages(
                &format!("{}/search/vpcs", API_PREFIX),
                &[("tag_scope", "namespace"), ("tag", namespace)],
            )
            .await
    }

    async fn list_binding_maps_of_subnet(&self, subnet_path: &str) -> Result<Vec<BackendBindingMap>, VpcError> {
        self.http
            .fetch_all_pages(&format!("{}/subnet-connection-binding-maps", API_PREFIX), &[("subnet_path", subnet_path)])
            .await
    }

    async fn delete_binding_map(&self, path: &str) -> Result<(), VpcError> {
        match self.http.delete(path).await {
            Err(VpcError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}
