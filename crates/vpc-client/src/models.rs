//! VPC backend API models
//!
//! Field names follow the backend's snake_case JSON.

use crate::error::VpcError;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Cursor-paginated list wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ListResult<T> {
    #[serde(default)]
    pub results: Vec<T>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub result_count: u64,
}

/// A scope/value tag attached to a backend resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tag {
    pub scope: String,
    pub tag: String,
}

impl Tag {
    pub fn new(scope: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            tag: tag.into(),
        }
    }
}

/// DHCP settings of a backend subnet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetDhcpSettings {
    /// `DHCP_SERVER`, `DHCP_RELAY` or `DHCP_DEACTIVATED`
    pub mode: String,
}

/// Backend subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcSubnet {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub ipv4_subnet_size: Option<u32>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub access_mode: Option<String>,
    #[serde(default)]
    pub subnet_dhcp_config: Option<SubnetDhcpSettings>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub parent_path: Option<String>,
}

impl VpcSubnet {
    /// Value of the first tag with `scope`
    pub fn tag_value(&self, scope: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.scope == scope)
            .map(|t| t.tag.as_str())
    }

    /// Declared IPv4 capacity.
    ///
    /// Pinned CIDRs take precedence over `ipv4_subnet_size`.
    pub fn total_ip_count(&self) -> Result<u64, VpcError> {
        if self.ip_addresses.is_empty() {
            return self.ipv4_subnet_size.map(u64::from).ok_or_else(|| {
                VpcError::InvalidRequest(format!(
                    "subnet {} has neither ipv4_subnet_size nor ip_addresses",
                    self.path
                ))
            });
        }

        let mut total = 0u64;
        for cidr in &self.ip_addresses {
            let net: Ipv4Network = cidr.parse().map_err(|e| {
                VpcError::InvalidRequest(format!("subnet {} has invalid CIDR {}: {}", self.path, cidr, e))
            })?;
            total += 1u64 << (32 - u32::from(net.prefix()));
        }
        Ok(total)
    }
}

/// Port attached to a backend subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetPortInfo {
    pub id: String,
    pub path: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// A VPC a namespace may place subnets in
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VpcInfo {
    pub org_id: String,
    pub project_id: String,
    pub vpc_id: String,
    pub path: String,
}

/// Backend counterpart of a SubnetConnectionBindingMap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendBindingMap {
    pub id: String,
    pub path: String,
    /// Parent subnet the binding attaches to
    pub subnet_path: String,
    #[serde(default)]
    pub vlan_traffic_tag: i64,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Request body for creating a backend subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubnetRequest {
    pub id: String,
    pub display_name: String,
    pub access_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_subnet_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,
    pub subnet_dhcp_config: SubnetDhcpSettings,
    pub tags: Vec<Tag>,
}
