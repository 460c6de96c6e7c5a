//! Controller configuration.
//!
//! Read once from the environment at start-up. Every variable except
//! `VPC_API_TOKEN` has a default.

use crate::error::ControllerError;
use crds::AccessMode;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration of the controller
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend base URL
    pub vpc_api_url: String,
    /// Backend bearer token
    pub vpc_api_token: String,
    /// Restrict watches to one namespace
    pub watch_namespace: Option<String>,
    /// Value of the `cluster` tag on backend resources
    pub cluster_name: String,
    /// Garbage collector period
    pub gc_interval: Duration,
    /// Concurrent reconciliations
    pub reconcile_concurrency: u16,
    /// Maximum number of tags on one backend Subnet
    pub max_subnet_tags: usize,
    /// Addresses per Subnet that can never be handed to a port
    pub reserved_ip_count: u64,
    /// Smallest accepted `ipv4SubnetSize`
    pub min_subnet_size: u32,
    /// Requester allowed to create, modify and delete default SubnetSets
    pub system_identity: String,
    /// Access modes refused in namespaces on a restricted network stack
    pub restricted_access_modes: Vec<AccessMode>,
    /// First requeue delay after a retryable failure
    pub requeue_min: Duration,
    /// Requeue delay cap
    pub requeue_max: Duration,
    /// Listen address of the metrics and probe endpoint
    pub metrics_addr: SocketAddr,
}

impl Config {
    /// Loads configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the value of a variable if set
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vpc_api_token = lookup("VPC_API_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig("VPC_API_TOKEN environment variable is required".to_string())
            })?;

        let restricted_access_modes = match lookup("RESTRICTED_ACCESS_MODES") {
            Some(raw) => parse_access_modes(&raw)?,
            None => vec![AccessMode::Public],
        };

        let config = Self {
            vpc_api_url: lookup("VPC_API_URL")
                .unwrap_or_else(|| "https://vpc-manager.vpc-system:443".to_string()),
            vpc_api_token,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            cluster_name: lookup("CLUSTER_NAME").unwrap_or_else(|| "default".to_string()),
            gc_interval: Duration::from_secs(parse_or(&lookup, "GC_INTERVAL_SECS", 600)?),
            reconcile_concurrency: parse_or(&lookup, "RECONCILE_CONCURRENCY", 8)?,
            max_subnet_tags: parse_or(&lookup, "MAX_SUBNET_TAGS", 26)?,
            reserved_ip_count: parse_or(&lookup, "RESERVED_IP_COUNT", 4)?,
            min_subnet_size: parse_or(&lookup, "MIN_SUBNET_SIZE", 16)?,
            system_identity: lookup("SYSTEM_IDENTITY")
                .unwrap_or_else(|| "system:serviceaccount:vpc-system:subnet-operator".to_string()),
            restricted_access_modes,
            requeue_min: Duration::from_secs(parse_or(&lookup, "REQUEUE_MIN_SECS", 5)?),
            requeue_max: Duration::from_secs(parse_or(&lookup, "REQUEUE_MAX_SECS", 300)?),
            metrics_addr: parse_or(&lookup, "METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.gc_interval.is_zero() {
            return Err(ControllerError::InvalidConfig("GC_INTERVAL_SECS must be positive".to_string()));
        }
        if self.reconcile_concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be positive".to_string(),
            ));
        }
        if self.max_subnet_tags == 0 {
            return Err(ControllerError::InvalidConfig("MAX_SUBNET_TAGS must be positive".to_string()));
        }
        if !self.min_subnet_size.is_power_of_two() {
            return Err(ControllerError::InvalidConfig(format!(
                "MIN_SUBNET_SIZE {} must be a power of 2",
                self.min_subnet_size
            )));
        }
        if self.requeue_min.is_zero() || self.requeue_min > self.requeue_max {
            return Err(ControllerError::InvalidConfig(format!(
                "REQUEUE_MIN_SECS ({}) must be positive and not above REQUEUE_MAX_SECS ({})",
                self.requeue_min.as_secs(),
                self.requeue_max.as_secs()
            )));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_access_modes(raw: &str) -> Result<Vec<AccessMode>, ControllerError> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| {
            AccessMode::parse(m).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("RESTRICTED_ACCESS_MODES: unknown access mode {:?}", m))
            })
        })
        .collect()
}
