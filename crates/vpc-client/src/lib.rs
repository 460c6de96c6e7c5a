//! VPC Backend REST API Client
//!
//! A Rust client library for the network-virtualization backend that owns
//! VPC subnets, their ports and subnet connection binding maps.
//!
//! # Example
//!
//! ```no_run
//! use vpc_client::{VpcClient, VpcClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VpcClient::new(
//!     "https://vpc-manager.vpc-system:443".to_string(),
//!     "your-api-token".to_string(),
//! )?;
//!
//! // Subnets owned by a SubnetSet
//! let subnets = client.list_subnets_by_tag("subnetset_cr_uid", "2f1c...").await?;
//! for subnet in subnets {
//!     let ports = client.list_ports_of_subnet(&subnet.path).await?;
//!     println!("{} has {} ports", subnet.path, ports.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Subnets**: tag search, create, update tags/DHCP, delete
//! - **Ports**: per-subnet port listing for capacity checks
//! - **Pagination**: cursor-following listings
//! - **test-util**: in-memory `MockVpcClient`

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod vpc_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::VpcClient;
pub use common::HttpClient;
pub use error::VpcError;
pub use models::*;
pub use vpc_trait::VpcClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockVpcClient;
