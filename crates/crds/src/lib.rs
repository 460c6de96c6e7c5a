//! Network CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the SubnetSet controller and
//! the consumers that allocate from it.

pub mod binding_map;
pub mod condition;
pub mod error;
pub mod labels;
pub mod network_config;
pub mod subnet;
pub mod subnet_port;
pub mod subnet_set;

pub use binding_map::*;
pub use condition::*;
pub use error::*;
pub use labels::*;
pub use network_config::*;
pub use subnet::*;
pub use subnet_port::*;
pub use subnet_set::*;
