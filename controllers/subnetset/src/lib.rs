//! SubnetSet Controller
//!
//! Lifecycle and allocation engine for VPC Subnets backing `SubnetSet`
//! objects:
//! - Lock registry: per-identity read/write locks shared by every worker
//! - Allocator: capacity-aware reuse-or-create of backend Subnets
//! - Reconciler: finalizer, defaulting, tag sync and guarded deletion
//! - Garbage collector: periodic sweep of orphaned backend Subnets
//! - Admission validator: rejects writes the reconciler cannot honor

pub mod admission;
pub mod allocator;
pub mod backoff;
pub mod cleanup;
pub mod config;
pub mod controller;
pub mod error;
pub mod gc;
pub mod lock;
pub mod metrics;
pub mod reconciler;
pub mod store;
pub mod tags;
pub mod watcher;

#[cfg(test)]
pub mod test_utils;
