//! Validation errors for CRD specs

use thiserror::Error;

/// A spec value that can never be reconciled as written
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    /// `ipv4SubnetSize` is not a power of two
    #[error("ipv4SubnetSize {0} must be a power of 2")]
    NotPowerOfTwo(u32),

    /// `ipv4SubnetSize` is below the platform minimum
    #[error("ipv4SubnetSize {size} must be at least {min}")]
    BelowMinimum {
        /// Requested size
        size: u32,
        /// Platform minimum
        min: u32,
    },

    /// `subnetNames` used together with auto-provisioning fields
    #[error("subnetNames cannot be set together with accessMode, ipv4SubnetSize or subnetDHCPConfig")]
    MixedProvisioning,
}
