//! Controller-specific error types.
//!
//! Every error answers [`ControllerError::kind`], which is the only thing the
//! requeue policy looks at.

use crds::SpecError;
use kube::Error as KubeError;
use thiserror::Error;
use vpc_client::VpcError;

/// How a failure should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// Permanent until the object's spec changes
    Terminal,
    /// A safety check refused the operation; retried, since the blocking
    /// dependency is expected to go away
    Invariant,
    /// Backend or API hiccup, dependent state not ready yet
    Transient,
}

/// Errors that can occur in the SubnetSet Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// VPC backend error
    #[error("VPC backend error: {0}")]
    Vpc(#[from] VpcError),

    /// Spec value that can never be reconciled
    #[error("Invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),

    /// Object lacks metadata the operation depends on
    #[error("Missing field: {0}")]
    MissingField(String),

    /// SubnetSet disappeared mid-operation
    #[error("SubnetSet not found: {0}")]
    SubnetSetNotFound(String),

    /// Pre-created Subnet has no backend counterpart (yet)
    #[error("Subnet not found: {0}")]
    SubnetNotFound(String),

    /// Namespace network configuration cannot be resolved
    #[error("Network configuration for namespace {0} is not resolvable")]
    NetworkConfigUnresolved(String),

    /// Namespace has no VPC to place Subnets in
    #[error("No VPC found for namespace {0}")]
    VpcNotFound(String),

    /// Tags could not be built from the SubnetSet metadata
    #[error("Tag generation failed: {0}")]
    TagGeneration(String),

    /// More tags than the backend accepts
    #[error("Generated {count} tags, the limit is {max}")]
    TagOverflow {
        /// Tags generated
        count: usize,
        /// Configured limit
        max: usize,
    },

    /// Every candidate Subnet is full
    #[error("No Subnet with free capacity available in SubnetSet {0}")]
    NoSubnetAvailable(String),

    /// A freshly created Subnet refused the first claim
    #[error("Cannot allocate from Subnet {0} right after creating it")]
    CapacityAfterCreate(String),

    /// Subnet still has ports attached
    #[error("Subnet {0} still has ports attached")]
    StalePort(String),

    /// Backend binding maps still reference a Subnet
    #[error("Subnet {0} is still referenced by a SubnetConnectionBindingMap")]
    BindingInUse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry or endpoint failure
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Several independent failures from one batch
    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ControllerError>),
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// Combines batch failures; `None` when there were none.
    pub fn aggregate(mut errors: Vec<ControllerError>) -> Option<ControllerError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ControllerError::Aggregate(errors)),
        }
    }

    /// Retry class of this error. An aggregate takes the most retry-worthy
    /// kind among its members.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::Kube(_)
            | ControllerError::SubnetSetNotFound(_)
            | ControllerError::SubnetNotFound(_)
            | ControllerError::NetworkConfigUnresolved(_)
            | ControllerError::VpcNotFound(_)
            | ControllerError::NoSubnetAvailable(_)
            | ControllerError::CapacityAfterCreate(_)
            | ControllerError::Watch(_) => ErrorKind::Transient,
            ControllerError::Vpc(VpcError::InvalidRequest(_)) => ErrorKind::Terminal,
            ControllerError::Vpc(_) => ErrorKind::Transient,
            ControllerError::StalePort(_) | ControllerError::BindingInUse(_) => ErrorKind::Invariant,
            ControllerError::InvalidSpec(_)
            | ControllerError::MissingField(_)
            | ControllerError::TagGeneration(_)
            | ControllerError::TagOverflow { .. }
            | ControllerError::InvalidConfig(_)
            | ControllerError::Metrics(_) => ErrorKind::Terminal,
            ControllerError::Aggregate(errors) => errors
                .iter()
                .map(ControllerError::kind)
                .max()
                .unwrap_or(ErrorKind::Transient),
        }
    }

    /// False only for terminal errors
    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Terminal
    }
}
