//! Error types for lifecycle operations.

use crate::gateway::ClusterError;
use crate::registry::RegistryError;
use crate::storage::StorageError;
use thiserror::Error;

/// Infrastructure failures surfaced by the lifecycle orchestrator.
///
/// A launch conflict is not an error; see [`crate::lifecycle::LaunchOutcome`].
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Filesystem(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid assignment name '{name}': must be a single path segment")]
    InvalidAssignmentName { name: String },
}

/// Result type alias for lifecycle operations
pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;
