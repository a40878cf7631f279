//! Cluster gateway trait and common types.

use crate::spec::{EndpointSpec, WorkloadSpec};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub mod kube;
pub mod memory;

pub use self::kube::KubeGateway;
pub use memory::{GatewayCall, InMemoryGateway};

/// Object kinds the gateway manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    /// Grader Deployment
    Workload,
    /// Grader Service
    Endpoint,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workload => write!(f, "Deployment"),
            Self::Endpoint => write!(f, "Service"),
        }
    }
}

/// Errors that can occur during control-plane operations.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// An object with the same name already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// The API server rejected the call.
    #[error("Kubernetes API error on {kind} '{name}': {code} - {message}")]
    Api {
        kind: ResourceKind,
        name: String,
        code: u16,
        message: String,
    },

    /// The call never got an API answer (connection, TLS, decoding).
    #[error("Kubernetes client error: {0}")]
    Transport(#[from] ::kube::Error),

    /// Cluster credentials could not be loaded.
    #[error("Failed to load cluster credentials: {0}")]
    Credentials(String),
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Handle for a freshly created object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub uid: Option<String>,
    /// Status reported by the API server at creation time, as JSON
    pub status: Option<String>,
}

/// Result of an idempotent delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

/// Capabilities the lifecycle needs from the orchestration control plane.
///
/// Every method issues at most one control-plane call against the gateway's
/// fixed namespace.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// True iff a Deployment with exactly this name exists.
    async fn workload_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// True iff a Service with exactly this name exists.
    async fn endpoint_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Submit a workload; name conflicts fail with [`ClusterError::AlreadyExists`].
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<ResourceHandle, ClusterError>;

    /// Submit an endpoint; name conflicts fail with [`ClusterError::AlreadyExists`].
    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<ResourceHandle, ClusterError>;

    /// Delete a workload; a missing object is [`DeleteOutcome::AlreadyAbsent`].
    async fn delete_workload(&self, name: &str) -> Result<DeleteOutcome, ClusterError>;

    /// Delete an endpoint; a missing object is [`DeleteOutcome::AlreadyAbsent`].
    async fn delete_endpoint(&self, name: &str) -> Result<DeleteOutcome, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClusterError::AlreadyExists {
            kind: ResourceKind::Workload,
            name: "grader-cs101".to_string(),
        };
        assert_eq!(err.to_string(), "Deployment 'grader-cs101' already exists");
        assert!(err.is_already_exists());

        let err = ClusterError::Api {
            kind: ResourceKind::Endpoint,
            name: "grader-cs101".to_string(),
            code: 403,
            message: "forbidden".to_string(),
        };
        assert!(err.to_string().contains("Service 'grader-cs101'"));
        assert!(!err.is_already_exists());
    }
}
