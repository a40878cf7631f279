//! In-memory gateway keyed by object name.
//!
//! Used by tests and local dry runs: it records every call in order and can be
//! told to fail specific operations or to hide objects from existence checks
//! (to reproduce two launches racing past the pre-check).

use super::{ClusterError, ClusterGateway, DeleteOutcome, ResourceHandle, ResourceKind};
use crate::spec::{EndpointSpec, WorkloadSpec};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GatewayCall {
    WorkloadExists(String),
    EndpointExists(String),
    CreateWorkload(String),
    CreateEndpoint(String),
    DeleteWorkload(String),
    DeleteEndpoint(String),
}

#[derive(Debug, Default)]
struct State {
    workloads: BTreeMap<String, WorkloadSpec>,
    endpoints: BTreeMap<String, EndpointSpec>,
    calls: Vec<GatewayCall>,
    failures: HashSet<GatewayCall>,
    stale_existence: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<State>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given call fail with an API error (matched by operation and name)
    pub async fn fail_on(&self, call: GatewayCall) {
        self.state.lock().await.failures.insert(call);
    }

    /// Existence checks report `false` regardless of stored objects
    pub async fn set_stale_existence(&self, stale: bool) {
        self.state.lock().await.stale_existence = stale;
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    pub async fn workload(&self, name: &str) -> Option<WorkloadSpec> {
        self.state.lock().await.workloads.get(name).cloned()
    }

    pub async fn endpoint(&self, name: &str) -> Option<EndpointSpec> {
        self.state.lock().await.endpoints.get(name).cloned()
    }

    pub async fn workload_count(&self) -> usize {
        self.state.lock().await.workloads.len()
    }

    /// Seed an object as if created out-of-band
    pub async fn insert_workload(&self, spec: WorkloadSpec) {
        self.state
            .lock()
            .await
            .workloads
            .insert(spec.name.clone(), spec);
    }

    pub async fn insert_endpoint(&self, spec: EndpointSpec) {
        self.state
            .lock()
            .await
            .endpoints
            .insert(spec.name.clone(), spec);
    }
}

impl State {
    fn record(&mut self, call: GatewayCall, kind: ResourceKind, name: &str) -> Result<(), ClusterError> {
        let failing = self.failures.contains(&call);
        self.calls.push(call);
        if failing {
            return Err(ClusterError::Api {
                kind,
                name: name.to_string(),
                code: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterGateway for InMemoryGateway {
    async fn workload_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().await;
        state.record(
            GatewayCall::WorkloadExists(name.to_string()),
            ResourceKind::Workload,
            name,
        )?;
        Ok(!state.stale_existence && state.workloads.contains_key(name))
    }

    async fn endpoint_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().await;
        state.record(
            GatewayCall::EndpointExists(name.to_string()),
            ResourceKind::Endpoint,
            name,
        )?;
        Ok(!state.stale_existence && state.endpoints.contains_key(name))
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<ResourceHandle, ClusterError> {
        let mut state = self.state.lock().await;
        state.record(
            GatewayCall::CreateWorkload(spec.name.clone()),
            ResourceKind::Workload,
            &spec.name,
        )?;
        if state.workloads.contains_key(&spec.name) {
            return Err(ClusterError::AlreadyExists {
                kind: ResourceKind::Workload,
                name: spec.name.clone(),
            });
        }
        state.workloads.insert(spec.name.clone(), spec.clone());
        Ok(ResourceHandle {
            kind: ResourceKind::Workload,
            name: spec.name.clone(),
            uid: None,
            status: None,
        })
    }

    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<ResourceHandle, ClusterError> {
        let mut state = self.state.lock().await;
        state.record(
            GatewayCall::CreateEndpoint(spec.name.clone()),
            ResourceKind::Endpoint,
            &spec.name,
        )?;
        if state.endpoints.contains_key(&spec.name) {
            return Err(ClusterError::AlreadyExists {
                kind: ResourceKind::Endpoint,
                name: spec.name.clone(),
            });
        }
        state.endpoints.insert(spec.name.clone(), spec.clone());
        Ok(ResourceHandle {
            kind: ResourceKind::Endpoint,
            name: spec.name.clone(),
            uid: None,
            status: None,
        })
    }

    async fn delete_workload(&self, name: &str) -> Result<DeleteOutcome, ClusterError> {
        let mut state = self.state.lock().await;
        state.record(
            GatewayCall::DeleteWorkload(name.to_string()),
            ResourceKind::Workload,
            name,
        )?;
        Ok(match state.workloads.remove(name) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyAbsent,
        })
    }

    async fn delete_endpoint(&self, name: &str) -> Result<DeleteOutcome, ClusterError> {
        let mut state = self.state.lock().await;
        state.record(
            GatewayCall::DeleteEndpoint(name.to_string()),
            ResourceKind::Endpoint,
            name,
        )?;
        Ok(match state.endpoints.remove(name) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyAbsent,
        })
    }
}
