//! Gateway backed by the live Kubernetes API.

use super::{ClusterError, ClusterGateway, DeleteOutcome, ResourceHandle, ResourceKind};
use crate::config::ClusterConfig;
use crate::manifest;
use crate::spec::{EndpointSpec, WorkloadSpec};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::{debug, info, warn};

/// Build a client from the configured credentials source
pub async fn client_from_config(cluster: &ClusterConfig) -> Result<Client, ClusterError> {
    let config = match cluster {
        ClusterConfig::Auto => match kube::Config::incluster() {
            Ok(config) => {
                debug!("Using in-cluster credentials");
                config
            }
            Err(e) => {
                debug!("In-cluster credentials unavailable ({}), inferring from kube-config", e);
                kube::Config::infer()
                    .await
                    .map_err(|e| ClusterError::Credentials(e.to_string()))?
            }
        },
        ClusterConfig::InCluster => {
            kube::Config::incluster().map_err(|e| ClusterError::Credentials(e.to_string()))?
        }
        ClusterConfig::KubeConfig { path } => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| ClusterError::Credentials(format!("{}: {e}", path.display())))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| ClusterError::Credentials(e.to_string()))?
        }
    };

    Ok(Client::try_from(config)?)
}

fn classify(kind: ResourceKind, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ae) => ClusterError::Api {
            kind,
            name: name.to_string(),
            code: ae.code,
            message: ae.message,
        },
        other => ClusterError::Transport(other),
    }
}

fn name_selector(name: &str) -> ListParams {
    ListParams::default().fields(&format!("metadata.name={name}"))
}

/// Deployments and Services of grader workloads in one namespace
#[derive(Clone)]
pub struct KubeGateway {
    deployments: Api<Deployment>,
    services: Api<Service>,
}

impl KubeGateway {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            deployments: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client, namespace),
        }
    }

    async fn delete_with<K>(
        api: &Api<K>,
        kind: ResourceKind,
        name: &str,
        params: &DeleteParams,
    ) -> Result<DeleteOutcome, ClusterError>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        match api.delete(name, params).await {
            Ok(_) => {
                info!(kind = %kind, name = %name, "Deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = %kind, name = %name, "Already absent");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) => {
                warn!(kind = %kind, name = %name, error = %e, "Delete failed");
                Err(classify(kind, name, e))
            }
        }
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn workload_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let list = self
            .deployments
            .list(&name_selector(name))
            .await
            .map_err(|e| classify(ResourceKind::Workload, name, e))?;
        Ok(!list.items.is_empty())
    }

    async fn endpoint_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let list = self
            .services
            .list(&name_selector(name))
            .await
            .map_err(|e| classify(ResourceKind::Endpoint, name, e))?;
        Ok(!list.items.is_empty())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<ResourceHandle, ClusterError> {
        let deployment = manifest::deployment(spec);
        let created = self
            .deployments
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| classify(ResourceKind::Workload, &spec.name, e))?;

        let status = created
            .status
            .as_ref()
            .and_then(|status| serde_json::to_string(status).ok());
        info!(name = %spec.name, status = ?status, "Deployment created");

        Ok(ResourceHandle {
            kind: ResourceKind::Workload,
            name: spec.name.clone(),
            uid: created.metadata.uid,
            status,
        })
    }

    async fn create_endpoint(&self, spec: &EndpointSpec) -> Result<ResourceHandle, ClusterError> {
        let service = manifest::service(spec);
        let created = self
            .services
            .create(&PostParams::default(), &service)
            .await
            .map_err(|e| classify(ResourceKind::Endpoint, &spec.name, e))?;

        let status = created
            .status
            .as_ref()
            .and_then(|status| serde_json::to_string(status).ok());
        info!(name = %spec.name, "Service created");

        Ok(ResourceHandle {
            kind: ResourceKind::Endpoint,
            name: spec.name.clone(),
            uid: created.metadata.uid,
            status,
        })
    }

    async fn delete_workload(&self, name: &str) -> Result<DeleteOutcome, ClusterError> {
        // Background propagation removes the ReplicaSet and pods with the Deployment
        Self::delete_with(
            &self.deployments,
            ResourceKind::Workload,
            name,
            &DeleteParams::background(),
        )
        .await
    }

    async fn delete_endpoint(&self, name: &str) -> Result<DeleteOutcome, ClusterError> {
        Self::delete_with(
            &self.services,
            ResourceKind::Endpoint,
            name,
            &DeleteParams::default(),
        )
        .await
    }
}
