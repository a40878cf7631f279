//! Mapping from typed specs to Kubernetes wire objects.

use crate::spec::{EndpointSpec, WorkloadSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaimVolumeSource, PodSecurityContext,
    PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

/// `apps/v1` Deployment for a grader workload
pub fn deployment(spec: &WorkloadSpec) -> Deployment {
    let env = spec
        .env
        .iter()
        .map(|var| EnvVar {
            name: var.name.clone(),
            value: Some(var.value.clone()),
            ..Default::default()
        })
        .collect();

    let volume_mounts = spec.volume.as_ref().map(|binding| {
        vec![VolumeMount {
            name: binding.volume_name.clone(),
            mount_path: binding.mount_path.clone(),
            sub_path: Some(binding.sub_path.clone()),
            ..Default::default()
        }]
    });

    let volumes = spec.volume.as_ref().map(|binding| {
        vec![Volume {
            name: binding.volume_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: binding.claim_name.clone(),
                read_only: None,
            }),
            ..Default::default()
        }]
    });

    let security_context = spec
        .allow_privilege_escalation
        .map(|allow| SecurityContext {
            allow_privilege_escalation: Some(allow),
            ..Default::default()
        });

    let container = Container {
        name: spec.container_name.clone(),
        image: Some(spec.image.clone()),
        command: Some(spec.command.clone()),
        working_dir: Some(spec.working_dir.clone()),
        ports: Some(vec![ContainerPort {
            container_port: spec.container_port,
            ..Default::default()
        }]),
        env: Some(env),
        resources: Some(ResourceRequirements {
            requests: Some(quantities(
                &spec.resources.requests.cpu,
                &spec.resources.requests.memory,
            )),
            limits: Some(quantities(
                &spec.resources.limits.cpu,
                &spec.resources.limits.memory,
            )),
            ..Default::default()
        }),
        security_context,
        volume_mounts,
        ..Default::default()
    };

    let pod_security_context = spec.run_as_user.map(|uid| PodSecurityContext {
        run_as_user: Some(uid),
        ..Default::default()
    });

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(spec.selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    security_context: pod_security_context,
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// `v1` Service for a grader endpoint
pub fn service(spec: &EndpointSpec) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(spec.service_type.clone()),
            ports: Some(vec![ServicePort {
                port: spec.port,
                target_port: Some(IntOrString::Int(spec.target_port)),
                protocol: Some(spec.protocol.clone()),
                ..Default::default()
            }]),
            selector: Some(spec.selector.clone()),
            ..Default::default()
        }),
        status: None,
    }
}

/// YAML documents for both objects, as they would be submitted
pub fn render_yaml(workload: &WorkloadSpec, endpoint: &EndpointSpec) -> serde_yaml::Result<String> {
    let deployment = serde_yaml::to_string(&deployment(workload))?;
    let service = serde_yaml::to_string(&service(endpoint))?;
    Ok(format!("{deployment}---\n{service}"))
}
