//! Typed workload and endpoint specifications.
//!
//! [`SpecBuilder`] turns a resolved [`GraderIdentity`] plus the service
//! configuration into immutable [`WorkloadSpec`] / [`EndpointSpec`] values.
//! Conversion to Kubernetes objects lives in [`crate::manifest`].

use crate::config::{GraderConfig, ResourceQuantities};
use crate::identity::GraderIdentity;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label key shared by the workload selector and the endpoint selector
pub const COMPONENT_LABEL: &str = "component";
/// Label key carrying the platform name
pub const APP_LABEL: &str = "app";

const TOKEN_BYTES: usize = 32;

/// Hub API credential handed to a grader.
///
/// Opaque to this crate: generated once per launch and forwarded, never parsed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    /// 32 random bytes, hex encoded
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequirements {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

/// Binding of the shared claim into the grader container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub volume_name: String,
    pub claim_name: String,
    pub mount_path: String,
    pub sub_path: String,
}

/// Declarative description of one grader workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    /// Ordered for reproducible manifests; order carries no meaning
    pub env: Vec<EnvVar>,
    pub resources: ResourceRequirements,
    pub container_port: i32,
    pub volume: Option<VolumeBinding>,
    /// `Some(false)` denies privilege escalation; `None` leaves the cluster default
    pub allow_privilege_escalation: Option<bool>,
    /// Pod-level `runAsUser`; `Some(0)` when the entry process must start as root
    pub run_as_user: Option<i64>,
    pub api_token: ApiToken,
}

impl WorkloadSpec {
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }
}

/// Declarative cluster-internal endpoint in front of a grader workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub name: String,
    pub namespace: String,
    pub service_type: String,
    pub port: i32,
    pub target_port: i32,
    pub protocol: String,
    pub selector: BTreeMap<String, String>,
}

/// Builds grader specs from identity + configuration
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    config: GraderConfig,
}

impl SpecBuilder {
    pub fn new(config: GraderConfig) -> Self {
        Self { config }
    }

    pub fn port(&self) -> i32 {
        self.config.grader.port
    }

    /// Workload spec with a freshly generated API token
    #[must_use]
    pub fn build_workload_spec(&self, identity: &GraderIdentity) -> WorkloadSpec {
        self.build_workload_spec_with_token(identity, ApiToken::generate())
    }

    /// Workload spec carrying a caller-supplied token
    #[must_use]
    pub fn build_workload_spec_with_token(
        &self,
        identity: &GraderIdentity,
        api_token: ApiToken,
    ) -> WorkloadSpec {
        let grader = &self.config.grader;
        let security = &self.config.security;
        let storage = &self.config.storage;

        let mut labels = selector_labels(identity);
        labels.insert(APP_LABEL.to_string(), grader.app_label.clone());

        let volume = storage.mount_volume.then(|| VolumeBinding {
            volume_name: storage.volume_name.clone(),
            claim_name: storage.claim_name.clone(),
            mount_path: identity.container_home.clone(),
            sub_path: identity.home_sub_path.clone(),
        });

        WorkloadSpec {
            name: identity.workload_name.clone(),
            namespace: identity.namespace.clone(),
            replicas: 1,
            selector: selector_labels(identity),
            labels,
            container_name: grader.container_name.clone(),
            image: self.config.image.clone(),
            command: vec![
                grader.start_command.clone(),
                format!("--group={}", identity.group_name),
            ],
            working_dir: identity.container_home.clone(),
            env: self.environment(identity, &api_token),
            resources: ResourceRequirements {
                requests: self.config.resources.requests.clone(),
                limits: self.config.resources.limits.clone(),
            },
            container_port: grader.port,
            volume,
            allow_privilege_escalation: (!security.allow_privilege_escalation).then_some(false),
            run_as_user: security.run_as_root.then_some(0),
            api_token,
        }
    }

    #[must_use]
    pub fn build_endpoint_spec(&self, identity: &GraderIdentity) -> EndpointSpec {
        let port = self.config.grader.port;
        EndpointSpec {
            name: identity.endpoint_name.clone(),
            namespace: identity.namespace.clone(),
            service_type: "ClusterIP".to_string(),
            port,
            target_port: port,
            protocol: "TCP".to_string(),
            selector: selector_labels(identity),
        }
    }

    fn environment(&self, identity: &GraderIdentity, token: &ApiToken) -> Vec<EnvVar> {
        let course_id = identity.course_id();
        let grader = &self.config.grader;

        vec![
            EnvVar::new("JUPYTERHUB_SERVICE_NAME", course_id),
            EnvVar::new("JUPYTERHUB_API_TOKEN", token.as_str()),
            EnvVar::new("JUPYTERHUB_API_URL", self.config.hub.api_url.clone()),
            EnvVar::new("JUPYTERHUB_BASE_URL", self.config.hub.base_url.clone()),
            EnvVar::new("JUPYTERHUB_SERVICE_PREFIX", format!("/services/{course_id}")),
            EnvVar::new("JUPYTERHUB_CLIENT_ID", format!("service-{course_id}")),
            EnvVar::new("JUPYTERHUB_USER", identity.workload_name.clone()),
            EnvVar::new("NB_GRADER_UID", grader.uid.to_string()),
            EnvVar::new("NB_GID", grader.gid.to_string()),
            EnvVar::new("NB_USER", identity.workload_name.clone()),
            EnvVar::new("USER_ROLE", grader.role.clone()),
        ]
    }
}

fn selector_labels(identity: &GraderIdentity) -> BTreeMap<String, String> {
    BTreeMap::from([(
        COMPONENT_LABEL.to_string(),
        identity.workload_name.clone(),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CourseIdentity, IdentityResolver};

    fn identity() -> GraderIdentity {
        IdentityResolver::new("default", "illumidesk-courses")
            .resolve(&CourseIdentity::new("orgA", "cs101"))
    }

    #[test]
    fn generated_token_is_64_hex_chars() {
        let token = ApiToken::generate();
        assert_eq!(token.as_str().len(), 64);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, ApiToken::generate());
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = ApiToken::from_string("secret-value");
        assert!(!format!("{token:?}").contains("secret-value"));
    }

    #[test]
    fn workload_spec_carries_grader_environment() {
        let builder = SpecBuilder::new(GraderConfig::default());
        let spec = builder
            .build_workload_spec_with_token(&identity(), ApiToken::from_string("abc123"));

        assert_eq!(spec.name, "grader-cs101");
        assert_eq!(spec.image, "illumidesk/grader-notebook:latest");
        assert_eq!(
            spec.command,
            vec!["start-notebook.sh", "--group=formgrade-cs101"]
        );
        assert_eq!(spec.working_dir, "/home/grader-cs101");
        assert_eq!(spec.env_value("JUPYTERHUB_SERVICE_NAME"), Some("cs101"));
        assert_eq!(spec.env_value("JUPYTERHUB_API_TOKEN"), Some("abc123"));
        assert_eq!(
            spec.env_value("JUPYTERHUB_API_URL"),
            Some("http://hub:8081/hub/api")
        );
        assert_eq!(spec.env_value("JUPYTERHUB_BASE_URL"), Some("/"));
        assert_eq!(
            spec.env_value("JUPYTERHUB_SERVICE_PREFIX"),
            Some("/services/cs101")
        );
        assert_eq!(spec.env_value("JUPYTERHUB_CLIENT_ID"), Some("service-cs101"));
        assert_eq!(spec.env_value("JUPYTERHUB_USER"), Some("grader-cs101"));
        assert_eq!(spec.env_value("NB_GRADER_UID"), Some("10001"));
        assert_eq!(spec.env_value("NB_GID"), Some("100"));
        assert_eq!(spec.env_value("NB_USER"), Some("grader-cs101"));
        assert_eq!(spec.env_value("USER_ROLE"), Some("Grader"));
        assert_eq!(spec.env.len(), 11);
    }

    #[test]
    fn workload_spec_uses_default_resources_and_security() {
        let spec = SpecBuilder::new(GraderConfig::default()).build_workload_spec(&identity());

        assert_eq!(spec.resources.requests.cpu, "100m");
        assert_eq!(spec.resources.requests.memory, "200Mi");
        assert_eq!(spec.resources.limits.cpu, "500m");
        assert_eq!(spec.resources.limits.memory, "500Mi");
        assert_eq!(spec.container_port, 8888);
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.allow_privilege_escalation, Some(false));
        assert_eq!(spec.run_as_user, Some(0));
        assert_eq!(spec.labels.get("component").map(String::as_str), Some("grader-cs101"));
        assert_eq!(spec.labels.get("app").map(String::as_str), Some("illumidesk"));
        assert_eq!(spec.selector.len(), 1);

        let volume = spec.volume.expect("volume mounted by default");
        assert_eq!(volume.claim_name, "grader-setup-pvc");
        assert_eq!(volume.mount_path, "/home/grader-cs101");
        assert_eq!(volume.sub_path, "illumidesk-courses/orgA/home/grader-cs101/");
    }

    #[test]
    fn configuration_flags_toggle_optional_fields() {
        let mut config = GraderConfig::default();
        config.storage.mount_volume = false;
        config.security.run_as_root = false;
        config.security.allow_privilege_escalation = true;

        let spec = SpecBuilder::new(config).build_workload_spec(&identity());
        assert!(spec.volume.is_none());
        assert!(spec.run_as_user.is_none());
        assert!(spec.allow_privilege_escalation.is_none());
    }

    #[test]
    fn specs_are_identical_apart_from_token() {
        let builder = SpecBuilder::new(GraderConfig::default());
        let first = builder.build_workload_spec(&identity());
        let mut second = builder.build_workload_spec(&identity());
        assert_ne!(first.api_token, second.api_token);

        second = builder.build_workload_spec_with_token(&identity(), first.api_token.clone());
        assert_eq!(first, second);
        assert_eq!(
            builder.build_endpoint_spec(&identity()),
            builder.build_endpoint_spec(&identity())
        );
    }

    #[test]
    fn endpoint_spec_targets_workload_selector() {
        let builder = SpecBuilder::new(GraderConfig::default());
        let endpoint = builder.build_endpoint_spec(&identity());
        let workload = builder.build_workload_spec(&identity());

        assert_eq!(endpoint.name, "grader-cs101");
        assert_eq!(endpoint.service_type, "ClusterIP");
        assert_eq!(endpoint.port, 8888);
        assert_eq!(endpoint.target_port, 8888);
        assert_eq!(endpoint.protocol, "TCP");
        assert_eq!(endpoint.selector, workload.selector);
    }
}
