//! Grader Setup Configuration
//!
//! Process-wide settings read once at startup (mounted YAML file plus a few
//! environment overrides) and then passed explicitly into the resolver,
//! spec builder and gateway constructors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Environment variable overriding the grader notebook image
pub const ENV_IMAGE: &str = "GRADER_IMAGE_NAME";
/// Environment variable overriding the shared storage mount root
pub const ENV_MNT_ROOT: &str = "ILLUMIDESK_MNT_ROOT";

/// Main service configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraderConfig {
    /// Namespace shared by every grader workload
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Grader notebook image reference
    #[serde(default = "default_image")]
    pub image: String,

    /// Storage mount root (first path segment of every course directory)
    #[serde(default = "default_mnt_root")]
    pub mnt_root: String,

    /// Hub addresses injected into the grader environment
    #[serde(default)]
    pub hub: HubConfig,

    /// Grader container settings
    #[serde(default)]
    pub grader: GraderContainerConfig,

    /// Resource requests and limits
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Shared storage volume settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Container / pod security settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Cluster credentials source
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Service registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Hub addresses
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    /// Hub API address reachable from inside the cluster
    #[serde(default = "default_hub_api_url")]
    pub api_url: String,

    /// Hub base path
    #[serde(default = "default_hub_base_url")]
    pub base_url: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            api_url: default_hub_api_url(),
            base_url: default_hub_base_url(),
        }
    }
}

/// Grader container configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraderContainerConfig {
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Entry command; the `--group=formgrade-<course>` flag is appended
    #[serde(default = "default_start_command")]
    pub start_command: String,

    /// Container port, also exposed by the endpoint
    #[serde(default = "default_port")]
    pub port: i32,

    /// Numeric uid for the in-container grader user and its directories
    #[serde(default = "default_uid")]
    pub uid: u32,

    /// Numeric gid for the in-container grader user and its directories
    #[serde(default = "default_gid")]
    pub gid: u32,

    /// Role marker exported as `USER_ROLE`
    #[serde(default = "default_role")]
    pub role: String,

    /// Value of the `app` label on grader pods
    #[serde(default = "default_app_label")]
    pub app_label: String,
}

impl Default for GraderContainerConfig {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            start_command: default_start_command(),
            port: default_port(),
            uid: default_uid(),
            gid: default_gid(),
            role: default_role(),
            app_label: default_app_label(),
        }
    }
}

/// CPU / memory pair
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResourceQuantities {
    pub cpu: String,
    pub memory: String,
}

/// Resource requests and limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceConfig {
    #[serde(default = "default_requests")]
    pub requests: ResourceQuantities,

    #[serde(default = "default_limits")]
    pub limits: ResourceQuantities,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            limits: default_limits(),
        }
    }
}

/// Shared storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Whether the grader pod mounts the shared claim
    #[serde(default = "default_true")]
    pub mount_volume: bool,

    #[serde(default = "default_claim_name")]
    pub volume_name: String,

    #[serde(default = "default_claim_name")]
    pub claim_name: String,

    /// Where the shared mount root is visible to this process
    #[serde(default = "default_host_root")]
    pub host_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mount_volume: true,
            volume_name: default_claim_name(),
            claim_name: default_claim_name(),
            host_root: default_host_root(),
        }
    }
}

/// Security posture of the grader pod.
///
/// `run_as_root` defaults to `true`: the notebook entry script starts as root
/// and drops to the grader uid itself. The container is still denied
/// privilege escalation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    #[serde(default)]
    pub allow_privilege_escalation: bool,

    #[serde(default = "default_true")]
    pub run_as_root: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_privilege_escalation: false,
            run_as_root: true,
        }
    }
}

/// Where cluster credentials come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ClusterConfig {
    /// In-cluster service account, falling back to kube-config inference
    #[default]
    Auto,
    /// In-cluster service account only
    InCluster,
    /// Explicit kube-config file
    KubeConfig { path: PathBuf },
}

/// Service registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// PostgreSQL connection string; in-memory registry when absent
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_image() -> String {
    "illumidesk/grader-notebook:latest".to_string()
}

fn default_mnt_root() -> String {
    "illumidesk-courses".to_string()
}

fn default_hub_api_url() -> String {
    // K8s Service name 'hub' from the jupyterhub helm chart
    "http://hub:8081/hub/api".to_string()
}

fn default_hub_base_url() -> String {
    "/".to_string()
}

fn default_container_name() -> String {
    "grader-notebook".to_string()
}

fn default_start_command() -> String {
    "start-notebook.sh".to_string()
}

fn default_port() -> i32 {
    8888
}

fn default_uid() -> u32 {
    10001
}

fn default_gid() -> u32 {
    100
}

fn default_role() -> String {
    "Grader".to_string()
}

fn default_app_label() -> String {
    "illumidesk".to_string()
}

fn default_requests() -> ResourceQuantities {
    ResourceQuantities {
        cpu: "100m".to_string(),
        memory: "200Mi".to_string(),
    }
}

fn default_limits() -> ResourceQuantities {
    ResourceQuantities {
        cpu: "500m".to_string(),
        memory: "500Mi".to_string(),
    }
}

fn default_true() -> bool {
    true
}

fn default_claim_name() -> String {
    "grader-setup-pvc".to_string()
}

fn default_host_root() -> PathBuf {
    PathBuf::from("/")
}

fn default_max_connections() -> u32 {
    5
}

fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            image: default_image(),
            mnt_root: default_mnt_root(),
            hub: HubConfig::default(),
            grader: GraderContainerConfig::default(),
            resources: ResourceConfig::default(),
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
            cluster: ClusterConfig::default(),
            registry: RegistryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl GraderConfig {
    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Apply `GRADER_IMAGE_NAME` / `ILLUMIDESK_MNT_ROOT` overrides from the process environment
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in production)
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup(ENV_IMAGE).filter(|v| !v.trim().is_empty()) {
            debug!(image = %image, "Grader image overridden from environment");
            self.image = image;
        }
        if let Some(root) = lookup(ENV_MNT_ROOT).filter(|v| !v.trim().is_empty()) {
            debug!(mnt_root = %root, "Mount root overridden from environment");
            self.mnt_root = root;
        }
        self
    }

    /// Validate that configuration has required fields
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.namespace.trim().is_empty() {
            return Err(anyhow::anyhow!("namespace must not be empty"));
        }
        if self.image.trim().is_empty() {
            return Err(anyhow::anyhow!("image must not be empty"));
        }
        if self.mnt_root.trim().trim_matches('/').is_empty() {
            return Err(anyhow::anyhow!("mntRoot must name a directory"));
        }
        if self.grader.port <= 0 || self.grader.port > 65535 {
            return Err(anyhow::anyhow!(
                "grader.port must be a valid TCP port, got {}",
                self.grader.port
            ));
        }

        let quantities = [
            ("resources.requests.cpu", &self.resources.requests.cpu),
            ("resources.requests.memory", &self.resources.requests.memory),
            ("resources.limits.cpu", &self.resources.limits.cpu),
            ("resources.limits.memory", &self.resources.limits.memory),
        ];
        for (key, value) in quantities {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("{key} must not be empty"));
            }
        }

        if self.storage.mount_volume
            && (self.storage.volume_name.trim().is_empty()
                || self.storage.claim_name.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "storage.volumeName and storage.claimName are required when storage.mountVolume is set"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraderConfig::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.image, "illumidesk/grader-notebook:latest");
        assert_eq!(config.mnt_root, "illumidesk-courses");
        assert_eq!(config.grader.port, 8888);
        assert_eq!(config.grader.uid, 10001);
        assert_eq!(config.grader.gid, 100);
        assert_eq!(config.resources.requests.cpu, "100m");
        assert_eq!(config.resources.limits.memory, "500Mi");
        assert!(config.storage.mount_volume);
        assert!(config.security.run_as_root);
        assert!(!config.security.allow_privilege_escalation);
        assert_eq!(config.cluster, ClusterConfig::Auto);
        assert_eq!(config.registry.database_url, None);
        assert_eq!(config.registry.max_connections, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization() {
        let yaml = r#"
namespace: "graders"
image: "registry.example.com/grader:v2"
mntRoot: "courses"

hub:
  apiUrl: "http://hub.jhub:8081/hub/api"

grader:
  uid: 2000
  gid: 2000

resources:
  limits:
    cpu: "1"
    memory: "1Gi"

storage:
  mountVolume: false

cluster:
  mode: kubeConfig
  path: "/etc/kube/config"

registry:
  databaseUrl: "postgres://hub@db/grader"
"#;

        let config = GraderConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.namespace, "graders");
        assert_eq!(config.mnt_root, "courses");
        assert_eq!(config.hub.api_url, "http://hub.jhub:8081/hub/api");
        assert_eq!(config.hub.base_url, "/");
        assert_eq!(config.grader.uid, 2000);
        assert_eq!(config.grader.port, 8888);
        assert_eq!(config.resources.requests.cpu, "100m");
        assert_eq!(config.resources.limits.memory, "1Gi");
        assert!(!config.storage.mount_volume);
        assert_eq!(
            config.cluster,
            ClusterConfig::KubeConfig {
                path: PathBuf::from("/etc/kube/config")
            }
        );
        assert_eq!(
            config.registry.database_url.as_deref(),
            Some("postgres://hub@db/grader")
        );
    }

    #[test]
    fn env_overrides_replace_image_and_mount_root() {
        let config = GraderConfig::default().with_overrides(|key| match key {
            ENV_IMAGE => Some("custom/grader:1.0".to_string()),
            ENV_MNT_ROOT => Some("mnt-courses".to_string()),
            _ => None,
        });

        assert_eq!(config.image, "custom/grader:1.0");
        assert_eq!(config.mnt_root, "mnt-courses");
    }

    #[test]
    fn blank_env_overrides_are_ignored() {
        let config = GraderConfig::default().with_overrides(|_| Some("  ".to_string()));
        assert_eq!(config.image, "illumidesk/grader-notebook:latest");
        assert_eq!(config.mnt_root, "illumidesk-courses");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = GraderConfig::default();
        config.mnt_root = "/".to_string();
        assert!(config.validate().is_err());

        let mut config = GraderConfig::default();
        config.grader.port = 0;
        assert!(config.validate().is_err());

        let mut config = GraderConfig::default();
        config.resources.limits.cpu = String::new();
        assert!(config.validate().is_err());

        let mut config = GraderConfig::default();
        config.storage.claim_name = String::new();
        assert!(config.validate().is_err());
        config.storage.mount_volume = false;
        assert!(config.validate().is_ok());
    }
}
