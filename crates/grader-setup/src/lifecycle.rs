//! Grader lifecycle: launch, teardown, listing and assignment directories.
//!
//! Per course the conceptual states are
//! `Absent -> Launching -> Live -> TearingDown -> Absent`. Nothing is held
//! between calls: every operation recomputes names from the course identity
//! and asks the cluster.
//!
//! The existence check in [`LifecycleOrchestrator::launch`] is advisory. Two
//! concurrent launches can both pass it; the API server's duplicate-name
//! rejection decides, and `AlreadyExists` from the create call is reported
//! as the same [`LaunchOutcome::Conflict`].

use crate::config::GraderConfig;
use crate::error::{LifecycleError, Result};
use crate::gateway::{ClusterError, ClusterGateway, DeleteOutcome};
use crate::identity::{group_name, workload_name, CourseIdentity, GraderIdentity, IdentityResolver};
use crate::registry::{ServiceRecord, ServiceRegistry};
use crate::spec::{ApiToken, SpecBuilder};
use crate::storage::{DirectoryProvisioner, Ownership};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A grader that was just launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedGrader {
    pub service_name: String,
    pub workload_name: String,
    pub url: String,
    pub token: ApiToken,
}

/// Result of a launch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched(LaunchedGrader),
    /// A grader for the course is already live; nothing was changed
    Conflict { workload_name: String },
}

impl LaunchOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub endpoint: DeleteOutcome,
    pub workload: DeleteOutcome,
    pub record_removed: bool,
}

/// Registered services plus the hub group map derived from them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceListing {
    pub services: Vec<ServiceRecord>,
    /// `formgrade-<course_id>` -> `[grader-<course_id>]`
    pub groups: BTreeMap<String, Vec<String>>,
}

impl ServiceListing {
    pub fn from_records(services: Vec<ServiceRecord>) -> Self {
        let groups = services
            .iter()
            .map(|record| {
                (
                    group_name(&record.course_id),
                    vec![workload_name(&record.course_id)],
                )
            })
            .collect();
        Self { services, groups }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderPhase {
    Absent,
    Live,
    /// Only one of workload / endpoint exists, e.g. after a launch that failed mid-way
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraderStatus {
    pub workload_exists: bool,
    pub endpoint_exists: bool,
}

impl GraderStatus {
    pub fn phase(&self) -> GraderPhase {
        match (self.workload_exists, self.endpoint_exists) {
            (true, true) => GraderPhase::Live,
            (false, false) => GraderPhase::Absent,
            _ => GraderPhase::Partial,
        }
    }
}

fn validate_assignment_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single_segment = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if single_segment && !name.contains('/') {
        Ok(())
    } else {
        Err(LifecycleError::InvalidAssignmentName {
            name: name.to_string(),
        })
    }
}

pub struct LifecycleOrchestrator {
    resolver: IdentityResolver,
    builder: SpecBuilder,
    gateway: Arc<dyn ClusterGateway>,
    provisioner: Arc<dyn DirectoryProvisioner>,
    registry: Arc<dyn ServiceRegistry>,
    owner: Ownership,
}

impl LifecycleOrchestrator {
    pub fn new(
        config: &GraderConfig,
        gateway: Arc<dyn ClusterGateway>,
        provisioner: Arc<dyn DirectoryProvisioner>,
        registry: Arc<dyn ServiceRegistry>,
    ) -> Self {
        Self {
            resolver: IdentityResolver::from_config(config),
            builder: SpecBuilder::new(config.clone()),
            gateway,
            provisioner,
            registry,
            owner: Ownership::new(config.grader.uid, config.grader.gid),
        }
    }

    pub fn resolve(&self, course: &CourseIdentity) -> GraderIdentity {
        self.resolver.resolve(course)
    }

    /// Launch the grader for a course.
    ///
    /// Creates the Deployment, then the Service, then the course home
    /// directory, then the service record. A failure after the existence check
    /// aborts the launch without rolling back objects already created.
    #[instrument(skip(self), fields(org = %course.organization(), course_id = %course.course_id()))]
    pub async fn launch(&self, course: &CourseIdentity) -> Result<LaunchOutcome> {
        let identity = self.resolver.resolve(course);
        let name = identity.workload_name.clone();

        if self.gateway.workload_exists(&name).await? {
            info!(workload = %name, "Grader already exists, declining launch");
            return Ok(LaunchOutcome::Conflict {
                workload_name: name,
            });
        }

        let workload = self.builder.build_workload_spec(&identity);
        let endpoint = self.builder.build_endpoint_spec(&identity);

        match self.gateway.create_workload(&workload).await {
            Ok(handle) => {
                info!(workload = %name, uid = ?handle.uid, "Grader deployment created");
            }
            Err(ClusterError::AlreadyExists { .. }) => {
                warn!(workload = %name, "Grader created concurrently, declining launch");
                return Ok(LaunchOutcome::Conflict {
                    workload_name: name,
                });
            }
            Err(e) => return Err(e.into()),
        }

        match self.gateway.create_endpoint(&endpoint).await {
            Ok(_) => info!(endpoint = %endpoint.name, "Grader service created"),
            // Same name, same selector: an existing endpoint routes identically
            Err(ClusterError::AlreadyExists { .. }) => {
                warn!(endpoint = %endpoint.name, "Grader service already present, reusing it");
            }
            Err(e) => return Err(e.into()),
        }

        debug!(path = %identity.storage_path.display(), "Provisioning course home directory");
        self.provisioner
            .ensure_directory(&identity.storage_path, self.owner)
            .await?;

        let url = identity.endpoint_url(self.builder.port());
        let token = workload.api_token;
        let record = ServiceRecord::new(
            identity.course_id(),
            identity.course_id(),
            url.clone(),
            token.as_str(),
        );
        // No workload existed, so any record under this name is left over from
        // an earlier grader and carries a dead token
        if self.registry.replace(record).await? {
            warn!(service = %identity.course_id(), "Replaced stale service record");
        }
        info!(workload = %name, url = %url, "Grader launched");

        Ok(LaunchOutcome::Launched(LaunchedGrader {
            service_name: identity.course_id().to_string(),
            workload_name: name,
            url,
            token,
        }))
    }

    /// Remove the grader for a course: Service first, then Deployment, then the record.
    ///
    /// Each step tolerates an already-absent object. If the Service delete
    /// fails the Deployment is left untouched.
    #[instrument(skip(self), fields(org = %course.organization(), course_id = %course.course_id()))]
    pub async fn teardown(&self, course: &CourseIdentity) -> Result<TeardownReport> {
        let identity = self.resolver.resolve(course);

        let endpoint = self.gateway.delete_endpoint(&identity.endpoint_name).await?;
        let workload = self.gateway.delete_workload(&identity.workload_name).await?;
        let record_removed = self.registry.remove(identity.course_id()).await?;

        info!(
            endpoint = ?endpoint,
            workload = ?workload,
            record_removed,
            "Grader torn down"
        );
        Ok(TeardownReport {
            endpoint,
            workload,
            record_removed,
        })
    }

    /// Registered services and the derived group membership map
    pub async fn list(&self) -> Result<ServiceListing> {
        let records = self.registry.list().await?;
        debug!(count = records.len(), backend = self.registry.backend(), "Listed services");
        Ok(ServiceListing::from_records(records))
    }

    /// Create `<course home>/source/<assignment>` owned by the grader user.
    ///
    /// Works whether or not the grader is currently live.
    #[instrument(skip(self), fields(org = %course.organization(), course_id = %course.course_id()))]
    pub async fn provision_assignment_directory(
        &self,
        course: &CourseIdentity,
        assignment_name: &str,
    ) -> Result<PathBuf> {
        validate_assignment_name(assignment_name)?;
        let path = self.resolver.resolve(course).assignment_path(assignment_name);

        self.provisioner.ensure_directory(&path, self.owner).await?;
        info!(path = %path.display(), "Assignment directory ready");
        Ok(path)
    }

    /// Which of the grader's cluster objects currently exist
    pub async fn status(&self, course: &CourseIdentity) -> Result<GraderStatus> {
        let identity = self.resolver.resolve(course);
        Ok(GraderStatus {
            workload_exists: self.gateway.workload_exists(&identity.workload_name).await?,
            endpoint_exists: self.gateway.endpoint_exists(&identity.endpoint_name).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayCall, InMemoryGateway};
    use crate::registry::InMemoryRegistry;
    use crate::storage::RecordingProvisioner;

    struct Harness {
        gateway: InMemoryGateway,
        provisioner: RecordingProvisioner,
        registry: InMemoryRegistry,
        orchestrator: LifecycleOrchestrator,
    }

    fn harness() -> Harness {
        let gateway = InMemoryGateway::new();
        let provisioner = RecordingProvisioner::new();
        let registry = InMemoryRegistry::new();
        let orchestrator = LifecycleOrchestrator::new(
            &GraderConfig::default(),
            Arc::new(gateway.clone()),
            Arc::new(provisioner.clone()),
            Arc::new(registry.clone()),
        );
        Harness {
            gateway,
            provisioner,
            registry,
            orchestrator,
        }
    }

    fn cs101() -> CourseIdentity {
        CourseIdentity::new("orgA", "cs101")
    }

    #[tokio::test]
    async fn launch_creates_objects_in_order() {
        let h = harness();
        let outcome = h.orchestrator.launch(&cs101()).await.unwrap();

        let LaunchOutcome::Launched(grader) = outcome else {
            panic!("expected launch, got {outcome:?}");
        };
        assert_eq!(grader.url, "http://grader-cs101:8888");
        assert_eq!(grader.service_name, "cs101");
        assert_eq!(grader.token.as_str().len(), 64);

        let name = "grader-cs101".to_string();
        assert_eq!(
            h.gateway.calls().await,
            vec![
                GatewayCall::WorkloadExists(name.clone()),
                GatewayCall::CreateWorkload(name.clone()),
                GatewayCall::CreateEndpoint(name),
            ]
        );

        let requests = h.provisioner.requests().await;
        assert_eq!(
            requests,
            vec![(
                PathBuf::from("/illumidesk-courses/orgA/home/grader-cs101/cs101"),
                Ownership::new(10001, 100)
            )]
        );

        let records = h.registry.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "cs101");
        assert_eq!(records[0].api_token.as_deref(), Some(grader.token.as_str()));

        let stored = h.gateway.workload("grader-cs101").await.unwrap();
        assert_eq!(stored.api_token, grader.token);
    }

    #[tokio::test]
    async fn concurrent_create_is_reported_as_conflict() {
        let h = harness();
        h.orchestrator.launch(&cs101()).await.unwrap();

        // Second launch passes a stale pre-check and hits the API's duplicate rejection
        h.gateway.set_stale_existence(true).await;
        let outcome = h.orchestrator.launch(&cs101()).await.unwrap();

        assert_eq!(
            outcome,
            LaunchOutcome::Conflict {
                workload_name: "grader-cs101".to_string()
            }
        );
        assert_eq!(h.gateway.workload_count().await, 1);
        assert_eq!(h.registry.list().await.unwrap().len(), 1);
        assert_eq!(h.provisioner.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_workload_create_stops_launch() {
        let h = harness();
        h.gateway
            .fail_on(GatewayCall::CreateWorkload("grader-cs101".to_string()))
            .await;

        let err = h.orchestrator.launch(&cs101()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Cluster(ClusterError::Api { .. })));
        assert!(h.gateway.endpoint("grader-cs101").await.is_none());
        assert!(h.provisioner.requests().await.is_empty());
        assert!(h.registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_endpoint_create_leaves_workload_in_place() {
        let h = harness();
        h.gateway
            .fail_on(GatewayCall::CreateEndpoint("grader-cs101".to_string()))
            .await;

        assert!(h.orchestrator.launch(&cs101()).await.is_err());
        assert!(h.gateway.workload("grader-cs101").await.is_some());
        assert_eq!(
            h.orchestrator.status(&cs101()).await.unwrap().phase(),
            GraderPhase::Partial
        );
    }

    #[tokio::test]
    async fn directory_failure_is_propagated() {
        let h = harness();
        h.provisioner.set_failing(true).await;

        let err = h.orchestrator.launch(&cs101()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Filesystem(_)));
        assert!(h.registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn teardown_deletes_endpoint_before_workload() {
        let h = harness();
        h.orchestrator.launch(&cs101()).await.unwrap();
        h.gateway.clear_calls().await;

        let report = h.orchestrator.teardown(&cs101()).await.unwrap();
        assert_eq!(
            report,
            TeardownReport {
                endpoint: DeleteOutcome::Deleted,
                workload: DeleteOutcome::Deleted,
                record_removed: true,
            }
        );
        assert_eq!(
            h.gateway.calls().await,
            vec![
                GatewayCall::DeleteEndpoint("grader-cs101".to_string()),
                GatewayCall::DeleteWorkload("grader-cs101".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn status_tracks_phase() {
        let h = harness();
        assert_eq!(
            h.orchestrator.status(&cs101()).await.unwrap().phase(),
            GraderPhase::Absent
        );
        h.orchestrator.launch(&cs101()).await.unwrap();
        assert_eq!(
            h.orchestrator.status(&cs101()).await.unwrap().phase(),
            GraderPhase::Live
        );
    }

    #[test]
    fn assignment_names_must_be_single_segments() {
        assert!(validate_assignment_name("hw1").is_ok());
        assert!(validate_assignment_name("Week 2 - Loops").is_ok());
        for bad in ["", ".", "..", "a/b", "/abs", "../escape", "hw1/"] {
            assert!(
                validate_assignment_name(bad).is_err(),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn listing_derives_group_map() {
        let listing = ServiceListing::from_records(vec![
            ServiceRecord::new("cs101", "cs101", "http://grader-cs101:8888", "a"),
            ServiceRecord::new("cs102", "cs102", "http://grader-cs102:8888", "b"),
        ]);
        assert_eq!(listing.groups.len(), 2);
        assert_eq!(
            listing.groups.get("formgrade-cs101"),
            Some(&vec!["grader-cs101".to_string()])
        );
        assert_eq!(
            listing.groups.get("formgrade-cs102"),
            Some(&vec!["grader-cs102".to_string()])
        );
    }
}
