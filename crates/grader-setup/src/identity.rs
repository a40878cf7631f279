//! Course identity and the names derived from it.
//!
//! Every name the service touches (workload, endpoint, storage path, hub
//! group) is recomputed from `(organization, course_id)` on each request and
//! never stored on its own.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const GRADER_PREFIX: &str = "grader-";
const GROUP_PREFIX: &str = "formgrade-";

/// The (organization, course) pair a request is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseIdentity {
    organization: String,
    course_id: String,
}

impl CourseIdentity {
    pub fn new(organization: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            course_id: course_id.into(),
        }
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }
}

/// Workload name for a course: `grader-<course_id>`
pub fn workload_name(course_id: &str) -> String {
    format!("{GRADER_PREFIX}{course_id}")
}

/// Hub group whose members may grade a course: `formgrade-<course_id>`
pub fn group_name(course_id: &str) -> String {
    format!("{GROUP_PREFIX}{course_id}")
}

/// Everything derived from a course identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraderIdentity {
    pub course: CourseIdentity,
    pub namespace: String,
    pub workload_name: String,
    pub endpoint_name: String,
    pub group_name: String,
    /// Course home directory, `/<mnt_root>/<org>/home/<workload>/<course_id>`
    pub storage_path: PathBuf,
    /// Grader home relative to the mount root, used as the volume sub-path
    pub home_sub_path: String,
    /// Home directory inside the grader container
    pub container_home: String,
}

impl GraderIdentity {
    pub fn course_id(&self) -> &str {
        self.course.course_id()
    }

    pub fn organization(&self) -> &str {
        self.course.organization()
    }

    /// Cluster-internal URL the hub uses to reach the grader
    pub fn endpoint_url(&self, port: i32) -> String {
        format!("http://{}:{port}", self.endpoint_name)
    }

    /// Directory for one assignment's source files
    pub fn assignment_path(&self, assignment_name: &str) -> PathBuf {
        self.storage_path.join("source").join(assignment_name)
    }
}

/// Maps course identities to derived names within one namespace and mount root
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    namespace: String,
    mnt_root: String,
}

impl IdentityResolver {
    pub fn new(namespace: impl Into<String>, mnt_root: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            mnt_root: mnt_root.into().trim_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &crate::config::GraderConfig) -> Self {
        Self::new(config.namespace.clone(), config.mnt_root.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn resolve(&self, course: &CourseIdentity) -> GraderIdentity {
        let workload = workload_name(course.course_id());
        let home_sub_path = format!(
            "{}/{}/home/{workload}/",
            self.mnt_root,
            course.organization()
        );
        let storage_path = PathBuf::from(format!(
            "/{}/{}/home/{workload}/{}",
            self.mnt_root,
            course.organization(),
            course.course_id()
        ));

        GraderIdentity {
            course: course.clone(),
            namespace: self.namespace.clone(),
            endpoint_name: workload.clone(),
            group_name: group_name(course.course_id()),
            container_home: format!("/home/{workload}"),
            storage_path,
            home_sub_path,
            workload_name: workload,
        }
    }
}
