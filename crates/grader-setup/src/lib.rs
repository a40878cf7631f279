/*
 * IllumiDesk Grader Setup - Kubernetes provisioning for per-course graders
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Grader setup core library
//!
//! Launches and tears down one grader notebook per course. A course identity
//! (organization + course id) deterministically drives every derived name:
//!
//! ```text
//!  request ──► IdentityResolver ──► SpecBuilder ──► ClusterGateway ──► registry
//!                                              └──► DirectoryProvisioner
//! ```
//!
//! The [`lifecycle::LifecycleOrchestrator`] composes the pieces into the
//! user-facing launch / teardown / list / assignment-directory operations.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod manifest;
pub mod registry;
pub mod spec;
pub mod storage;

// Re-export commonly used types
pub use config::GraderConfig;
pub use error::{LifecycleError, Result};
pub use gateway::{ClusterError, ClusterGateway, DeleteOutcome};
pub use identity::{CourseIdentity, GraderIdentity, IdentityResolver};
pub use lifecycle::{LaunchOutcome, LifecycleOrchestrator};
pub use registry::{ServiceRecord, ServiceRegistry};
pub use spec::{EndpointSpec, SpecBuilder, WorkloadSpec};
pub use storage::{DirectoryProvisioner, Ownership};
