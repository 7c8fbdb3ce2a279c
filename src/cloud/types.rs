//! Types exchanged with the control plane.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A deployed stack as reported by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackDescription {
    /// Stack name.
    pub name: String,
    /// Platform status, e.g. `UPDATE_IN_PROGRESS`.
    pub status: String,
    /// Why the stack is in this status.
    #[serde(default)]
    pub status_reason: Option<String>,
    /// Last time the stack changed, as reported by the platform.
    #[serde(default)]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// Coarse classification of a stack status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// An operation is still running.
    InProgress,
    /// The last create or update completed.
    Complete,
    /// The stack was rolled back after a failed or cancelled update.
    UpdateRolledBack,
    /// A failed or cancelled create was rolled back or deleted.
    CreateRolledBack,
    /// Any other terminal state.
    Failed,
}

impl StackDescription {
    /// Classifies the stack status.
    #[must_use]
    pub fn status_class(&self) -> StatusClass {
        classify_status(&self.status)
    }
}

/// Classifies a raw platform status string.
#[must_use]
pub fn classify_status(status: &str) -> StatusClass {
    match status {
        s if s.ends_with("_IN_PROGRESS") => StatusClass::InProgress,
        "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => StatusClass::Complete,
        "UPDATE_ROLLBACK_COMPLETE" => StatusClass::UpdateRolledBack,
        "ROLLBACK_COMPLETE" | "DELETE_COMPLETE" => StatusClass::CreateRolledBack,
        _ => StatusClass::Failed,
    }
}

/// Which apply call is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyKind {
    /// Stack creation.
    Create,
    /// Stack update.
    Update,
}

impl std::fmt::Display for ApplyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Everything the platform needs to create or update a stack.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StackSpec {
    /// Stack name.
    pub name: String,
    /// Rendered template body.
    pub template: String,
    /// Template parameters, as a JSON object string.
    pub parameters: String,
    /// Tags applied to the stack.
    pub tags: BTreeMap<String, String>,
    /// Keep failed resources in place instead of rolling back.
    pub disable_rollback: bool,
    /// Idempotency token for this call.
    pub client_token: String,
}

/// A pipeline deployed in an application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployedPipeline {
    /// Pipeline name as shown to users.
    pub name: String,
    /// Name of the underlying platform resource.
    pub resource_name: String,
    /// Whether the pipeline uses the legacy naming scheme.
    #[serde(default)]
    pub is_legacy: bool,
}

/// An environment deployed in an application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentInfo {
    /// Environment name.
    pub name: String,
    /// Region the environment lives in.
    pub region: String,
    /// Account that owns the environment.
    pub account_id: String,
}

/// Error body returned by the control plane.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub change_set: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TemplateBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StackMetadata {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PipelineList {
    #[serde(default)]
    pub pipelines: Vec<DeployedPipeline>,
}
