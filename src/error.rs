//! Error types for the Shipyard deployment system.
//!
//! This module provides the error hierarchy for every step of a deploy run:
//! configuration, control-plane calls, artifact uploads, template diffing,
//! version gating and pipeline stage resolution.
//!
//! Only a handful of platform conditions are benign (empty change sets,
//! interrupts the platform already recovered from). Those are recognizable
//! through [`CloudError`] variants and are converted into outcomes by the
//! lifecycle controller; everything else propagates with context attached.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Shipyard deployment system.
#[derive(Debug, Error)]
pub enum ShipyardError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Control-plane API errors.
    #[error("{0}")]
    Cloud(#[from] CloudError),

    /// Artifact upload errors.
    #[error("{0}")]
    Artifact(#[from] ArtifactError),

    /// Template diff errors.
    #[error("{0}")]
    Diff(#[from] DiffError),

    /// Version parsing errors.
    #[error("{0}")]
    Version(#[from] VersionError),

    /// Version gate tripped.
    #[error("{0}")]
    Downgrade(#[from] DowngradeError),

    /// Pipeline resolution errors.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// A referenced resource does not exist.
    #[error("{kind} {name} not found{}", scope_suffix(.scope.as_deref()))]
    NotFound {
        /// Kind of resource (environment, workload, pipeline, stack).
        kind: String,
        /// Name of the resource.
        name: String,
        /// Enclosing scope, e.g. `application my-app`.
        scope: Option<String>,
    },

    /// An error wrapped with the operation and target it happened in.
    #[error("{context}: {source}")]
    Context {
        /// `<verb> <kind> <name>[ in <scope>]`.
        context: String,
        /// The underlying error.
        source: Box<ShipyardError>,
    },

    /// An error carrying a recommended action for the user.
    #[error("{source}")]
    WithRemediation {
        /// The underlying error.
        source: Box<ShipyardError>,
        /// What the user can do about it.
        remediation: String,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn scope_suffix(scope: Option<&str>) -> String {
    scope.map_or_else(String::new, |s| format!(" in {s}"))
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field or flag that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Control-plane API errors.
///
/// The first group are conditions the platform reports on purpose and that
/// callers are expected to recognize; the rest are transport failures.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The stack does not exist.
    #[error("stack {stack} not found")]
    StackNotFound {
        /// Stack name.
        stack: String,
    },

    /// A create raced with another actor that created the stack first.
    #[error("stack {stack} already exists")]
    AlreadyExists {
        /// Stack name.
        stack: String,
    },

    /// The platform found nothing to change.
    #[error("change set with name {change_set} for stack {stack} has no changes")]
    EmptyChangeSet {
        /// Stack name.
        stack: String,
        /// Change set identifier reported by the platform.
        change_set: String,
    },

    /// The create was interrupted and the platform deleted the stack.
    #[error("stack {stack} was deleted after the deployment was interrupted")]
    DeletedOnInterrupt {
        /// Stack name.
        stack: String,
    },

    /// The update was interrupted and the platform rolled it back.
    #[error("stack {stack} was rolled back after the deployment was interrupted")]
    RolledBackOnInterrupt {
        /// Stack name.
        stack: String,
    },

    /// The stack reached a failed terminal state.
    #[error("stack {stack} ended in status {status}{}", reason_suffix(.reason.as_deref()))]
    StackFailed {
        /// Stack name.
        stack: String,
        /// Terminal status reported by the platform.
        status: String,
        /// Status reason, if the platform gave one.
        reason: Option<String>,
    },

    /// Authentication failed.
    #[error("control plane authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("control plane request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("control plane rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("network error communicating with the control plane: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("invalid response from the control plane: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

fn reason_suffix(reason: Option<&str>) -> String {
    reason.map_or_else(String::new, |r| format!(": {r}"))
}

/// Artifact upload errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Object storage failure.
    #[error("object storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// Image build or push failure.
    #[error("image {image}: {message}")]
    Image {
        /// Image or container name.
        image: String,
        /// Description of the failure.
        message: String,
    },

    /// A local asset could not be read.
    #[error("read asset {path}: {message}")]
    Asset {
        /// Path to the asset.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Template diff errors.
#[derive(Debug, Error)]
pub enum DiffError {
    /// A template is not valid YAML.
    #[error("parse {which} template: {message}")]
    Parse {
        /// Which side failed to parse (`deployed` or `candidate`).
        which: &'static str,
        /// Parser message.
        message: String,
    },
}

/// Version parsing errors.
#[derive(Debug, Error)]
pub enum VersionError {
    /// A version string is not `MAJOR.MINOR.PATCH[-PRERELEASE]`.
    #[error("invalid version {value:?}: {message}")]
    Invalid {
        /// The offending string.
        value: String,
        /// What was wrong with it.
        message: String,
    },
}

/// Pipeline resolution errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline is not declared in the workspace.
    #[error("pipeline {name} is not declared in the workspace")]
    NotDeclared {
        /// Pipeline name.
        name: String,
    },}

/// Kinds of components whose deployed template version is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// An application.
    Application,
    /// An environment.
    Environment,
    /// A workload (service or job).
    Workload,
    /// A delivery pipeline.
    Pipeline,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Application => "application",
            Self::Environment => "environment",
            Self::Workload => "workload",
            Self::Pipeline => "pipeline",
        };
        write!(f, "{s}")
    }
}

/// Raised when a deployed component is newer than the candidate template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "cannot downgrade {component_type} \"{component_name}\" (currently in version {deployed_version}) to version {candidate_version}"
)]
pub struct DowngradeError {
    /// Name of the component.
    pub component_name: String,
    /// Kind of component.
    pub component_type: ComponentType,
    /// Version currently deployed.
    pub deployed_version: String,
    /// Version that would be deployed.
    pub candidate_version: String,
}

impl DowngradeError {
    /// Returns the recommended actions for a tripped version gate.
    #[must_use]
    pub fn remediation(&self) -> String {
        format!(
            "It looks like you are trying to use an earlier version of shipyard to downgrade {} \"{}\" deployed by shipyard {}.\n\
             Upgrade shipyard to {} or later, or run the command again with --allow-downgrade.",
            self.component_type, self.component_name, self.deployed_version, self.deployed_version
        )
    }
}

/// Result type alias for Shipyard operations.
pub type Result<T> = std::result::Result<T, ShipyardError>;

impl ShipyardError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>, scope: Option<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            scope,
        }
    }

    /// Wraps this error with operation context.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Attaches a recommended action to this error.
    #[must_use]
    pub fn with_remediation(self, remediation: impl Into<String>) -> Self {
        Self::WithRemediation {
            source: Box::new(self),
            remediation: remediation.into(),
        }
    }

    /// Returns the innermost error, skipping context and remediation wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } | Self::WithRemediation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the underlying control-plane error, if any.
    #[must_use]
    pub fn as_cloud(&self) -> Option<&CloudError> {
        match self.root() {
            Self::Cloud(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the root cause is a missing stack.
    #[must_use]
    pub fn is_stack_not_found(&self) -> bool {
        matches!(self.as_cloud(), Some(CloudError::StackNotFound { .. }))
    }

    /// Returns the recommended action attached to this error, if any.
    #[must_use]
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::WithRemediation { remediation, .. } => Some(remediation.clone()),
            Self::Context { source, .. } => source.remediation(),
            Self::Downgrade(e) => Some(e.remediation()),
            _ => None,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.as_cloud().is_some_and(CloudError::is_retryable)
    }
}

impl CloudError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Returns true for transient transport failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
            || matches!(self, Self::ApiRequestFailed { status, .. } if *status >= 500)
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Network { .. } => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl ArtifactError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// Adds `"<verb> <kind> <name>"` context to a failing result.
pub trait WrapErr<T> {
    /// Wraps the error, building the context lazily.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with the given context.
    fn wrap_err<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> WrapErr<T> for std::result::Result<T, E>
where
    E: Into<ShipyardError>,
{
    fn wrap_err<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| e.into().context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downgrade_message() {
        let err = DowngradeError {
            component_name: String::from("pipepiper"),
            component_type: ComponentType::Pipeline,
            deployed_version: String::from("v1.30.0"),
            candidate_version: String::from("v1.28.0"),
        };
        assert_eq!(
            err.to_string(),
            "cannot downgrade pipeline \"pipepiper\" (currently in version v1.30.0) to version v1.28.0"
        );
    }

    #[test]
    fn test_context_chain() {
        let err: Result<()> = Err(CloudError::network("connection reset").into());
        let err = err
            .wrap_err(|| "get template for stack demo-test-api")
            .wrap_err(|| "deploy workload api")
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "deploy workload api: get template for stack demo-test-api: \
             network error communicating with the control plane: connection reset"
        );
        assert!(err.is_retryable());
        assert!(!err.is_stack_not_found());
    }

    #[test]
    fn test_remediation_survives_context() {
        let err = ShipyardError::from(CloudError::StackFailed {
            stack: String::from("demo-test-api"),
            status: String::from("UPDATE_FAILED"),
            reason: None,
        })
        .with_remediation("roll it back")
        .context("deploy workload api");

        assert_eq!(err.remediation().as_deref(), Some("roll it back"));
        assert!(matches!(
            err.as_cloud(),
            Some(CloudError::StackFailed { .. })
        ));
    }

    #[test]
    fn test_not_found_message() {
        let err = ShipyardError::not_found("environment", "prod", Some(String::from("application demo")));
        assert_eq!(err.to_string(), "environment prod not found in application demo");
    }
}
