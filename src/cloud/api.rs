//! Collaborator contracts consumed by the deployment core.
//!
//! The lifecycle controller, the diff engine and the stage resolver only
//! talk to the platform through these traits, so tests substitute mocks and
//! the CLI wires in [`super::ControlPlaneClient`].

use async_trait::async_trait;

use crate::error::Result;

use super::types::{ApplyKind, DeployedPipeline, EnvironmentInfo, StackDescription, StackSpec};

/// Stack operations on the control plane.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Returns whether the stack exists.
    async fn stack_exists(&self, stack: &str) -> Result<bool>;

    /// Describes the stack, or `None` if it does not exist.
    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>>;

    /// Returns the deployed template body.
    ///
    /// A missing stack is reported as `CloudError::StackNotFound`.
    async fn template(&self, stack: &str) -> Result<String>;

    /// Returns the template version recorded in the stack's metadata.
    ///
    /// A missing stack is reported as `CloudError::StackNotFound`; a stack
    /// without a recorded version yields an empty string.
    async fn template_version(&self, stack: &str) -> Result<String>;

    /// Starts creating a stack.
    async fn create_stack(&self, spec: &StackSpec) -> Result<()>;

    /// Starts updating a stack.
    async fn update_stack(&self, spec: &StackSpec) -> Result<()>;

    /// Blocks until the in-flight operation reaches a terminal state.
    async fn wait_for_stack(&self, stack: &str, kind: ApplyKind) -> Result<()>;

    /// Rolls a failed stack back to its last good configuration.
    async fn rollback_stack(&self, stack: &str) -> Result<()>;
}

/// Lists pipelines deployed in an application.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineLister: Send + Sync {
    /// Returns every pipeline deployed in the application.
    async fn list_deployed_pipelines(&self, app: &str) -> Result<Vec<DeployedPipeline>>;
}

/// Looks up environments of an application.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Returns the environment, or a not-found error.
    async fn get_environment(&self, app: &str, env: &str) -> Result<EnvironmentInfo>;
}
