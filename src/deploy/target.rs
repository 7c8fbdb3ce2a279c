//! Deployment targets and stack naming.

use serde::Serialize;
use std::fmt;

use crate::error::ComponentType;

/// Identifies exactly one deployable stack.
///
/// Built once at the start of a run and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentTarget {
    /// Application name.
    pub app: String,
    /// Environment name; pipelines are application-scoped and have none.
    pub env: Option<String>,
    /// Workload or pipeline name.
    pub name: String,
    /// What is being deployed.
    pub kind: ComponentType,
}

impl DeploymentTarget {
    /// A workload deployed to an environment.
    #[must_use]
    pub fn workload(app: impl Into<String>, env: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            env: Some(env.into()),
            name: name.into(),
            kind: ComponentType::Workload,
        }
    }

    /// A delivery pipeline of an application.
    #[must_use]
    pub fn pipeline(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            env: None,
            name: name.into(),
            kind: ComponentType::Pipeline,
        }
    }

    /// Name of the stack backing this target.
    ///
    /// Workloads are `<app>-<env>-<name>`. Pipelines deployed under the
    /// legacy scheme use the bare pipeline name; newer ones are namespaced
    /// as `pipeline-<app>-<name>`.
    #[must_use]
    pub fn stack_name(&self, legacy: bool) -> String {
        match (self.kind, &self.env) {
            (ComponentType::Pipeline, _) if legacy => self.name.clone(),
            (ComponentType::Pipeline, _) => format!("pipeline-{}-{}", self.app, self.name),
            (_, Some(env)) => format!("{}-{env}-{}", self.app, self.name),
            (_, None) => format!("{}-{}", self.app, self.name),
        }
    }

    /// Error context for an operation on this target, e.g. `deploy workload api`.
    #[must_use]
    pub fn context(&self, verb: &str) -> String {
        format!("{verb} {self}")
    }
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}
