//! Workspace manifest types.
//!
//! This module defines the structs that map to the `shipyard.yaml` file: the
//! application, its artifact bucket, the local workloads and the delivery
//! pipelines. The types are decoded once at the boundary; everything past
//! the parser works with these typed values only.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// The root manifest structure for a Shipyard workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Application the workspace belongs to.
    pub application: String,
    /// Where artifacts are uploaded before rendering.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    /// Workloads defined in this workspace.
    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
    /// Delivery pipelines defined in this workspace.
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

/// Artifact bucket configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactsConfig {
    /// Bucket receiving env files, addons and static assets.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Bucket region (uses the default credential chain region if unset).
    #[serde(default)]
    pub region: Option<String>,
    /// Registry images are pushed to, e.g. `123456789012.dkr.ecr.us-west-2.amazonaws.com/demo`.
    #[serde(default)]
    pub registry: Option<String>,
}

/// Kind of workload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum WorkloadType {
    /// Internet-facing service behind a load balancer.
    #[default]
    #[serde(rename = "Load Balanced Web Service")]
    LoadBalancedWebService,
    /// Service reachable only from inside the environment.
    #[serde(rename = "Backend Service")]
    BackendService,
    /// Queue-driven worker service.
    #[serde(rename = "Worker Service")]
    WorkerService,
    /// Static website served from object storage.
    #[serde(rename = "Static Site")]
    StaticSite,
    /// Scheduled job.
    #[serde(rename = "Scheduled Job")]
    ScheduledJob,
}

/// Configuration for a single workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// Unique name for the workload within the application.
    pub name: String,
    /// Kind of workload.
    #[serde(rename = "type", default)]
    pub workload_type: WorkloadType,
    /// Container images, keyed by container name.
    #[serde(default)]
    pub containers: BTreeMap<String, ImageConfig>,
    /// Env file uploaded for each container, keyed by container name.
    #[serde(default)]
    pub env_files: BTreeMap<String, PathBuf>,
    /// Addons template, if any.
    #[serde(default)]
    pub addons: Option<PathBuf>,
    /// Custom resource payloads, keyed by resource name.
    #[serde(default)]
    pub custom_resources: BTreeMap<String, PathBuf>,
    /// Static asset directory (static sites only).
    #[serde(default)]
    pub static_assets: Option<PathBuf>,
    /// Desired task count.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Plain environment variables.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Per-environment overrides of `count` and `variables`.
    #[serde(default)]
    pub environments: BTreeMap<String, WorkloadOverride>,
}

/// Per-environment workload overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadOverride {
    /// Desired task count in this environment.
    #[serde(default)]
    pub count: Option<u32>,
    /// Variables merged over the workload's variables.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// How a container image is obtained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ImageConfig {
    /// Built from a local Dockerfile context and pushed.
    Build {
        /// Build context directory.
        build: PathBuf,
        /// Dockerfile path relative to the context.
        #[serde(default)]
        dockerfile: Option<PathBuf>,
    },
    /// Used as-is from a registry.
    Location {
        /// Image URI.
        location: String,
    },
}

/// Delivery pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,
    /// Manifest schema version.
    #[serde(default = "default_pipeline_version")]
    pub version: u32,
    /// Where source changes come from.
    pub source: PipelineSource,
    /// Build stage settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Deployment stages, in order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

/// Source provider of a pipeline.
///
/// Decoded from `provider` + `properties`; unknown providers are rejected
/// by the deserializer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", content = "properties")]
pub enum PipelineSource {
    /// GitHub repository reached through a code connection.
    GitHub(ConnectionSource),
    /// Bitbucket repository reached through a code connection.
    Bitbucket(ConnectionSource),
    /// Repository hosted on the platform's own git service.
    CodeCommit(RepositorySource),
}

/// A repository reached through a code connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSource {
    /// Repository URL.
    pub repository: String,
    /// Branch to track.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the connection to create, when none exists yet.
    #[serde(default)]
    pub connection_name: Option<String>,
    /// ARN of an existing, already activated connection.
    #[serde(default)]
    pub connection_arn: Option<String>,
}

/// A repository on the platform's own git service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositorySource {
    /// Repository URL.
    pub repository: String,
    /// Branch to track.
    #[serde(default = "default_branch")]
    pub branch: String,
}

/// Build stage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildConfig {
    /// Build image.
    #[serde(default)]
    pub image: Option<String>,
    /// Buildspec path.
    #[serde(default)]
    pub buildspec: Option<String>,
}

/// A deployment stage as declared in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Environment the stage deploys to.
    pub name: String,
    /// Whether a manual approval gates the stage.
    #[serde(default)]
    pub requires_approval: bool,
    /// Commands run after the stage deploys.
    #[serde(default)]
    pub test_commands: Vec<String>,
}

const fn default_count() -> u32 {
    1
}

const fn default_pipeline_version() -> u32 {
    1
}

fn default_branch() -> String {
    String::from("main")
}

impl WorkspaceConfig {
    /// Names of all workloads defined locally.
    #[must_use]
    pub fn workload_names(&self) -> BTreeSet<String> {
        self.workloads.iter().map(|w| w.name.clone()).collect()
    }

    /// Finds a workload by name.
    #[must_use]
    pub fn workload(&self, name: &str) -> Option<&WorkloadConfig> {
        self.workloads.iter().find(|w| w.name == name)
    }

    /// Finds a pipeline by name.
    #[must_use]
    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}

impl WorkloadConfig {
    /// Desired count after applying the environment override.
    #[must_use]
    pub fn count_in(&self, env: &str) -> u32 {
        self.environments
            .get(env)
            .and_then(|o| o.count)
            .unwrap_or(self.count)
    }

    /// Variables after merging the environment override.
    #[must_use]
    pub fn variables_in(&self, env: &str) -> BTreeMap<String, String> {
        let mut vars = self.variables.clone();
        if let Some(over) = self.environments.get(env) {
            vars.extend(over.variables.clone());
        }
        vars
    }
}

impl PipelineSource {
    /// Repository URL of the source.
    #[must_use]
    pub fn repository(&self) -> &str {
        match self {
            Self::GitHub(s) | Self::Bitbucket(s) => &s.repository,
            Self::CodeCommit(s) => &s.repository,
        }
    }

    /// Branch the pipeline tracks.
    #[must_use]
    pub fn branch(&self) -> &str {
        match self {
            Self::GitHub(s) | Self::Bitbucket(s) => &s.branch,
            Self::CodeCommit(s) => &s.branch,
        }
    }

    /// Name of a connection that the deploy creates and the user must
    /// activate by hand, if any.
    ///
    /// Only connection-backed sources without an existing connection ARN
    /// need manual activation.
    #[must_use]
    pub fn connection_pending_activation(&self) -> Option<String> {
        match self {
            Self::GitHub(s) | Self::Bitbucket(s) if s.connection_arn.is_none() => Some(
                s.connection_name
                    .clone()
                    .unwrap_or_else(|| default_connection_name(&s.repository)),
            ),
            _ => None,
        }
    }

    /// Provider name as written in the manifest.
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        match self {
            Self::GitHub(_) => "GitHub",
            Self::Bitbucket(_) => "Bitbucket",
            Self::CodeCommit(_) => "CodeCommit",
        }
    }
}

/// Derives a connection name from a repository URL: `<owner>-<repo>`, capped
/// at 32 characters.
fn default_connection_name(repository: &str) -> String {
    let trimmed = repository.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = trimmed.rsplit('/');
    let repo = parts.next().unwrap_or_default();
    let owner = parts.next().unwrap_or_default();
    let name = if owner.is_empty() {
        repo.to_string()
    } else {
        format!("{owner}-{repo}")
    };
    name.chars().take(32).collect()
}
