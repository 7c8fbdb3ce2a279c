//! Template rendering.
//!
//! Rendering turns a manifest entry plus uploaded artifact references into
//! the template and parameters sent to the platform. Every template records
//! the tool version in `Metadata.Version` for the version gate and a copy of
//! the manifest entry in `Metadata.Manifest`.

use serde_json::{json, Map, Value};

use crate::artifacts::ArtifactReferences;
use crate::config::{ImageConfig, PipelineConfig, PipelineSource, WorkloadConfig, WorkloadType};
use crate::error::{Result, ShipyardError};
use crate::pipeline::PipelineStage;

use super::version::TEMPLATE_VERSION;

/// Parameter that forces an update of an otherwise unchanged stack.
pub const FORCE_UPDATE_PARAMETER: &str = "ForceUpdateId";

/// The rendered change a deploy run proposes.
///
/// Produced once per run and shared, unchanged, by the diff and the apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedChange {
    /// Rendered template body.
    pub rendered_template: String,
    /// Template parameters as a JSON object.
    pub parameters: String,
    /// Artifact references embedded in the template.
    pub artifact_references: ArtifactReferences,
}

impl ProposedChange {
    /// Returns the change with one more template parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing parameters are not a JSON object.
    pub fn with_parameter(mut self, key: &str, value: &str) -> Result<Self> {
        let mut params: Map<String, Value> = if self.parameters.trim().is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&self.parameters)
                .map_err(|e| ShipyardError::internal(format!("parse template parameters: {e}")))?
        };
        params.insert(key.to_string(), Value::String(value.to_string()));
        self.parameters = serde_json::to_string(&params)
            .map_err(|e| ShipyardError::internal(format!("serialize template parameters: {e}")))?;
        Ok(self)
    }

    /// Adds a unique [`FORCE_UPDATE_PARAMETER`] so the platform always sees a change.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing parameters are not a JSON object.
    pub fn force_update(self) -> Result<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        self.with_parameter(FORCE_UPDATE_PARAMETER, &id)
    }
}

/// Renders templates from manifest entries.
pub trait TemplateRenderer: Send + Sync {
    /// Renders a workload stack for one environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be serialized.
    fn render_workload(
        &self,
        app: &str,
        env: &str,
        workload: &WorkloadConfig,
        artifacts: &ArtifactReferences,
    ) -> Result<ProposedChange>;

    /// Renders a pipeline stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be serialized.
    fn render_pipeline(
        &self,
        app: &str,
        pipeline: &PipelineConfig,
        stages: &[PipelineStage],
    ) -> Result<ProposedChange>;
}

/// Renders YAML stack documents.
#[derive(Debug, Clone)]
pub struct YamlTemplateRenderer {
    version: String,
    registry: Option<String>,
}

impl Default for YamlTemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl YamlTemplateRenderer {
    /// Creates a renderer stamping [`TEMPLATE_VERSION`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: String::from(TEMPLATE_VERSION),
            registry: None,
        }
    }

    /// Overrides the recorded template version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the registry built images were pushed to.
    #[must_use]
    pub fn with_registry(mut self, registry: Option<String>) -> Self {
        self.registry = registry;
        self
    }

    fn metadata<T: serde::Serialize>(&self, manifest: &T) -> Result<Value> {
        let manifest = serde_yaml::to_string(manifest)
            .map_err(|e| ShipyardError::internal(format!("serialize manifest: {e}")))?;
        Ok(json!({
            "Version": self.version,
            "Manifest": manifest,
        }))
    }

    fn image_for(&self, workload: &str, container: &str, image: &ImageConfig, refs: &ArtifactReferences) -> Value {
        match image {
            ImageConfig::Location { location } => json!(location),
            ImageConfig::Build { .. } => match (&self.registry, refs.image_digests.get(container)) {
                (Some(registry), Some(digest)) => json!(format!(
                    "{}/{workload}-{container}@{digest}",
                    registry.trim_end_matches('/')
                )),
                _ => Value::Null,
            },
        }
    }
}

fn resource_type(workload_type: WorkloadType) -> &'static str {
    match workload_type {
        WorkloadType::LoadBalancedWebService => "Shipyard::LoadBalancedWebService",
        WorkloadType::BackendService => "Shipyard::BackendService",
        WorkloadType::WorkerService => "Shipyard::WorkerService",
        WorkloadType::StaticSite => "Shipyard::StaticSite",
        WorkloadType::ScheduledJob => "Shipyard::ScheduledJob",
    }
}

fn to_yaml(document: &Value) -> Result<String> {
    serde_yaml::to_string(document)
        .map_err(|e| ShipyardError::internal(format!("serialize template: {e}")))
}

fn to_params(params: &Value) -> Result<String> {
    serde_json::to_string(params)
        .map_err(|e| ShipyardError::internal(format!("serialize template parameters: {e}")))
}

impl TemplateRenderer for YamlTemplateRenderer {
    fn render_workload(
        &self,
        app: &str,
        env: &str,
        workload: &WorkloadConfig,
        artifacts: &ArtifactReferences,
    ) -> Result<ProposedChange> {
        let mut containers = Map::new();
        for (name, image) in &workload.containers {
            let mut container = Map::new();
            container.insert(
                String::from("Image"),
                self.image_for(&workload.name, name, image, artifacts),
            );
            if let Some(arn) = artifacts.env_file_arns.get(name) {
                container.insert(String::from("EnvironmentFile"), json!(arn));
            }
            containers.insert(name.clone(), Value::Object(container));
        }

        let mut resources = Map::new();
        resources.insert(
            String::from("Workload"),
            json!({
                "Type": resource_type(workload.workload_type),
                "Properties": {
                    "Name": workload.name,
                    "DesiredCount": workload.count_in(env),
                    "Variables": workload.variables_in(env),
                    "Containers": containers,
                },
            }),
        );
        if let Some(url) = &artifacts.addons_url {
            resources.insert(
                String::from("AddonsStack"),
                json!({ "Type": "Shipyard::Stack", "Properties": { "TemplateURL": url } }),
            );
        }
        for (name, url) in &artifacts.custom_resource_urls {
            resources.insert(
                format!("CustomResource{name}"),
                json!({ "Type": "Shipyard::Function", "Properties": { "CodeURL": url } }),
            );
        }
        if let Some(url) = &artifacts.static_asset_mapping_url {
            resources.insert(
                String::from("StaticAssets"),
                json!({ "Type": "Shipyard::AssetBucket", "Properties": { "MappingURL": url } }),
            );
        }

        let document = json!({
            "Metadata": self.metadata(workload)?,
            "Parameters": {
                "AppName": { "Type": "String" },
                "EnvName": { "Type": "String" },
                "WorkloadName": { "Type": "String" },
            },
            "Resources": resources,
        });
        let params = json!({
            "AppName": app,
            "EnvName": env,
            "WorkloadName": workload.name,
        });

        Ok(ProposedChange {
            rendered_template: to_yaml(&document)?,
            parameters: to_params(&params)?,
            artifact_references: artifacts.clone(),
        })
    }

    fn render_pipeline(
        &self,
        app: &str,
        pipeline: &PipelineConfig,
        stages: &[PipelineStage],
    ) -> Result<ProposedChange> {
        let mut source = json!({
            "Provider": pipeline.source.provider(),
            "Repository": pipeline.source.repository(),
            "Branch": pipeline.source.branch(),
        });
        if let PipelineSource::GitHub(conn) | PipelineSource::Bitbucket(conn) = &pipeline.source {
            if let Some(arn) = &conn.connection_arn {
                source["ConnectionARN"] = json!(arn);
            } else if let Some(name) = pipeline.source.connection_pending_activation() {
                source["ConnectionName"] = json!(name);
            }
        }

        let stages: Vec<Value> = stages
            .iter()
            .map(|s| {
                json!({
                    "Environment": s.environment_name,
                    "Region": s.associated_environment.region,
                    "AccountId": s.associated_environment.account_id,
                    "RequiresApproval": s.requires_approval,
                    "TestCommands": s.test_commands,
                    "LocalWorkloads": s.local_workloads,
                })
            })
            .collect();

        let document = json!({
            "Metadata": self.metadata(pipeline)?,
            "Parameters": {
                "AppName": { "Type": "String" },
                "PipelineName": { "Type": "String" },
            },
            "Resources": {
                "Pipeline": {
                    "Type": "Shipyard::Pipeline",
                    "Properties": {
                        "Name": pipeline.name,
                        "Source": source,
                        "Build": {
                            "Image": pipeline.build.image,
                            "Buildspec": pipeline.build.buildspec,
                        },
                        "Stages": stages,
                    },
                },
            },
        });
        let params = json!({
            "AppName": app,
            "PipelineName": pipeline.name,
        });

        Ok(ProposedChange {
            rendered_template: to_yaml(&document)?,
            parameters: to_params(&params)?,
            artifact_references: ArtifactReferences::default(),
        })
    }
}
