//! Manifest and flag validation.
//!
//! This module checks the workspace manifest and the deploy flags before any
//! collaborator is called. Validation errors are reported immediately and
//! never retried.

use crate::error::{ConfigError, Result, ShipyardError};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{PipelineConfig, PipelineSource, WorkloadConfig, WorkloadType, WorkspaceConfig};

/// Validator for workspace manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a workspace manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &WorkspaceConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if !is_valid_name(&config.application) {
            result.errors.push(ValidationError {
                field: String::from("application"),
                message: format!(
                    "Application name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.application
                ),
            });
        }

        Self::validate_workloads(config, &mut result);
        Self::validate_pipelines(&config.pipelines, &mut result);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(ShipyardError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates all workload configurations.
    fn validate_workloads(config: &WorkspaceConfig, result: &mut ValidationResult) {
        let mut seen_names = HashSet::new();

        for (i, workload) in config.workloads.iter().enumerate() {
            let prefix = format!("workloads[{i}]");

            if !seen_names.insert(&workload.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate workload name: {}", workload.name),
                });
            }

            if !is_valid_name(&workload.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Workload name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        workload.name
                    ),
                });
            }

            Self::validate_workload(workload, &prefix, config, result);
        }
    }

    /// Validates a single workload.
    fn validate_workload(
        workload: &WorkloadConfig,
        prefix: &str,
        config: &WorkspaceConfig,
        result: &mut ValidationResult,
    ) {
        if workload.workload_type == WorkloadType::StaticSite {
            if workload.static_assets.is_none() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.static_assets"),
                    message: String::from("Static sites must set static_assets"),
                });
            }
        } else if workload.containers.is_empty() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.containers"),
                message: format!("Workload '{}' must define at least one container", workload.name),
            });
        }

        for container in workload.env_files.keys() {
            if !workload.containers.contains_key(container) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.env_files.{container}"),
                    message: format!("Env file references unknown container '{container}'"),
                });
            }
        }

        let uploads_something = !workload.env_files.is_empty()
            || workload.addons.is_some()
            || !workload.custom_resources.is_empty()
            || workload.static_assets.is_some();
        if uploads_something && config.artifacts.bucket.is_none() {
            result.errors.push(ValidationError {
                field: String::from("artifacts.bucket"),
                message: format!(
                    "Workload '{}' uploads artifacts but no artifact bucket is configured",
                    workload.name
                ),
            });
        }

        if workload.count == 0 && workload.workload_type != WorkloadType::StaticSite {
            result.warnings.push(format!(
                "{prefix}.count: workload '{}' is deployed with zero tasks",
                workload.name
            ));
        }
    }

    /// Validates pipeline configurations.
    fn validate_pipelines(pipelines: &[PipelineConfig], result: &mut ValidationResult) {
        let mut seen_names = HashSet::new();

        for (i, pipeline) in pipelines.iter().enumerate() {
            let prefix = format!("pipelines[{i}]");

            if !seen_names.insert(&pipeline.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate pipeline name: {}", pipeline.name),
                });
            }

            if !is_valid_name(&pipeline.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Pipeline name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        pipeline.name
                    ),
                });
            }

            if pipeline.stages.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.stages"),
                    message: format!("Pipeline '{}' must declare at least one stage", pipeline.name),
                });
            }

            let mut seen_stages = HashSet::new();
            for (j, stage) in pipeline.stages.iter().enumerate() {
                if !seen_stages.insert(&stage.name) {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.stages[{j}].name"),
                        message: format!("Environment '{}' appears in more than one stage", stage.name),
                    });
                }
            }

            if let PipelineSource::GitHub(s) | PipelineSource::Bitbucket(s) = &pipeline.source
                && s.connection_arn.is_some()
                && s.connection_name.is_some()
            {
                result.warnings.push(format!(
                    "{prefix}.source: connection_name is ignored when connection_arn is set"
                ));
            }
        }
    }
}

/// Deploy flags subject to cross-flag validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployFlags {
    /// Skip confirmation prompts.
    pub yes: bool,
    /// Preview the diff before applying.
    pub diff: bool,
    /// Skip the prompt after the diff preview.
    pub diff_yes: bool,
    /// Return once the apply has started.
    pub detach: bool,
}

impl DeployFlags {
    /// Validates the flag combination.
    ///
    /// # Errors
    ///
    /// Returns a validation error for contradictory flags.
    pub fn validate(&self) -> Result<()> {
        if self.diff_yes && !self.diff {
            return Err(ConfigError::validation(
                "--diff-yes cannot be specified without --diff",
                "--diff-yes",
            )
            .into());
        }
        Ok(())
    }
}

/// Validates a name passed on the command line.
///
/// # Errors
///
/// Returns a validation error naming the flag.
pub fn validate_name_flag(flag: &str, value: &str) -> Result<()> {
    if is_valid_name(value) {
        Ok(())
    } else {
        Err(ConfigError::validation(
            format!("{flag} value '{value}' is invalid. Must be lowercase alphanumeric with hyphens."),
            flag,
        )
        .into())
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> WorkspaceConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("api"));
        assert!(is_valid_name("my-svc-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Api"));
        assert!(!is_valid_name("1-api"));
        assert!(!is_valid_name("my_api"));
        assert!(!is_valid_name("api-"));
        assert!(!is_valid_name("api--v2"));
    }

    #[test]
    fn test_duplicate_workloads_rejected() {
        let config = parse(
            r"
application: demo
workloads:
  - name: api
    containers: { api: { location: nginx } }
  - name: api
    containers: { api: { location: nginx } }
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate workload name: api"));
    }

    #[test]
    fn test_uploads_require_bucket() {
        let config = parse(
            r"
application: demo
workloads:
  - name: web
    type: Static Site
    static_assets: ./dist
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("no artifact bucket"));
    }

    #[test]
    fn test_pipeline_duplicate_stage_rejected() {
        let config = parse(
            r"
application: demo
pipelines:
  - name: release
    source:
      provider: CodeCommit
      properties:
        repository: https://git.example.com/demo
    stages:
      - name: test
      - name: test
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("more than one stage"));
    }

    #[test]
    fn test_pipeline_without_stages_rejected() {
        let config = parse(
            r"
application: demo
pipelines:
  - name: release
    source:
      provider: CodeCommit
      properties:
        repository: https://git.example.com/demo
    stages: []
",
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("Pipeline 'release' must declare at least one stage"));
    }

    #[test]
    fn test_diff_yes_requires_diff() {
        let flags = DeployFlags {
            diff_yes: true,
            ..DeployFlags::default()
        };
        assert!(flags.validate().is_err());

        let flags = DeployFlags {
            diff: true,
            diff_yes: true,
            ..DeployFlags::default()
        };
        assert!(flags.validate().is_ok());
    }

    #[test]
    fn test_name_flag() {
        assert!(validate_name_flag("--name", "api").is_ok());
        let err = validate_name_flag("--env", "Prod").unwrap_err();
        assert!(err.to_string().contains("--env"));
    }
}
