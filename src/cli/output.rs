//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats. Library code only returns
//! reports and events; everything the user reads is rendered here.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::cloud::{StackDescription, StatusClass};
use crate::config::{ValidationResult, WorkspaceConfig};
use crate::deploy::{ApplyOutcome, ApplyReport, DeployEvent, DeploymentTarget, DiffResult};
use crate::error::{ComponentType, ShipyardError};
use crate::pipeline::PipelineStage;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Pipeline stage row for table display.
#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Environment")]
    environment: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Account")]
    account: String,
    #[tabled(rename = "Approval")]
    approval: String,
    #[tabled(rename = "Tests")]
    tests: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Whether output is JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a template diff, newline-terminated and ready to print as is.
    #[must_use]
    pub fn format_diff(&self, diff: &DiffResult) -> String {
        match self.format {
            OutputFormat::Json => {
                let mut output = serde_json::to_string_pretty(&DiffJson {
                    has_changes: diff.has_changes,
                    diff: &diff.rendered_diff,
                })
                .unwrap_or_default();
                output.push('\n');
                output
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for line in diff.rendered_diff.lines() {
                    let colored_line = match line.trim_start().chars().next() {
                        Some('+') => line.green().to_string(),
                        Some('-') => line.red().to_string(),
                        Some('~') => line.yellow().to_string(),
                        _ => line.to_string(),
                    };
                    let _ = writeln!(output, "{colored_line}");
                }
                output
            }
        }
    }

    /// Formats the report of an apply.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &ApplyReport) -> String {
        let mut output = String::new();

        for event in &report.events {
            let _ = writeln!(output, "{}", Self::format_event(event, &report.target));
        }

        if let Some(line) = Self::format_outcome(&report.outcome, &report.target) {
            let _ = writeln!(output, "{line}");
        }

        if !report.recommendations.is_empty() {
            output.push_str("\nRecommended follow-up actions:\n");
            for recommendation in &report.recommendations {
                let _ = writeln!(output, "   - {recommendation}");
            }
        }

        output
    }

    fn format_event(event: &DeployEvent, target: &DeploymentTarget) -> String {
        match event {
            DeployEvent::ConnectionActivationRequired { connection_name } => format!(
                "{} ACTION REQUIRED! Connection {} must be activated in the console before the pipeline can run.",
                "⚠".yellow(),
                connection_name.as_str().bold()
            ),
            DeployEvent::StackAlreadyExists { stack } => format!(
                "{} Stack {stack} already exists, following the deployment in progress.",
                "⚠".yellow()
            ),
            DeployEvent::NoInfrastructureChanges { stack, suggest_force } => {
                let mut line = format!("No infrastructure changes for stack {stack}.");
                if *suggest_force && target.kind == ComponentType::Workload {
                    line.push_str(" Run the command again with --force to force a new deployment.");
                }
                line
            }
            DeployEvent::DeletedOnInterrupt { stack } => {
                format!("Stack {stack} was deleted after the interrupted create.")
            }
            DeployEvent::RolledBackOnInterrupt { stack } => format!(
                "Stack {stack} was rolled back to its previous configuration after the interrupted update."
            ),
            DeployEvent::ManualRollbackRequired { stack, command } => format!(
                "{} Stack {stack} was left in a failed state. Roll it back with: {}",
                "⚠".yellow(),
                command.as_str().bold()
            ),
            DeployEvent::Detached { stack, kind } => format!(
                "Started the {kind} of stack {stack}, not waiting for it to finish."
            ),
        }
    }

    fn format_outcome(outcome: &ApplyOutcome, target: &DeploymentTarget) -> Option<String> {
        let destination = target
            .env
            .as_deref()
            .map_or_else(String::new, |env| format!(" to environment {env}"));
        match outcome {
            ApplyOutcome::Created | ApplyOutcome::Updated => Some(format!(
                "{} Deployed {}{destination}.",
                "✓".green(),
                target
            )),
            ApplyOutcome::NoChange => Some(format!("{} {target} is up to date.", "✓".green())),
            ApplyOutcome::Declined => Some(format!("Deployment of {target} cancelled.")),
            ApplyOutcome::InterruptedCreate | ApplyOutcome::InterruptedUpdate => {
                Some(format!("Deployment of {target} was interrupted."))
            }
            ApplyOutcome::Failed(_) => None,
        }
    }

    /// Formats the resolved stages of a pipeline.
    #[must_use]
    pub fn format_stages(&self, pipeline: &str, stages: &[PipelineStage]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&StagesJson { pipeline, stages })
                .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("\nPipeline: {pipeline}\n\n");
                if stages.is_empty() {
                    output.push_str("   No stages declared.\n");
                    return output;
                }

                let rows: Vec<StageRow> = stages
                    .iter()
                    .enumerate()
                    .map(|(i, s)| StageRow {
                        index: i + 1,
                        environment: s.environment_name.clone(),
                        region: s.associated_environment.region.clone(),
                        account: s.associated_environment.account_id.clone(),
                        approval: if s.requires_approval { "manual" } else { "-" }.to_string(),
                        tests: s.test_commands.len(),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats the status of a stack, or its absence.
    #[must_use]
    pub fn format_status(&self, target: &DeploymentTarget, stack: &str, desc: Option<&StackDescription>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&StatusJson {
                target,
                stack,
                deployed: desc.is_some(),
                description: desc,
            })
            .unwrap_or_default(),
            OutputFormat::Text => {
                let Some(desc) = desc else {
                    return format!("{target} is not deployed (stack {stack} does not exist).\n");
                };

                let status = match desc.status_class() {
                    StatusClass::Complete => desc.status.as_str().green().to_string(),
                    StatusClass::InProgress => desc.status.as_str().yellow().to_string(),
                    _ => desc.status.as_str().red().to_string(),
                };

                let mut output = format!("\n{target}\n\n");
                let _ = writeln!(output, "   Stack: {}", desc.name);
                let _ = writeln!(output, "   Status: {status}");
                if let Some(reason) = &desc.status_reason {
                    let _ = writeln!(output, "   Reason: {reason}");
                }
                if let Some(updated) = desc.last_updated {
                    let _ = writeln!(output, "   Last updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                output
            }
        }
    }

    /// Formats a manifest validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &WorkspaceConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&ValidationJson {
                valid: result.is_valid(),
                application: &config.application,
                workloads: config.workloads.iter().map(|w| w.name.as_str()).collect(),
                pipelines: config.pipelines.iter().map(|p| p.name.as_str()).collect(),
                warnings: &result.warnings,
            })
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Manifest is valid!\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                output.push_str("\nManifest summary:\n");
                let _ = writeln!(output, "   Application: {}", config.application);
                let _ = writeln!(output, "   Workloads: {}", config.workloads.len());
                let _ = writeln!(output, "   Pipelines: {}", config.pipelines.len());
                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn format_success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats an error together with its recommended actions.
    #[must_use]
    pub fn format_error(&self, err: &ShipyardError) -> String {
        let remediation = err.remediation();
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "status": "error",
                "message": err.to_string(),
                "remediation": remediation,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!("{} Error: {err}", "✗".red());
                if let Some(remediation) = remediation {
                    let _ = write!(output, "\n\nRecommended actions:\n{remediation}");
                }
                output
            }
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct DiffJson<'a> {
    has_changes: bool,
    diff: &'a str,
}

#[derive(serde::Serialize)]
struct StagesJson<'a> {
    pipeline: &'a str,
    stages: &'a [PipelineStage],
}

#[derive(serde::Serialize)]
struct StatusJson<'a> {
    target: &'a DeploymentTarget,
    stack: &'a str,
    deployed: bool,
    description: Option<&'a StackDescription>,
}

#[derive(serde::Serialize)]
struct ValidationJson<'a> {
    valid: bool,
    application: &'a str,
    workloads: Vec<&'a str>,
    pipelines: Vec<&'a str>,
    warnings: &'a [String],
}
