//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DeployFlags;

/// Shipyard - deploy workloads and delivery pipelines of an application.
#[derive(Parser, Debug)]
#[command(name = "shipyard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the workspace manifest.
    #[arg(short, long, global = true, env = "SHIPYARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a workload to an environment.
    Deploy {
        /// Name of the workload.
        #[arg(short, long)]
        name: String,

        /// Name of the environment.
        #[arg(short, long)]
        env: String,

        /// Application name (defaults to the manifest's).
        #[arg(short, long)]
        app: Option<String>,

        /// Skip the confirmation prompt for redeploying an existing stack.
        #[arg(long)]
        yes: bool,

        /// Show the template diff before deploying.
        #[arg(long)]
        diff: bool,

        /// Skip the prompt after the diff and deploy.
        #[arg(long)]
        diff_yes: bool,

        /// Deploy even if it downgrades the deployed template version.
        #[arg(long)]
        allow_downgrade: bool,

        /// Force a new update even if nothing changed.
        #[arg(long)]
        force: bool,

        /// Leave a failed stack in place instead of rolling it back.
        #[arg(long)]
        no_rollback: bool,

        /// Return as soon as the deployment has started.
        #[arg(long)]
        detach: bool,
    },

    /// Manage delivery pipelines.
    Pipeline {
        /// Pipeline subcommand.
        #[command(subcommand)]
        command: PipelineCommands,
    },

    /// Show the status of a deployed stack.
    Status {
        /// Workload or pipeline name.
        #[arg(short, long)]
        name: String,

        /// Environment of the workload; omit for a pipeline.
        #[arg(short, long)]
        env: Option<String>,

        /// Application name (defaults to the manifest's).
        #[arg(short, long)]
        app: Option<String>,
    },

    /// Roll a failed stack back to its last good configuration.
    Rollback {
        /// Workload or pipeline name.
        #[arg(short, long)]
        name: String,

        /// Environment of the workload; omit for a pipeline.
        #[arg(short, long)]
        env: Option<String>,

        /// Application name (defaults to the manifest's).
        #[arg(short, long)]
        app: Option<String>,
    },

    /// Validate the workspace manifest.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },
}

/// Pipeline subcommands.
#[derive(Subcommand, Debug)]
pub enum PipelineCommands {
    /// Deploy a pipeline.
    Deploy {
        /// Name of the pipeline.
        #[arg(short, long)]
        name: String,

        /// Application name (defaults to the manifest's).
        #[arg(short, long)]
        app: Option<String>,

        /// Skip the confirmation prompt for redeploying an existing pipeline.
        #[arg(long)]
        yes: bool,

        /// Show the template diff before deploying.
        #[arg(long)]
        diff: bool,

        /// Skip the prompt after the diff and deploy.
        #[arg(long)]
        diff_yes: bool,

        /// Deploy even if it downgrades the deployed template version.
        #[arg(long)]
        allow_downgrade: bool,

        /// Leave a failed stack in place instead of rolling it back.
        #[arg(long)]
        no_rollback: bool,

        /// Return as soon as the deployment has started.
        #[arg(long)]
        detach: bool,
    },

    /// Show the stages a pipeline deploys to.
    Stages {
        /// Name of the pipeline.
        #[arg(short, long)]
        name: String,

        /// Application name (defaults to the manifest's).
        #[arg(short, long)]
        app: Option<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Flags shared by both deploy commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployArgs {
    /// Skip the redeploy confirmation.
    pub yes: bool,
    /// Preview the diff first.
    pub diff: bool,
    /// Skip the prompt after the diff.
    pub diff_yes: bool,
    /// Allow a template version downgrade.
    pub allow_downgrade: bool,
    /// Force a new update.
    pub force: bool,
    /// Disable rollback on failure.
    pub no_rollback: bool,
    /// Do not wait for the apply to finish.
    pub detach: bool,
}

impl DeployArgs {
    /// The subset of flags that is validated as a combination.
    #[must_use]
    pub const fn flags(&self) -> DeployFlags {
        DeployFlags {
            yes: self.yes,
            diff: self.diff,
            diff_yes: self.diff_yes,
            detach: self.detach,
        }
    }
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workload_deploy() {
        let cli = Cli::try_parse_from([
            "shipyard", "deploy", "--name", "api", "--env", "test", "--diff", "--diff-yes",
            "--no-rollback",
        ])
        .unwrap();

        match cli.command {
            Commands::Deploy {
                name,
                env,
                app,
                diff,
                diff_yes,
                no_rollback,
                force,
                ..
            } => {
                assert_eq!(name, "api");
                assert_eq!(env, "test");
                assert!(app.is_none());
                assert!(diff && diff_yes && no_rollback);
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_parse_pipeline_deploy() {
        let cli = Cli::try_parse_from([
            "shipyard", "--output", "json", "pipeline", "deploy", "--name", "release", "--yes",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Pipeline {
                command: PipelineCommands::Deploy { ref name, yes: true, .. }
            } if name == "release"
        ));
    }

    #[test]
    fn test_pipeline_deploy_has_no_force() {
        let result = Cli::try_parse_from([
            "shipyard", "pipeline", "deploy", "--name", "release", "--force",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_diff_yes_without_diff_fails_validation() {
        let args = DeployArgs {
            diff_yes: true,
            ..DeployArgs::default()
        };
        let err = args.flags().validate().unwrap_err();
        assert!(err.to_string().contains("--diff-yes cannot be specified without --diff"));
    }
}
