//! CLI module for the Shipyard deployment tool.
//!
//! This module provides the command-line interface for deploying
//! workloads and delivery pipelines.

mod commands;
mod output;
mod prompt;

pub use commands::{Cli, Commands, DeployArgs, OutputFormat, PipelineCommands};
pub use output::OutputFormatter;
pub use prompt::TerminalPrompter;
