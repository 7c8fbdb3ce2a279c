//! Pipeline stage resolution.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

use crate::cloud::EnvironmentStore;
use crate::config::StageConfig;
use crate::error::{Result, WrapErr};

/// Region and account an environment lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociatedEnvironment {
    /// Region.
    pub region: String,
    /// Account ID.
    pub account_id: String,
}

/// A deployment stage bound to a concrete environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStage {
    /// Environment the stage deploys to.
    pub environment_name: String,
    /// Whether a manual approval gates the stage.
    pub requires_approval: bool,
    /// Commands run after the stage deploys, in order.
    pub test_commands: Vec<String>,
    /// Where the environment lives.
    pub associated_environment: AssociatedEnvironment,
    /// Workloads defined in the local workspace.
    pub local_workloads: BTreeSet<String>,
}

/// Binds declared stages to environments.
///
/// Stages are resolved one at a time in declaration order, and the output
/// keeps that order: the pipeline deploys its stages in sequence. Every stage
/// carries the full local workload inventory.
///
/// # Errors
///
/// Fails on the first environment that cannot be looked up, with
/// `get environment <name> in application <app>` context.
pub async fn resolve_stages<E: EnvironmentStore + ?Sized>(
    declared: &[StageConfig],
    app: &str,
    local_workloads: &BTreeSet<String>,
    envs: &E,
) -> Result<Vec<PipelineStage>> {
    let mut stages = Vec::with_capacity(declared.len());

    for stage in declared {
        let env = envs
            .get_environment(app, &stage.name)
            .await
            .wrap_err(|| format!("get environment {} in application {app}", stage.name))?;
        debug!(
            "Stage {} resolved to region {} account {}",
            stage.name, env.region, env.account_id
        );

        stages.push(PipelineStage {
            environment_name: stage.name.clone(),
            requires_approval: stage.requires_approval,
            test_commands: stage.test_commands.clone(),
            associated_environment: AssociatedEnvironment {
                region: env.region,
                account_id: env.account_id,
            },
            local_workloads: local_workloads.clone(),
        });
    }

    Ok(stages)
}
