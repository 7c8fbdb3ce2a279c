//! Shipyard CLI entrypoint.
//!
//! This is the main entrypoint for the shipyard command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use shipyard_deploy::artifacts::{ArtifactCoordinator, ArtifactUploader, DockerImagePusher, S3ObjectStore};
use shipyard_deploy::cli::{
    Cli, Commands, DeployArgs, OutputFormat, OutputFormatter, PipelineCommands, TerminalPrompter,
};
use shipyard_deploy::cloud::{ControlPlaneClient, EnvironmentStore, StackApi};
use shipyard_deploy::config::{
    find_config_file, validate_name_flag, ConfigParser, ConfigValidator, Settings, ValidationResult,
    WorkspaceConfig,
};
use shipyard_deploy::deploy::{
    ApplyOptions, ApplyReport, DeploymentTarget, ProposedChange, Prompter, StackController,
    TemplateRenderer, YamlTemplateRenderer, TEMPLATE_VERSION,
};
use shipyard_deploy::error::{PipelineError, Result, ShipyardError, WrapErr};
use shipyard_deploy::pipeline::{resolve_stages, LegacyNamingResolver};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.output);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs always go to stderr so that
/// command output on stdout stays machine-readable.
fn init_logging(verbose: bool, output: OutputFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match output {
        OutputFormat::Json => builder.json().init(),
        OutputFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Deploy {
            name,
            env,
            app,
            yes,
            diff,
            diff_yes,
            allow_downgrade,
            force,
            no_rollback,
            detach,
        } => {
            let args = DeployArgs {
                yes,
                diff,
                diff_yes,
                allow_downgrade,
                force,
                no_rollback,
                detach,
            };
            cmd_deploy(config_path, &name, &env, app, args, formatter).await
        }
        Commands::Pipeline { command } => match command {
            PipelineCommands::Deploy {
                name,
                app,
                yes,
                diff,
                diff_yes,
                allow_downgrade,
                no_rollback,
                detach,
            } => {
                let args = DeployArgs {
                    yes,
                    diff,
                    diff_yes,
                    allow_downgrade,
                    force: false,
                    no_rollback,
                    detach,
                };
                cmd_pipeline_deploy(config_path, &name, app, args, formatter).await
            }
            PipelineCommands::Stages { name, app } => {
                cmd_pipeline_stages(config_path, &name, app, formatter).await
            }
        },
        Commands::Status { name, env, app } => {
            cmd_status(config_path, &name, env, app, formatter).await
        }
        Commands::Rollback { name, env, app } => {
            cmd_rollback(config_path, &name, env, app, formatter).await
        }
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, formatter),
    }
}

/// Deploy a workload to an environment.
async fn cmd_deploy(
    config_path: Option<&PathBuf>,
    name: &str,
    env: &str,
    app: Option<String>,
    args: DeployArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    args.flags().validate()?;
    validate_name_flag("--name", name)?;
    validate_name_flag("--env", env)?;

    let (config, _) = load_workspace(config_path)?;
    let app = app_or_default(app, &config)?;
    let workload = config
        .workload(name)
        .cloned()
        .ok_or_else(|| ShipyardError::not_found("workload", name, Some(String::from("the workspace"))))?;

    let settings = Settings::load()?;
    let client = create_client(&settings)?;

    let environment = client
        .get_environment(&app, env)
        .await
        .wrap_err(|| format!("get environment {env} in application {app}"))?;
    debug!(
        "Deploying to environment {} in region {} account {}",
        environment.name, environment.region, environment.account_id
    );

    let target = DeploymentTarget::workload(&app, env, name);
    let prompter = TerminalPrompter::new();
    let controller = StackController::new(&client, &prompter, target.clone(), target.stack_name(false));

    controller.check_version(TEMPLATE_VERSION, args.allow_downgrade).await?;

    let store = match config.artifacts.bucket.as_deref() {
        Some(bucket) => {
            let region = config.artifacts.region.as_deref().or(settings.region.as_deref());
            Some(S3ObjectStore::new(bucket, region).await)
        }
        None => None,
    };
    let artifacts = ArtifactCoordinator::new(workload.clone(), DockerImagePusher::new(), store)
        .with_registry(config.artifacts.registry.clone())
        .upload_artifacts()
        .await
        .wrap_err(|| target.context("upload artifacts for"))?;

    let renderer = YamlTemplateRenderer::new().with_registry(config.artifacts.registry.clone());
    let mut change = renderer.render_workload(&app, env, &workload, &artifacts)?;
    if args.force {
        change = change.force_update()?;
    }

    if !preview_and_confirm(&controller, &prompter, &change, args, formatter).await? {
        println!("{}", formatter.format_report(&ApplyReport::declined(target, controller.stack_name())));
        return Ok(());
    }

    let options = ApplyOptions {
        disable_rollback: args.no_rollback,
        detach: args.detach,
        force_new_update: args.force,
        pre_approved: args.yes || args.diff,
        connection_pending_activation: None,
    };
    let report = controller.apply(&change, &options).await;
    println!("{}", formatter.format_report(&report));
    report.into_result().map(|_| ())
}

/// Deploy a delivery pipeline.
async fn cmd_pipeline_deploy(
    config_path: Option<&PathBuf>,
    name: &str,
    app: Option<String>,
    args: DeployArgs,
    formatter: &OutputFormatter,
) -> Result<()> {
    args.flags().validate()?;
    validate_name_flag("--name", name)?;

    let (config, _) = load_workspace(config_path)?;
    let app = app_or_default(app, &config)?;
    let pipeline = config
        .pipeline(name)
        .cloned()
        .ok_or_else(|| PipelineError::NotDeclared { name: name.to_string() })?;

    let settings = Settings::load()?;
    let client = create_client(&settings)?;

    let stages = resolve_stages(&pipeline.stages, &app, &config.workload_names(), &client).await?;
    info!("Pipeline {name} deploys to {} stage(s)", stages.len());

    let legacy = LegacyNamingResolver::new(&client, &app, name).is_legacy().await?;
    let target = DeploymentTarget::pipeline(&app, name);
    let prompter = TerminalPrompter::new();
    let controller = StackController::new(&client, &prompter, target.clone(), target.stack_name(legacy));

    controller.check_version(TEMPLATE_VERSION, args.allow_downgrade).await?;

    let renderer = YamlTemplateRenderer::new().with_registry(config.artifacts.registry.clone());
    let change = renderer.render_pipeline(&app, &pipeline, &stages)?;

    if !preview_and_confirm(&controller, &prompter, &change, args, formatter).await? {
        println!("{}", formatter.format_report(&ApplyReport::declined(target, controller.stack_name())));
        return Ok(());
    }

    let options = ApplyOptions {
        disable_rollback: args.no_rollback,
        detach: args.detach,
        force_new_update: false,
        pre_approved: args.yes || args.diff,
        connection_pending_activation: pipeline.source.connection_pending_activation(),
    };
    let report = controller.apply(&change, &options).await;
    println!("{}", formatter.format_report(&report));
    report.into_result().map(|_| ())
}

/// Show the stages a pipeline deploys to.
async fn cmd_pipeline_stages(
    config_path: Option<&PathBuf>,
    name: &str,
    app: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = load_workspace(config_path)?;
    let app = app_or_default(app, &config)?;
    let pipeline = config
        .pipeline(name)
        .ok_or_else(|| PipelineError::NotDeclared { name: name.to_string() })?;

    let client = create_client(&Settings::load()?)?;
    let stages = resolve_stages(&pipeline.stages, &app, &config.workload_names(), &client).await?;

    println!("{}", formatter.format_stages(name, &stages));
    Ok(())
}

/// Show the status of a deployed stack.
async fn cmd_status(
    config_path: Option<&PathBuf>,
    name: &str,
    env: Option<String>,
    app: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let app = resolve_app(config_path, app)?;
    let client = create_client(&Settings::load()?)?;
    let (target, stack) = resolve_target(&client, &app, name, env).await?;

    let desc = client
        .describe_stack(&stack)
        .await
        .wrap_err(|| target.context("describe"))?;

    println!("{}", formatter.format_status(&target, &stack, desc.as_ref()));
    Ok(())
}

/// Roll a failed stack back.
async fn cmd_rollback(
    config_path: Option<&PathBuf>,
    name: &str,
    env: Option<String>,
    app: Option<String>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let app = resolve_app(config_path, app)?;
    let client = create_client(&Settings::load()?)?;
    let (target, stack) = resolve_target(&client, &app, name, env).await?;

    info!("Rolling back stack {stack}");
    client
        .rollback_stack(&stack)
        .await
        .wrap_err(|| target.context("roll back"))?;

    let status_hint = target.env.as_deref().map_or_else(
        || format!("shipyard status --app {app} --name {name}"),
        |env| format!("shipyard status --app {app} --env {env} --name {name}"),
    );
    println!(
        "{}",
        formatter.format_success(&format!(
            "Started rolling back stack {stack}. Run `{status_hint}` to follow it."
        ))
    );
    Ok(())
}

/// Validate the workspace manifest.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, result) = load_workspace(config_path)?;
    println!("{}", formatter.format_validation(&config, &result, show_warnings));
    Ok(())
}

/// Shows the diff when asked to, then asks whether to go on.
///
/// Returns `false` if the user declined.
async fn preview_and_confirm<A, P>(
    controller: &StackController<'_, A, P>,
    prompter: &P,
    change: &ProposedChange,
    args: DeployArgs,
    formatter: &OutputFormatter,
) -> Result<bool>
where
    A: StackApi + ?Sized,
    P: Prompter + ?Sized,
{
    if !args.diff {
        return Ok(true);
    }

    let diff = controller.preview(change).await?;
    print!("{}", formatter.format_diff(&diff));

    if args.diff_yes {
        return Ok(true);
    }
    prompter.confirm(
        "Continue with the deployment?",
        "The changes shown above will be applied to the stack.",
    )
}

/// Builds the target and stack name for a workload (with `env`) or a
/// pipeline (without).
async fn resolve_target(
    client: &ControlPlaneClient,
    app: &str,
    name: &str,
    env: Option<String>,
) -> Result<(DeploymentTarget, String)> {
    validate_name_flag("--name", name)?;

    if let Some(env) = env {
        validate_name_flag("--env", &env)?;
        let target = DeploymentTarget::workload(app, env, name);
        let stack = target.stack_name(false);
        return Ok((target, stack));
    }

    let legacy = LegacyNamingResolver::new(client, app, name).is_legacy().await?;
    let target = DeploymentTarget::pipeline(app, name);
    let stack = target.stack_name(legacy);
    Ok((target, stack))
}

/// Resolves the manifest path from the flag or by searching upwards.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.clone()),
        None => find_config_file(std::env::current_dir()?),
    }
}

/// Loads `.env`, then parses and validates the manifest.
fn load_workspace(config_path: Option<&PathBuf>) -> Result<(WorkspaceConfig, ValidationResult)> {
    let config_file = resolve_config_path(config_path)?;
    info!("Using manifest: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file.parent().unwrap_or_else(|| Path::new(".")),
    );
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok((config, result))
}

/// The application from the flag, or from the manifest.
fn app_or_default(app: Option<String>, config: &WorkspaceConfig) -> Result<String> {
    let app = app.unwrap_or_else(|| config.application.clone());
    validate_name_flag("--app", &app)?;
    Ok(app)
}

/// Like [`app_or_default`], but only reads the manifest when `--app` is missing.
fn resolve_app(config_path: Option<&PathBuf>, app: Option<String>) -> Result<String> {
    match app {
        Some(app) => {
            validate_name_flag("--app", &app)?;
            Ok(app)
        }
        None => {
            let (config, _) = load_workspace(config_path)?;
            app_or_default(None, &config)
        }
    }
}

/// Creates the control-plane client from user settings.
fn create_client(settings: &Settings) -> Result<ControlPlaneClient> {
    let token = settings.token()?;
    debug!("Using control plane at {}", settings.endpoint());
    ControlPlaneClient::new(settings.endpoint(), token)
}
