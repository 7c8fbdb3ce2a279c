//! Stack lifecycle controller.
//!
//! The controller decides whether a target's stack is created or updated,
//! drives the apply call and classifies how it ended. Conditions the
//! platform reports on purpose (an empty change set, a create that lost a
//! race, an interrupted apply the platform already recovered from) become
//! outcomes and events; every other failure stays an error, wrapped with the
//! target it happened to.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::cloud::{ApplyKind, StackApi, StackSpec};
use crate::error::{CloudError, ComponentType, Result, ShipyardError, WrapErr};

use super::diff::{DiffEngine, DiffResult};
use super::render::ProposedChange;
use super::target::DeploymentTarget;
use super::version::VersionGatekeeper;

/// Asks the user to confirm an action.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter: Send + Sync {
    /// Returns whether the user accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if no answer can be read.
    fn confirm(&self, message: &str, help: &str) -> Result<bool>;
}

/// Options for a single apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Leave a failed stack in place instead of rolling it back.
    pub disable_rollback: bool,
    /// Return as soon as the apply has started.
    pub detach: bool,
    /// The change carries a force-update parameter.
    pub force_new_update: bool,
    /// Skip the redeploy confirmation.
    pub pre_approved: bool,
    /// Connection the user must activate by hand before the pipeline runs.
    pub connection_pending_activation: Option<String>,
}

/// How an apply ended.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// The stack was created.
    Created,
    /// The stack was updated.
    Updated,
    /// The user declined to redeploy an existing stack.
    Declined,
    /// The platform found nothing to change.
    NoChange,
    /// A create was interrupted and the platform deleted the stack.
    InterruptedCreate,
    /// An update was interrupted and the platform rolled it back.
    InterruptedUpdate,
    /// The apply failed.
    Failed(ShipyardError),
}

impl ApplyOutcome {
    /// Short, stable name of the outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Declined => "declined",
            Self::NoChange => "no_change",
            Self::InterruptedCreate => "interrupted_create",
            Self::InterruptedUpdate => "interrupted_update",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether the outcome is an error.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl Serialize for ApplyOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ApplyOutcome", 2)?;
        state.serialize_field("status", self.label())?;
        let error = match self {
            Self::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        state.serialize_field("error", &error)?;
        state.end()
    }
}

/// Something the user should know about, emitted while applying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeployEvent {
    /// A code connection was created and must be activated by hand.
    ConnectionActivationRequired {
        /// Connection name.
        connection_name: String,
    },
    /// Another actor created the stack first; the run continued with it.
    StackAlreadyExists {
        /// Stack name.
        stack: String,
    },
    /// The platform found nothing to change.
    NoInfrastructureChanges {
        /// Stack name.
        stack: String,
        /// Whether `--force` would have produced a change.
        suggest_force: bool,
    },
    /// The create was interrupted and the stack was deleted.
    DeletedOnInterrupt {
        /// Stack name.
        stack: String,
    },
    /// The update was interrupted and the stack went back to its previous configuration.
    RolledBackOnInterrupt {
        /// Stack name.
        stack: String,
    },
    /// The stack was left failed; it must be rolled back by hand.
    ManualRollbackRequired {
        /// Stack name.
        stack: String,
        /// Command that rolls it back.
        command: String,
    },
    /// The apply was started and not waited for.
    Detached {
        /// Stack name.
        stack: String,
        /// Which apply was started.
        kind: ApplyKind,
    },
}

/// Everything a single apply produced.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// What was deployed.
    pub target: DeploymentTarget,
    /// Stack that was applied.
    pub stack_name: String,
    /// How the apply ended.
    pub outcome: ApplyOutcome,
    /// Events, in the order they happened.
    pub events: Vec<DeployEvent>,
    /// Suggested next steps after a completed create or update.
    pub recommendations: Vec<String>,
    /// When the apply started.
    pub started_at: DateTime<Utc>,
    /// When the apply ended.
    pub finished_at: DateTime<Utc>,
}

impl ApplyReport {
    /// Report of a deployment the user cancelled before any apply call.
    #[must_use]
    pub fn declined(target: DeploymentTarget, stack_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            target,
            stack_name: stack_name.into(),
            outcome: ApplyOutcome::Declined,
            events: Vec::new(),
            recommendations: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Turns a failed outcome into its error.
    ///
    /// # Errors
    ///
    /// Returns the error carried by [`ApplyOutcome::Failed`].
    pub fn into_result(self) -> Result<Self> {
        match self.outcome {
            ApplyOutcome::Failed(err) => Err(err),
            outcome => Ok(Self { outcome, ..self }),
        }
    }
}

/// Creates or updates the stack of one deployment target.
#[derive(Debug)]
pub struct StackController<'a, A: ?Sized, P: ?Sized> {
    api: &'a A,
    prompter: &'a P,
    target: DeploymentTarget,
    stack_name: String,
    diff_engine: DiffEngine,
}

impl<'a, A, P> StackController<'a, A, P>
where
    A: StackApi + ?Sized,
    P: Prompter + ?Sized,
{
    /// Creates a controller for `target`, whose stack is `stack_name`.
    ///
    /// The stack name is fixed for the controller's lifetime, so the
    /// existence check and the apply always target the same stack.
    #[must_use]
    pub fn new(api: &'a A, prompter: &'a P, target: DeploymentTarget, stack_name: impl Into<String>) -> Self {
        Self {
            api,
            prompter,
            target,
            stack_name: stack_name.into(),
            diff_engine: DiffEngine::new(),
        }
    }

    /// The stack this controller applies.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Diffs the deployed template against the proposed one.
    ///
    /// # Errors
    ///
    /// Returns fetch or parse errors.
    pub async fn preview(&self, change: &ProposedChange) -> Result<DiffResult> {
        self.diff_engine
            .fetch_and_diff(self.api, &self.target, &self.stack_name, &change.rendered_template)
            .await
    }

    /// Fails if `candidate_version` would downgrade the deployed stack.
    ///
    /// # Errors
    ///
    /// Returns a downgrade error, a version parse error, or a lookup error.
    pub async fn check_version(&self, candidate_version: &str, allow_downgrade: bool) -> Result<()> {
        VersionGatekeeper::new(self.api)
            .check(&self.target, &self.stack_name, candidate_version, allow_downgrade)
            .await
    }

    /// Creates or updates the stack and reports how it ended.
    ///
    /// Failures are reported through [`ApplyOutcome::Failed`]; use
    /// [`ApplyReport::into_result`] to turn them back into errors.
    pub async fn apply(&self, change: &ProposedChange, options: &ApplyOptions) -> ApplyReport {
        let started_at = Utc::now();
        let mut events = Vec::new();

        let outcome = match self.run(change, options, &mut events).await {
            Ok(outcome) => outcome,
            Err(err) => ApplyOutcome::Failed(err),
        };
        info!("Apply of {} finished: {}", self.stack_name, outcome.label());

        let completed = matches!(outcome, ApplyOutcome::Created | ApplyOutcome::Updated);
        let recommendations = if completed && !options.detach {
            self.recommendations(&outcome, options)
        } else {
            Vec::new()
        };

        ApplyReport {
            target: self.target.clone(),
            stack_name: self.stack_name.clone(),
            outcome,
            events,
            recommendations,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run(
        &self,
        change: &ProposedChange,
        options: &ApplyOptions,
        events: &mut Vec<DeployEvent>,
    ) -> Result<ApplyOutcome> {
        let exists = self
            .api
            .stack_exists(&self.stack_name)
            .await
            .wrap_err(|| self.target.context("deploy"))?;
        debug!("Stack {} exists: {exists}", self.stack_name);

        if exists {
            self.update(change, options, events).await
        } else {
            self.create(change, options, events).await
        }
    }

    async fn create(
        &self,
        change: &ProposedChange,
        options: &ApplyOptions,
        events: &mut Vec<DeployEvent>,
    ) -> Result<ApplyOutcome> {
        if let Some(connection_name) = &options.connection_pending_activation {
            events.push(DeployEvent::ConnectionActivationRequired {
                connection_name: connection_name.clone(),
            });
        }

        info!("Creating stack {} for {}", self.stack_name, self.target);
        match self.api.create_stack(&self.stack_spec(change, options)).await {
            Ok(()) => {}
            Err(e) if matches!(e.as_cloud(), Some(CloudError::AlreadyExists { .. })) => {
                warn!("Stack {} was created concurrently, following it", self.stack_name);
                events.push(DeployEvent::StackAlreadyExists {
                    stack: self.stack_name.clone(),
                });
            }
            Err(e) => return self.classify(e, options, events),
        }

        self.finish(ApplyKind::Create, options, events).await
    }

    async fn update(
        &self,
        change: &ProposedChange,
        options: &ApplyOptions,
        events: &mut Vec<DeployEvent>,
    ) -> Result<ApplyOutcome> {
        if !options.pre_approved {
            let message = format!(
                "Are you sure you want to redeploy an existing {}: {}?",
                self.target.kind, self.target.name
            );
            let help = format!("Stack {} will be updated in place.", self.stack_name);
            let confirmed = self
                .prompter
                .confirm(&message, &help)
                .wrap_err(|| format!("confirm redeploy of {}", self.target))?;
            if !confirmed {
                info!("Redeploy of {} declined", self.target);
                return Ok(ApplyOutcome::Declined);
            }
        }

        info!("Updating stack {} for {}", self.stack_name, self.target);
        if let Err(e) = self.api.update_stack(&self.stack_spec(change, options)).await {
            return self.classify(e, options, events);
        }

        self.finish(ApplyKind::Update, options, events).await
    }

    /// Waits for a started apply, unless detached.
    async fn finish(
        &self,
        kind: ApplyKind,
        options: &ApplyOptions,
        events: &mut Vec<DeployEvent>,
    ) -> Result<ApplyOutcome> {
        let done = match kind {
            ApplyKind::Create => ApplyOutcome::Created,
            ApplyKind::Update => ApplyOutcome::Updated,
        };

        if options.detach {
            events.push(DeployEvent::Detached {
                stack: self.stack_name.clone(),
                kind,
            });
            return Ok(done);
        }

        match self.api.wait_for_stack(&self.stack_name, kind).await {
            Ok(()) => Ok(done),
            Err(e) => self.classify(e, options, events),
        }
    }

    /// Turns the platform's benign conditions into outcomes; everything else
    /// becomes a deploy error.
    fn classify(
        &self,
        err: ShipyardError,
        options: &ApplyOptions,
        events: &mut Vec<DeployEvent>,
    ) -> Result<ApplyOutcome> {
        let stack = self.stack_name.clone();
        match err.as_cloud() {
            Some(CloudError::EmptyChangeSet { change_set, .. }) => {
                info!("No changes to apply to stack {stack} (change set {change_set})");
                events.push(DeployEvent::NoInfrastructureChanges {
                    stack,
                    suggest_force: !options.force_new_update,
                });
                return Ok(ApplyOutcome::NoChange);
            }
            Some(CloudError::DeletedOnInterrupt { .. }) => {
                events.push(DeployEvent::DeletedOnInterrupt { stack });
                return Ok(ApplyOutcome::InterruptedCreate);
            }
            Some(CloudError::RolledBackOnInterrupt { .. }) => {
                events.push(DeployEvent::RolledBackOnInterrupt { stack });
                return Ok(ApplyOutcome::InterruptedUpdate);
            }
            _ => {}
        }

        let stack_failed = matches!(err.as_cloud(), Some(CloudError::StackFailed { .. }));
        let err = err.context(self.target.context("deploy"));
        if !(stack_failed && options.disable_rollback) {
            return Err(err);
        }

        let command = self.rollback_command();
        events.push(DeployEvent::ManualRollbackRequired {
            stack: stack.clone(),
            command: command.clone(),
        });
        Err(err.with_remediation(format!(
            "Stack {stack} was left in its failed state because rollback is disabled.\n\
             Fix the failed resources, then roll the stack back with:\n  {command}"
        )))
    }

    fn rollback_command(&self) -> String {
        match &self.target.env {
            Some(env) => format!(
                "shipyard rollback --app {} --env {env} --name {}",
                self.target.app, self.target.name
            ),
            None => format!(
                "shipyard rollback --app {} --name {}",
                self.target.app, self.target.name
            ),
        }
    }

    fn stack_spec(&self, change: &ProposedChange, options: &ApplyOptions) -> StackSpec {
        let mut tags = BTreeMap::new();
        tags.insert(String::from("shipyard-application"), self.target.app.clone());
        if let Some(env) = &self.target.env {
            tags.insert(String::from("shipyard-environment"), env.clone());
        }
        tags.insert(format!("shipyard-{}", self.target.kind), self.target.name.clone());

        StackSpec {
            name: self.stack_name.clone(),
            template: change.rendered_template.clone(),
            parameters: change.parameters.clone(),
            tags,
            disable_rollback: options.disable_rollback,
            client_token: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn recommendations(&self, outcome: &ApplyOutcome, options: &ApplyOptions) -> Vec<String> {
        match (self.target.kind, &self.target.env) {
            (ComponentType::Pipeline, _) => {
                let mut recs = Vec::new();
                // A connection only needs activating right after it is created.
                let created = matches!(outcome, ApplyOutcome::Created);
                if let (true, Some(connection)) = (created, &options.connection_pending_activation) {
                    recs.push(format!(
                        "Activate connection {connection} so the pipeline can read its source repository."
                    ));
                }
                recs.push(format!(
                    "Run `shipyard pipeline stages --name {}` to review the stages the pipeline deploys to.",
                    self.target.name
                ));
                recs
            }
            (_, Some(env)) => vec![format!(
                "Run `shipyard status --name {} --env {env}` to check the {} after the deployment.",
                self.target.name, self.target.kind
            )],
            (_, None) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactReferences;
    use crate::cloud::{DeployedPipeline, MockPipelineLister, MockStackApi};
    use crate::pipeline::LegacyNamingResolver;

    fn change() -> ProposedChange {
        ProposedChange {
            rendered_template: String::from("Resources:\n  Workload:\n    Type: Shipyard::BackendService\n"),
            parameters: String::from("{\"AppName\":\"demo\"}"),
            artifact_references: ArtifactReferences::default(),
        }
    }

    fn workload() -> DeploymentTarget {
        DeploymentTarget::workload("demo", "test", "api")
    }

    fn exists(api: &mut MockStackApi, exists: bool) {
        api.expect_stack_exists()
            .times(1)
            .returning(move |_| Ok(exists));
    }

    fn never_prompted() -> MockPrompter {
        let mut prompter = MockPrompter::new();
        prompter.expect_confirm().times(0);
        prompter
    }

    fn answering(answer: bool) -> MockPrompter {
        let mut prompter = MockPrompter::new();
        prompter
            .expect_confirm()
            .withf(|message, _| message == "Are you sure you want to redeploy an existing workload: api?")
            .times(1)
            .returning(move |_, _| Ok(answer));
        prompter
    }

    #[tokio::test]
    async fn test_creates_missing_stack() {
        let mut api = MockStackApi::new();
        exists(&mut api, false);
        api.expect_create_stack()
            .withf(|spec| {
                spec.name == "demo-test-api"
                    && !spec.disable_rollback
                    && spec.tags["shipyard-workload"] == "api"
            })
            .times(1)
            .returning(|_| Ok(()));
        api.expect_update_stack().times(0);
        api.expect_wait_for_stack()
            .withf(|stack, kind| stack == "demo-test-api" && *kind == ApplyKind::Create)
            .times(1)
            .returning(|_, _| Ok(()));
        let prompter = never_prompted();

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &ApplyOptions::default()).await;

        assert!(matches!(report.outcome, ApplyOutcome::Created));
        assert!(report.events.is_empty());
        assert_eq!(
            report.recommendations,
            ["Run `shipyard status --name api --env test` to check the workload after the deployment."]
        );
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn test_updates_after_confirmation() {
        let mut api = MockStackApi::new();
        exists(&mut api, true);
        api.expect_create_stack().times(0);
        api.expect_update_stack().times(1).returning(|_| Ok(()));
        api.expect_wait_for_stack()
            .withf(|_, kind| *kind == ApplyKind::Update)
            .times(1)
            .returning(|_, _| Ok(()));
        let prompter = answering(true);

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &ApplyOptions::default()).await;

        assert!(matches!(report.outcome, ApplyOutcome::Updated));
    }

    #[tokio::test]
    async fn test_declined_update_is_not_an_error() {
        let mut api = MockStackApi::new();
        exists(&mut api, true);
        api.expect_create_stack().times(0);
        api.expect_update_stack().times(0);
        api.expect_wait_for_stack().times(0);
        let prompter = answering(false);

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller
            .apply(&change(), &ApplyOptions::default())
            .await
            .into_result()
            .unwrap();

        assert!(matches!(report.outcome, ApplyOutcome::Declined));
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_pre_approved_update_skips_prompt() {
        let mut api = MockStackApi::new();
        exists(&mut api, true);
        api.expect_update_stack().times(1).returning(|_| Ok(()));
        api.expect_wait_for_stack().times(1).returning(|_, _| Ok(()));
        let prompter = never_prompted();

        let options = ApplyOptions {
            pre_approved: true,
            ..ApplyOptions::default()
        };
        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &options).await;

        assert!(matches!(report.outcome, ApplyOutcome::Updated));
    }

    #[tokio::test]
    async fn test_downgrade_is_blocked() {
        let mut api = MockStackApi::new();
        api.expect_template_version()
            .times(1)
            .returning(|_| Ok(String::from("v1.30.0")));
        let prompter = never_prompted();

        let target = DeploymentTarget::pipeline("demo", "pipepiper");
        let controller = StackController::new(&api, &prompter, target, "pipepiper");
        let err = controller.check_version("v1.28.0", false).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "cannot downgrade pipeline \"pipepiper\" (currently in version v1.30.0) to version v1.28.0"
        );
    }

    #[tokio::test]
    async fn test_empty_change_set_is_no_change() {
        let mut api = MockStackApi::new();
        exists(&mut api, true);
        api.expect_update_stack().times(1).returning(|spec| {
            Err(CloudError::EmptyChangeSet {
                stack: spec.name.clone(),
                change_set: String::from("cs-1"),
            }
            .into())
        });
        api.expect_wait_for_stack().times(0);
        let prompter = never_prompted();

        let options = ApplyOptions {
            pre_approved: true,
            ..ApplyOptions::default()
        };
        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &options).await.into_result().unwrap();

        assert!(matches!(report.outcome, ApplyOutcome::NoChange));
        assert_eq!(
            report.events,
            [DeployEvent::NoInfrastructureChanges {
                stack: String::from("demo-test-api"),
                suggest_force: true,
            }]
        );
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_empty_change_set_on_create() {
        let mut api = MockStackApi::new();
        exists(&mut api, false);
        api.expect_create_stack().times(1).returning(|spec| {
            Err(CloudError::EmptyChangeSet {
                stack: spec.name.clone(),
                change_set: String::from("cs-1"),
            }
            .into())
        });
        let prompter = never_prompted();

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &ApplyOptions::default()).await;
        assert!(matches!(report.outcome, ApplyOutcome::NoChange));
    }

    #[tokio::test]
    async fn test_concurrent_create_continues() {
        let mut api = MockStackApi::new();
        exists(&mut api, false);
        api.expect_create_stack().times(1).returning(|spec| {
            Err(CloudError::AlreadyExists {
                stack: spec.name.clone(),
            }
            .into())
        });
        api.expect_wait_for_stack().times(1).returning(|_, _| Ok(()));
        let prompter = never_prompted();

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &ApplyOptions::default()).await;

        assert!(matches!(report.outcome, ApplyOutcome::Created));
        assert_eq!(
            report.events,
            [DeployEvent::StackAlreadyExists {
                stack: String::from("demo-test-api")
            }]
        );
    }

    #[tokio::test]
    async fn test_interrupted_create() {
        let mut api = MockStackApi::new();
        exists(&mut api, false);
        api.expect_create_stack().times(1).returning(|_| Ok(()));
        api.expect_wait_for_stack().times(1).returning(|stack, _| {
            Err(CloudError::DeletedOnInterrupt {
                stack: stack.to_string(),
            }
            .into())
        });
        let prompter = never_prompted();

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &ApplyOptions::default()).await;

        assert!(matches!(report.outcome, ApplyOutcome::InterruptedCreate));
        assert!(report.recommendations.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_interrupted_update() {
        let mut api = MockStackApi::new();
        exists(&mut api, true);
        api.expect_update_stack().times(1).returning(|_| Ok(()));
        api.expect_wait_for_stack().times(1).returning(|stack, _| {
            Err(CloudError::RolledBackOnInterrupt {
                stack: stack.to_string(),
            }
            .into())
        });
        let prompter = answering(true);

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &ApplyOptions::default()).await;

        assert!(matches!(report.outcome, ApplyOutcome::InterruptedUpdate));
        assert_eq!(
            report.events,
            [DeployEvent::RolledBackOnInterrupt {
                stack: String::from("demo-test-api")
            }]
        );
    }

    #[tokio::test]
    async fn test_detach_does_not_wait() {
        let mut api = MockStackApi::new();
        exists(&mut api, false);
        api.expect_create_stack().times(1).returning(|_| Ok(()));
        api.expect_wait_for_stack().times(0);
        let prompter = never_prompted();

        let options = ApplyOptions {
            detach: true,
            ..ApplyOptions::default()
        };
        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &options).await;

        assert!(matches!(report.outcome, ApplyOutcome::Created));
        assert!(report.recommendations.is_empty());
        assert_eq!(
            report.events,
            [DeployEvent::Detached {
                stack: String::from("demo-test-api"),
                kind: ApplyKind::Create,
            }]
        );
    }

    #[tokio::test]
    async fn test_failure_without_rollback_names_command() {
        let mut api = MockStackApi::new();
        exists(&mut api, true);
        api.expect_update_stack()
            .withf(|spec| spec.disable_rollback)
            .times(1)
            .returning(|_| Ok(()));
        api.expect_wait_for_stack().times(1).returning(|stack, _| {
            Err(CloudError::StackFailed {
                stack: stack.to_string(),
                status: String::from("UPDATE_FAILED"),
                reason: None,
            }
            .into())
        });
        let prompter = never_prompted();

        let options = ApplyOptions {
            pre_approved: true,
            disable_rollback: true,
            ..ApplyOptions::default()
        };
        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &options).await;

        let command = "shipyard rollback --app demo --env test --name api";
        assert_eq!(
            report.events,
            [DeployEvent::ManualRollbackRequired {
                stack: String::from("demo-test-api"),
                command: command.to_string(),
            }]
        );
        let err = report.into_result().unwrap_err();
        assert!(err.remediation().unwrap().contains(command));
        assert!(matches!(err.as_cloud(), Some(CloudError::StackFailed { .. })));
    }

    #[tokio::test]
    async fn test_transport_error_is_wrapped() {
        let mut api = MockStackApi::new();
        api.expect_stack_exists()
            .returning(|_| Err(CloudError::network("connection reset").into()));
        let prompter = never_prompted();

        let controller = StackController::new(&api, &prompter, workload(), "demo-test-api");
        let report = controller.apply(&change(), &ApplyOptions::default()).await;

        assert!(report.outcome.is_failure());
        let err = report.into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "deploy workload api: network error communicating with the control plane: connection reset"
        );
        assert!(err.remediation().is_none());
    }

    #[tokio::test]
    async fn test_pipeline_connection_activation() {
        let mut api = MockStackApi::new();
        exists(&mut api, false);
        api.expect_create_stack()
            .withf(|spec| spec.name == "pipeline-demo-release" && spec.tags["shipyard-pipeline"] == "release")
            .times(1)
            .returning(|_| Ok(()));
        api.expect_wait_for_stack().times(1).returning(|_, _| Ok(()));
        let prompter = never_prompted();

        let options = ApplyOptions {
            connection_pending_activation: Some(String::from("acme-frontend")),
            ..ApplyOptions::default()
        };
        let target = DeploymentTarget::pipeline("demo", "release");
        let controller = StackController::new(&api, &prompter, target, "pipeline-demo-release");
        let report = controller.apply(&change(), &options).await;

        assert!(matches!(report.outcome, ApplyOutcome::Created));
        assert_eq!(
            report.events,
            [DeployEvent::ConnectionActivationRequired {
                connection_name: String::from("acme-frontend")
            }]
        );
        assert_eq!(report.recommendations.len(), 2);
        assert!(report.recommendations[0].starts_with("Activate connection acme-frontend"));
    }

    #[tokio::test]
    async fn test_updated_pipeline_skips_connection_activation() {
        let mut api = MockStackApi::new();
        exists(&mut api, true);
        api.expect_update_stack().times(1).returning(|_| Ok(()));
        api.expect_wait_for_stack().times(1).returning(|_, _| Ok(()));
        let prompter = never_prompted();

        let options = ApplyOptions {
            pre_approved: true,
            connection_pending_activation: Some(String::from("acme-frontend")),
            ..ApplyOptions::default()
        };
        let target = DeploymentTarget::pipeline("demo", "release");
        let controller = StackController::new(&api, &prompter, target, "pipeline-demo-release");
        let report = controller.apply(&change(), &options).await;

        assert!(matches!(report.outcome, ApplyOutcome::Updated));
        assert!(report.events.is_empty());
        assert_eq!(
            report.recommendations,
            ["Run `shipyard pipeline stages --name release` to review the stages the pipeline deploys to."]
        );
    }

    #[tokio::test]
    async fn test_legacy_pipeline_keeps_bare_stack_name() {
        let mut lister = MockPipelineLister::new();
        lister
            .expect_list_deployed_pipelines()
            .times(1)
            .returning(|_| {
                Ok(vec![DeployedPipeline {
                    name: String::from("release"),
                    resource_name: String::from("release"),
                    is_legacy: true,
                }])
            });
        let resolver = LegacyNamingResolver::new(&lister, "demo", "release");
        let legacy = resolver.is_legacy().await.unwrap();

        let mut api = MockStackApi::new();
        api.expect_stack_exists()
            .withf(|stack| stack == "release")
            .times(1)
            .returning(|_| Ok(true));
        api.expect_update_stack()
            .withf(|spec| spec.name == "release")
            .times(1)
            .returning(|_| Ok(()));
        api.expect_wait_for_stack()
            .withf(|stack, kind| stack == "release" && *kind == ApplyKind::Update)
            .times(1)
            .returning(|_, _| Ok(()));
        let prompter = never_prompted();

        let options = ApplyOptions {
            pre_approved: true,
            ..ApplyOptions::default()
        };
        let target = DeploymentTarget::pipeline("demo", "release");
        let controller = StackController::new(&api, &prompter, target.clone(), target.stack_name(legacy));
        let report = controller.apply(&change(), &options).await;

        assert!(matches!(report.outcome, ApplyOutcome::Updated));
        assert_eq!(report.stack_name, "release");
        assert!(resolver.is_legacy().await.unwrap());
    }

    #[tokio::test]
    async fn test_new_pipeline_uses_namespaced_stack_name() {
        let mut lister = MockPipelineLister::new();
        lister
            .expect_list_deployed_pipelines()
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let legacy = LegacyNamingResolver::new(&lister, "demo", "release")
            .is_legacy()
            .await
            .unwrap();

        let mut api = MockStackApi::new();
        api.expect_stack_exists()
            .withf(|stack| stack == "pipeline-demo-release")
            .times(1)
            .returning(|_| Ok(false));
        api.expect_create_stack()
            .withf(|spec| spec.name == "pipeline-demo-release")
            .times(1)
            .returning(|_| Ok(()));
        api.expect_wait_for_stack()
            .withf(|stack, _| stack == "pipeline-demo-release")
            .times(1)
            .returning(|_, _| Ok(()));
        let prompter = never_prompted();

        let target = DeploymentTarget::pipeline("demo", "release");
        let controller = StackController::new(&api, &prompter, target.clone(), target.stack_name(legacy));
        let report = controller.apply(&change(), &ApplyOptions::default()).await;

        assert!(matches!(report.outcome, ApplyOutcome::Created));
        assert_eq!(report.stack_name, "pipeline-demo-release");
    }

    #[test]
    fn test_outcome_serializes_error() {
        let outcome = ApplyOutcome::Failed(ShipyardError::internal("boom"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "Internal error: boom");

        let json = serde_json::to_value(&ApplyOutcome::NoChange).unwrap();
        assert_eq!(json["status"], "no_change");
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_declined_report() {
        let report = ApplyReport::declined(workload(), "demo-test-api");
        assert!(matches!(report.outcome, ApplyOutcome::Declined));
        assert!(report.events.is_empty());
        assert!(report.recommendations.is_empty());
        assert!(report.into_result().is_ok());
    }
}
