//! Control-plane API client implementation.
//!
//! This module provides the HTTP client for the platform's JSON API. It
//! implements every collaborator contract in [`super::api`] and translates
//! the platform's error codes into recognizable [`CloudError`] variants.

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::{CloudError, Result, ShipyardError};

use super::api::{EnvironmentStore, PipelineLister, StackApi};
use super::types::{
    ApiErrorBody, ApplyKind, DeployedPipeline, EnvironmentInfo, PipelineList, StackDescription,
    StackMetadata, StackSpec, StatusClass, TemplateBody,
};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Default interval between stack status polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Control-plane API client.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    /// HTTP client.
    client: Client,
    /// Base URL, without trailing slash.
    base_url: String,
    /// Bearer token.
    token: String,
    /// Interval between status polls while waiting.
    poll_interval: Duration,
}

/// Raw response that made it past transport-level checks.
struct ApiResponse {
    status: u16,
    body: String,
}

impl ControlPlaneClient {
    /// Creates a new control-plane client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| CloudError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Sets the interval between stack status polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Executes a request, retrying transient failures.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = last_error
                    .as_ref()
                    .and_then(|e: &CloudError| e.retry_delay_secs())
                    .map_or(RETRY_DELAY_MS * u64::from(attempt), |s| s * 1000);
                debug!("Retry attempt {attempt} of {MAX_RETRIES} in {delay}ms");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.execute_once(method.clone(), path, body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error
            .unwrap_or_else(|| CloudError::network("Max retries exceeded"))
            .into())
    }

    /// Executes a single request.
    ///
    /// Transport failures, auth failures, throttling and server errors are
    /// returned as errors; any other status is handed back to the caller.
    async fn execute_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> std::result::Result<ApiResponse, CloudError> {
        let url = format!("{}{path}", self.base_url);
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudError::network(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            return Err(CloudError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == 401 || status == 403 {
            return Err(CloudError::AuthenticationFailed {
                message: String::from("Invalid or expired token"),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CloudError::network(format!("Failed to read response: {e}")))?;

        if status >= 500 {
            return Err(CloudError::api_error(status, body));
        }

        Ok(ApiResponse { status, body })
    }

    /// Decodes a successful response body.
    fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T> {
        serde_json::from_str(&response.body).map_err(|e| {
            ShipyardError::Cloud(CloudError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })
    }

    /// Converts an unexpected status into an error.
    fn unexpected(response: &ApiResponse) -> ShipyardError {
        let parsed: ApiErrorBody = serde_json::from_str(&response.body).unwrap_or_default();
        let message = parsed.message.unwrap_or_else(|| response.body.clone());
        CloudError::api_error(response.status, message).into()
    }

    fn error_body(response: &ApiResponse) -> ApiErrorBody {
        serde_json::from_str(&response.body).unwrap_or_default()
    }

    fn stack_path(stack: &str) -> String {
        format!("/v1/stacks/{stack}")
    }

    async fn cancel_stack(&self, stack: &str) -> Result<()> {
        let response = self
            .execute(Method::POST, &format!("{}/cancel", Self::stack_path(stack)), None)
            .await?;
        match response.status {
            200..=299 => Ok(()),
            404 => Err(CloudError::StackNotFound {
                stack: stack.to_string(),
            }
            .into()),
            _ => Err(Self::unexpected(&response)),
        }
    }

    /// Maps a terminal status observed while waiting to a result.
    fn terminal_result(
        stack: &str,
        kind: ApplyKind,
        interrupted: bool,
        description: &StackDescription,
    ) -> Option<Result<()>> {
        let failed = || {
            Err(CloudError::StackFailed {
                stack: stack.to_string(),
                status: description.status.clone(),
                reason: description.status_reason.clone(),
            }
            .into())
        };

        match (description.status_class(), kind, interrupted) {
            (StatusClass::InProgress, _, _) => None,
            (StatusClass::Complete, _, _) => Some(Ok(())),
            (StatusClass::CreateRolledBack, ApplyKind::Create, true) => {
                Some(Err(CloudError::DeletedOnInterrupt {
                    stack: stack.to_string(),
                }
                .into()))
            }
            (StatusClass::UpdateRolledBack, ApplyKind::Update, true) => {
                Some(Err(CloudError::RolledBackOnInterrupt {
                    stack: stack.to_string(),
                }
                .into()))
            }
            _ => Some(failed()),
        }
    }
}

#[async_trait]
impl StackApi for ControlPlaneClient {
    async fn stack_exists(&self, stack: &str) -> Result<bool> {
        Ok(self.describe_stack(stack).await?.is_some())
    }

    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>> {
        let response = self.execute(Method::GET, &Self::stack_path(stack), None).await?;
        match response.status {
            200 => Self::decode(&response).map(Some),
            404 => Ok(None),
            _ => Err(Self::unexpected(&response)),
        }
    }

    async fn template(&self, stack: &str) -> Result<String> {
        let path = format!("{}/template", Self::stack_path(stack));
        let response = self.execute(Method::GET, &path, None).await?;
        match response.status {
            200 => Self::decode::<TemplateBody>(&response).map(|t| t.body),
            404 => Err(CloudError::StackNotFound {
                stack: stack.to_string(),
            }
            .into()),
            _ => Err(Self::unexpected(&response)),
        }
    }

    async fn template_version(&self, stack: &str) -> Result<String> {
        let path = format!("{}/metadata", Self::stack_path(stack));
        let response = self.execute(Method::GET, &path, None).await?;
        match response.status {
            200 => Self::decode::<StackMetadata>(&response).map(|m| m.version.unwrap_or_default()),
            404 => Err(CloudError::StackNotFound {
                stack: stack.to_string(),
            }
            .into()),
            _ => Err(Self::unexpected(&response)),
        }
    }

    async fn create_stack(&self, spec: &StackSpec) -> Result<()> {
        info!("Creating stack: {}", spec.name);
        let body = serde_json::to_value(spec)
            .map_err(|e| ShipyardError::internal(format!("serialize stack spec: {e}")))?;
        let response = self.execute(Method::POST, "/v1/stacks", Some(&body)).await?;
        match response.status {
            200..=299 => Ok(()),
            409 if Self::error_body(&response).code.as_deref() == Some("AlreadyExists") => {
                Err(CloudError::AlreadyExists {
                    stack: spec.name.clone(),
                }
                .into())
            }
            _ => Err(Self::unexpected(&response)),
        }
    }

    async fn update_stack(&self, spec: &StackSpec) -> Result<()> {
        info!("Updating stack: {}", spec.name);
        let body = serde_json::to_value(spec)
            .map_err(|e| ShipyardError::internal(format!("serialize stack spec: {e}")))?;
        let response = self
            .execute(Method::PUT, &Self::stack_path(&spec.name), Some(&body))
            .await?;
        match response.status {
            200..=299 => Ok(()),
            404 => Err(CloudError::StackNotFound {
                stack: spec.name.clone(),
            }
            .into()),
            400 | 409 => {
                let parsed = Self::error_body(&response);
                match parsed.code.as_deref() {
                    Some("NoChanges" | "EmptyChangeSet") => Err(CloudError::EmptyChangeSet {
                        stack: spec.name.clone(),
                        change_set: parsed.change_set.unwrap_or_else(|| spec.client_token.clone()),
                    }
                    .into()),
                    _ => Err(Self::unexpected(&response)),
                }
            }
            _ => Err(Self::unexpected(&response)),
        }
    }

    async fn wait_for_stack(&self, stack: &str, kind: ApplyKind) -> Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut listening = true;
        let mut interrupted = false;

        loop {
            match self.describe_stack(stack).await? {
                None if interrupted && kind == ApplyKind::Create => {
                    return Err(CloudError::DeletedOnInterrupt {
                        stack: stack.to_string(),
                    }
                    .into());
                }
                None => {
                    return Err(CloudError::StackNotFound {
                        stack: stack.to_string(),
                    }
                    .into());
                }
                Some(description) => {
                    debug!("Stack {stack} is {}", description.status);
                    if let Some(result) =
                        Self::terminal_result(stack, kind, interrupted, &description)
                    {
                        return result;
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                signal = &mut ctrl_c, if listening => {
                    listening = false;
                    if signal.is_ok() {
                        warn!("Interrupted, asking the platform to cancel the {kind} of stack {stack}");
                        self.cancel_stack(stack).await?;
                        interrupted = true;
                    }
                }
            }
        }
    }

    async fn rollback_stack(&self, stack: &str) -> Result<()> {
        info!("Rolling back stack: {stack}");
        let path = format!("{}/rollback", Self::stack_path(stack));
        let response = self.execute(Method::POST, &path, None).await?;
        match response.status {
            200..=299 => Ok(()),
            404 => Err(CloudError::StackNotFound {
                stack: stack.to_string(),
            }
            .into()),
            _ => Err(Self::unexpected(&response)),
        }
    }
}

#[async_trait]
impl PipelineLister for ControlPlaneClient {
    async fn list_deployed_pipelines(&self, app: &str) -> Result<Vec<DeployedPipeline>> {
        let path = format!("/v1/applications/{app}/pipelines");
        let response = self.execute(Method::GET, &path, None).await?;
        match response.status {
            200 => Self::decode::<PipelineList>(&response).map(|l| l.pipelines),
            404 => Err(ShipyardError::not_found("application", app, None)),
            _ => Err(Self::unexpected(&response)),
        }
    }
}

#[async_trait]
impl EnvironmentStore for ControlPlaneClient {
    async fn get_environment(&self, app: &str, env: &str) -> Result<EnvironmentInfo> {
        let path = format!("/v1/applications/{app}/environments/{env}");
        let response = self.execute(Method::GET, &path, None).await?;
        match response.status {
            200 => Self::decode(&response),
            404 => Err(ShipyardError::not_found(
                "environment",
                env,
                Some(format!("application {app}")),
            )),
            _ => Err(Self::unexpected(&response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ControlPlaneClient {
        ControlPlaneClient::new(&server.uri(), "test-token")
            .expect("client")
            .with_poll_interval(Duration::from_millis(5))
    }

    fn spec(name: &str) -> StackSpec {
        StackSpec {
            name: name.to_string(),
            template: String::from("Resources: {}\n"),
            parameters: String::from("{}"),
            tags: BTreeMap::new(),
            disable_rollback: false,
            client_token: String::from("token-1"),
        }
    }

    fn stack_json(status: &str) -> serde_json::Value {
        serde_json::json!({ "name": "demo-test-api", "status": status })
    }

    #[tokio::test]
    async fn test_describe_missing_stack() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(!client.stack_exists("demo-test-api").await.unwrap());
    }

    #[tokio::test]
    async fn test_template_not_found_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api/template"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.template("demo-test-api").await.unwrap_err();
        assert!(err.is_stack_not_found());
    }

    #[tokio::test]
    async fn test_template_version_without_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.template_version("demo-test-api").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_create_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/stacks"))
            .respond_with(ResponseTemplate::new(409).set_body_json(
                serde_json::json!({ "code": "AlreadyExists", "message": "stack exists" }),
            ))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.create_stack(&spec("demo-test-api")).await.unwrap_err();
        assert!(matches!(err.as_cloud(), Some(CloudError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_update_with_no_changes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/stacks/demo-test-api"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": "NoChanges",
                "change_set": "cs-42",
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.update_stack(&spec("demo-test-api")).await.unwrap_err();
        match err.as_cloud() {
            Some(CloudError::EmptyChangeSet { change_set, .. }) => assert_eq!(change_set, "cs-42"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stack_json("CREATE_COMPLETE")))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let description = client.describe_stack("demo-test-api").await.unwrap();
        assert_eq!(description.unwrap().status, "CREATE_COMPLETE");
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.describe_stack("demo-test-api").await.unwrap_err();
        assert!(matches!(
            err.as_cloud(),
            Some(CloudError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_wait_until_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stack_json("UPDATE_IN_PROGRESS")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(stack_json("UPDATE_COMPLETE")))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .wait_for_stack("demo-test-api", ApplyKind::Update)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_reports_failed_update() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/stacks/demo-test-api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "demo-test-api",
                "status": "UPDATE_ROLLBACK_COMPLETE",
                "status_reason": "Resource handler returned message: image not found",
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client
            .wait_for_stack("demo-test-api", ApplyKind::Update)
            .await
            .unwrap_err();
        match err.as_cloud() {
            Some(CloudError::StackFailed { status, reason, .. }) => {
                assert_eq!(status, "UPDATE_ROLLBACK_COMPLETE");
                assert!(reason.as_deref().unwrap_or_default().contains("image not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_terminal_result_after_interrupt() {
        let rolled_back = StackDescription {
            name: String::from("demo-test-api"),
            status: String::from("UPDATE_ROLLBACK_COMPLETE"),
            status_reason: None,
            last_updated: None,
        };
        let result =
            ControlPlaneClient::terminal_result("demo-test-api", ApplyKind::Update, true, &rolled_back)
                .expect("terminal");
        assert!(matches!(
            result.unwrap_err().as_cloud(),
            Some(CloudError::RolledBackOnInterrupt { .. })
        ));

        let deleted = StackDescription {
            status: String::from("ROLLBACK_COMPLETE"),
            ..rolled_back
        };
        let result =
            ControlPlaneClient::terminal_result("demo-test-api", ApplyKind::Create, true, &deleted)
                .expect("terminal");
        assert!(matches!(
            result.unwrap_err().as_cloud(),
            Some(CloudError::DeletedOnInterrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_environment_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/applications/demo/environments/prod"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.get_environment("demo", "prod").await.unwrap_err();
        assert_eq!(err.to_string(), "environment prod not found in application demo");
    }

    #[tokio::test]
    async fn test_list_pipelines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/applications/demo/pipelines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pipelines": [
                    { "name": "release", "resource_name": "release", "is_legacy": true },
                    { "name": "hotfix", "resource_name": "pipeline-demo-hotfix" }
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let pipelines = client.list_deployed_pipelines("demo").await.unwrap();
        assert_eq!(pipelines.len(), 2);
        assert!(pipelines[0].is_legacy);
        assert!(!pipelines[1].is_legacy);
    }
}
