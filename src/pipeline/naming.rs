//! Legacy pipeline naming detection.
//!
//! Older pipelines were deployed under their bare name; newer ones are
//! namespaced by application. Which scheme a pipeline uses is read from the
//! deployed pipelines once and then reused for the whole run, so the
//! existence check and the create or update call always agree on the stack
//! they target.

use tokio::sync::OnceCell;
use tracing::debug;

use crate::cloud::PipelineLister;
use crate::error::{Result, ShipyardError, WrapErr};

/// Resolves, and remembers, whether a pipeline uses legacy naming.
#[derive(Debug)]
pub struct LegacyNamingResolver<'a, L: ?Sized> {
    lister: &'a L,
    app: String,
    pipeline: String,
    is_legacy: OnceCell<bool>,
}

impl<'a, L: PipelineLister + ?Sized> LegacyNamingResolver<'a, L> {
    /// Creates a resolver for one pipeline of an application.
    #[must_use]
    pub fn new(lister: &'a L, app: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Self {
            lister,
            app: app.into(),
            pipeline: pipeline.into(),
            is_legacy: OnceCell::new(),
        }
    }

    /// Whether the pipeline is deployed under the legacy naming scheme.
    ///
    /// The deployed pipelines are listed on the first call only. A pipeline
    /// that is not deployed yet uses the new scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployed pipelines cannot be listed.
    pub async fn is_legacy(&self) -> Result<bool> {
        self.is_legacy
            .get_or_try_init(|| async {
                let deployed = self
                    .lister
                    .list_deployed_pipelines(&self.app)
                    .await
                    .wrap_err(|| format!("list pipelines in application {}", self.app))?;
                let is_legacy = deployed
                    .iter()
                    .find(|p| p.resource_name == self.pipeline)
                    .is_some_and(|p| p.is_legacy);
                debug!("Pipeline {} legacy naming: {is_legacy}", self.pipeline);
                Ok::<_, ShipyardError>(is_legacy)
            })
            .await
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{DeployedPipeline, MockPipelineLister};
    use crate::error::CloudError;

    fn deployed(resource_name: &str, is_legacy: bool) -> DeployedPipeline {
        DeployedPipeline {
            name: resource_name.to_string(),
            resource_name: resource_name.to_string(),
            is_legacy,
        }
    }

    #[tokio::test]
    async fn test_legacy_pipeline_is_cached() {
        let mut lister = MockPipelineLister::new();
        lister
            .expect_list_deployed_pipelines()
            .times(1)
            .returning(|_| Ok(vec![deployed("pipeline-demo-other", false), deployed("release", true)]));

        let resolver = LegacyNamingResolver::new(&lister, "demo", "release");
        assert!(resolver.is_legacy().await.unwrap());
        assert!(resolver.is_legacy().await.unwrap());
        assert!(resolver.is_legacy().await.unwrap());
    }

    #[tokio::test]
    async fn test_undeployed_pipeline_uses_new_scheme() {
        let mut lister = MockPipelineLister::new();
        lister
            .expect_list_deployed_pipelines()
            .times(1)
            .returning(|_| Ok(vec![deployed("other", true)]));

        let resolver = LegacyNamingResolver::new(&lister, "demo", "release");
        assert!(!resolver.is_legacy().await.unwrap());
        assert!(!resolver.is_legacy().await.unwrap());
    }

    #[tokio::test]
    async fn test_list_failure_is_not_cached() {
        let mut lister = MockPipelineLister::new();
        let mut calls = 0;
        lister.expect_list_deployed_pipelines().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(CloudError::network("connection reset").into())
            } else {
                Ok(vec![deployed("release", true)])
            }
        });

        let resolver = LegacyNamingResolver::new(&lister, "demo", "release");
        let err = resolver.is_legacy().await.unwrap_err();
        assert!(err.to_string().starts_with("list pipelines in application demo"));
        assert!(resolver.is_legacy().await.unwrap());
    }
}
