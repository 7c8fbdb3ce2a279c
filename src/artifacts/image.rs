//! Container image build and push.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ArtifactError, Result};

/// A container image to build from a local context and push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    /// Container the image belongs to.
    pub container: String,
    /// Build context directory.
    pub context: PathBuf,
    /// Dockerfile path relative to the context.
    pub dockerfile: Option<PathBuf>,
    /// Full image reference to push, `<repository>:<tag>`.
    pub tag: String,
}

/// Builds and pushes container images.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImagePusher: Send + Sync {
    /// Builds and pushes the image, returning the pushed digest.
    async fn build_and_push(&self, build: &ImageBuild) -> Result<String>;
}

/// Image pusher driving the local `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerImagePusher {
    binary: PathBuf,
}

impl Default for DockerImagePusher {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerImagePusher {
    /// Creates a pusher using `docker` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("docker"),
        }
    }

    /// Creates a pusher using a specific docker binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, container: &str, args: &[String]) -> Result<String> {
        debug!("{} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| ArtifactError::Image {
                image: container.to_string(),
                message: format!("failed to run {}: {e}", self.binary.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ArtifactError::Image {
                image: container.to_string(),
                message: format!(
                    "{} {} failed: {}",
                    self.binary.display(),
                    args.first().map_or("", String::as_str),
                    stderr.trim()
                ),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ImagePusher for DockerImagePusher {
    async fn build_and_push(&self, build: &ImageBuild) -> Result<String> {
        info!("Building image for container {}: {}", build.container, build.tag);

        let mut args = vec![
            String::from("build"),
            String::from("-t"),
            build.tag.clone(),
        ];
        if let Some(dockerfile) = &build.dockerfile {
            args.push(String::from("-f"));
            args.push(build.context.join(dockerfile).display().to_string());
        }
        args.push(build.context.display().to_string());
        self.run(&build.container, &args).await?;

        info!("Pushing image {}", build.tag);
        let output = self
            .run(&build.container, &[String::from("push"), build.tag.clone()])
            .await?;

        parse_push_digest(&output).ok_or_else(|| {
            ArtifactError::Image {
                image: build.container.clone(),
                message: String::from("push output did not report a digest"),
            }
            .into()
        })
    }
}

/// Extracts the `sha256:` digest from `docker push` output.
///
/// The last line normally reads `<tag>: digest: sha256:<hex> size: <n>`.
#[must_use]
pub fn parse_push_digest(output: &str) -> Option<String> {
    output.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        let digest = rest.split_whitespace().next()?;
        digest.starts_with("sha256:").then(|| digest.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_push_digest() {
        let output = "The push refers to repository [registry.example.com/demo/api]\n\
                      5f70bf18a086: Pushed\n\
                      latest: digest: sha256:4a1c3f0e9b size: 1570\n";
        assert_eq!(parse_push_digest(output).as_deref(), Some("sha256:4a1c3f0e9b"));
    }

    #[test]
    fn test_parse_push_digest_missing() {
        assert!(parse_push_digest("5f70bf18a086: Layer already exists\n").is_none());
    }
}
