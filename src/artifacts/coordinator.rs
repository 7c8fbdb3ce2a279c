//! Artifact coordination.
//!
//! The coordinator pushes container images and uploads every file a workload
//! references before its template is rendered. The references it returns
//! (digests, ARNs and URLs) are embedded into the rendered template.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{ImageConfig, WorkloadConfig};
use crate::error::{ArtifactError, Result, ShipyardError, WrapErr};

use super::image::{ImageBuild, ImagePusher};
use super::store::{object_arn, ObjectStore};

/// Default tag for pushed images.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// References to uploaded artifacts, consumed by the template renderer.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ArtifactReferences {
    /// Pushed image digest per container.
    pub image_digests: BTreeMap<String, String>,
    /// Env file ARN per container.
    pub env_file_arns: BTreeMap<String, String>,
    /// URL of the uploaded addons template.
    pub addons_url: Option<String>,
    /// URL per custom resource payload.
    pub custom_resource_urls: BTreeMap<String, String>,
    /// URL of the static asset mapping file.
    pub static_asset_mapping_url: Option<String>,
}

impl ArtifactReferences {
    /// Returns true if nothing was uploaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image_digests.is_empty()
            && self.env_file_arns.is_empty()
            && self.addons_url.is_none()
            && self.custom_resource_urls.is_empty()
            && self.static_asset_mapping_url.is_none()
    }
}

/// Uploads deployable assets ahead of rendering.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Uploads every artifact and returns their references.
    async fn upload_artifacts(&self) -> Result<ArtifactReferences>;
}

/// Uploads the artifacts of one workload.
#[derive(Debug)]
pub struct ArtifactCoordinator<S, I> {
    workload: WorkloadConfig,
    store: Option<S>,
    pusher: I,
    registry: Option<String>,
    image_tag: String,
}

impl<S: ObjectStore, I: ImagePusher> ArtifactCoordinator<S, I> {
    /// Creates a coordinator for a workload.
    ///
    /// `store` may be `None` when no artifact bucket is configured; uploads
    /// then fail with a storage error.
    #[must_use]
    pub fn new(workload: WorkloadConfig, pusher: I, store: Option<S>) -> Self {
        Self {
            workload,
            store,
            pusher,
            registry: None,
            image_tag: String::from(DEFAULT_IMAGE_TAG),
        }
    }

    /// Sets the registry built images are pushed to.
    #[must_use]
    pub fn with_registry(mut self, registry: Option<String>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the tag for built images.
    #[must_use]
    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = tag.into();
        self
    }

    fn store(&self) -> Result<&S> {
        self.store.as_ref().ok_or_else(|| {
            ArtifactError::storage(format!(
                "workload {} uploads files but no artifact bucket is configured",
                self.workload.name
            ))
            .into()
        })
    }

    async fn push_images(&self, refs: &mut ArtifactReferences) -> Result<()> {
        for (container, image) in &self.workload.containers {
            let ImageConfig::Build { build, dockerfile } = image else {
                continue;
            };
            let registry = self.registry.as_deref().ok_or_else(|| ArtifactError::Image {
                image: container.clone(),
                message: String::from("building an image requires artifacts.registry"),
            })?;

            let request = ImageBuild {
                container: container.clone(),
                context: build.clone(),
                dockerfile: dockerfile.clone(),
                tag: format!(
                    "{}/{}-{container}:{}",
                    registry.trim_end_matches('/'),
                    self.workload.name,
                    self.image_tag
                ),
            };
            let digest = self
                .pusher
                .build_and_push(&request)
                .await
                .wrap_err(|| format!("push image for container {container}"))?;
            refs.image_digests.insert(container.clone(), digest);
        }
        Ok(())
    }

    /// Uploads one file under `<prefix>/<workload>/<sha256><ext>` and returns its key.
    async fn upload_file(&self, prefix: &str, path: &Path, content_type: &str) -> Result<String> {
        let body = read_asset(path).await?;
        let key = content_key(prefix, &self.workload.name, &body, path);
        self.store()?.put_object(&key, body, content_type).await?;
        Ok(key)
    }

    async fn upload_static_assets(&self, dir: &Path) -> Result<String> {
        let files = walk_dir(dir).await?;
        let mut mapping = BTreeMap::new();

        for file in files {
            let relative = file
                .strip_prefix(dir)
                .map_err(|e| ShipyardError::internal(format!("strip prefix: {e}")))?
                .to_string_lossy()
                .replace('\\', "/");
            let key = self
                .upload_file("static-assets", &file, content_type_for(&file))
                .await?;
            mapping.insert(relative, key);
        }

        let body = serde_json::to_vec_pretty(&mapping)
            .map_err(|e| ShipyardError::internal(format!("serialize asset mapping: {e}")))?;
        let key = format!(
            "static-assets/{}/mapping/{}.json",
            self.workload.name,
            sha256_hex(&body)
        );
        let store = self.store()?;
        store.put_object(&key, body, "application/json").await?;
        Ok(store.url(&key))
    }
}

#[async_trait]
impl<S: ObjectStore, I: ImagePusher> ArtifactUploader for ArtifactCoordinator<S, I> {
    async fn upload_artifacts(&self) -> Result<ArtifactReferences> {
        info!("Uploading artifacts for workload {}", self.workload.name);
        let mut refs = ArtifactReferences::default();

        self.push_images(&mut refs).await?;

        for (container, path) in &self.workload.env_files {
            let key = self
                .upload_file("env-files", path, "text/plain")
                .await
                .wrap_err(|| format!("upload env file for container {container}"))?;
            let arn = object_arn(&self.store()?.bucket(), &key);
            refs.env_file_arns.insert(container.clone(), arn);
        }

        if let Some(addons) = &self.workload.addons {
            let key = self
                .upload_file("addons", addons, "application/x-yaml")
                .await
                .wrap_err(|| "upload addons template")?;
            refs.addons_url = Some(self.store()?.url(&key));
        }

        for (resource, path) in &self.workload.custom_resources {
            let key = self
                .upload_file("custom-resources", path, content_type_for(path))
                .await
                .wrap_err(|| format!("upload custom resource {resource}"))?;
            refs.custom_resource_urls
                .insert(resource.clone(), self.store()?.url(&key));
        }

        if let Some(dir) = &self.workload.static_assets {
            let url = self
                .upload_static_assets(dir)
                .await
                .wrap_err(|| format!("upload static assets from {}", dir.display()))?;
            refs.static_asset_mapping_url = Some(url);
        }

        debug!("Artifact references: {refs:?}");
        Ok(refs)
    }
}

/// Hex-encoded SHA-256 of the given bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn content_key(prefix: &str, workload: &str, body: &[u8], path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{prefix}/{workload}/{}{ext}", sha256_hex(body))
}

async fn read_asset(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        ArtifactError::Asset {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Lists every file under `dir`, sorted.
async fn walk_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let asset_err = |path: &Path, e: std::io::Error| -> ShipyardError {
        ArtifactError::Asset {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    };

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| asset_err(&current, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| asset_err(&current, e))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| asset_err(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        Some("yml" | "yaml") => "application/x-yaml",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
