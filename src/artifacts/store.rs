//! Object storage for uploaded artifacts.
//!
//! Uploads land in a single bucket under content-addressed keys, so the same
//! bytes always map to the same key and re-uploads are harmless.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{ArtifactError, Result};

/// Storage that artifact uploads are written to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket objects are written to.
    fn bucket(&self) -> String;

    /// Public URL of an object key.
    fn url(&self, key: &str) -> String;

    /// Writes an object.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
}

/// S3-backed artifact storage.
#[derive(Debug)]
pub struct S3ObjectStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Bucket region, used to build object URLs.
    region: Option<String>,
}

impl S3ObjectStore {
    /// Creates a new S3 object store using the default credential chain.
    pub async fn new(bucket: &str, region: Option<&str>) -> Self {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        let region = region
            .map(str::to_string)
            .or_else(|| config.region().map(ToString::to_string));

        Self {
            client: Client::new(&config),
            bucket: bucket.to_string(),
            region,
        }
    }

    /// Creates a new S3 object store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, region: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            region: region.map(str::to_string),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> String {
        self.bucket.clone()
    }

    fn url(&self, key: &str) -> String {
        object_url(&self.bucket, self.region.as_deref(), key)
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        debug!("Uploading s3://{}/{key} ({} bytes)", self.bucket, body.len());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ArtifactError::storage(format!("S3 put error for {key}: {e}")))?;

        info!("Uploaded s3://{}/{key}", self.bucket);
        Ok(())
    }
}

/// Virtual-hosted style URL of an object.
#[must_use]
pub fn object_url(bucket: &str, region: Option<&str>, key: &str) -> String {
    match region {
        Some(region) => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
        None => format!("https://{bucket}.s3.amazonaws.com/{key}"),
    }
}

/// ARN of an object, the form env files are referenced by.
#[must_use]
pub fn object_arn(bucket: &str, key: &str) -> String {
    format!("arn:aws:s3:::{bucket}/{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        assert_eq!(
            object_url("demo-artifacts", Some("us-west-2"), "addons/api/abc.yml"),
            "https://demo-artifacts.s3.us-west-2.amazonaws.com/addons/api/abc.yml"
        );
        assert_eq!(
            object_url("demo-artifacts", None, "addons/api/abc.yml"),
            "https://demo-artifacts.s3.amazonaws.com/addons/api/abc.yml"
        );
    }

    #[test]
    fn test_object_arn() {
        assert_eq!(
            object_arn("demo-artifacts", "env-files/api/abc.env"),
            "arn:aws:s3:::demo-artifacts/env-files/api/abc.env"
        );
    }
}
