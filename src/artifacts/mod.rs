//! Artifact uploads performed before a workload is rendered.
//!
//! This module provides:
//! - Image build and push through the docker CLI
//! - Content-addressed uploads to the artifact bucket
//! - The coordinator that returns references for the renderer

mod coordinator;
mod image;
mod store;

pub use coordinator::{
    sha256_hex, ArtifactCoordinator, ArtifactReferences, ArtifactUploader, DEFAULT_IMAGE_TAG,
};
pub use image::{parse_push_digest, DockerImagePusher, ImageBuild, ImagePusher};
pub use store::{object_arn, object_url, ObjectStore, S3ObjectStore};
