//! Manifest operations for a repository
//!
//! - Manifest download (GET /v2/{name}/manifests/{reference})
//! - Manifest upload (PUT /v2/{name}/manifests/{reference})
//! - [`ManifestBuilder`]: uploads a config document and wraps it in an OCI manifest

use crate::digest::DigestUtils;
use crate::error::handlers::{ResponseErrorHandler, Subject};
use crate::error::{RegistryError, Result};
use crate::image::manifest::{MANIFEST_ACCEPT, OCI_CONFIG_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE};
use crate::image::{Descriptor, OciManifest};
use crate::registry::operations::blob_operations::{BlobStore, DOCKER_CONTENT_DIGEST};
use crate::registry::repository::Repository;
use crate::registry::transport::cancellable;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ManifestService {
    repo: Repository,
}

impl ManifestService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Fetch and decode the manifest a tag (or digest) points at
    pub async fn get(&self, reference: &str, cancel: &CancellationToken) -> Result<OciManifest> {
        let url = self.repo.endpoint(&format!("manifests/{}", reference))?;
        self.repo
            .output()
            .verbose(&format!("Pulling manifest for {}:{}", self.repo.name(), reference));

        let request = self.repo.request(Method::GET, url).header(ACCEPT, MANIFEST_ACCEPT.join(", "));
        let response = self.repo.send(request, "manifest pull", cancel).await?;
        if !response.status().is_success() {
            return Err(ResponseErrorHandler::from_response(
                response,
                Subject::Manifest { repository: self.repo.name(), reference },
            )
            .await);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        self.repo.output().detail(&format!("Manifest type: {}", content_type));

        let data = cancellable(cancel, async {
            response
                .bytes()
                .await
                .map_err(|e| RegistryError::Network(format!("Failed to read manifest response: {}", e)))
        })
        .await?;

        OciManifest::from_bytes(&data)
    }

    /// Push `manifest` under `reference`, overwriting whatever the tag held. Returns its digest.
    pub async fn put(
        &self,
        manifest: &OciManifest,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let url = self.repo.endpoint(&format!("manifests/{}", reference))?;
        let body = manifest.to_bytes()?;
        let digest = DigestUtils::compute_docker_digest(&body);
        let content_type = if manifest.media_type.is_empty() {
            OCI_MANIFEST_MEDIA_TYPE
        } else {
            manifest.media_type.as_str()
        };

        self.repo
            .output()
            .verbose(&format!("Uploading manifest with content-type: {}", content_type));

        let request = self
            .repo
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        let response = self.repo.send(request, "manifest push", cancel).await?;
        if !response.status().is_success() {
            return Err(ResponseErrorHandler::from_response(
                response,
                Subject::Manifest { repository: self.repo.name(), reference },
            )
            .await);
        }

        let stored = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or(digest);

        self.repo.output().success(&format!(
            "Manifest uploaded for {}:{} ({})",
            self.repo.name(),
            reference,
            DigestUtils::format_digest_short(&stored)
        ));
        Ok(stored)
    }
}

/// Builds an OCI manifest whose config is an arbitrary JSON document
pub struct ManifestBuilder<'a> {
    blobs: &'a BlobStore,
    config_json: Vec<u8>,
    layers: Vec<Descriptor>,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(blobs: &'a BlobStore, config_json: Vec<u8>, layers: Vec<Descriptor>) -> Self {
        Self {
            blobs,
            config_json,
            layers,
        }
    }

    /// Upload the config blob unless the registry already has it, then assemble the manifest
    pub async fn build(self, cancel: &CancellationToken) -> Result<OciManifest> {
        let digest = DigestUtils::compute_docker_digest(&self.config_json);
        let size = self.config_json.len() as u64;

        match self.blobs.stat(&digest, cancel).await {
            Ok(_) => {}
            Err(RegistryError::BlobNotFound(_)) => {
                self.blobs
                    .put(OCI_CONFIG_MEDIA_TYPE, &self.config_json, cancel)
                    .await?;
            }
            Err(err) => return Err(err),
        }

        let mut manifest = OciManifest::with_config(Descriptor::new(OCI_CONFIG_MEDIA_TYPE, digest, size));
        manifest.layers = self.layers;
        Ok(manifest)
    }
}
