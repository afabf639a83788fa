//! Blob operations for a repository
//!
//! Implements the Distribution v2 blob endpoints:
//! - Upload session start (POST /v2/{name}/blobs/uploads/)
//! - Streamed upload body (PATCH {location})
//! - Commit (PUT {location}?digest={digest})
//! - Stat (HEAD /v2/{name}/blobs/{digest})
//! - Download (GET /v2/{name}/blobs/{digest})

use crate::digest::{DigestUtils, Digester};
use crate::error::handlers::{ResponseErrorHandler, Subject};
use crate::error::{RegistryError, Result};
use crate::image::Descriptor;
use crate::image::manifest::OCTET_STREAM_MEDIA_TYPE;
use crate::registry::operations::blob_reader::BlobReader;
use crate::registry::repository::Repository;
use crate::registry::transport::{cancellable, resolve_location, with_query};
use futures::{FutureExt, SinkExt};
use futures::channel::mpsc;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{Body, Method, Response};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use url::Url;

pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// Read size for the upload pump
const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;
/// Chunks buffered between the input reader and the request body
const UPLOAD_CHANNEL_DEPTH: usize = 4;

#[derive(Clone)]
pub struct BlobStore {
    repo: Repository,
}

impl BlobStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    fn blob_url(&self, digest: &str) -> Result<Url> {
        self.repo.endpoint(&format!("blobs/{}", digest))
    }

    /// Start a new upload session
    pub async fn create(&self, cancel: &CancellationToken) -> Result<BlobWriter> {
        let url = self.repo.endpoint("blobs/uploads/")?;
        self.repo
            .output()
            .detail(&format!("Starting blob upload session at: {}", url));

        let request = self.repo.request(Method::POST, url).header(CONTENT_LENGTH, "0");
        let response = self.repo.send(request, "upload session start", cancel).await?;
        if !response.status().is_success() {
            return Err(ResponseErrorHandler::from_response(response, Subject::Upload(self.repo.name())).await);
        }

        let location = upload_location(self.repo.base_url(), &response)?;
        self.repo
            .output()
            .detail(&format!("Upload session started, location: {}", location));

        Ok(BlobWriter {
            repo: self.repo.clone(),
            location,
        })
    }

    /// Upload a small in-memory blob in one go
    pub async fn put(
        &self,
        media_type: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Descriptor> {
        let mut writer = self.create(cancel).await?;
        let mut source = data;
        let (digest, size) = writer.read_from(&mut source, cancel).await?;
        writer
            .commit(Descriptor::new(media_type, digest, size), cancel)
            .await
    }

    /// HEAD the blob for its size and media type
    pub async fn stat(&self, digest: &str, cancel: &CancellationToken) -> Result<Descriptor> {
        let request = self.repo.request(Method::HEAD, self.blob_url(digest)?);
        let response = self.repo.send(request, "blob stat", cancel).await?;
        if !response.status().is_success() {
            return Err(ResponseErrorHandler::from_response(
                response,
                Subject::Blob { repository: self.repo.name(), digest },
            )
            .await);
        }

        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                RegistryError::Registry(format!("Blob stat for {} returned no Content-Length", digest))
            })?;
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(OCTET_STREAM_MEDIA_TYPE);

        Ok(Descriptor::new(media_type, digest.to_string(), size))
    }

    /// Fetch a whole blob into memory
    pub async fn get(&self, digest: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.repo.output().detail(&format!(
            "Fetching blob {}",
            DigestUtils::format_digest_short(digest)
        ));
        let request = self.repo.request(Method::GET, self.blob_url(digest)?);
        let response = self.repo.send(request, "blob fetch", cancel).await?;
        if !response.status().is_success() {
            return Err(ResponseErrorHandler::from_response(
                response,
                Subject::Blob { repository: self.repo.name(), digest },
            )
            .await);
        }

        let data = cancellable(cancel, async {
            response
                .bytes()
                .await
                .map_err(|e| RegistryError::Network(format!("Failed to read blob {}: {}", digest, e)))
        })
        .await?;
        Ok(data.to_vec())
    }

    /// Open a blob for streaming, seekable reads that observe `cancel`
    pub async fn open(&self, digest: &str, cancel: &CancellationToken) -> Result<BlobReader> {
        let descriptor = self.stat(digest, cancel).await?;
        self.repo.output().detail(&format!(
            "Opened blob {} ({})",
            DigestUtils::format_digest_short(digest),
            self.repo.output().format_size(descriptor.size)
        ));
        Ok(BlobReader::new(
            self.repo.clone(),
            self.blob_url(digest)?,
            descriptor,
            cancel.clone(),
        ))
    }
}

/// An open upload session
pub struct BlobWriter {
    repo: Repository,
    location: Url,
}

impl BlobWriter {
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Stream `reader` to EOF into the session as one PATCH body.
    ///
    /// Returns the digest and byte count of exactly what was sent. The reader
    /// is borrowed and left open.
    pub async fn read_from<R>(
        &mut self,
        reader: &mut R,
        cancel: &CancellationToken,
    ) -> Result<(String, u64)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (mut tx, rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(UPLOAD_CHANNEL_DEPTH);

        let request = self
            .repo
            .request(Method::PATCH, self.location.clone())
            .header(CONTENT_TYPE, OCTET_STREAM_MEDIA_TYPE)
            .body(Body::wrap_stream(rx));
        let send = self.repo.send(request, "blob upload", cancel);

        let pump = cancellable(cancel, async move {
            let mut digester = Digester::new();
            let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        let message = e.to_string();
                        // Abort the request body too
                        let _ = tx.send(Err(e)).await;
                        return Err(RegistryError::Io(message));
                    }
                };
                digester.update(&buf[..n]);
                if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                    // Request side is gone; its own error is what gets reported
                    break;
                }
            }
            Ok(digester)
        });

        tokio::pin!(send);
        tokio::pin!(pump);
        let mut pumped = None;
        let response = loop {
            tokio::select! {
                response = &mut send => break response,
                result = &mut pump, if pumped.is_none() => pumped = Some(result),
            }
        };
        if pumped.is_none() && response.is_err() {
            pumped = (&mut pump).now_or_never();
        }

        // A failing input stream takes precedence over the aborted request
        let pumped = match pumped {
            Some(Err(err)) => return Err(err),
            Some(Ok(digester)) => Some(digester),
            None => None,
        };
        let response = response?;
        if !response.status().is_success() {
            return Err(ResponseErrorHandler::from_response(response, Subject::Upload(self.repo.name())).await);
        }
        self.location = upload_location(self.repo.base_url(), &response)?;

        let digester = match pumped {
            Some(digester) => digester,
            None => pump.await?,
        };
        let (digest, size) = digester.finalize();
        self.repo.output().detail(&format!(
            "Streamed {} as {}",
            self.repo.output().format_size(size),
            DigestUtils::format_digest_short(&digest)
        ));
        Ok((digest, size))
    }

    /// Finish the upload under `descriptor.digest` and confirm it with the registry
    pub async fn commit(self, descriptor: Descriptor, cancel: &CancellationToken) -> Result<Descriptor> {
        let url = with_query(self.location.clone(), "digest", &descriptor.digest);
        let request = self
            .repo
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, "0");
        let response = self.repo.send(request, "blob commit", cancel).await?;
        if !response.status().is_success() {
            return Err(ResponseErrorHandler::from_response(response, Subject::Commit(self.repo.name())).await);
        }

        if let Some(reported) = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
        {
            if reported != descriptor.digest {
                return Err(RegistryError::DigestMismatch(format!(
                    "registry stored {} but {} was uploaded",
                    reported, descriptor.digest
                )));
            }
        }

        let stored = self.repo.blobs().stat(&descriptor.digest, cancel).await?;
        if stored.size != descriptor.size {
            return Err(RegistryError::DigestMismatch(format!(
                "registry reports {} bytes for {} but {} were uploaded",
                stored.size, descriptor.digest, descriptor.size
            )));
        }

        self.repo.output().detail(&format!(
            "Committed blob {}",
            DigestUtils::format_digest_short(&descriptor.digest)
        ));
        Ok(Descriptor {
            media_type: if descriptor.media_type.is_empty() {
                stored.media_type
            } else {
                descriptor.media_type
            },
            ..descriptor
        })
    }
}

fn upload_location(base_url: &str, response: &Response) -> Result<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| RegistryError::Registry("Missing Location header in upload response".to_string()))?
        .to_str()
        .map_err(|e| RegistryError::Registry(format!("Invalid Location header: {}", e)))?;
    resolve_location(base_url, location)
}
