//! Put and Get of a byte stream as a single-config OCI image
//!
//! Put stores the payload as a blob, wraps its descriptor in a config-only
//! manifest document, uploads that document as the config blob of a second
//! manifest and tags the latter. Get walks the same chain backwards:
//! tag -> manifest -> config blob (the inner manifest) -> payload blob.

use crate::digest::DigestUtils;
use crate::error::{RegistryError, Result};
use crate::image::manifest::OCTET_STREAM_MEDIA_TYPE;
use crate::image::{Descriptor, OciManifest};
use crate::registry::operations::{BlobReader, ManifestBuilder};
use crate::registry::session::Session;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

impl Session {
    /// Upload everything `reader` yields and tag it. Returns the payload descriptor.
    ///
    /// The reader is read to EOF (or the first error) and never closed here.
    pub async fn put<R>(&self, reader: &mut R, cancel: &CancellationToken) -> Result<Descriptor>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let output = self.output();
        let reference = self.reference();

        let repo = self
            .write_context()
            .repository_for_ref(reference, self.insecure(), cancel)
            .await?;
        let blobs = repo.blobs();

        output.step(&format!("Uploading payload to {}", reference));
        let mut writer = blobs.create(cancel).await?;
        let (digest, size) = writer.read_from(reader, cancel).await?;
        let payload = writer
            .commit(Descriptor::new(OCTET_STREAM_MEDIA_TYPE, digest, size), cancel)
            .await?;
        output.info(&format!(
            "Payload blob {} ({})",
            DigestUtils::format_digest_short(&payload.digest),
            output.format_size(payload.size)
        ));

        let inner = OciManifest::with_config(payload.clone()).to_bytes()?;
        let manifest = ManifestBuilder::new(&blobs, inner, Vec::new())
            .build(cancel)
            .await?;

        repo.manifests()
            .put(&manifest, reference.tag(), cancel)
            .await?;

        output.success(&format!(
            "Stored {} as {} in {}",
            output.format_size(payload.size),
            reference,
            output.format_duration(output.elapsed())
        ));
        Ok(payload)
    }

    /// Open the payload stored under the session's tag
    pub async fn get(&self, cancel: &CancellationToken) -> Result<BlobReader> {
        let output = self.output();
        let reference = self.reference();

        let repo = self
            .read_context()
            .repository_for_ref(reference, self.insecure(), cancel)
            .await?;

        output.step(&format!("Resolving {}", reference));
        let manifest = repo.manifests().get(reference.tag(), cancel).await?;
        let first = manifest.references().into_iter().next().ok_or_else(|| {
            RegistryError::MalformedManifest(format!("{} references no blobs", reference))
        })?;

        check_digest(&first.digest)?;

        let blobs = repo.blobs();
        let inner = blobs.get(&first.digest, cancel).await?;
        let inner = OciManifest::from_bytes(&inner)?;
        let target = inner.target();
        check_digest(&target.digest)?;
        output.detail(&format!(
            "Payload blob {} ({})",
            DigestUtils::format_digest_short(&target.digest),
            output.format_size(target.size)
        ));

        blobs.open(&target.digest, cancel).await
    }
}

fn check_digest(digest: &str) -> Result<()> {
    if DigestUtils::is_valid_docker_digest(digest) {
        Ok(())
    } else {
        Err(RegistryError::MalformedManifest(format!(
            "invalid digest {:?} in manifest",
            digest
        )))
    }
}
