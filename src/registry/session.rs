//! Registry session: one image reference, one credential table, two contexts
//!
//! Opening a session parses the reference and resolves credentials once.
//! The read and write contexts are each built on first request and then
//! reused; building one never builds the other.

use crate::config::ClientOptions;
use crate::error::Result;
use crate::image::ImageReference;
use crate::logging::Logger;
use crate::registry::auth::{self, CredentialTable};
use crate::registry::context::{PULL, PUSH, RegistryContext};
use reqwest::Client;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

pub struct Session {
    reference: ImageReference,
    insecure: bool,
    transport: Client,
    credentials: Arc<CredentialTable>,
    output: Logger,
    read_context: OnceLock<RegistryContext>,
    write_context: OnceLock<RegistryContext>,
}

impl Session {
    /// Parse `reference`, apply `options` and resolve credentials against the registry
    pub async fn open(
        reference: &str,
        options: ClientOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let reference = ImageReference::parse(reference)?;
        let transport = options.selected_transport();
        let base_url = reference.base_url(options.insecure);

        options
            .logger
            .step(&format!("Resolving credentials for {}", reference.registry()));
        let credentials =
            auth::resolve(&transport, &options.auth, &base_url, &options.logger, cancel).await?;

        Ok(Self::with_credentials(reference, options, credentials))
    }

    /// Build a session around an already resolved credential table
    pub fn with_credentials(
        reference: ImageReference,
        options: ClientOptions,
        credentials: CredentialTable,
    ) -> Self {
        Self {
            transport: options.selected_transport(),
            insecure: options.insecure,
            output: options.logger,
            reference,
            credentials: Arc::new(credentials),
            read_context: OnceLock::new(),
            write_context: OnceLock::new(),
        }
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    pub fn credentials(&self) -> &CredentialTable {
        &self.credentials
    }

    pub(crate) fn output(&self) -> &Logger {
        &self.output
    }

    /// Pull-only context
    pub fn read_context(&self) -> &RegistryContext {
        self.read_context.get_or_init(|| {
            RegistryContext::new(self.transport.clone(), self.credentials.clone(), self.output.clone())
        })
    }

    /// Context that declares `pull,push` during token negotiation
    pub fn write_context(&self) -> &RegistryContext {
        self.write_context.get_or_init(|| {
            RegistryContext::new(self.transport.clone(), self.credentials.clone(), self.output.clone())
                .with_actions(&[PULL, PUSH])
        })
    }
}
