//! Handle on one repository of one registry, with negotiated authorization

use crate::error::handlers::ResponseErrorHandler;
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::operations::{BlobStore, ManifestService};
use crate::registry::transport::cancellable;
use reqwest::{Client, Method, RequestBuilder, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Clone)]
pub struct Repository {
    client: Client,
    base_url: String,
    name: String,
    authorization: Option<String>,
    output: Logger,
}

impl Repository {
    pub fn new(
        client: Client,
        base_url: String,
        name: String,
        authorization: Option<String>,
        output: Logger,
    ) -> Self {
        Self {
            client,
            base_url,
            name,
            authorization,
            output,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn output(&self) -> &Logger {
        &self.output
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }

    pub fn blobs(&self) -> BlobStore {
        BlobStore::new(self.clone())
    }

    pub fn manifests(&self) -> ManifestService {
        ManifestService::new(self.clone())
    }

    /// `<base>/v2/<name>/<path>`
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}/v2/{}/{}", self.base_url, self.name, path))?)
    }

    /// Request carrying the negotiated bearer token, if any
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.authorization {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send with cancellation, mapping transport failures
    pub async fn send(
        &self,
        request: RequestBuilder,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        cancellable(cancel, async {
            request
                .send()
                .await
                .map_err(|e| ResponseErrorHandler::handle_network_error(&e, context))
        })
        .await
    }
}
