//! Bearer token negotiation
//!
//! When a registry answers the `/v2/` ping with a bearer challenge, a token
//! is requested from the challenge's realm for the context's scope. Basic
//! credentials for the realm come from the [`CredentialStore`]. Tokens are
//! cached per scope for the lifetime of the owning context.

use crate::error::handlers::{ResponseErrorHandler, Subject};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::auth::{Challenge, CredentialStore};
use crate::registry::transport::cancellable;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Per-context token cache keyed by scope
#[derive(Clone)]
pub struct TokenManager {
    client: Client,
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<RwLock<HashMap<String, String>>>,
    output: Logger,
}

impl TokenManager {
    pub fn new(client: Client, credentials: Arc<dyn CredentialStore>, output: Logger) -> Self {
        Self {
            client,
            credentials,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            output,
        }
    }

    fn cached(&self, scope: &str) -> Result<Option<String>> {
        let guard = self.tokens.read().map_err(|_| {
            RegistryError::Registry("Failed to acquire token read lock".to_string())
        })?;
        Ok(guard.get(scope).cloned())
    }

    fn store(&self, scope: &str, token: &str) -> Result<()> {
        let mut guard = self.tokens.write().map_err(|_| {
            RegistryError::Registry("Failed to acquire token write lock".to_string())
        })?;
        guard.insert(scope.to_string(), token.to_string());
        Ok(())
    }

    /// Token for `scope` from the bearer `challenge`, fetched at most once
    pub async fn token_for(
        &self,
        challenge: &Challenge,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if let Some(token) = self.cached(scope)? {
            self.output.detail(&format!("Reusing cached token for {}", scope));
            return Ok(token);
        }

        let realm = challenge.realm().ok_or_else(|| {
            RegistryError::AuthDenied("Bearer challenge without a realm".to_string())
        })?;
        let mut url = Url::parse(realm).map_err(|e| {
            RegistryError::AuthDenied(format!("Invalid token realm {:?}: {}", realm, e))
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = challenge.service() {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        let (username, password) = self.credentials.basic(realm);
        self.output.verbose(&format!(
            "Requesting token for {} from {}{}",
            scope,
            realm,
            if username.is_empty() { " (anonymous)" } else { "" }
        ));

        let mut request = self.client.get(url);
        if !username.is_empty() || !password.is_empty() {
            request = request.basic_auth(&username, Some(&password));
        }

        let token = cancellable(cancel, async {
            let response = request
                .send()
                .await
                .map_err(|e| ResponseErrorHandler::handle_network_error(&e, "token request"))?;

            if !response.status().is_success() {
                let err = ResponseErrorHandler::from_response(response, Subject::Repository(scope)).await;
                return Err(match err {
                    RegistryError::AuthDenied(msg) => RegistryError::AuthDenied(msg),
                    other => RegistryError::AuthDenied(format!("Token request failed: {}", other)),
                });
            }

            let body: TokenResponse = response.json().await.map_err(|e| {
                RegistryError::AuthDenied(format!("Failed to parse token response: {}", e))
            })?;
            body.token
                .or(body.access_token)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| RegistryError::AuthDenied("Token response carried no token".to_string()))
        })
        .await?;

        self.output.detail(&format!("Token obtained (length: {} chars)", token.len()));
        self.store(scope, &token)?;
        Ok(token)
    }
}
