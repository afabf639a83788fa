//! Authenticated registry contexts
//!
//! A context couples a transport, the session's credential table and the set
//! of actions to negotiate tokens for. A context without explicit actions
//! behaves as pull-only.

use crate::error::handlers::{ResponseErrorHandler, Subject};
use crate::error::Result;
use crate::image::ImageReference;
use crate::logging::Logger;
use crate::registry::auth::{CredentialTable, response_challenges};
use crate::registry::repository::Repository;
use crate::registry::token_manager::TokenManager;
use crate::registry::transport::cancellable;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const PULL: &str = "pull";
pub const PUSH: &str = "push";

pub struct RegistryContext {
    client: Client,
    actions: Vec<&'static str>,
    tokens: TokenManager,
    output: Logger,
}

impl RegistryContext {
    pub fn new(client: Client, credentials: Arc<CredentialTable>, output: Logger) -> Self {
        let tokens = TokenManager::new(client.clone(), credentials, output.clone());
        Self {
            client,
            actions: Vec::new(),
            tokens,
            output,
        }
    }

    /// Declare the actions tokens are requested for
    pub fn with_actions(mut self, actions: &[&'static str]) -> Self {
        self.actions = actions.to_vec();
        self
    }

    /// Effective actions; pull when none were declared
    pub fn actions(&self) -> Vec<&'static str> {
        if self.actions.is_empty() {
            vec![PULL]
        } else {
            self.actions.clone()
        }
    }

    /// Ping the registry and negotiate access to `reference`'s repository
    pub async fn repository_for_ref(
        &self,
        reference: &ImageReference,
        insecure: bool,
        cancel: &CancellationToken,
    ) -> Result<Repository> {
        let base_url = reference.base_url(insecure);
        let ping_url = format!("{}/v2/", base_url);
        self.output.detail(&format!("Pinging {}", ping_url));

        let response = cancellable(cancel, async {
            self.client
                .get(&ping_url)
                .send()
                .await
                .map_err(|e| ResponseErrorHandler::handle_network_error(&e, "registry ping"))
        })
        .await?;

        let status = response.status();
        let challenges = response_challenges(response.headers());
        if !status.is_success() && status != StatusCode::UNAUTHORIZED {
            return Err(
                ResponseErrorHandler::from_response(response, Subject::Repository(reference.repository()))
                    .await,
            );
        }

        let authorization = match challenges.iter().find(|c| c.is_bearer()) {
            Some(challenge) => {
                let scope = reference.scope(&self.actions());
                Some(self.tokens.token_for(challenge, &scope, cancel).await?)
            }
            None => {
                if status == StatusCode::UNAUTHORIZED {
                    self.output.warning("Registry demands authentication without a bearer challenge");
                }
                None
            }
        };

        Ok(Repository::new(
            self.client.clone(),
            base_url,
            reference.repository().to_string(),
            authorization,
            self.output.clone(),
        ))
    }
}
