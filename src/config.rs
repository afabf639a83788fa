//! Client configuration: credentials, transport selection and logging

use crate::logging::Logger;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;

pub const USERNAME_ENV: &str = "REGISTRY_USERNAME";
pub const PASSWORD_ENV: &str = "REGISTRY_PASSWORD";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Anonymous access
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Credentials from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, if a username is set
    pub fn from_env() -> Option<Self> {
        let username = env::var(USERNAME_ENV).ok().filter(|u| !u.is_empty())?;
        let password = env::var(PASSWORD_ENV).unwrap_or_default();
        Some(Self { username, password })
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// Options applied when a session is opened.
///
/// Transports left unset get a fresh `reqwest::Client` per session.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub auth: AuthConfig,
    pub insecure: bool,
    pub transport: Option<Client>,
    pub insecure_transport: Option<Client>,
    pub logger: Logger,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_pass(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = AuthConfig::new(username, password);
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Talk plain HTTP to the registry
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Transport used for HTTPS registries
    pub fn with_transport(mut self, transport: Client) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Transport used when `insecure` is set
    pub fn with_insecure_transport(mut self, transport: Client) -> Self {
        self.insecure_transport = Some(transport);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// The transport matching the `insecure` flag
    pub fn selected_transport(&self) -> Client {
        let configured = if self.insecure {
            &self.insecure_transport
        } else {
            &self.transport
        };
        configured.clone().unwrap_or_default()
    }
}
