//! Credential discovery for registry token realms
//!
//! A registry advertises where tokens come from through `WWW-Authenticate`
//! challenges on `GET /v2/`. Every bearer realm found there is mapped to the
//! user's basic credentials; any other URL resolves to anonymous.

use crate::config::AuthConfig;
use crate::error::handlers::ResponseErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::transport::cancellable;
use reqwest::Client;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// One parsed authentication challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    /// Parameter names are lowercased
    pub parameters: HashMap<String, String>,
}

impl Challenge {
    pub fn is_bearer(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("bearer")
    }

    pub fn realm(&self) -> Option<&str> {
        self.parameters.get("realm").map(String::as_str)
    }

    pub fn service(&self) -> Option<&str> {
        self.parameters.get("service").map(String::as_str)
    }
}

/// Parse one `WWW-Authenticate` value, which may hold several challenges
pub fn parse_challenges(header: &str) -> Vec<Challenge> {
    let mut parser = ChallengeParser { input: header.as_bytes(), pos: 0 };
    let mut challenges = Vec::new();

    loop {
        parser.skip_while(|b| b == b',' || b.is_ascii_whitespace());
        let scheme = parser.token();
        if scheme.is_empty() {
            break;
        }

        let mut parameters = HashMap::new();
        loop {
            parser.skip_while(|b| b.is_ascii_whitespace());
            let start = parser.pos;
            let name = parser.token();
            parser.skip_while(|b| b.is_ascii_whitespace());
            if name.is_empty() || parser.peek() != Some(b'=') {
                // Next challenge's scheme (or junk): leave it for the outer loop
                parser.pos = start;
                break;
            }
            parser.pos += 1;
            parser.skip_while(|b| b.is_ascii_whitespace());
            let value = if parser.peek() == Some(b'"') {
                parser.quoted()
            } else {
                parser.token()
            };
            parameters.insert(name.to_ascii_lowercase(), value);

            parser.skip_while(|b| b.is_ascii_whitespace());
            if parser.peek() == Some(b',') {
                parser.pos += 1;
            } else {
                break;
            }
        }

        challenges.push(Challenge { scheme, parameters });

        // Unparseable leftovers end the header
        parser.skip_while(|b| b.is_ascii_whitespace());
        if parser.peek().is_some_and(|b| !is_tchar(b) && b != b',') {
            break;
        }
    }

    challenges
}

/// All challenges carried by a response's `WWW-Authenticate` headers
pub fn response_challenges(headers: &HeaderMap) -> Vec<Challenge> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_challenges)
        .collect()
}

/// Bearer realms advertised by a probe response, in order, without duplicates
pub fn discover_realms(headers: &HeaderMap) -> Vec<String> {
    let mut realms: Vec<String> = Vec::new();
    for challenge in response_challenges(headers) {
        if !challenge.is_bearer() {
            continue;
        }
        if let Some(realm) = challenge.realm() {
            if !realms.iter().any(|r| r == realm) {
                realms.push(realm.to_string());
            }
        }
    }
    realms
}

/// Credential lookup used while negotiating tokens
pub trait CredentialStore: Send + Sync {
    /// Basic-auth pair for an auth-service URL; `("", "")` when unknown
    fn basic(&self, url: &str) -> (String, String);

    /// Refresh tokens are never persisted
    fn refresh_token(&self, _url: &str, _service: &str) -> String {
        String::new()
    }

    fn set_refresh_token(&self, _url: &str, _service: &str, _token: &str) {}
}

/// Exact-URL to username/password table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialTable {
    credentials: HashMap<String, AuthConfig>,
}

impl CredentialTable {
    pub fn build<I, S>(urls: I, auth: &AuthConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials = urls
            .into_iter()
            .map(|url| (url.into(), auth.clone()))
            .collect();
        Self { credentials }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.credentials.contains_key(url)
    }
}

impl CredentialStore for CredentialTable {
    fn basic(&self, url: &str) -> (String, String) {
        self.credentials
            .get(url)
            .map(|a| (a.username.clone(), a.password.clone()))
            .unwrap_or_default()
    }
}

/// Probe `base_url/v2/` and map every advertised bearer realm to `auth`
pub async fn resolve(
    client: &Client,
    auth: &AuthConfig,
    base_url: &str,
    output: &Logger,
    cancel: &CancellationToken,
) -> Result<CredentialTable> {
    let url = format!("{}/v2/", base_url.trim_end_matches('/'));
    output.detail(&format!("Probing {} for auth challenges", url));

    let response = cancellable(cancel, async {
        client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResponseErrorHandler::handle_network_error(&e, "auth probe"))
    })
    .await?;

    let status = response.status();
    let challenges = response_challenges(response.headers());
    output.detail(&format!(
        "Probe status {}, {} challenge(s)",
        status,
        challenges.len()
    ));

    if !status.is_success() && challenges.is_empty() {
        return Err(RegistryError::AuthProbeFailed(format!(
            "{} returned status {} without an authentication challenge",
            url, status
        )));
    }

    let realms = discover_realms(response.headers());
    for realm in &realms {
        output.verbose(&format!("Discovered token realm: {}", realm));
    }

    Ok(CredentialTable::build(realms, auth))
}

struct ChallengeParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl ChallengeParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
    }

    fn token(&mut self) -> String {
        let start = self.pos;
        self.skip_while(is_tchar);
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    /// Quoted string starting at the opening quote; backslash escapes one byte
    fn quoted(&mut self) -> String {
        let mut value = Vec::new();
        self.pos += 1;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                b'"' => break,
                b'\\' => {
                    if let Some(escaped) = self.peek() {
                        value.push(escaped);
                        self.pos += 1;
                    }
                }
                _ => value.push(b),
            }
        }
        String::from_utf8_lossy(&value).into_owned()
    }
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~/:".contains(&b)
}
