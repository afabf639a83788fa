//! Standardized mapping of registry HTTP failures onto [`RegistryError`]

use crate::error::RegistryError;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::fmt;

/// What a failed request was about; picks the not-found variant
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Repository(&'a str),
    Manifest { repository: &'a str, reference: &'a str },
    Blob { repository: &'a str, digest: &'a str },
    Upload(&'a str),
    /// Finishing an upload with `PUT ?digest=`
    Commit(&'a str),
}

impl fmt::Display for Subject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Repository(name) => write!(f, "repository {}", name),
            Subject::Manifest { repository, reference } => {
                write!(f, "manifest {}:{}", repository, reference)
            }
            Subject::Blob { repository, digest } => write!(f, "blob {}@{}", repository, digest),
            Subject::Upload(name) => write!(f, "blob upload to {}", name),
            Subject::Commit(name) => write!(f, "blob commit to {}", name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    code: String,
    #[serde(default)]
    message: String,
}

pub struct ResponseErrorHandler;

impl ResponseErrorHandler {
    /// Consume a non-success response and classify it
    pub async fn from_response(response: Response, subject: Subject<'_>) -> RegistryError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Self::handle(status, &body, subject)
    }

    /// Classify a registry failure from its status and body
    pub fn handle(status: StatusCode, body: &str, subject: Subject<'_>) -> RegistryError {
        let entries = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.errors)
            .unwrap_or_default();
        let detail = if entries.is_empty() {
            format!("{} (status {}): {}", subject, status, body.trim())
        } else {
            let messages: Vec<String> = entries
                .iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect();
            format!("{} (status {}): {}", subject, status, messages.join("; "))
        };

        let has = |code: &str| entries.iter().any(|e| e.code == code);

        if has("DIGEST_INVALID") || has("SIZE_INVALID") {
            return RegistryError::DigestMismatch(detail);
        }
        if has("MANIFEST_UNKNOWN") {
            return RegistryError::ManifestNotFound(detail);
        }
        if has("BLOB_UNKNOWN") || has("MANIFEST_BLOB_UNKNOWN") {
            return RegistryError::BlobNotFound(detail);
        }
        if has("NAME_UNKNOWN") {
            return RegistryError::RepositoryNotFound(detail);
        }
        if has("UNAUTHORIZED") || has("DENIED") {
            return RegistryError::AuthDenied(detail);
        }

        match status.as_u16() {
            401 | 403 => RegistryError::AuthDenied(detail),
            404 => match subject {
                Subject::Manifest { .. } => RegistryError::ManifestNotFound(detail),
                Subject::Blob { .. } => RegistryError::BlobNotFound(detail),
                Subject::Repository(_) | Subject::Upload(_) | Subject::Commit(_) => {
                    RegistryError::RepositoryNotFound(detail)
                }
            },
            400 if matches!(subject, Subject::Commit(_)) => RegistryError::DigestMismatch(detail),
            _ => RegistryError::Registry(detail),
        }
    }

    /// Classify a transport failure
    pub fn handle_network_error(err: &reqwest::Error, context: &str) -> RegistryError {
        if err.is_timeout() {
            RegistryError::Network(format!("Timeout during {}: {}", context, err))
        } else if err.is_connect() {
            RegistryError::Network(format!("Connection failed during {}: {}", context, err))
        } else {
            RegistryError::Network(format!("Request failed during {}: {}", context, err))
        }
    }
}
