//! Error types and handlers for registry operations

pub mod handlers;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The image reference could not be parsed
    #[error("Malformed reference: {0}")]
    MalformedReference(String),
    /// The `/v2/` challenge probe returned nothing usable
    #[error("Authentication probe failed: {0}")]
    AuthProbeFailed(String),
    /// Credentials or scope rejected by the registry or its token service
    #[error("Authentication denied: {0}")]
    AuthDenied(String),
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),
    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("Blob not found: {0}")]
    BlobNotFound(String),
    /// Registry-side integrity rejection of an uploaded blob
    #[error("Digest mismatch: {0}")]
    DigestMismatch(String),
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),
    /// Transport-level failure (DNS, TLS, connection reset, ...)
    #[error("Network error: {0}")]
    Network(String),
    #[error("Operation cancelled")]
    Cancelled,
    /// Failure reading or writing a caller-supplied stream
    #[error("IO error: {0}")]
    Io(String),
    /// Any other unexpected registry response
    #[error("Registry error: {0}")]
    Registry(String),
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Network(err.to_string())
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Registry(format!("Invalid URL: {}", err))
    }
}
