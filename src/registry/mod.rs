//! Registry module for Docker/OCI Distribution v2 interactions
//!
//! Credential resolution, token negotiation, blob and manifest operations,
//! and the [`Session`] that ties them together for Put and Get.

pub mod auth;
pub mod context;
pub mod operations;
pub mod repository;
pub mod session;
pub mod token_manager;
pub mod transfer;
pub mod transport;

pub use auth::{CredentialStore, CredentialTable};
pub use context::RegistryContext;
pub use operations::{BlobReader, BlobStore, ManifestBuilder, ManifestService};
pub use repository::Repository;
pub use session::Session;
