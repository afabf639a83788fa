//! Registry operations on a single repository

pub mod blob_operations;
pub mod blob_reader;
pub mod manifest_operations;

pub use blob_operations::{BlobStore, BlobWriter};
pub use blob_reader::BlobReader;
pub use manifest_operations::{ManifestBuilder, ManifestService};
