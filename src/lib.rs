//! Image Layer Library
//!
//! Stores an arbitrary byte stream in a Docker/OCI registry as a one-blob
//! image and reads it back as a seekable stream.
//!
//! ```no_run
//! use image_layer::{ClientOptions, Session};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> image_layer::Result<()> {
//! let cancel = CancellationToken::new();
//! let session = Session::open("registry.example.com/team/data:v1", ClientOptions::new(), &cancel).await?;
//! session.put(&mut &b"hello world"[..], &cancel).await?;
//! let mut reader = session.get(&cancel).await?;
//! let bytes = reader.read_to_end(&cancel).await?;
//! assert_eq!(bytes, b"hello world");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;

pub use config::{AuthConfig, ClientOptions};
pub use error::{RegistryError, Result};
pub use image::{Descriptor, ImageReference};
pub use logging::Logger;
pub use registry::{BlobReader, Session};
