//! Image model: references and the OCI manifest documents this tool reads and writes

pub mod manifest;
pub mod reference;

pub use manifest::{Descriptor, OciManifest};
pub use reference::ImageReference;
