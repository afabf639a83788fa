//! OCI image manifest and content descriptor types

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const OCTET_STREAM_MEDIA_TYPE: &str = "application/octet-stream";

pub const SCHEMA_VERSION: u32 = 2;

/// Media types sent in `Accept` when fetching a manifest
pub const MANIFEST_ACCEPT: [&str; 2] = [OCI_MANIFEST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE];

/// Content descriptor: identifies a blob by digest and size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

impl Descriptor {
    pub fn new(media_type: &str, digest: String, size: u64) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest,
            size,
        }
    }
}

/// OCI image manifest with a single config and (for this tool) no layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl OciManifest {
    /// Manifest referencing `config` and nothing else
    pub fn with_config(config: Descriptor) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers: Vec::new(),
            annotations: None,
        }
    }

    /// Every blob this manifest points at, config first
    pub fn references(&self) -> Vec<&Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter()).collect()
    }

    /// The descriptor the manifest is about: its config
    pub fn target(&self) -> &Descriptor {
        &self.config
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| RegistryError::MalformedManifest(format!("Failed to encode manifest: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(data)
            .map_err(|e| RegistryError::MalformedManifest(format!("Failed to decode manifest: {}", e)))?;
        if manifest.schema_version != SCHEMA_VERSION {
            return Err(RegistryError::MalformedManifest(format!(
                "Unsupported schema version {}",
                manifest.schema_version
            )));
        }
        Ok(manifest)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<Descriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Descriptor>>::deserialize(deserializer)?.unwrap_or_default())
}
