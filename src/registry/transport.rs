//! Transport helpers shared by every registry call
//!
//! The HTTP transport itself is a plain `reqwest::Client` chosen by the
//! caller; this module adds cooperative cancellation and URL resolution for
//! the `Location` headers the upload protocol hands back.

use crate::error::{RegistryError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Run `fut` unless `cancel` fires first
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(RegistryError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RegistryError::Cancelled),
        result = fut => result,
    }
}

/// Resolve a `Location` header (absolute, absolute-path or relative) against `base_url`
pub fn resolve_location(base_url: &str, location: &str) -> Result<Url> {
    let base = Url::parse(base_url)?;
    Ok(base.join(location)?)
}

/// Append `key=value` to a URL's query string
pub fn with_query(mut url: Url, key: &str, value: &str) -> Url {
    url.query_pairs_mut().append_pair(key, value);
    url
}
