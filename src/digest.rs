//! SHA256 digest utilities for content-addressed blobs
//!
//! Registries name every blob by `sha256:<hex>`. [`DigestUtils`] covers the
//! one-shot helpers and [`Digester`] computes the digest incrementally while
//! a stream is being uploaded.

use sha2::{Digest, Sha256};

/// Canonical digest algorithm prefix
pub const SHA256_PREFIX: &str = "sha256:";

/// Digest of zero bytes
pub const EMPTY_DIGEST: &str =
    "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Utilities for working with SHA256 digests
pub struct DigestUtils;

impl DigestUtils {
    /// Compute the hex SHA256 of byte data
    pub fn compute_sha256(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Compute the full digest (with sha256: prefix) of byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, lowercase hex)
    pub fn is_valid_sha256_hex(digest: &str) -> bool {
        digest.len() == 64
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    /// Validate full digest format (sha256:xxxxx)
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix(SHA256_PREFIX)
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Format digest for display (truncated for readability)
    pub fn format_digest_short(digest: &str) -> String {
        if digest.len() > 19 {
            format!("{}...", &digest[..19])
        } else {
            digest.to_string()
        }
    }
}

/// Incremental digester that also counts the bytes fed through it
#[derive(Debug, Clone, Default)]
pub struct Digester {
    hasher: Sha256,
    bytes_written: u64,
}

impl Digester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns `(digest, size)` of everything fed so far
    pub fn finalize(self) -> (String, u64) {
        let digest = format!("{}{}", SHA256_PREFIX, hex::encode(self.hasher.finalize()));
        (digest, self.bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_WORLD: &str =
        "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_docker_digest() {
        assert_eq!(DigestUtils::compute_docker_digest(b"hello world"), HELLO_WORLD);
        assert_eq!(DigestUtils::compute_docker_digest(b""), EMPTY_DIGEST);
    }

    #[test]
    fn test_validate_digest() {
        assert!(DigestUtils::is_valid_docker_digest(HELLO_WORLD));
        assert!(!DigestUtils::is_valid_docker_digest("sha256:invalid"));
        assert!(!DigestUtils::is_valid_docker_digest(&HELLO_WORLD[7..]));
        assert!(!DigestUtils::is_valid_docker_digest(&HELLO_WORLD.to_uppercase()));
    }

    #[test]
    fn test_digester_is_independent_of_chunking() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = DigestUtils::compute_docker_digest(&data);

        for chunk_size in [1, 7, 512, 4096, 10_000] {
            let mut digester = Digester::new();
            for chunk in data.chunks(chunk_size) {
                digester.update(chunk);
            }
            assert_eq!(digester.bytes_written(), data.len() as u64);
            assert_eq!(digester.finalize(), (expected.clone(), data.len() as u64));
        }
    }

    #[test]
    fn test_empty_digester() {
        assert_eq!(Digester::new().finalize(), (EMPTY_DIGEST.to_string(), 0));
    }

    #[test]
    fn test_format_digest_short() {
        assert_eq!(DigestUtils::format_digest_short(HELLO_WORLD), "sha256:b94d27b9934d...");
        assert_eq!(DigestUtils::format_digest_short("sha256:ab"), "sha256:ab");
    }
}
