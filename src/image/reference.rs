//! Image reference parsing (`host[:port]/repository/path[:tag]`)

use crate::error::{RegistryError, Result};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LENGTH: usize = 128;

/// A fully qualified image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    registry: String,
    repository: String,
    tag: String,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let malformed = |reason: &str| {
            RegistryError::MalformedReference(format!("{:?}: {}", reference, reason))
        };

        if reference.is_empty() {
            return Err(malformed("reference is empty"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(malformed("reference contains whitespace"));
        }
        if reference.contains('@') {
            return Err(malformed("digest references are not supported, use a tag"));
        }

        let (registry, remainder) = reference
            .split_once('/')
            .ok_or_else(|| malformed("missing registry host"))?;
        if !looks_like_host(registry) {
            return Err(malformed("missing registry host"));
        }
        if !is_valid_host(registry) {
            return Err(malformed("invalid registry host"));
        }

        // A ':' after the last '/' separates the tag
        let last_slash = remainder.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (repository, tag) = match remainder[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                (&remainder[..split], &remainder[split + 1..])
            }
            None => (remainder, DEFAULT_TAG),
        };

        if repository.is_empty() {
            return Err(malformed("repository path is empty"));
        }
        if !repository.split('/').all(is_valid_path_component) {
            return Err(malformed("invalid repository path"));
        }
        if !is_valid_tag(tag) {
            return Err(malformed("invalid tag"));
        }

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// `scheme://host` for this registry
    pub fn base_url(&self, insecure: bool) -> String {
        let scheme = if insecure { "http" } else { "https" };
        format!("{}://{}", scheme, self.registry)
    }

    /// Token scope for this repository, e.g. `repository:ns/app:pull,push`
    pub fn scope(&self, actions: &[&str]) -> String {
        format!("repository:{}:{}", self.repository, actions.join(","))
    }
}

impl FromStr for ImageReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.')
        || component.contains(':')
        || component.starts_with('[')
        || component == "localhost"
}

fn is_valid_host(host: &str) -> bool {
    let (name, port) = if let Some(rest) = host.strip_prefix('[') {
        match rest.split_once(']') {
            Some((addr, tail)) => {
                if addr.is_empty() || !addr.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
                    return false;
                }
                match tail {
                    "" => return true,
                    t => match t.strip_prefix(':') {
                        Some(port) => ("ipv6", Some(port)),
                        None => return false,
                    },
                }
            }
            None => return false,
        }
    } else {
        match host.split_once(':') {
            Some((name, port)) => (name, Some(port)),
            None => (host, None),
        }
    };

    let name_ok = !name.is_empty()
        && name
            .split('.')
            .all(|label| {
                !label.is_empty()
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            });
    let port_ok = port.is_none_or(|p| !p.is_empty() && p.len() <= 5 && p.chars().all(|c| c.is_ascii_digit()));

    name_ok && port_ok
}

/// `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`
fn is_valid_path_component(component: &str) -> bool {
    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let is_separator = |c: char| matches!(c, '.' | '_' | '-');

    let mut chars = component.chars().peekable();
    if !chars.peek().copied().is_some_and(is_alnum) {
        return false;
    }
    let mut separator = String::new();
    for c in chars {
        if is_alnum(c) {
            if !separator.is_empty() {
                let ok = matches!(separator.as_str(), "." | "_" | "__")
                    || separator.chars().all(|s| s == '-');
                if !ok {
                    return false;
                }
                separator.clear();
            }
        } else if is_separator(c) {
            separator.push(c);
        } else {
            return false;
        }
    }
    separator.is_empty()
}

/// `[\w][\w.-]{0,127}`
fn is_valid_tag(tag: &str) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) if is_word(first) => {}
        _ => return false,
    }
    tag.len() <= MAX_TAG_LENGTH && chars.all(|c| is_word(c) || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    fn assert_malformed(s: &str) {
        match ImageReference::parse(s) {
            Err(RegistryError::MalformedReference(_)) => {}
            other => panic!("expected malformed reference for {:?}, got {:?}", s, other),
        }
    }

    #[test]
    fn test_parse_full_reference() {
        let r = parse("registry.example.com/ns/app:v1");
        assert_eq!(r.registry(), "registry.example.com");
        assert_eq!(r.repository(), "ns/app");
        assert_eq!(r.tag(), "v1");
        assert_eq!(r.to_string(), "registry.example.com/ns/app:v1");
    }

    #[test]
    fn test_parse_with_port_and_default_tag() {
        let r = parse("localhost:5000/a/b/c");
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "a/b/c");
        assert_eq!(r.tag(), DEFAULT_TAG);

        let r = parse("127.0.0.1:5000/app:1.0-rc_1");
        assert_eq!(r.registry(), "127.0.0.1:5000");
        assert_eq!(r.tag(), "1.0-rc_1");

        let r = parse("[::1]:5000/app:x");
        assert_eq!(r.registry(), "[::1]:5000");
    }

    #[test]
    fn test_separators_in_repository() {
        assert_eq!(parse("r.io/my_app.v2/some--thing__x").repository(), "my_app.v2/some--thing__x");
    }

    #[test]
    fn test_malformed_references() {
        assert_malformed("");
        assert_malformed("app:v1");
        assert_malformed("library/ubuntu:latest");
        assert_malformed("registry.example.com/");
        assert_malformed("registry.example.com/:v1");
        assert_malformed("registry.example.com/Ns/app:v1");
        assert_malformed("registry.example.com/ns//app:v1");
        assert_malformed("registry.example.com/ns/app:");
        assert_malformed("registry.example.com/ns/app:.bad");
        assert_malformed("registry.example.com/ns/app_:v1");
        assert_malformed("registry.example.com/ns/a..b:v1");
        assert_malformed("registry.example.com/ns/app@sha256:abcd");
        assert_malformed("registry.example.com:port/app:v1");
        assert_malformed("registry .example.com/app:v1");
        assert_malformed(&format!("r.io/app:{}", "a".repeat(129)));
    }

    #[test]
    fn test_base_url_and_scope() {
        let r = parse("registry.example.com/ns/app:v1");
        assert_eq!(r.base_url(false), "https://registry.example.com");
        assert_eq!(r.base_url(true), "http://registry.example.com");
        assert_eq!(r.scope(&["pull"]), "repository:ns/app:pull");
        assert_eq!(r.scope(&["pull", "push"]), "repository:ns/app:pull,push");
    }

    #[test]
    fn test_from_str() {
        let r: ImageReference = "localhost/app:v2".parse().unwrap();
        assert_eq!(r.tag(), "v2");
    }
}
