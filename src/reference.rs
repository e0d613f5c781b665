//! Weak image reference parsing.
//!
//! Tarball export only needs a syntactically plausible tag to record next to
//! each manifest, so validation here is deliberately weak: no registry
//! reachability, no repository naming rules beyond non-emptiness.

use crate::error::{BuildError, Result};

const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Registry hostname, when the first path component looks like one
    /// (contains a dot or port, or is "localhost").
    pub registry: Option<String>,
    /// Repository path (e.g., "built-image", "org/app")
    pub repository: String,
    /// Tag; defaults to "latest" when neither a tag nor a digest is given.
    pub tag: Option<String>,
    /// Content digest (e.g., "sha256:abc…") for pinned references.
    pub digest: Option<String>,
}

impl Reference {
    /// Parse a reference string under weak validation.
    ///
    /// Accepts `repo`, `repo:tag`, `registry/repo:tag`,
    /// `registry:port/repo:tag` and `repo@sha256:…` forms.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(BuildError::reference(reference, "reference is empty"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(BuildError::reference(
                reference,
                "reference contains whitespace",
            ));
        }

        // Digest comes after '@' and must carry an algorithm prefix.
        let (name_part, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(BuildError::reference(
                        reference,
                        "digest must be in algorithm:hex form",
                    ));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag is a colon in the last path component. A colon earlier in the
        // string belongs to a registry port.
        let last_component_start = name_part.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_part[last_component_start..].rsplit_once(':') {
            Some((component, tag)) if !tag.is_empty() => (
                &name_part[..last_component_start + component.len()],
                Some(tag.to_string()),
            ),
            Some(_) => {
                return Err(BuildError::reference(reference, "tag is empty"));
            }
            None => (name_part, None),
        };

        let (registry, repository) = split_registry(name);
        if repository.is_empty() {
            return Err(BuildError::reference(reference, "repository is empty"));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Reference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Reference string with the tag applied and the digest dropped,
    /// suitable for use as a tarball tag annotation. Digest-only references
    /// fall back to the default tag.
    pub fn tagged(&self) -> String {
        let mut s = String::new();
        if let Some(ref registry) = self.registry {
            s.push_str(registry);
            s.push('/');
        }
        s.push_str(&self.repository);
        s.push(':');
        s.push_str(self.tag.as_deref().unwrap_or(DEFAULT_TAG));
        s
    }

    /// Full reference string, including the digest when present.
    pub fn full_reference(&self) -> String {
        let mut s = String::new();
        if let Some(ref registry) = self.registry {
            s.push_str(registry);
            s.push('/');
        }
        s.push_str(&self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

/// Split off a leading registry component when it looks like a hostname.
fn split_registry(name: &str) -> (Option<String>, String) {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (Some(first.to_string()), rest.to_string());
        }
    }
    (None, name.to_string())
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let r = Reference::parse("app").unwrap();
        assert_eq!(r.registry, None);
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = Reference::parse("app:v1.2").unwrap();
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag.as_deref(), Some("v1.2"));
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = Reference::parse("localhost/built-image:latest").unwrap();
        assert_eq!(r.registry.as_deref(), Some("localhost"));
        assert_eq!(r.repository, "built-image");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = Reference::parse("registry.local:5000/org/app:v1").unwrap();
        assert_eq!(r.registry.as_deref(), Some("registry.local:5000"));
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_parse_user_repo_without_registry() {
        let r = Reference::parse("org/app").unwrap();
        assert_eq!(r.registry, None);
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_parse_digest_reference() {
        let r = Reference::parse("ghcr.io/org/app@sha256:abc123").unwrap();
        assert_eq!(r.registry.as_deref(), Some("ghcr.io"));
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some("sha256:abc123"));
    }

    #[test]
    fn test_parse_invalid_digest() {
        assert!(Reference::parse("app@notadigest").is_err());
    }

    #[test]
    fn test_parse_empty() {
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse("   ").is_err());
    }

    #[test]
    fn test_parse_whitespace_inside() {
        assert!(Reference::parse("my image:latest").is_err());
    }

    #[test]
    fn test_parse_empty_tag() {
        assert!(Reference::parse("app:").is_err());
    }

    #[test]
    fn test_tagged_falls_back_for_digest_reference() {
        let r = Reference::parse("ghcr.io/org/app@sha256:abc123").unwrap();
        assert_eq!(r.tagged(), "ghcr.io/org/app:latest");
    }

    #[test]
    fn test_display_round_trip() {
        let r = Reference::parse("registry.local:5000/org/app:v1").unwrap();
        assert_eq!(r.to_string(), "registry.local:5000/org/app:v1");
    }
}
