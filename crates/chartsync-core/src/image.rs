//! Container image references
//!
//! Parsing follows the Docker reference grammar loosely: an optional registry
//! host (first segment containing `.` or `:`, or `localhost`), a repository
//! path, an optional `:tag` and an optional `@digest`. A reference with
//! neither tag nor digest gets the implied tag `latest`.

use oci_distribution::Reference;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Registry used when a reference has no host
pub const DOCKER_HUB: &str = "docker.io";

const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Misspelled hosts seen in published charts
const HOST_TYPOS: &[(&str, &str)] = &[("ecr-public.aws.com", "public.ecr.aws")];

const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host; empty means Docker Hub
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

/// Normalized identity used for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageKey {
    pub registry: String,
    pub repository: String,
    /// Tag, or the digest when the reference is digest-only
    pub reference: String,
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reference.contains(':') {
            write!(f, "{}/{}@{}", self.registry, self.repository, self.reference)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.repository, self.reference)
        }
    }
}

impl ImageReference {
    /// Parse `[registry/]repository[:tag][@digest]`
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim().trim_matches('"').trim_matches('\'');
        if raw.is_empty() {
            return Err(CoreError::invalid_image(input, "empty reference"));
        }
        if raw.chars().any(char::is_whitespace) || raw.contains("{{") {
            return Err(CoreError::invalid_image(input, "not a literal reference"));
        }

        let raw = fix_host_typos(raw);

        let (name_tag, digest) = match raw.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(CoreError::invalid_image(input, "digest must be algo:hex"));
                }
                (name, Some(digest.to_string()))
            }
            None => (raw.as_str(), None),
        };

        let last_slash = name_tag.rfind('/');
        let (name, tag) = match name_tag.rfind(':') {
            Some(colon) if last_slash.is_none_or(|slash| colon > slash) => (
                &name_tag[..colon],
                Some(name_tag[colon + 1..].to_string()),
            ),
            _ => (name_tag, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (String::new(), name.to_string()),
        };

        if repository.is_empty() {
            return Err(CoreError::invalid_image(input, "missing repository"));
        }
        if tag.as_deref() == Some("") {
            return Err(CoreError::invalid_image(input, "empty tag"));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        let parsed = Self {
            registry,
            repository,
            tag,
            digest,
        };

        Reference::try_from(parsed.canonical().as_str())
            .map_err(|e| CoreError::invalid_image(input, e.to_string()))?;

        Ok(parsed)
    }

    /// Build from the structured `registry` / `repository` / `tag` / `digest`
    /// fields charts commonly use. `repository` may carry its own host.
    pub fn from_parts(
        registry: Option<&str>,
        repository: &str,
        tag: Option<&str>,
        digest: Option<&str>,
    ) -> Result<Self> {
        let mut raw = String::new();
        if let Some(registry) = registry.map(str::trim).filter(|r| !r.is_empty()) {
            raw.push_str(registry.trim_end_matches('/'));
            raw.push('/');
        }
        raw.push_str(repository.trim().trim_start_matches('/'));
        if let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) {
            raw.push(':');
            raw.push_str(tag);
        }
        if let Some(digest) = digest.map(str::trim).filter(|d| !d.is_empty()) {
            raw.push('@');
            raw.push_str(digest);
        }
        Self::parse(&raw)
    }

    pub fn is_docker_hub(&self) -> bool {
        self.registry.is_empty() || DOCKER_HUB_ALIASES.contains(&self.registry.as_str())
    }

    /// Registry host with Docker Hub spelled out
    pub fn registry_host(&self) -> &str {
        if self.is_docker_hub() {
            DOCKER_HUB
        } else {
            &self.registry
        }
    }

    /// Canonical form: explicit registry, `library/` for official Hub images
    pub fn normalized(&self) -> Self {
        let registry = self.registry_host().to_lowercase();
        let repository = if self.is_docker_hub() && !self.repository.contains('/') {
            format!("library/{}", self.repository)
        } else {
            self.repository.clone()
        };
        Self {
            registry,
            repository,
            tag: self.tag.clone(),
            digest: self.digest.clone(),
        }
    }

    pub fn key(&self) -> ImageKey {
        let n = self.normalized();
        ImageKey {
            registry: n.registry,
            repository: n.repository,
            reference: n
                .tag
                .or(n.digest)
                .unwrap_or_else(|| DEFAULT_TAG.to_string()),
        }
    }

    /// Normalized `(registry, repository)` without tag or digest
    pub fn repository_key(&self) -> (String, String) {
        let n = self.normalized();
        (n.registry, n.repository)
    }

    /// Last path segment of the repository
    pub fn basename(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Tag to publish under: the tag, or `sha256-<hex>` for digest-only sources
    pub fn publish_tag(&self) -> String {
        match (&self.tag, &self.digest) {
            (Some(tag), _) => tag.clone(),
            (None, Some(digest)) => digest.replace(':', "-"),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }

    /// Same repository, addressed by digest only
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Fully-qualified string with an explicit registry host
    pub fn canonical(&self) -> String {
        let mut s = format!("{}/{}", self.registry_host(), self.repository);
        if let Some(tag) = &self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Reference without tag or digest
    pub fn name(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn fix_host_typos(raw: &str) -> String {
    for (typo, fixed) in HOST_TYPOS {
        if let Some(rest) = raw.strip_prefix(typo) {
            if rest.starts_with('/') {
                return format!("{}{}", fixed, rest);
            }
        }
    }
    raw.to_string()
}
