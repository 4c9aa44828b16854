//! Platform selection for multi-architecture images

use oci_distribution::manifest::OciImageIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Which platform of a multi-arch source gets mirrored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlatformPolicy {
    /// Copy the index (or single manifest) as-is
    #[default]
    Auto,
    /// Copy only the child manifest matching this platform
    Explicit(RequestedPlatform),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedPlatform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl fmt::Display for RequestedPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

impl FromStr for RequestedPlatform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidPlatform {
            value: s.to_string(),
        };
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        match parts.as_slice() {
            [os, arch] => Ok(Self {
                os: os.to_lowercase(),
                architecture: arch.to_lowercase(),
                variant: None,
            }),
            [os, arch, variant] => Ok(Self {
                os: os.to_lowercase(),
                architecture: arch.to_lowercase(),
                variant: Some(variant.to_lowercase()),
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for PlatformPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformPolicy::Auto => write!(f, "auto"),
            PlatformPolicy::Explicit(p) => write!(f, "{}", p),
        }
    }
}

impl FromStr for PlatformPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            return Ok(PlatformPolicy::Auto);
        }
        Ok(PlatformPolicy::Explicit(trimmed.parse()?))
    }
}

impl TryFrom<String> for PlatformPolicy {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PlatformPolicy> for String {
    fn from(policy: PlatformPolicy) -> Self {
        policy.to_string()
    }
}

/// Digest of the index child whose os/arch match `platform` exactly.
/// A requested variant must also match; otherwise the child's variant is
/// ignored.
pub fn select_child_digest(index: &OciImageIndex, platform: &RequestedPlatform) -> Result<String> {
    index
        .manifests
        .iter()
        .find(|entry| {
            entry.platform.as_ref().is_some_and(|p| {
                p.os == platform.os
                    && p.architecture == platform.architecture
                    && platform
                        .variant
                        .as_ref()
                        .is_none_or(|v| p.variant.as_deref() == Some(v.as_str()))
            })
        })
        .map(|entry| entry.digest.clone())
        .ok_or_else(|| CoreError::NoMatchingPlatform {
            platform: platform.to_string(),
            available: available_platforms(index).join(", "),
        })
}

/// `os/arch[/variant]` of every child that declares a platform
pub fn available_platforms(index: &OciImageIndex) -> Vec<String> {
    index
        .manifests
        .iter()
        .filter_map(|entry| entry.platform.as_ref())
        .map(|p| match &p.variant {
            Some(v) => format!("{}/{}/{}", p.os, p.architecture, v),
            None => format!("{}/{}", p.os, p.architecture),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> OciImageIndex {
        serde_json::from_str(
            r#"{
  "schemaVersion": 2,
  "mediaType": "application/vnd.oci.image.index.v1+json",
  "manifests": [
    {
      "mediaType": "application/vnd.oci.image.manifest.v1+json",
      "digest": "sha256:aaaa",
      "size": 1000,
      "platform": {"architecture": "amd64", "os": "linux"}
    },
    {
      "mediaType": "application/vnd.oci.image.manifest.v1+json",
      "digest": "sha256:bbbb",
      "size": 1000,
      "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}
    },
    {
      "mediaType": "application/vnd.oci.image.manifest.v1+json",
      "digest": "sha256:cccc",
      "size": 500,
      "platform": {"architecture": "unknown", "os": "unknown"}
    }
  ]
}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_selects_requested_child() {
        let arm: RequestedPlatform = "linux/arm64".parse().unwrap();
        assert_eq!(select_child_digest(&index(), &arm).unwrap(), "sha256:bbbb");

        let amd: RequestedPlatform = "linux/amd64".parse().unwrap();
        assert_eq!(select_child_digest(&index(), &amd).unwrap(), "sha256:aaaa");
    }

    #[test]
    fn test_variant_must_match_when_requested() {
        let v8: RequestedPlatform = "linux/arm64/v8".parse().unwrap();
        assert_eq!(select_child_digest(&index(), &v8).unwrap(), "sha256:bbbb");

        let v7: RequestedPlatform = "linux/arm64/v7".parse().unwrap();
        assert!(select_child_digest(&index(), &v7).is_err());
    }

    #[test]
    fn test_missing_platform_fails() {
        let riscv: RequestedPlatform = "linux/riscv64".parse().unwrap();
        let err = select_child_digest(&index(), &riscv).unwrap_err();
        assert!(matches!(err, CoreError::NoMatchingPlatform { .. }));
        assert!(err.to_string().contains("linux/amd64"));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("auto".parse::<PlatformPolicy>().unwrap(), PlatformPolicy::Auto);
        assert_eq!("".parse::<PlatformPolicy>().unwrap(), PlatformPolicy::Auto);
        assert_eq!(
            "linux/arm64".parse::<PlatformPolicy>().unwrap().to_string(),
            "linux/arm64"
        );
        assert!("linux".parse::<PlatformPolicy>().is_err());
        assert!("linux//arm".parse::<PlatformPolicy>().is_err());
    }

    #[test]
    fn test_policy_serde() {
        let p: PlatformPolicy = serde_yaml::from_str("linux/amd64").unwrap();
        assert!(matches!(p, PlatformPolicy::Explicit(_)));
        assert_eq!(serde_yaml::to_string(&p).unwrap().trim(), "linux/amd64");
    }
}
