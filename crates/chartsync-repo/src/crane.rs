//! Registry tooling backed by the `crane` CLI

use async_trait::async_trait;
use oci_distribution::manifest::OciImageIndex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use chartsync_core::ImageReference;

use crate::credentials::RegistryCredentials;
use crate::error::{RepoError, Result};
use crate::process::{ProcessRunner, ToolCommand};
use crate::tooling::RegistryTooling;

pub const CRANE: &str = "crane";

#[derive(Debug, Clone)]
pub struct CraneCli {
    runner: ProcessRunner,
    /// Private `DOCKER_CONFIG` so host credential helpers are never consulted
    docker_config: Option<PathBuf>,
}

/// Only the fields needed to tell an index from a single manifest
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestProbe {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<Vec<serde_json::Value>>,
}

impl CraneCli {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            docker_config: None,
        }
    }

    /// Keep registry logins in `dir/config.json`
    pub fn with_docker_config(mut self, dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let config = dir.join("config.json");
        if !config.exists() {
            std::fs::write(&config, "{\"auths\":{}}\n")?;
        }
        self.docker_config = Some(dir.to_path_buf());
        Ok(self)
    }

    fn command<I, S>(&self, args: I) -> ToolCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd = ToolCommand::new(CRANE).args(args);
        match &self.docker_config {
            Some(dir) => cmd.env("DOCKER_CONFIG", dir.display().to_string()),
            None => cmd,
        }
    }

    fn not_found_or(e: RepoError, image: &ImageReference) -> RepoError {
        if e.is_not_found() {
            RepoError::ManifestNotFound {
                reference: image.to_string(),
            }
        } else {
            e
        }
    }
}

#[async_trait]
impl RegistryTooling for CraneCli {
    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()> {
        let cmd = self
            .command([
                "auth",
                "login",
                registry,
                "--username",
                credentials.username(),
                "--password-stdin",
            ])
            .stdin(credentials.password());
        self.runner.run(&cmd).await.map_err(|e| RepoError::AuthFailed {
            registry: registry.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn exists(&self, image: &ImageReference) -> Result<bool> {
        let reference = image.canonical();
        match self.runner.run(&self.command(["digest", reference.as_str()])).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn manifest_digest(&self, image: &ImageReference) -> Result<String> {
        let reference = image.canonical();
        let stdout = self
            .runner
            .run(&self.command(["digest", reference.as_str()]))
            .await
            .map_err(|e| Self::not_found_or(e, image))?;
        let digest = stdout.trim();
        if !digest.contains(':') {
            return Err(RepoError::InvalidManifest {
                reference: image.to_string(),
                message: format!("unexpected digest output '{}'", digest),
            });
        }
        Ok(digest.to_string())
    }

    async fn manifest_index(&self, image: &ImageReference) -> Result<Option<OciImageIndex>> {
        let reference = image.canonical();
        let stdout = self
            .runner
            .run(&self.command(["manifest", reference.as_str()]))
            .await
            .map_err(|e| Self::not_found_or(e, image))?;
        parse_index(&stdout).map_err(|message| RepoError::InvalidManifest {
            reference: image.to_string(),
            message,
        })
    }

    async fn copy(&self, source: &ImageReference, destination: &ImageReference) -> Result<()> {
        let (from, to) = (source.canonical(), destination.to_string());
        self.runner
            .run(&self.command(["copy", from.as_str(), to.as_str()]))
            .await
            .map_err(|e| Self::not_found_or(e, source))?;
        Ok(())
    }

    async fn delete(&self, image: &ImageReference) -> Result<()> {
        let reference = image.to_string();
        self.runner
            .run(&self.command(["delete", reference.as_str()]))
            .await
            .map_err(|e| Self::not_found_or(e, image))?;
        Ok(())
    }
}

/// `Some(index)` for OCI indexes and Docker manifest lists, `None` otherwise
fn parse_index(raw: &str) -> std::result::Result<Option<OciImageIndex>, String> {
    let probe: ManifestProbe = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let is_index = probe.manifests.is_some()
        || probe
            .media_type
            .as_deref()
            .is_some_and(|m| m.contains("index") || m.contains("manifest.list"));
    if !is_index {
        return Ok(None);
    }
    serde_json::from_str(raw).map(Some).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartsync_core::{RequestedPlatform, select_child_digest};

    const MANIFEST_LIST: &str = r#"{
  "schemaVersion": 2,
  "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
  "manifests": [
    {
      "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
      "size": 1570,
      "digest": "sha256:1111",
      "platform": {"architecture": "amd64", "os": "linux"}
    },
    {
      "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
      "size": 1570,
      "digest": "sha256:2222",
      "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}
    }
  ]
}"#;

    const SINGLE: &str = r#"{
  "schemaVersion": 2,
  "mediaType": "application/vnd.oci.image.manifest.v1+json",
  "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "size": 10, "digest": "sha256:cfg"},
  "layers": []
}"#;

    #[test]
    fn test_parse_manifest_list() {
        let index = parse_index(MANIFEST_LIST).unwrap().unwrap();
        assert_eq!(index.manifests.len(), 2);

        let arm: RequestedPlatform = "linux/arm64".parse().unwrap();
        assert_eq!(select_child_digest(&index, &arm).unwrap(), "sha256:2222");
    }

    #[test]
    fn test_single_manifest_is_not_index() {
        assert!(parse_index(SINGLE).unwrap().is_none());
        assert!(parse_index("not json").is_err());
    }

    #[test]
    fn test_docker_config_sandbox() {
        let dir = tempfile::TempDir::new().unwrap();
        let crane = CraneCli::new(ProcessRunner::default())
            .with_docker_config(&dir.path().join("docker"))
            .unwrap();
        assert!(dir.path().join("docker/config.json").exists());

        let cmd = crane.command(["version"]);
        assert_eq!(cmd.display(), "crane version");
    }
}
