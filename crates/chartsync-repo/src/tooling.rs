//! Collaborator interfaces
//!
//! The engine only talks to the outside world through these three traits.
//! Implementations never retry; retry policy belongs to the caller.

use async_trait::async_trait;
use oci_distribution::manifest::OciImageIndex;
use std::path::{Path, PathBuf};

use chartsync_core::{Addon, ChartMetadata, ImageReference, RequestedPlatform, select_child_digest};

use crate::credentials::RegistryCredentials;
use crate::error::Result;

/// Options for one `template` invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderRequest {
    pub release: String,
    /// Values files applied in order
    pub values_files: Vec<PathBuf>,
    /// `--set key=value` pairs
    pub set_values: Vec<(String, String)>,
    /// Let the chart tool fetch dependencies during the render
    pub dependency_update: bool,
}

impl RenderRequest {
    pub fn new(release: impl Into<String>) -> Self {
        Self {
            release: release.into(),
            ..Default::default()
        }
    }

    pub fn values_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.values_files.push(path.into());
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_values.push((key.into(), value.into()));
        self
    }

    pub fn with_dependency_update(mut self, enabled: bool) -> Self {
        self.dependency_update = enabled;
        self
    }
}

/// Helm-like chart tooling
#[async_trait]
pub trait ChartTooling: Send + Sync {
    /// Newest version published at the addon's source
    async fn latest_version(&self, addon: &Addon) -> Result<String>;

    async fn version_exists(&self, addon: &Addon, version: &str) -> Result<bool>;

    /// Download the chart archive into `dest`; returns the archive path
    async fn download(&self, addon: &Addon, version: &str, dest: &Path) -> Result<PathBuf>;

    /// Register HTTP dependency repositories and refresh their indexes
    async fn add_repositories(&self, urls: &[String]) -> Result<()>;

    /// Populate `charts/` from the declared dependencies
    async fn build_dependencies(&self, chart_root: &Path) -> Result<()>;

    /// Rendered multi-document manifest stream
    async fn render(&self, chart_root: &Path, request: &RenderRequest) -> Result<String>;

    /// Push a packaged chart to `oci://<registry>`
    async fn push(&self, archive: &Path, target: &str) -> Result<()>;

    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()>;

    fn read_metadata(&self, chart_root: &Path) -> Result<ChartMetadata> {
        Ok(ChartMetadata::load(chart_root)?)
    }
}

/// OCI registry tooling (inspect, copy, delete)
#[async_trait]
pub trait RegistryTooling: Send + Sync {
    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()>;

    /// Whether the tag or digest resolves. Registry "not found" answers are
    /// `Ok(false)`; anything else is an error.
    async fn exists(&self, image: &ImageReference) -> Result<bool>;

    /// Content digest (`sha256:...`) of the reference
    async fn manifest_digest(&self, image: &ImageReference) -> Result<String>;

    /// The image index, or `None` when the reference is a single manifest
    async fn manifest_index(&self, image: &ImageReference) -> Result<Option<OciImageIndex>>;

    /// Copy `source` to `destination`, preserving digests
    async fn copy(&self, source: &ImageReference, destination: &ImageReference) -> Result<()>;

    async fn delete(&self, image: &ImageReference) -> Result<()>;

    /// Digest of the platform-specific child, or of the image itself when it
    /// is not an index
    async fn child_manifest_digest(
        &self,
        image: &ImageReference,
        platform: &RequestedPlatform,
    ) -> Result<String> {
        match self.manifest_index(image).await? {
            Some(index) => Ok(select_child_digest(&index, platform)?),
            None => self.manifest_digest(image).await,
        }
    }
}

/// Token flavour requested from the cloud provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    /// `public.ecr.aws`, always issued from us-east-1
    Public,
    /// The account's private registry
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudAccount {
    pub account: String,
    pub region: String,
}

impl CloudAccount {
    /// `<account>.dkr.ecr.<region>.amazonaws.com`
    pub fn registry_host(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account, self.region)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedRepository {
    pub name: String,
    pub arn: String,
    pub uri: String,
}

/// Marker tag placed on repositories this tool creates
pub const MANAGED_TAG_KEY: &str = "chart-syncer";
pub const MANAGED_TAG_VALUE: &str = "true";

/// Cloud identity and registry provisioning
#[async_trait]
pub trait CloudIdentity: Send + Sync {
    async fn current_account(&self) -> Result<CloudAccount>;

    async fn registry_token(&self, kind: RegistryKind) -> Result<String>;

    /// Create the repository when missing. Returns `true` if it was created.
    async fn ensure_repository(&self, name: &str) -> Result<bool>;

    /// Repositories in the account; with `managed_only`, only those tagged
    /// as created by this tool
    async fn list_repositories(&self, managed_only: bool) -> Result<Vec<ManagedRepository>>;

    /// Delete the repository and every image in it
    async fn delete_repository(&self, name: &str) -> Result<()>;
}

/// Whether a registry host is a private ECR endpoint
pub fn is_ecr_host(registry: &str) -> bool {
    registry.contains(".dkr.ecr.") && registry.contains(".amazonaws.com")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_host() {
        let account = CloudAccount {
            account: "123456789012".into(),
            region: "eu-west-1".into(),
        };
        assert_eq!(account.registry_host(), "123456789012.dkr.ecr.eu-west-1.amazonaws.com");
        assert!(is_ecr_host(&account.registry_host()));
        assert!(!is_ecr_host("public.ecr.aws"));
        assert!(!is_ecr_host("registry.internal:5000"));
    }

    #[test]
    fn test_render_request_builder() {
        let req = RenderRequest::new("demo")
            .values_file("/tmp/o.yaml")
            .set("redis.enabled", "true")
            .with_dependency_update(true);
        assert_eq!(req.release, "demo");
        assert_eq!(req.set_values, vec![("redis.enabled".to_string(), "true".to_string())]);
        assert!(req.dependency_update);
    }
}
