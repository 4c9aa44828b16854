//! In-memory collaborators for testing
//!
//! These stand in for helm, crane and the aws CLI so the engine can be
//! driven end to end without a network or any installed tools.

use async_trait::async_trait;
use oci_distribution::manifest::OciImageIndex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chartsync_core::archive::create_chart_archive;
use chartsync_core::{Addon, ImageKey, ImageReference};

use crate::credentials::RegistryCredentials;
use crate::error::{RepoError, Result};
use crate::tooling::{
    ChartTooling, CloudAccount, CloudIdentity, ManagedRepository, RegistryKind, RegistryTooling, RenderRequest,
};

// ============ Chart tooling ============

/// A chart served by [`MockChartTooling`]
#[derive(Debug, Clone, Default)]
pub struct MockChart {
    /// Published versions, oldest first
    pub versions: Vec<String>,
    /// Extra chart files (`values.yaml`, `templates/...`, `charts/...`)
    pub files: BTreeMap<String, String>,
    /// Appended to the generated `Chart.yaml`
    pub chart_yaml_extra: String,
    /// Manifest stream returned by `render`
    pub rendered: String,
    pub render_error: Option<String>,
}

impl MockChart {
    pub fn new<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            versions: versions.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn chart_yaml_extra(mut self, extra: impl Into<String>) -> Self {
        self.chart_yaml_extra = extra.into();
        self
    }

    pub fn rendered(mut self, stream: impl Into<String>) -> Self {
        self.rendered = stream.into();
        self
    }

    pub fn render_error(mut self, message: impl Into<String>) -> Self {
        self.render_error = Some(message.into());
        self
    }
}

/// Counts of chart tooling calls for assertions
#[derive(Debug, Default, Clone)]
pub struct ChartOperationCounts {
    pub latest: usize,
    pub exists: usize,
    pub downloads: usize,
    pub repo_adds: usize,
    pub builds: usize,
    pub renders: usize,
    pub pushes: usize,
    pub logins: usize,
}

/// A push observed by [`MockChartTooling`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedChart {
    pub target: String,
    pub name: String,
    pub version: String,
    pub values: String,
}

#[derive(Clone, Default)]
pub struct MockChartTooling {
    charts: Arc<RwLock<HashMap<String, MockChart>>>,
    renders: Arc<RwLock<Vec<RenderRequest>>>,
    pushed: Arc<RwLock<Vec<PushedChart>>>,
    fail_build: Arc<RwLock<bool>>,
    fail_push: Arc<RwLock<bool>>,
    operations: Arc<RwLock<ChartOperationCounts>>,
}

impl MockChartTooling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chart(self, name: impl Into<String>, chart: MockChart) -> Self {
        self.charts.write().unwrap().insert(name.into(), chart);
        self
    }

    /// Make `build_dependencies` fail
    pub fn failing_build(self) -> Self {
        *self.fail_build.write().unwrap() = true;
        self
    }

    /// Make `push` fail
    pub fn failing_push(self) -> Self {
        *self.fail_push.write().unwrap() = true;
        self
    }

    pub fn operation_counts(&self) -> ChartOperationCounts {
        self.operations.read().unwrap().clone()
    }

    pub fn render_requests(&self) -> Vec<RenderRequest> {
        self.renders.read().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<PushedChart> {
        self.pushed.read().unwrap().clone()
    }

    fn chart(&self, addon: &Addon) -> Result<MockChart> {
        self.charts
            .read()
            .unwrap()
            .get(&addon.chart)
            .cloned()
            .ok_or_else(|| RepoError::ChartNotFound {
                reference: addon.chart.clone(),
            })
    }
}

#[async_trait]
impl ChartTooling for MockChartTooling {
    async fn latest_version(&self, addon: &Addon) -> Result<String> {
        self.operations.write().unwrap().latest += 1;
        self.chart(addon)?
            .versions
            .last()
            .cloned()
            .ok_or_else(|| RepoError::ChartNotFound {
                reference: addon.chart.clone(),
            })
    }

    async fn version_exists(&self, addon: &Addon, version: &str) -> Result<bool> {
        self.operations.write().unwrap().exists += 1;
        Ok(self.chart(addon)?.versions.iter().any(|v| v == version))
    }

    async fn download(&self, addon: &Addon, version: &str, dest: &Path) -> Result<PathBuf> {
        self.operations.write().unwrap().downloads += 1;
        let chart = self.chart(addon)?;
        if !chart.versions.iter().any(|v| v == version) {
            return Err(RepoError::VersionNotFound {
                chart: addon.chart.clone(),
                version: version.to_string(),
            });
        }

        let staging = dest.join(format!(".mock-{}-{}", addon.chart, version));
        std::fs::create_dir_all(&staging)?;
        std::fs::write(
            staging.join("Chart.yaml"),
            format!(
                "apiVersion: v2\nname: {}\nversion: {}\n{}",
                addon.chart, version, chart.chart_yaml_extra
            ),
        )?;
        for (path, content) in &chart.files {
            let target = staging.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }

        let archive = dest.join(format!("{}-{}.tgz", addon.chart, version));
        create_chart_archive(&staging, &addon.chart, &archive)?;
        std::fs::remove_dir_all(&staging)?;
        Ok(archive)
    }

    async fn add_repositories(&self, urls: &[String]) -> Result<()> {
        self.operations.write().unwrap().repo_adds += urls.len();
        Ok(())
    }

    async fn build_dependencies(&self, chart_root: &Path) -> Result<()> {
        self.operations.write().unwrap().builds += 1;
        if *self.fail_build.read().unwrap() {
            return Err(RepoError::CommandFailed {
                command: format!("helm dependency build {}", chart_root.display()),
                code: Some(1),
                stderr: "no repository definition".to_string(),
            });
        }
        Ok(())
    }

    async fn render(&self, chart_root: &Path, request: &RenderRequest) -> Result<String> {
        self.operations.write().unwrap().renders += 1;
        self.renders.write().unwrap().push(request.clone());

        let meta = self.read_metadata(chart_root)?;
        let chart = self
            .charts
            .read()
            .unwrap()
            .get(&meta.name)
            .cloned()
            .unwrap_or_default();
        match chart.render_error {
            Some(message) => Err(RepoError::CommandFailed {
                command: format!("helm template {}", request.release),
                code: Some(1),
                stderr: message,
            }),
            None => Ok(chart.rendered),
        }
    }

    async fn push(&self, archive: &Path, target: &str) -> Result<()> {
        self.operations.write().unwrap().pushes += 1;
        if *self.fail_push.read().unwrap() {
            return Err(RepoError::CommandFailed {
                command: format!("helm push {} {}", archive.display(), target),
                code: Some(1),
                stderr: "denied: requested access to the resource is denied".to_string(),
            });
        }

        let meta = chartsync_core::archive::read_chart_metadata(archive)?;
        let values = chartsync_core::archive::read_file_from_archive(archive, &format!("{}/values.yaml", meta.name))
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        self.pushed.write().unwrap().push(PushedChart {
            target: target.to_string(),
            name: meta.name,
            version: meta.version,
            values,
        });
        Ok(())
    }

    async fn login(&self, _registry: &str, _credentials: &RegistryCredentials) -> Result<()> {
        self.operations.write().unwrap().logins += 1;
        Ok(())
    }
}

// ============ Registry tooling ============

#[derive(Debug, Clone)]
struct StoredImage {
    digest: String,
    index: Option<OciImageIndex>,
}

/// Counts of registry calls for assertions
#[derive(Debug, Default, Clone)]
pub struct RegistryOperationCounts {
    pub exists: usize,
    pub digests: usize,
    pub indexes: usize,
    pub copies: usize,
    pub deletes: usize,
    pub logins: usize,
}

#[derive(Clone, Default)]
pub struct MockRegistry {
    images: Arc<RwLock<HashMap<ImageKey, StoredImage>>>,
    copies: Arc<RwLock<Vec<(ImageReference, ImageReference)>>>,
    logins: Arc<RwLock<Vec<String>>>,
    unreachable: Arc<RwLock<BTreeSet<String>>>,
    failing_copies: Arc<RwLock<usize>>,
    delete_denied: Arc<RwLock<bool>>,
    operations: Arc<RwLock<RegistryOperationCounts>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an image with the given digest
    pub fn with_image(self, reference: &str, digest: &str) -> Self {
        self.insert(reference, digest, None);
        self
    }

    /// Publish a multi-arch image
    pub fn with_index(self, reference: &str, digest: &str, index: OciImageIndex) -> Self {
        self.insert(reference, digest, Some(index));
        self
    }

    /// Every inspection of this registry host fails with a non-"not found" error
    pub fn unreachable_host(self, host: &str) -> Self {
        self.unreachable.write().unwrap().insert(host.to_string());
        self
    }

    /// Fail the next `n` copies
    pub fn failing_copies(self, n: usize) -> Self {
        *self.failing_copies.write().unwrap() = n;
        self
    }

    /// Every tag deletion is rejected
    pub fn denying_deletes(self) -> Self {
        *self.delete_denied.write().unwrap() = true;
        self
    }

    pub fn operation_counts(&self) -> RegistryOperationCounts {
        self.operations.read().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<(ImageReference, ImageReference)> {
        self.copies.read().unwrap().clone()
    }

    pub fn logins(&self) -> Vec<String> {
        self.logins.read().unwrap().clone()
    }

    pub fn contains(&self, reference: &str) -> bool {
        ImageReference::parse(reference)
            .map(|r| self.images.read().unwrap().contains_key(&r.key()))
            .unwrap_or(false)
    }

    pub fn digest_of(&self, reference: &str) -> Option<String> {
        let key = ImageReference::parse(reference).ok()?.key();
        self.images.read().unwrap().get(&key).map(|i| i.digest.clone())
    }

    fn insert(&self, reference: &str, digest: &str, index: Option<OciImageIndex>) {
        if let Ok(image) = ImageReference::parse(reference) {
            self.images.write().unwrap().insert(
                image.key(),
                StoredImage {
                    digest: digest.to_string(),
                    index,
                },
            );
        }
    }

    fn check_reachable(&self, image: &ImageReference) -> Result<()> {
        if self.unreachable.read().unwrap().contains(image.registry_host()) {
            return Err(RepoError::CommandFailed {
                command: format!("crane digest {}", image),
                code: Some(1),
                stderr: "dial tcp: i/o timeout".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve by tag, by digest, or by a child digest of a stored index
    fn lookup(&self, image: &ImageReference) -> Option<StoredImage> {
        let images = self.images.read().unwrap();
        if let Some(found) = images.get(&image.key()) {
            return Some(found.clone());
        }
        let digest = image.digest.as_deref()?;
        let repo = image.repository_key();
        images.iter().find_map(|(key, stored)| {
            if (key.registry.clone(), key.repository.clone()) != repo {
                return None;
            }
            if stored.digest == digest {
                return Some(stored.clone());
            }
            stored
                .index
                .as_ref()
                .and_then(|idx| idx.manifests.iter().find(|m| m.digest == digest))
                .map(|_| StoredImage {
                    digest: digest.to_string(),
                    index: None,
                })
        })
    }
}

#[async_trait]
impl RegistryTooling for MockRegistry {
    async fn login(&self, registry: &str, _credentials: &RegistryCredentials) -> Result<()> {
        self.operations.write().unwrap().logins += 1;
        self.logins.write().unwrap().push(registry.to_string());
        Ok(())
    }

    async fn exists(&self, image: &ImageReference) -> Result<bool> {
        self.operations.write().unwrap().exists += 1;
        self.check_reachable(image)?;
        Ok(self.lookup(image).is_some())
    }

    async fn manifest_digest(&self, image: &ImageReference) -> Result<String> {
        self.operations.write().unwrap().digests += 1;
        self.check_reachable(image)?;
        self.lookup(image)
            .map(|i| i.digest)
            .ok_or_else(|| RepoError::ManifestNotFound {
                reference: image.to_string(),
            })
    }

    async fn manifest_index(&self, image: &ImageReference) -> Result<Option<OciImageIndex>> {
        self.operations.write().unwrap().indexes += 1;
        self.check_reachable(image)?;
        self.lookup(image)
            .map(|i| i.index)
            .ok_or_else(|| RepoError::ManifestNotFound {
                reference: image.to_string(),
            })
    }

    async fn copy(&self, source: &ImageReference, destination: &ImageReference) -> Result<()> {
        self.operations.write().unwrap().copies += 1;
        {
            let mut failing = self.failing_copies.write().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(RepoError::CommandFailed {
                    command: format!("crane copy {} {}", source, destination),
                    code: Some(1),
                    stderr: "unexpected EOF".to_string(),
                });
            }
        }
        let stored = self.lookup(source).ok_or_else(|| RepoError::ManifestNotFound {
            reference: source.to_string(),
        })?;
        self.images.write().unwrap().insert(destination.key(), stored);
        self.copies
            .write()
            .unwrap()
            .push((source.clone(), destination.clone()));
        Ok(())
    }

    async fn delete(&self, image: &ImageReference) -> Result<()> {
        self.operations.write().unwrap().deletes += 1;
        if *self.delete_denied.read().unwrap() {
            return Err(RepoError::CommandFailed {
                command: format!("crane delete {}", image),
                code: Some(1),
                stderr: "DENIED: requested access to the resource is denied".to_string(),
            });
        }
        self.images.write().unwrap().remove(&image.key());
        Ok(())
    }
}

// ============ Cloud identity ============

/// Counts of cloud calls for assertions
#[derive(Debug, Default, Clone)]
pub struct CloudOperationCounts {
    pub identity: usize,
    pub tokens: usize,
    pub ensures: usize,
    pub lists: usize,
    pub deletes: usize,
}

#[derive(Clone)]
pub struct MockIdentity {
    account: Option<CloudAccount>,
    repositories: Arc<RwLock<BTreeMap<String, bool>>>,
    failing_deletes: Arc<RwLock<BTreeSet<String>>>,
    operations: Arc<RwLock<CloudOperationCounts>>,
}

impl MockIdentity {
    pub fn new(account: &str, region: &str) -> Self {
        Self {
            account: Some(CloudAccount {
                account: account.to_string(),
                region: region.to_string(),
            }),
            repositories: Arc::new(RwLock::new(BTreeMap::new())),
            failing_deletes: Arc::new(RwLock::new(BTreeSet::new())),
            operations: Arc::new(RwLock::new(CloudOperationCounts::default())),
        }
    }

    /// No credentials available: identity lookups fail
    pub fn anonymous() -> Self {
        Self {
            account: None,
            ..Self::new("", "")
        }
    }

    /// Pre-existing repository; `managed` marks it as created by this tool
    pub fn with_repository(self, name: &str, managed: bool) -> Self {
        self.repositories.write().unwrap().insert(name.to_string(), managed);
        self
    }

    pub fn failing_delete(self, name: &str) -> Self {
        self.failing_deletes.write().unwrap().insert(name.to_string());
        self
    }

    pub fn repositories(&self) -> Vec<String> {
        self.repositories.read().unwrap().keys().cloned().collect()
    }

    pub fn operation_counts(&self) -> CloudOperationCounts {
        self.operations.read().unwrap().clone()
    }
}

#[async_trait]
impl CloudIdentity for MockIdentity {
    async fn current_account(&self) -> Result<CloudAccount> {
        self.operations.write().unwrap().identity += 1;
        self.account.clone().ok_or_else(|| RepoError::Identity {
            message: "Unable to locate credentials".to_string(),
        })
    }

    async fn registry_token(&self, kind: RegistryKind) -> Result<String> {
        self.operations.write().unwrap().tokens += 1;
        match (&self.account, kind) {
            (None, _) => Err(RepoError::Identity {
                message: "Unable to locate credentials".to_string(),
            }),
            (Some(_), RegistryKind::Public) => Ok("public-token".to_string()),
            (Some(_), RegistryKind::Private) => Ok("private-token".to_string()),
        }
    }

    async fn ensure_repository(&self, name: &str) -> Result<bool> {
        self.operations.write().unwrap().ensures += 1;
        let mut repos = self.repositories.write().unwrap();
        if repos.contains_key(name) {
            return Ok(false);
        }
        repos.insert(name.to_string(), true);
        Ok(true)
    }

    async fn list_repositories(&self, managed_only: bool) -> Result<Vec<ManagedRepository>> {
        self.operations.write().unwrap().lists += 1;
        let region = self.account.as_ref().map(|a| a.region.clone()).unwrap_or_default();
        let account = self.account.as_ref().map(|a| a.account.clone()).unwrap_or_default();
        Ok(self
            .repositories
            .read()
            .unwrap()
            .iter()
            .filter(|(_, managed)| !managed_only || **managed)
            .map(|(name, _)| ManagedRepository {
                name: name.clone(),
                arn: format!("arn:aws:ecr:{}:{}:repository/{}", region, account, name),
                uri: format!("{}.dkr.ecr.{}.amazonaws.com/{}", account, region, name),
            })
            .collect())
    }

    async fn delete_repository(&self, name: &str) -> Result<()> {
        self.operations.write().unwrap().deletes += 1;
        if self.failing_deletes.read().unwrap().contains(name) {
            return Err(RepoError::CommandFailed {
                command: format!("aws ecr delete-repository --repository-name {}", name),
                code: Some(254),
                stderr: "AccessDeniedException".to_string(),
            });
        }
        self.repositories.write().unwrap().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_registry_copy_preserves_digest() {
        let registry = MockRegistry::new().with_image("example.io/demo/app:2.3.0", "sha256:abc");
        let src = ImageReference::parse("example.io/demo/app:2.3.0").unwrap();
        let dst = ImageReference::parse("registry.internal/demo/app:2.3.0").unwrap();

        assert!(registry.exists(&src).await.unwrap());
        assert!(!registry.exists(&dst).await.unwrap());

        registry.copy(&src, &dst).await.unwrap();
        assert_eq!(registry.manifest_digest(&dst).await.unwrap(), "sha256:abc");
        assert_eq!(registry.operation_counts().copies, 1);
        assert_eq!(registry.operation_counts().digests, 1);
    }

    #[tokio::test]
    async fn test_mock_registry_unreachable_host() {
        let registry = MockRegistry::new().unreachable_host("quay.io");
        let img = ImageReference::parse("quay.io/a/b:1").unwrap();
        let err = registry.exists(&img).await.unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_chart_download_is_a_real_archive() {
        let dir = tempfile::TempDir::new().unwrap();
        let tooling = MockChartTooling::new().with_chart(
            "demo",
            MockChart::new(["2.3.0"]).file("values.yaml", "image:\n  tag: 2.3.0\n"),
        );
        let addon = Addon::new("demo", "https://example/charts").unwrap();

        let archive = tooling.download(&addon, "2.3.0", dir.path()).await.unwrap();
        let meta = chartsync_core::archive::read_chart_metadata(&archive).unwrap();
        assert_eq!(meta.version, "2.3.0");
        assert!(tooling.download(&addon, "9.9.9", dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_cloud_ensure_and_prune() {
        let cloud = MockIdentity::new("123456789012", "eu-west-1").with_repository("legacy", false);
        assert!(cloud.ensure_repository("demo").await.unwrap());
        assert!(!cloud.ensure_repository("demo").await.unwrap());

        let managed = cloud.list_repositories(true).await.unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].name, "demo");
        assert_eq!(cloud.list_repositories(false).await.unwrap().len(), 2);
    }
}
