//! Chart tooling backed by the `helm` CLI
//!
//! Registry and repository state lives in a sandbox directory rather than the
//! user's helm config, so a run never depends on (or pollutes) host state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

use chartsync_core::{Addon, AddressingMode, ChartMetadata};

use crate::credentials::RegistryCredentials;
use crate::error::{RepoError, Result};
use crate::process::{ProcessRunner, ToolCommand};
use crate::tooling::{ChartTooling, RenderRequest};

pub const HELM: &str = "helm";

/// Isolated helm registry/repository configuration
#[derive(Debug, Clone)]
pub struct HelmSandbox {
    root: PathBuf,
}

impl HelmSandbox {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("cache"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn flags(&self) -> Vec<String> {
        vec![
            "--registry-config".to_string(),
            self.root.join("registry.json").display().to_string(),
            "--repository-config".to_string(),
            self.root.join("repositories.yaml").display().to_string(),
            "--repository-cache".to_string(),
            self.root.join("cache").display().to_string(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct HelmCli {
    runner: ProcessRunner,
    sandbox: Option<HelmSandbox>,
}

impl HelmCli {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner,
            sandbox: None,
        }
    }

    pub fn with_sandbox(mut self, sandbox: HelmSandbox) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    fn command<I, S>(&self, args: I) -> ToolCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = ToolCommand::new(HELM).env("HELM_EXPERIMENTAL_OCI", "1");
        if let Some(sandbox) = &self.sandbox {
            cmd = cmd.args(sandbox.flags());
        }
        cmd.args(args)
    }

    /// `show chart`/`pull` arguments addressing the addon's chart
    fn chart_args(addon: &Addon) -> Vec<String> {
        match addon.addressing() {
            AddressingMode::Http { url } => vec![addon.chart.clone(), "--repo".to_string(), url],
            AddressingMode::Oci { reference } => vec![reference],
        }
    }

    async fn show_chart(&self, addon: &Addon, version: Option<&str>) -> Result<ChartMetadata> {
        let mut args = vec!["show".to_string(), "chart".to_string()];
        args.extend(Self::chart_args(addon));
        if let Some(version) = version {
            args.push("--version".to_string());
            args.push(version.to_string());
        }
        let stdout = self.runner.run(&self.command(args)).await?;
        ChartMetadata::from_yaml(&stdout).map_err(|e| RepoError::InvalidOutput {
            message: format!("helm show chart for {}: {}", addon.display_name(), e),
        })
    }
}

#[async_trait]
impl ChartTooling for HelmCli {
    async fn latest_version(&self, addon: &Addon) -> Result<String> {
        match self.show_chart(addon, None).await {
            Ok(meta) => Ok(meta.version),
            Err(e) if e.is_not_found() => Err(RepoError::ChartNotFound {
                reference: addon.display_name().to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn version_exists(&self, addon: &Addon, version: &str) -> Result<bool> {
        match self.show_chart(addon, Some(version)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn download(&self, addon: &Addon, version: &str, dest: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dest)?;

        let mut args = vec!["pull".to_string()];
        args.extend(Self::chart_args(addon));
        args.extend([
            "--version".to_string(),
            version.to_string(),
            "--destination".to_string(),
            dest.display().to_string(),
        ]);

        if let Err(e) = self.runner.run(&self.command(args)).await {
            return Err(if e.is_not_found() {
                RepoError::VersionNotFound {
                    chart: addon.display_name().to_string(),
                    version: version.to_string(),
                }
            } else {
                e
            });
        }

        let expected = dest.join(format!("{}-{}.tgz", addon.chart, version));
        if expected.exists() {
            return Ok(expected);
        }
        find_archive(dest, &addon.chart).ok_or_else(|| RepoError::InvalidOutput {
            message: format!("helm pull produced no archive for {} in {}", addon.chart, dest.display()),
        })
    }

    async fn add_repositories(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        for url in urls {
            let name = derive_repo_name(url);
            tracing::info!(repo = %name, url = %url, "adding dependency repository");
            let output = self
                .runner
                .output(&self.command(["repo", "add", name.as_str(), url.as_str(), "--force-update"]))
                .await?;
            if !output.success() && !output.stderr.contains("already exists") {
                return Err(RepoError::CommandFailed {
                    command: format!("helm repo add {} {}", name, url),
                    code: output.code,
                    stderr: output.stderr.trim().to_string(),
                });
            }
        }
        self.runner.run(&self.command(["repo", "update"])).await?;
        Ok(())
    }

    async fn build_dependencies(&self, chart_root: &Path) -> Result<()> {
        let root = chart_root.display().to_string();
        self.runner
            .run(&self.command(["dependency", "build", root.as_str()]))
            .await?;
        Ok(())
    }

    async fn render(&self, chart_root: &Path, request: &RenderRequest) -> Result<String> {
        let mut args = vec![
            "template".to_string(),
            request.release.clone(),
            chart_root.display().to_string(),
        ];
        if request.dependency_update {
            args.push("--dependency-update".to_string());
        }
        for file in &request.values_files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        for (key, value) in &request.set_values {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        self.runner.run(&self.command(args)).await
    }

    async fn push(&self, archive: &Path, target: &str) -> Result<()> {
        let archive = archive.display().to_string();
        self.runner
            .run(&self.command(["push", archive.as_str(), target]))
            .await?;
        Ok(())
    }

    async fn login(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()> {
        let cmd = self
            .command([
                "registry",
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
}

fn find_archive(dir: &Path, chart: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == "tgz")
                && p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(chart))
        })
        .collect();
    matches.sort();
    matches.pop()
}

/// Stable repository name from a URL: `<host with dashes>-<last path segment>`
pub fn derive_repo_name(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "repo".to_string();
    };
    let host = parsed.host_str().unwrap_or_default().replace('.', "-");
    let suffix = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or("charts");

    let base = format!("{}-{}", host, suffix).to_lowercase();
    let safe: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let safe = safe.trim_matches('-');
    if safe.is_empty() {
        "repo".to_string()
    } else {
        safe.to_string()
    }
}
