//! Sync command - mirror every selected addon into the target registry

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chartsync_core::{MirrorScheme, PlatformPolicy, RunSummary};
use chartsync_engine::{Orchestrator, RunContext, SyncConfig, Tools};
use chartsync_repo::aws::AWS;
use chartsync_repo::crane::CRANE;
use chartsync_repo::helm::HELM;
use chartsync_repo::{
    AwsCli, CloudIdentity, CraneCli, CredentialSet, HelmCli, HelmSandbox, ProcessRunner, RegistryCredentials,
    is_ecr_host, require_tools,
};
use clap::Args;

use super::InputArgs;
use crate::display;
use crate::error::{CliError, Result};
use crate::exit_codes;

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Private registry root (defaults to the account's ECR registry)
    #[arg(long)]
    pub target_registry: Option<String>,

    /// Path prefix for mirrored images
    #[arg(long)]
    pub target_prefix: Option<String>,

    /// Destination layout: flattened or mirrored-path
    #[arg(long)]
    pub scheme: Option<MirrorScheme>,

    /// Platform to mirror: auto, or os/arch[/variant]
    #[arg(long)]
    pub platform: Option<PlatformPolicy>,

    /// Resolve every addon to its newest chart version
    #[arg(long)]
    pub latest: bool,

    /// Discover, render and map without writing to any registry
    #[arg(long)]
    pub scan_only: bool,

    /// Render without vendored subcharts
    #[arg(long)]
    pub no_dependencies: bool,

    /// Push even when the destination tag exists
    #[arg(long)]
    pub no_skip_existing: bool,

    /// Compare digests of existing destinations with their sources
    #[arg(long)]
    pub verify_digest: bool,

    /// Replace existing destinations whose digest differs (implies --verify-digest)
    #[arg(long)]
    pub overwrite: bool,

    /// Fall back to the newest version when a pinned one is unavailable
    #[arg(long)]
    pub verify_pinned_version: bool,

    /// Working directory for downloaded charts and override files
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Timeout for each external command
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Attempts for each image copy and chart push
    #[arg(long)]
    pub retries: Option<u32>,

    /// Cloud region for the target registry
    #[arg(long)]
    pub region: Option<String>,

    /// Write the run summary as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Password for public.ecr.aws (else PUBLIC_ECR_PASSWORD or a cloud token)
    #[arg(long, hide = true)]
    pub public_ecr_password: Option<String>,

    /// Password for the target registry (else PRIVATE_ECR_PASSWORD or a cloud token)
    #[arg(long, hide = true)]
    pub private_ecr_password: Option<String>,

    #[arg(long)]
    pub dockerhub_username: Option<String>,

    #[arg(long, hide = true)]
    pub dockerhub_token: Option<String>,
}

impl SyncArgs {
    /// Flags take precedence over the config file
    fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(registry) = &self.target_registry {
            config.target_registry = Some(registry.clone());
        }
        if let Some(prefix) = &self.target_prefix {
            config.target_prefix = Some(prefix.clone());
        }
        if let Some(scheme) = self.scheme {
            config.scheme = scheme;
        }
        if let Some(platform) = &self.platform {
            config.platform = platform.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.retries {
            config.retries.attempts = attempts.max(1);
        }
        if self.no_dependencies {
            config.include_dependencies = false;
        }
        if self.no_skip_existing {
            config.preflight.skip_existing = false;
        }
        if self.verify_digest || self.overwrite {
            config.preflight.verify_existing_digest = true;
        }
        if self.overwrite {
            config.preflight.overwrite_existing = true;
        }
        if self.verify_pinned_version {
            config.verify_pinned_version = true;
        }
        config
    }

    /// Flags first, then the environment
    fn credentials(&self) -> CredentialSet {
        let dockerhub = match (&self.dockerhub_username, &self.dockerhub_token) {
            (Some(user), Some(token)) => Some(RegistryCredentials::new(user, token)),
            _ => None,
        };
        CredentialSet {
            public_ecr_password: self.public_ecr_password.clone(),
            private_ecr_password: self.private_ecr_password.clone(),
            dockerhub,
        }
        .or(CredentialSet::from_env())
    }
}

pub async fn run(args: SyncArgs, config_path: Option<&Path>) -> Result<i32> {
    let config = args.apply(SyncConfig::load(config_path)?);
    let addons = args.input.load()?;

    let needs_identity = config.target_registry.as_deref().is_none_or(is_ecr_host);
    let mut required = vec![HELM, CRANE];
    if needs_identity {
        required.push(AWS);
    }
    require_tools(&required)?;

    let runner = ProcessRunner::new(config.timeout);
    let aws = (needs_identity || require_tools(&[AWS]).is_ok())
        .then(|| Arc::new(AwsCli::new(runner.clone()).with_region(args.region.clone())));

    let registry = match &config.target_registry {
        Some(registry) => normalize_registry(registry),
        None => {
            let aws = aws
                .as_ref()
                .ok_or_else(|| CliError::pre_run("no target registry and no cloud identity"))?;
            let account = aws.current_account().await.map_err(|e| {
                CliError::pre_run_with_help(
                    format!("cannot determine the target registry: {}", e),
                    "pass --target-registry or configure cloud credentials",
                )
            })?;
            account.registry_host()
        }
    };
    if registry.is_empty() {
        return Err(CliError::config("target registry is empty"));
    }

    std::fs::create_dir_all(&config.work_dir)?;
    let sandbox = config.work_dir.join(".sandbox");
    let helm = HelmCli::new(runner.clone()).with_sandbox(HelmSandbox::create(sandbox.join("helm"))?);
    let crane = CraneCli::new(runner).with_docker_config(&sandbox.join("docker"))?;
    let mut tools = Tools::new(Arc::new(helm), Arc::new(crane));
    if let Some(aws) = aws {
        tools = tools.with_identity(aws);
    }

    let options = config
        .into_options(&registry)
        .with_prefer_latest(args.latest)
        .with_scan_only(args.scan_only);

    tracing::info!(
        registry = %registry,
        addons = addons.len(),
        scan_only = args.scan_only,
        "starting sync"
    );

    let interrupt = Arc::new(AtomicBool::new(false));
    watch_interrupt(interrupt.clone());

    let ctx = Orchestrator::new(tools, options)
        .with_interrupt(interrupt)
        .run(&addons, RunContext::new(args.credentials()))
        .await;

    display::print_summary(&ctx.summary);
    if let Some(path) = &args.report {
        write_report(&ctx.summary, path)?;
        println!("Report written to {}", path.display());
    }

    Ok(exit_code(&ctx))
}

fn normalize_registry(registry: &str) -> String {
    registry.trim().trim_start_matches("oci://").trim_end_matches('/').to_string()
}

/// The first Ctrl-C stops after the current addon; a second one exits
fn watch_interrupt(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("interrupt received, stopping after the current addon");
        flag.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(exit_codes::INTERRUPTED);
        }
    });
}

fn write_report(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = summary.to_json().map_err(|e| CliError::Io {
        message: format!("cannot serialize report: {}", e),
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}

fn exit_code(ctx: &RunContext) -> i32 {
    if ctx.interrupted {
        exit_codes::INTERRUPTED
    } else if ctx.summary.any_failed() {
        exit_codes::SYNC_FAILED
    } else {
        exit_codes::SUCCESS
    }
}
