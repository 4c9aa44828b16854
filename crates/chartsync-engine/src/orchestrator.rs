//! Sync orchestrator
//!
//! Drives each addon through resolve, download, dependency graph, render,
//! source inspection, mapping, overlay, preflight and push, one addon at a
//! time. A stage failure is recorded on that addon's [`SyncResult`] and never
//! reaches a sibling addon. Run-wide state lives in [`RunContext`], which is
//! handed to each addon and handed back when it finishes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::Instrument;

use chartsync_core::archive::extract_archive;
use chartsync_core::{
    Addon, AddressingMode, ChartMapping, DependencyTree, ImageKey, ImageReference, MirrorLedger, MirrorPlan,
    PreflightDecision, RunSummary, SyncResult,
};
use chartsync_repo::{CredentialSet, is_ecr_host};

use crate::auth::Authenticator;
use crate::config::SyncOptions;
use crate::error::{Result, SyncError};
use crate::layout::ChartLayout;
use crate::platform::PlatformResolver;
use crate::preflight::PreflightEngine;
use crate::render::{RenderInput, RenderStage};
use crate::repack::{OverlayOutcome, apply_overlay};
use crate::resolver::VersionResolver;
use crate::retry::retry_with_policy;
use crate::tools::Tools;

/// State carried from one addon to the next
#[derive(Debug)]
pub struct RunContext {
    pub summary: RunSummary,
    /// Destination repositories claimed so far
    pub ledger: MirrorLedger,
    pub auth: Authenticator,
    /// The run stopped early on an interrupt
    pub interrupted: bool,
}

impl RunContext {
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            summary: RunSummary::new(),
            ledger: MirrorLedger::new(),
            auth: Authenticator::new(credentials),
            interrupted: false,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(CredentialSet::default())
    }
}

pub struct Orchestrator {
    tools: Tools,
    options: SyncOptions,
    interrupt: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(tools: Tools, options: SyncOptions) -> Self {
        Self {
            tools,
            options,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that, once set, stops the run before the next addon
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Sync every addon in order
    pub async fn run(&self, addons: &[Addon], mut ctx: RunContext) -> RunContext {
        if !self.options.scan_only {
            let target = self.options.target.registry().to_string();
            for warning in ctx.auth.ensure(&self.tools, &target).await {
                tracing::warn!(registry = %target, "{}", warning);
            }
        }

        for (idx, addon) in addons.iter().enumerate() {
            if self.interrupt.load(Ordering::SeqCst) {
                tracing::warn!(remaining = addons.len() - idx, "interrupted, skipping remaining addons");
                for rest in &addons[idx..] {
                    ctx.summary.push(SyncResult::skipped(&rest.chart, rest.release.clone()));
                }
                ctx.interrupted = true;
                break;
            }

            let span = tracing::info_span!(
                "addon",
                chart = %addon.chart,
                release = addon.release.as_deref().unwrap_or_default()
            );
            ctx = self.sync_addon(addon, ctx).instrument(span).await;
        }
        ctx
    }

    /// Sync one addon and append its result to the summary
    pub async fn sync_addon(&self, addon: &Addon, mut ctx: RunContext) -> RunContext {
        let started = Instant::now();
        let mut result = SyncResult::new(&addon.chart, addon.release.clone());

        if let Err(e) = self.process(addon, &mut ctx, &mut result).await {
            tracing::error!(kind = %e.kind(), error = %e, "addon failed");
            result.fail(e.to_stage_error());
        }
        result.duration = started.elapsed();

        tracing::info!(
            status = %result.status,
            pushed = result.images.pushed,
            skipped = result.images.skipped,
            failed = result.images.failed,
            "addon finished"
        );
        ctx.summary.push(result);
        ctx
    }

    async fn process(&self, addon: &Addon, ctx: &mut RunContext, result: &mut SyncResult) -> Result<()> {
        let tools = &self.tools;
        let options = &self.options;

        if let AddressingMode::Oci { reference } = addon.addressing() {
            result.warnings.extend(ctx.auth.ensure(tools, &reference).await);
        }

        // Version
        let resolved = VersionResolver::new(tools.charts.as_ref())
            .prefer_latest(options.prefer_latest)
            .verify_pinned(options.verify_pinned_version)
            .resolve(addon)
            .await?;
        if let Some(warning) = resolved.warning {
            result.warn(warning);
        }
        let version = resolved.version;
        result.version = Some(version.clone());

        // Download and extract
        let layout = ChartLayout::new(&options.work_dir, &addon.chart);
        let download_error = |message: String| SyncError::Download {
            chart: addon.chart.clone(),
            version: version.clone(),
            message,
        };
        layout.reset().map_err(|e| download_error(e.to_string()))?;
        let downloaded = tools
            .charts
            .download(addon, &version, layout.dir())
            .await
            .map_err(|e| download_error(e.to_string()))?;
        extract_archive(&downloaded, layout.dir()).map_err(|e| download_error(e.to_string()))?;
        let chart_root = layout
            .locate_chart_root()
            .ok_or_else(|| download_error("archive contains no chart".to_string()))?;
        let metadata = tools
            .charts
            .read_metadata(&chart_root)
            .map_err(|e| download_error(e.to_string()))?;
        tracing::info!(version = %version, "downloaded chart");

        // Dependency graph
        let tree = DependencyTree::build(&chart_root);
        if tree.len() > 1 {
            tracing::debug!("dependency tree:\n{}", tree.render_tree());
        }
        for drift in tree.drift() {
            result.warn(format!(
                "dependency {} declares {} but vendors {}",
                drift.name, drift.declared, drift.vendored
            ));
        }

        // Render and extract
        let render_values = layout.render_values();
        let outcome = RenderStage::new(tools, options)
            .run(
                &mut ctx.auth,
                &RenderInput {
                    chart_root: &chart_root,
                    metadata: &metadata,
                    release: addon.release.as_deref().unwrap_or(&addon.chart),
                    include_dependencies: options.include_dependencies && addon.include_dependencies,
                    dependency_update: tree.needs_dependency_update(),
                    values_path: &render_values,
                },
            )
            .await;
        result.warnings.extend(outcome.warnings);
        for e in &outcome.errors {
            result.record(e.to_stage_error());
        }
        let mut images = outcome.images;
        result.images.discovered = images.len();

        // Source inspection
        let resolver = PlatformResolver::new(tools.registry.as_ref(), &options.platform);
        let mut copy_sources: HashMap<ImageKey, ImageReference> = HashMap::new();
        let extracted: Vec<ImageReference> = images.iter().cloned().collect();
        for image in extracted {
            result
                .warnings
                .extend(ctx.auth.ensure(tools, image.registry_host()).await);
            match resolver.resolve(&image).await {
                Ok(source) => {
                    copy_sources.insert(image.key(), source);
                }
                Err(e) => {
                    tracing::warn!(image = %image, error = %e, "excluding image");
                    result.record(e.to_stage_error());
                    result.images.failed += 1;
                    images.remove(&image.key());
                }
            }
        }

        // Mapping
        let chart_mapping = options
            .target
            .chart_mapping(chart_source(addon), &metadata.name, &version);
        ctx.ledger.claim_chart(&chart_mapping).map_err(SyncError::Mapping)?;

        let mut plan = options.target.plan(&metadata.name, &images);
        for e in ctx.ledger.claim_plan(&mut plan) {
            result.record(SyncError::Mapping(e).to_stage_error());
            result.images.failed += 1;
        }
        for mapping in plan.iter() {
            tracing::debug!(source = %mapping.source, destination = %mapping.destination, "mapped image");
        }

        // Overlay and repack
        let repacked = layout.archive(&version);
        let overlay = match apply_overlay(
            &chart_root,
            &metadata.name,
            &plan,
            &layout.override_values(),
            (!options.scan_only).then_some(repacked.as_path()),
        ) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                result.record(e.to_stage_error());
                None
            }
        };

        if options.scan_only {
            tracing::info!(images = plan.len(), "scan only, nothing written");
            return Ok(());
        }

        self.provision(&chart_mapping, &plan, result).await;
        self.push_images(&plan, &copy_sources, result).await;
        self.push_chart(&chart_mapping, overlay, result).await
    }

    /// Create missing ECR repositories for every destination
    async fn provision(&self, chart: &ChartMapping, plan: &MirrorPlan, result: &mut SyncResult) {
        let Some(identity) = &self.tools.identity else {
            return;
        };
        if !is_ecr_host(self.options.target.registry()) {
            return;
        }

        let mut names = BTreeSet::new();
        names.insert(chart.destination.repository.clone());
        names.extend(plan.iter().map(|m| m.destination.repository.clone()));

        for name in names {
            match identity.ensure_repository(&name).await {
                Ok(true) => tracing::info!(repository = %name, "created repository"),
                Ok(false) => {}
                Err(e) => result.warn(format!("cannot ensure repository {}: {}", name, e)),
            }
        }
    }

    async fn push_images(
        &self,
        plan: &MirrorPlan,
        copy_sources: &HashMap<ImageKey, ImageReference>,
        result: &mut SyncResult,
    ) {
        let registry = self.tools.registry.as_ref();
        let preflight = PreflightEngine::new(registry, self.options.preflight);

        for mapping in plan.iter() {
            let source = copy_sources
                .get(&mapping.source.key())
                .unwrap_or(&mapping.source);
            let destination = &mapping.destination;

            let check = preflight.image(source, destination).await;
            if let Some(warning) = check.warning {
                result.warn(warning);
            }

            match check.decision {
                PreflightDecision::Push => {}
                PreflightDecision::Overwrite => {
                    if let Err(e) = registry.delete(destination).await {
                        tracing::warn!(image = %destination, error = %e, "delete before overwrite failed");
                        result.images.failed += 1;
                        result.record(
                            SyncError::Push {
                                destination: destination.to_string(),
                                message: format!("cannot delete before overwrite: {}", e),
                            }
                            .to_stage_error(),
                        );
                        continue;
                    }
                }
                skip => {
                    tracing::info!(image = %destination, decision = %skip, "skipping image");
                    result.images.skipped += 1;
                    continue;
                }
            }

            let what = format!("copy {}", destination);
            match retry_with_policy(&self.options.retry, &what, || registry.copy(source, destination)).await {
                Ok(()) => {
                    tracing::info!(from = %mapping.source, to = %destination, "copied image");
                    result.images.pushed += 1;
                }
                Err(e) => {
                    result.images.failed += 1;
                    result.record(
                        SyncError::Push {
                            destination: destination.to_string(),
                            message: e.to_string(),
                        }
                        .to_stage_error(),
                    );
                }
            }
        }
    }

    async fn push_chart(
        &self,
        chart: &ChartMapping,
        overlay: Option<OverlayOutcome>,
        result: &mut SyncResult,
    ) -> Result<()> {
        let Some(archive) = overlay.and_then(|o| o.archive) else {
            result.warn(format!("chart {} not pushed: no repacked archive", chart.destination));
            return Ok(());
        };

        let check = PreflightEngine::new(self.tools.registry.as_ref(), self.options.preflight)
            .chart(&chart.destination)
            .await;
        if let Some(warning) = check.warning {
            result.warn(warning);
        }
        if !check.decision.writes() {
            tracing::info!(chart = %chart.destination, decision = %check.decision, "skipping chart");
            return Ok(());
        }

        let target = chart.push_target();
        let charts = self.tools.charts.as_ref();
        let what = format!("push {}", chart.destination);
        retry_with_policy(&self.options.retry, &what, || charts.push(&archive, &target))
            .await
            .map_err(|e| SyncError::Push {
                destination: chart.destination.to_string(),
                message: e.to_string(),
            })?;
        tracing::info!(chart = %chart.destination, "pushed chart");
        Ok(())
    }
}

/// Stable label for the chart's origin, independent of version
fn chart_source(addon: &Addon) -> String {
    match addon.addressing() {
        AddressingMode::Http { url } => format!("{}/{}", url.trim_end_matches('/'), addon.chart),
        AddressingMode::Oci { reference } => reference,
    }
}
