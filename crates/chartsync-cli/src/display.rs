//! Display formatting for CLI output
//!
//! Provides:
//! - The end-of-run summary table, one line per addon
//! - Discovered addon listings
//! - Prune results

use chartsync_core::{Addon, DiscoveryMode, RunSummary, SyncResult, SyncStatus};
use console::{StyledObject, style};

fn status_icon(status: SyncStatus) -> StyledObject<&'static str> {
    match status {
        SyncStatus::Success => style("✓").green(),
        SyncStatus::PartialSuccess => style("⚠").yellow(),
        SyncStatus::Failed => style("✗").red(),
        SyncStatus::Skipped => style("-").dim(),
    }
}

fn result_line(result: &SyncResult, width: usize) -> String {
    let version = result.version.as_deref().unwrap_or("-");
    let images = &result.images;
    format!(
        "{} {:<width$}  {:<12} {:<16} {} found, {} pushed, {} skipped, {} failed  {}",
        status_icon(result.status),
        result.label(),
        version,
        result.status.to_string(),
        images.discovered,
        images.pushed,
        images.skipped,
        images.failed,
        style(format!("{:.1}s", result.duration.as_secs_f64())).dim(),
        width = width,
    )
}

/// Summary table lines, sorted by chart
pub fn summary_lines(summary: &RunSummary) -> Vec<String> {
    let results = summary.sorted();
    let width = results.iter().map(|r| r.label().len()).max().unwrap_or(0);

    let mut lines = Vec::new();
    for result in results {
        lines.push(result_line(result, width));
        if result.status == SyncStatus::Failed || result.status == SyncStatus::PartialSuccess {
            if let Some(error) = result.first_error() {
                lines.push(format!("    {} {}", style(format!("{}:", error.kind)).red(), error.message));
            }
        }
    }

    let totals = summary.total_images();
    lines.push(String::new());
    lines.push(format!(
        "{} succeeded, {} partial, {} failed, {} skipped; images: {} pushed, {} skipped, {} failed",
        summary.count(SyncStatus::Success),
        summary.count(SyncStatus::PartialSuccess),
        summary.count(SyncStatus::Failed),
        summary.count(SyncStatus::Skipped),
        totals.pushed,
        totals.skipped,
        totals.failed,
    ));
    lines
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", style("Sync summary").bold());
    for line in summary_lines(summary) {
        println!("{}", line);
    }
}

/// One line per addon: `release chart version repository`
pub fn addon_lines(addons: &[Addon], mode: DiscoveryMode) -> Vec<String> {
    addons
        .iter()
        .map(|addon| {
            let name = match mode {
                DiscoveryMode::Catalog => addon.display_name(),
                DiscoveryMode::Values => addon.chart.as_str(),
            };
            let chart = match &addon.oci_namespace {
                Some(ns) => format!("{}/{}", ns, addon.chart),
                None => addon.chart.clone(),
            };
            format!(
                "  {} {} {} {}",
                style(name).cyan(),
                chart,
                addon.version.as_deref().unwrap_or("latest"),
                style(&addon.repository).dim()
            )
        })
        .collect()
}

pub fn print_addons(addons: &[Addon], mode: DiscoveryMode) {
    println!("{} {} addon(s)", style("Found").bold(), addons.len());
    for line in addon_lines(addons, mode) {
        println!("{}", line);
    }
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", style("⚠").yellow(), message);
}

pub fn print_deleted(name: &str) {
    println!("  {} {}", style("✓").green(), name);
}

pub fn print_delete_failed(name: &str, error: &str) {
    println!("  {} {}: {}", style("✗").red(), name, error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartsync_core::{ErrorKind, StageError};
    use std::time::Duration;

    fn summary() -> RunSummary {
        let mut summary = RunSummary::new();

        let mut ok = SyncResult::new("cert-manager", None);
        ok.version = Some("1.14.0".to_string());
        ok.images.discovered = 4;
        ok.images.pushed = 4;
        ok.duration = Duration::from_millis(1500);
        summary.push(ok);

        let mut failed = SyncResult::new("karpenter", Some("karpenter-prod".to_string()));
        failed.fail(StageError::new(ErrorKind::Push, "denied"));
        summary.push(failed);
        summary
    }

    #[test]
    fn test_summary_lines() {
        console::set_colors_enabled(false);
        let lines = summary_lines(&summary());

        assert!(lines[0].starts_with("✓ cert-manager"));
        assert!(lines[0].contains("1.14.0"));
        assert!(lines[0].contains("4 pushed"));
        assert!(lines[0].ends_with("1.5s"));

        assert!(lines[1].starts_with("✗ karpenter-prod"));
        assert_eq!(lines[2].trim(), "push: denied");
        assert_eq!(
            lines.last().unwrap(),
            "1 succeeded, 0 partial, 1 failed, 0 skipped; images: 4 pushed, 0 skipped, 0 failed"
        );
    }

    #[test]
    fn test_addon_lines_use_release_in_catalog_mode() {
        console::set_colors_enabled(false);
        let addon = Addon::new("karpenter", "oci://public.ecr.aws/karpenter")
            .unwrap()
            .with_release("karpenter-prod");

        let catalog = addon_lines(std::slice::from_ref(&addon), DiscoveryMode::Catalog);
        assert!(catalog[0].trim_start().starts_with("karpenter-prod karpenter latest"));

        let values = addon_lines(&[addon], DiscoveryMode::Values);
        assert!(values[0].trim_start().starts_with("karpenter karpenter latest"));
    }
}
