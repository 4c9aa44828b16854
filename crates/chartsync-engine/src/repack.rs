//! Overlay and repack
//!
//! Both the rewritten chart defaults and the consumer override document
//! come from one [`ImageOverlay`] built from the final mirror plan.

use std::path::{Path, PathBuf};

use chartsync_core::archive::create_chart_archive;
use chartsync_core::{ImageOverlay, MirrorPlan, Values};

use crate::error::{Result, SyncError};

const VALUES_FILE: &str = "values.yaml";

#[derive(Debug, Clone)]
pub struct OverlayOutcome {
    pub override_path: PathBuf,
    /// Repacked archive; `None` when repacking was not requested
    pub archive: Option<PathBuf>,
    pub rewrites: usize,
}

/// Rewrite the chart's defaults, write the override document and optionally
/// repack the chart into `archive`
pub fn apply_overlay(
    chart_root: &Path,
    chart: &str,
    plan: &MirrorPlan,
    override_path: &Path,
    archive: Option<&Path>,
) -> Result<OverlayOutcome> {
    let defaults_path = chart_root.join(VALUES_FILE);
    let defaults = if defaults_path.exists() {
        Values::from_file(&defaults_path).map_err(SyncError::overlay)?
    } else {
        Values::new()
    };

    let overlay = ImageOverlay::build(&defaults, plan);
    for rewrite in overlay.rewrites() {
        tracing::debug!(
            path = %rewrite.path,
            from = %rewrite.source,
            to = %rewrite.destination,
            "rewrote image value"
        );
    }

    overlay
        .override_document()
        .write_to(override_path)
        .map_err(SyncError::overlay)?;

    let archive = match archive {
        Some(out) => {
            if !overlay.is_empty() {
                overlay
                    .rewritten_defaults()
                    .write_to(&defaults_path)
                    .map_err(SyncError::overlay)?;
            }
            let digest = create_chart_archive(chart_root, chart, out).map_err(SyncError::overlay)?;
            tracing::info!(archive = %out.display(), digest = %digest, "repacked chart");
            Some(out.to_path_buf())
        }
        None => None,
    };

    Ok(OverlayOutcome {
        override_path: override_path.to_path_buf(),
        archive,
        rewrites: overlay.rewrites().len(),
    })
}
