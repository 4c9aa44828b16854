//! Version resolution

use chartsync_core::Addon;
use chartsync_repo::ChartTooling;

use crate::error::{Result, SyncError};

/// A concrete version and how it was chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub version: String,
    /// Queried from the source rather than taken from the addon
    pub from_latest: bool,
    /// Set when a pinned version had to be replaced
    pub warning: Option<String>,
}

impl ResolvedVersion {
    fn pinned(version: &str) -> Self {
        Self {
            version: version.to_string(),
            from_latest: false,
            warning: None,
        }
    }
}

/// Resolves `Addon.version` against the chart source
pub struct VersionResolver<'a> {
    tooling: &'a dyn ChartTooling,
    prefer_latest: bool,
    verify_pinned: bool,
}

impl<'a> VersionResolver<'a> {
    pub fn new(tooling: &'a dyn ChartTooling) -> Self {
        Self {
            tooling,
            prefer_latest: false,
            verify_pinned: false,
        }
    }

    pub fn prefer_latest(mut self, enabled: bool) -> Self {
        self.prefer_latest = enabled;
        self
    }

    /// Check pinned versions exist, falling back to the newest one
    pub fn verify_pinned(mut self, enabled: bool) -> Self {
        self.verify_pinned = enabled;
        self
    }

    pub async fn resolve(&self, addon: &Addon) -> Result<ResolvedVersion> {
        let pinned = match addon.version.as_deref() {
            Some(v) if !self.prefer_latest && !v.trim().is_empty() => v.trim(),
            _ => return self.latest(addon, None).await,
        };

        if !self.verify_pinned {
            return Ok(ResolvedVersion::pinned(pinned));
        }

        match self.tooling.version_exists(addon, pinned).await {
            Ok(true) => Ok(ResolvedVersion::pinned(pinned)),
            Ok(false) => {
                let warning = format!("version {} of {} is not available; using latest", pinned, addon.chart);
                self.latest(addon, Some(warning)).await
            }
            Err(e) => {
                let warning = format!("cannot verify version {} of {} ({}); using latest", pinned, addon.chart, e);
                self.latest(addon, Some(warning)).await
            }
        }
    }

    async fn latest(&self, addon: &Addon, warning: Option<String>) -> Result<ResolvedVersion> {
        let version = self
            .tooling
            .latest_version(addon)
            .await
            .map_err(|source| SyncError::VersionResolution {
                chart: addon.chart.clone(),
                source,
            })?;
        if let Some(w) = &warning {
            tracing::warn!(chart = %addon.chart, "{}", w);
        }
        tracing::info!(chart = %addon.chart, version = %version, "resolved latest version");
        Ok(ResolvedVersion {
            version,
            from_latest: true,
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartsync_core::ErrorKind;
    use chartsync_repo::mock::{MockChart, MockChartTooling};

    fn tooling() -> MockChartTooling {
        MockChartTooling::new().with_chart("demo", MockChart::new(["2.2.0", "2.3.0"]))
    }

    fn addon(version: Option<&str>) -> Addon {
        let addon = Addon::new("demo", "https://example/charts").unwrap();
        match version {
            Some(v) => addon.with_version(v),
            None => addon,
        }
    }

    #[tokio::test]
    async fn test_unpinned_resolves_latest() {
        let tooling = tooling();
        let resolved = VersionResolver::new(&tooling).resolve(&addon(None)).await.unwrap();
        assert_eq!(resolved.version, "2.3.0");
        assert!(resolved.from_latest);
        assert_eq!(tooling.operation_counts().latest, 1);
    }

    #[tokio::test]
    async fn test_pinned_is_idempotent_without_lookup() {
        let tooling = tooling();
        let resolver = VersionResolver::new(&tooling);
        let a = resolver.resolve(&addon(Some("2.2.0"))).await.unwrap();
        let b = resolver.resolve(&addon(Some("2.2.0"))).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.version, "2.2.0");
        assert_eq!(tooling.operation_counts().latest, 0);
        assert_eq!(tooling.operation_counts().exists, 0);
    }

    #[tokio::test]
    async fn test_prefer_latest_overrides_pin() {
        let tooling = tooling();
        let resolved = VersionResolver::new(&tooling)
            .prefer_latest(true)
            .resolve(&addon(Some("2.2.0")))
            .await
            .unwrap();
        assert_eq!(resolved.version, "2.3.0");
    }

    #[tokio::test]
    async fn test_verify_pinned_falls_back() {
        let tooling = tooling();
        let resolver = VersionResolver::new(&tooling).verify_pinned(true);

        let kept = resolver.resolve(&addon(Some("2.2.0"))).await.unwrap();
        assert_eq!(kept.version, "2.2.0");
        assert!(kept.warning.is_none());

        let replaced = resolver.resolve(&addon(Some("9.9.9"))).await.unwrap();
        assert_eq!(replaced.version, "2.3.0");
        assert!(replaced.warning.unwrap().contains("9.9.9"));
    }

    #[tokio::test]
    async fn test_unknown_chart_fails() {
        let tooling = MockChartTooling::new();
        let err = VersionResolver::new(&tooling).resolve(&addon(None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionResolution);
    }
}
