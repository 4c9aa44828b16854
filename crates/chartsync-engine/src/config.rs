//! Sync configuration
//!
//! Stored in `~/.config/chartsync/config.yaml` unless `--config` names
//! another file. Command-line flags are applied on top of the loaded file,
//! then [`SyncConfig::into_options`] fixes the target registry and produces
//! the [`SyncOptions`] the orchestrator runs with.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chartsync_core::{MirrorScheme, MirrorTarget, PlatformPolicy, PreflightPolicy, Values};

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// Minimal values some charts refuse to render without
const BUILTIN_RENDER_OVERRIDES: &[(&str, &[(&str, &str)])] = &[
    (
        "karpenter",
        &[
            ("settings.clusterName", "placeholder"),
            ("settings.clusterEndpoint", "https://placeholder"),
        ],
    ),
    ("aws-load-balancer-controller", &[("clusterName", "placeholder")]),
];

/// Configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Target registry root; resolved from cloud identity when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_registry: Option<String>,

    /// Path prefix for image destinations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_prefix: Option<String>,

    pub scheme: MirrorScheme,

    pub platform: PlatformPolicy,

    /// Render vendored dependencies along with the chart
    pub include_dependencies: bool,

    pub preflight: PreflightPolicy,

    /// Bound on every external tool call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    pub retries: RetryPolicy,

    pub work_dir: PathBuf,

    /// Fall back to the newest version when a pinned one is unavailable
    pub verify_pinned_version: bool,

    /// Chart name to values injected before rendering
    pub render_overrides: BTreeMap<String, Values>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            target_registry: None,
            target_prefix: None,
            scheme: MirrorScheme::default(),
            platform: PlatformPolicy::default(),
            include_dependencies: true,
            preflight: PreflightPolicy::default(),
            timeout: Duration::from_secs(120),
            retries: RetryPolicy::default(),
            work_dir: PathBuf::from("./helm-charts"),
            verify_pinned_version: false,
            render_overrides: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Load `explicit` if given, else the default file when it exists
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_yaml(&content).map_err(|e| SyncError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// `~/.config/chartsync/config.yaml` on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chartsync").join("config.yaml"))
    }

    /// Fix the target registry and produce the run options
    pub fn into_options(self, registry: &str) -> SyncOptions {
        let target = MirrorTarget::new(registry, self.scheme).with_prefix(self.target_prefix.as_deref());

        let mut render_overrides: BTreeMap<String, Values> = BTreeMap::new();
        for (chart, pairs) in BUILTIN_RENDER_OVERRIDES {
            render_overrides.insert(chart.to_string(), Values::from_dotted(pairs.iter().copied()));
        }
        for (chart, values) in self.render_overrides {
            render_overrides
                .entry(chart.to_lowercase())
                .or_insert_with(Values::new)
                .merge(&values);
        }

        SyncOptions {
            target,
            platform: self.platform,
            include_dependencies: self.include_dependencies,
            preflight: self.preflight,
            retry: self.retries,
            work_dir: self.work_dir,
            prefer_latest: false,
            verify_pinned_version: self.verify_pinned_version,
            scan_only: false,
            render_overrides,
        }
    }
}

/// Everything the orchestrator needs to know about a run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub target: MirrorTarget,
    pub platform: PlatformPolicy,
    pub include_dependencies: bool,
    pub preflight: PreflightPolicy,
    pub retry: RetryPolicy,
    pub work_dir: PathBuf,
    /// Resolve every addon to its newest version, pinned or not
    pub prefer_latest: bool,
    pub verify_pinned_version: bool,
    /// Inspect and map only; no registry writes and no repack
    pub scan_only: bool,
    pub render_overrides: BTreeMap<String, Values>,
}

impl SyncOptions {
    /// Default options for `target`
    pub fn new(target: MirrorTarget, work_dir: impl Into<PathBuf>) -> Self {
        let mut options = SyncConfig::default().into_options(target.registry());
        options.target = target;
        options.work_dir = work_dir.into();
        options
    }

    pub fn with_prefer_latest(mut self, prefer_latest: bool) -> Self {
        self.prefer_latest = prefer_latest;
        self
    }

    pub fn with_scan_only(mut self, scan_only: bool) -> Self {
        self.scan_only = scan_only;
        self
    }

    pub fn with_preflight(mut self, preflight: PreflightPolicy) -> Self {
        self.preflight = preflight;
        self
    }

    pub fn with_platform(mut self, platform: PlatformPolicy) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Render overrides for a chart (built-ins merged under user values)
    pub fn render_values(&self, chart: &str) -> Values {
        self.render_overrides
            .get(&chart.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Values forcing every dependency condition on
    pub fn forced_conditions(conditions: &[String]) -> Values {
        let mut values = Values::new();
        for cond in conditions {
            values.set(cond, JsonValue::Bool(true));
        }
        values
    }
}
