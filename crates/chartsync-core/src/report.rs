//! Per-addon results and the run summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error category recorded on a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Discovery,
    VersionResolution,
    Download,
    DependencyBuild,
    TemplateRender,
    ImageResolution,
    Preflight,
    Overlay,
    Push,
    Mapping,
    Interrupted,
}

impl ErrorKind {
    /// Whether an error of this kind ends the addon as Failed
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Discovery | ErrorKind::VersionResolution | ErrorKind::Download | ErrorKind::Push
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Discovery => "discovery",
            ErrorKind::VersionResolution => "version resolution",
            ErrorKind::Download => "download",
            ErrorKind::DependencyBuild => "dependency build",
            ErrorKind::TemplateRender => "template render",
            ErrorKind::ImageResolution => "image resolution",
            ErrorKind::Preflight => "preflight",
            ErrorKind::Overlay => "overlay",
            ErrorKind::Push => "push",
            ErrorKind::Mapping => "mapping",
            ErrorKind::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Success,
    PartialSuccess,
    Failed,
    /// Not attempted (run interrupted before this addon)
    Skipped,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Success => write!(f, "success"),
            SyncStatus::PartialSuccess => write!(f, "partial"),
            SyncStatus::Failed => write!(f, "failed"),
            SyncStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCounts {
    pub discovered: usize,
    pub pushed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of one addon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub chart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Resolved version, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub status: SyncStatus,
    pub images: ImageCounts,
    pub errors: Vec<StageError>,
    pub warnings: Vec<String>,
    #[serde(with = "duration_ms", rename = "durationMs")]
    pub duration: Duration,
}

impl SyncResult {
    pub fn new(chart: impl Into<String>, release: Option<String>) -> Self {
        Self {
            chart: chart.into(),
            release,
            version: None,
            status: SyncStatus::Success,
            images: ImageCounts::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(chart: impl Into<String>, release: Option<String>) -> Self {
        Self {
            status: SyncStatus::Skipped,
            ..Self::new(chart, release)
        }
    }

    /// Record an error and downgrade the status accordingly
    pub fn record(&mut self, error: StageError) {
        let status = if error.kind.is_fatal() {
            SyncStatus::Failed
        } else {
            SyncStatus::PartialSuccess
        };
        self.degrade(status);
        self.errors.push(error);
    }

    /// Record an error that ends the addon regardless of its kind
    pub fn fail(&mut self, error: StageError) {
        self.degrade(SyncStatus::Failed);
        self.errors.push(error);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn first_error(&self) -> Option<&StageError> {
        self.errors.first()
    }

    pub fn last_error(&self) -> Option<&StageError> {
        self.errors.last()
    }

    pub fn is_failed(&self) -> bool {
        self.status == SyncStatus::Failed
    }

    /// Label used in tables: release if set, else chart
    pub fn label(&self) -> &str {
        self.release.as_deref().unwrap_or(&self.chart)
    }

    fn degrade(&mut self, to: SyncStatus) {
        if self.status != SyncStatus::Failed {
            self.status = to;
        }
    }
}

/// Append-only summary of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub results: Vec<SyncResult>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: SyncResult) {
        self.results.push(result);
    }

    /// Results ordered by chart name, case-insensitive
    pub fn sorted(&self) -> Vec<&SyncResult> {
        let mut sorted: Vec<&SyncResult> = self.results.iter().collect();
        sorted.sort_by(|a, b| {
            a.chart
                .to_lowercase()
                .cmp(&b.chart.to_lowercase())
                .then_with(|| a.label().cmp(b.label()))
        });
        sorted
    }

    pub fn any_failed(&self) -> bool {
        self.results.iter().any(SyncResult::is_failed)
    }

    pub fn count(&self, status: SyncStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn total_images(&self) -> ImageCounts {
        self.results.iter().fold(ImageCounts::default(), |mut acc, r| {
            acc.discovered += r.images.discovered;
            acc.pushed += r.images.pushed;
            acc.skipped += r.images.skipped;
            acc.failed += r.images.failed;
            acc
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
