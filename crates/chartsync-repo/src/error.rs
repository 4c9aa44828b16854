//! Error types for collaborator calls

use chartsync_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Process Errors ============
    #[error("Required tool not found on PATH: {tool}")]
    ToolMissing { tool: String },

    #[error("Failed to start '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("'{command}' exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("'{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    // ============ Chart Errors ============
    #[error("Chart not found: {reference}")]
    ChartNotFound { reference: String },

    #[error("Version {version} of {chart} is not available")]
    VersionNotFound { chart: String, version: String },

    #[error("Unexpected chart tool output: {message}")]
    InvalidOutput { message: String },

    // ============ Registry Errors ============
    #[error("Manifest not found: {reference}")]
    ManifestNotFound { reference: String },

    #[error("Invalid manifest for {reference}: {message}")]
    InvalidManifest { reference: String, message: String },

    #[error("Login to {registry} failed: {message}")]
    AuthFailed { registry: String, message: String },

    // ============ Cloud Errors ============
    #[error("Cannot determine cloud identity: {message}")]
    Identity { message: String },

    #[error("No cloud region configured (set AWS_REGION or run 'aws configure')")]
    MissingRegion,

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Whether the registry reported the reference as absent
    pub fn is_not_found(&self) -> bool {
        match self {
            RepoError::ManifestNotFound { .. } | RepoError::ChartNotFound { .. } => true,
            RepoError::VersionNotFound { .. } => true,
            RepoError::CommandFailed { stderr, .. } => stderr_says_not_found(stderr),
            _ => false,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Registry error strings that mean "no such manifest" rather than a failure
pub(crate) fn stderr_says_not_found(stderr: &str) -> bool {
    const PATTERNS: &[&str] = &["manifest_unknown", "name_unknown", "not found", "404"];
    let lower = stderr.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_patterns() {
        assert!(stderr_says_not_found("MANIFEST_UNKNOWN: manifest unknown"));
        assert!(stderr_says_not_found("NAME_UNKNOWN: repository name not known"));
        assert!(stderr_says_not_found("GET https://x/v2/a/manifests/b: 404 Not Found"));
        assert!(!stderr_says_not_found("UNAUTHORIZED: authentication required"));
    }

    #[test]
    fn test_command_failed_display() {
        let err = RepoError::CommandFailed {
            command: "crane digest x".into(),
            code: Some(1),
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "'crane digest x' exited with 1: boom");
        assert!(!err.is_not_found());
    }
}
