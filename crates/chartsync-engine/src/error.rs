//! Engine error taxonomy

use chartsync_core::{CoreError, ErrorKind, StageError};
use chartsync_repo::RepoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    // ============ Addon Errors ============
    #[error("Discovery failed: {message}")]
    Discovery { message: String },

    #[error("Cannot resolve a version for {chart}: {source}")]
    VersionResolution {
        chart: String,
        #[source]
        source: RepoError,
    },

    #[error("Download of {chart}@{version} failed: {message}")]
    Download {
        chart: String,
        version: String,
        message: String,
    },

    #[error("Dependency build failed: {message}")]
    DependencyBuild { message: String },

    #[error("Template render failed: {message}")]
    TemplateRender { message: String },

    #[error("Image {image}: {message}")]
    ImageResolution { image: String, message: String },

    #[error("Preflight for {destination} failed: {message}")]
    Preflight { destination: String, message: String },

    #[error("Values overlay failed: {message}")]
    Overlay { message: String },

    #[error("Push of {destination} failed: {message}")]
    Push { destination: String, message: String },

    #[error(transparent)]
    Mapping(CoreError),

    // ============ Run Errors ============
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Cannot determine target registry: {message}")]
    Identity { message: String },

    #[error("Run interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Category stored on the addon's result
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Discovery { .. } | SyncError::Config { .. } => ErrorKind::Discovery,
            SyncError::VersionResolution { .. } | SyncError::Identity { .. } => ErrorKind::VersionResolution,
            SyncError::Download { .. } | SyncError::Io(_) => ErrorKind::Download,
            SyncError::DependencyBuild { .. } => ErrorKind::DependencyBuild,
            SyncError::TemplateRender { .. } => ErrorKind::TemplateRender,
            SyncError::ImageResolution { .. } => ErrorKind::ImageResolution,
            SyncError::Preflight { .. } => ErrorKind::Preflight,
            SyncError::Overlay { .. } => ErrorKind::Overlay,
            SyncError::Push { .. } => ErrorKind::Push,
            SyncError::Mapping(_) => ErrorKind::Mapping,
            SyncError::Interrupted => ErrorKind::Interrupted,
        }
    }

    pub fn to_stage_error(&self) -> StageError {
        StageError::new(self.kind(), self.to_string())
    }

    pub fn overlay(e: impl std::fmt::Display) -> Self {
        SyncError::Overlay { message: e.to_string() }
    }
}

impl From<SyncError> for StageError {
    fn from(e: SyncError) -> Self {
        e.to_stage_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err = SyncError::VersionResolution {
            chart: "demo".into(),
            source: RepoError::ChartNotFound {
                reference: "demo".into(),
            },
        };
        assert_eq!(err.kind(), ErrorKind::VersionResolution);
        assert!(err.kind().is_fatal());
        assert_eq!(
            err.to_string(),
            "Cannot resolve a version for demo: Chart not found: demo"
        );

        let render = SyncError::TemplateRender {
            message: "required value".into(),
        };
        assert!(!render.kind().is_fatal());
        assert_eq!(render.to_stage_error().kind, ErrorKind::TemplateRender);
    }
}
