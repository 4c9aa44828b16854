//! CLI error types with exit code handling
//!
//! Every error a command can return maps to one of the exit codes in
//! [`crate::exit_codes`]. Addon failures are not errors here: they are
//! reported in the summary and turned into an exit code by the command.

use chartsync_core::CoreError;
use chartsync_engine::SyncError;
use chartsync_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Invalid configuration file or flag combination
    #[error("Configuration error: {message}")]
    #[diagnostic(code(chartsync::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Failure before any addon started
    #[error("Cannot start: {message}")]
    #[diagnostic(code(chartsync::cli::prerun))]
    PreRun {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// No usable addons in the input
    #[error("Discovery failed: {message}")]
    #[diagnostic(code(chartsync::cli::discovery))]
    Discovery {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("IO error: {message}")]
    #[diagnostic(code(chartsync::cli::io))]
    Io { message: String },

    #[error("{message}")]
    #[diagnostic(code(chartsync::cli::error))]
    Other { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::USAGE_ERROR,
            CliError::PreRun { .. } => exit_codes::PRE_RUN_ERROR,
            CliError::Discovery { .. } => exit_codes::DISCOVERY_ERROR,
            CliError::Io { .. } | CliError::Other { .. } => exit_codes::SYNC_FAILED,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    pub fn pre_run(message: impl Into<String>) -> Self {
        Self::PreRun {
            message: message.into(),
            help: None,
        }
    }

    pub fn pre_run_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::PreRun {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
            help: None,
        }
    }

    pub fn discovery_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<SyncError> for CliError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Config { message } => CliError::config(message),
            SyncError::Identity { message } => CliError::pre_run(message),
            SyncError::Discovery { message } => CliError::discovery(message),
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::ToolMissing { tool } => CliError::pre_run_with_help(
                format!("required tool '{}' is not on PATH", tool),
                format!("install {} and make sure it is on PATH", tool),
            ),
            RepoError::Identity { .. } | RepoError::MissingRegion => CliError::pre_run_with_help(
                err.to_string(),
                "pass --target-registry or configure cloud credentials",
            ),
            RepoError::Io(e) => CliError::from(e),
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        CliError::discovery(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
