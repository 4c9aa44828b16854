//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid addon at {node}: {message}")]
    Discovery { node: String, message: String },

    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    #[error("Invalid platform '{value}': expected 'auto' or 'os/arch[/variant]'")]
    InvalidPlatform { value: String },

    #[error("No child manifest for platform {platform} (available: {available})")]
    NoMatchingPlatform { platform: String, available: String },

    #[error("Destination {destination} is already claimed by {claimed_by}, cannot map {source_image}")]
    MappingCollision {
        destination: String,
        claimed_by: String,
        source_image: String,
    },

    #[error("Overlay error: {message}")]
    Overlay { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

impl CoreError {
    pub fn discovery(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn invalid_image(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidImageReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
