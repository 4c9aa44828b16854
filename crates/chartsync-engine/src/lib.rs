//! chartsync engine - per-addon synchronization
//!
//! This crate drives one addon at a time through the full pipeline:
//! - **Resolution**: pinned or latest chart version via [`VersionResolver`]
//! - **Render**: dependency preparation and `helm template` via [`RenderStage`]
//! - **Inspection**: source reachability and platform selection via [`PlatformResolver`]
//! - **Preflight**: skip, verify or overwrite existing destinations via [`PreflightEngine`]
//! - **Overlay**: rewritten chart defaults and the consumer override document
//! - **Push**: image copies and the repacked chart, retried per [`RetryPolicy`]
//!
//! [`Orchestrator`] ties the stages together and isolates failures per addon.

pub mod auth;
pub mod config;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod platform;
pub mod preflight;
pub mod render;
pub mod repack;
pub mod resolver;
pub mod retry;
pub mod tools;

pub use auth::{Authenticator, PUBLIC_ECR_HOST};
pub use config::{SyncConfig, SyncOptions};
pub use error::{Result, SyncError};
pub use layout::ChartLayout;
pub use orchestrator::{Orchestrator, RunContext};
pub use platform::PlatformResolver;
pub use preflight::{Preflight, PreflightEngine};
pub use render::{ChartsAside, RenderInput, RenderOutcome, RenderStage};
pub use repack::{OverlayOutcome, apply_overlay};
pub use resolver::{ResolvedVersion, VersionResolver};
pub use retry::{RetryPolicy, retry_with_policy};
pub use tools::Tools;
