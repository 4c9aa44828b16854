//! chartsync core - types and decision logic for mirroring Helm charts
//!
//! This crate holds everything that can be decided without touching the
//! network or spawning a process:
//! - `Addon`: a declared chart to mirror, plus discovery from values and catalogs
//! - `ImageReference`: parsing and normalization of container image references
//! - `ImageSet`: images extracted from rendered chart output
//! - `MirrorTarget` / `MirrorPlan`: deterministic source to destination mapping
//! - `PreflightPolicy` / `PreflightDecision`: skip, verify and overwrite rules
//! - `PlatformPolicy`: child manifest selection from a multi-arch index
//! - `DependencyTree`: declared and vendored subchart graph
//! - `ImageOverlay`: values rewrite and consumer override document

pub mod addon;
pub mod archive;
pub mod chart;
pub mod dependency;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod image;
pub mod mirror;
pub mod overlay;
pub mod platform;
pub mod preflight;
pub mod report;
pub mod values;

pub use addon::{Addon, AddonFilter, AddressingMode, Catalog, DiscoveryMode};
pub use chart::{ChartDependency, ChartMetadata};
pub use dependency::{DependencyNode, DependencyTree, NodeId, VersionDrift};
pub use discovery::{
    Candidate, Discovery, classify, discover_in_catalog, discover_in_catalog_files, discover_in_values,
    discover_in_values_file,
};
pub use error::{CoreError, Result};
pub use extract::{ImageSet, extract_images, parse_rendered};
pub use image::{ImageKey, ImageReference};
pub use mirror::{ChartMapping, ImageMapping, MirrorLedger, MirrorPlan, MirrorScheme, MirrorTarget};
pub use overlay::{ImageOverlay, Rewrite};
pub use platform::{PlatformPolicy, RequestedPlatform, available_platforms, select_child_digest};
pub use preflight::{DestinationState, PreflightDecision, PreflightPolicy, PresenceOutcome};
pub use report::{ErrorKind, ImageCounts, RunSummary, StageError, SyncResult, SyncStatus};
pub use values::Values;
