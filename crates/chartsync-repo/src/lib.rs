//! chartsync collaborators
//!
//! The engine reaches the outside world through three traits:
//!
//! - [`ChartTooling`]: resolve, download, render and push charts (`helm`)
//! - [`RegistryTooling`]: inspect, copy and delete images (`crane`)
//! - [`CloudIdentity`]: account, registry tokens and ECR repositories (`aws`)
//!
//! Each CLI-backed implementation runs its tool through [`ProcessRunner`],
//! which bounds every call with a timeout. The [`mock`] module provides
//! in-memory implementations for tests.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chartsync_core::Addon;
//! use chartsync_repo::{ChartTooling, HelmCli, ProcessRunner};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let helm = HelmCli::new(ProcessRunner::new(Duration::from_secs(60)));
//! let addon = Addon::new("cert-manager", "https://charts.jetstack.io")?;
//! let latest = helm.latest_version(&addon).await?;
//! println!("cert-manager {}", latest);
//! # Ok(())
//! # }
//! ```

pub mod aws;
pub mod crane;
pub mod credentials;
pub mod error;
pub mod helm;
pub mod mock;
pub mod process;
pub mod tooling;

pub use aws::AwsCli;
pub use crane::CraneCli;
pub use credentials::{CredentialSet, RegistryCredentials};
pub use error::{RepoError, Result};
pub use helm::{HelmCli, HelmSandbox, derive_repo_name};
pub use process::{ProcessOutput, ProcessRunner, ToolCommand, require_tools};
pub use tooling::{
    ChartTooling, CloudAccount, CloudIdentity, ManagedRepository, RegistryKind, RegistryTooling, RenderRequest,
    is_ecr_host,
};
