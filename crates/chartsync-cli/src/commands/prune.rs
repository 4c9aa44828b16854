//! Prune command - delete registry repositories created by earlier syncs

use std::time::Duration;

use chartsync_repo::aws::AWS;
use chartsync_repo::{AwsCli, CloudIdentity, ProcessRunner, require_tools};
use clap::Args;
use console::style;

use crate::display;
use crate::error::{CliError, Result};
use crate::exit_codes;

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Delete every repository in the account, not only managed ones
    #[arg(long)]
    pub all: bool,

    /// List what would be deleted
    #[arg(long)]
    pub dry_run: bool,

    /// Cloud region of the registry
    #[arg(long)]
    pub region: Option<String>,

    /// Timeout for each external command
    #[arg(long, value_name = "SECONDS", default_value_t = 120)]
    pub timeout: u64,
}

pub async fn run(args: &PruneArgs) -> Result<i32> {
    require_tools(&[AWS])?;
    let aws = AwsCli::new(ProcessRunner::new(Duration::from_secs(args.timeout))).with_region(args.region.clone());
    prune(&aws, args.all, args.dry_run).await
}

pub async fn prune(identity: &dyn CloudIdentity, all: bool, dry_run: bool) -> Result<i32> {
    let repositories = identity
        .list_repositories(!all)
        .await
        .map_err(|e| CliError::pre_run(format!("cannot list repositories: {}", e)))?;

    if repositories.is_empty() {
        println!("No repositories to delete");
        return Ok(exit_codes::SUCCESS);
    }

    if dry_run {
        println!("Would delete {} repositories:", repositories.len());
        for repo in &repositories {
            println!("  {} {}", repo.name, style(&repo.uri).dim());
        }
        return Ok(exit_codes::SUCCESS);
    }

    println!("Deleting {} repositories", repositories.len());
    let mut failed = 0;
    for repo in &repositories {
        match identity.delete_repository(&repo.name).await {
            Ok(()) => display::print_deleted(&repo.name),
            Err(e) => {
                failed += 1;
                display::print_delete_failed(&repo.name, &e.to_string());
            }
        }
    }

    println!();
    println!("{} deleted, {} failed", repositories.len() - failed, failed);
    if failed > 0 {
        Ok(exit_codes::SYNC_FAILED)
    } else {
        Ok(exit_codes::SUCCESS)
    }
}
