//! CLI commands

pub mod discover;
pub mod prune;
pub mod sync;

use std::path::PathBuf;

use chartsync_core::{Addon, AddonFilter, DiscoveryMode, discover_in_catalog_files, discover_in_values_file};
use clap::{ArgGroup, Args};

use crate::display;
use crate::error::{CliError, Result};

/// Where the addon list comes from, plus name filters
#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("input").required(true).args(["values", "catalog"])))]
pub struct InputArgs {
    /// Values document scanned for addon entries
    #[arg(short = 'f', long)]
    pub values: Option<PathBuf>,

    /// Catalog file(s); repeat the flag or separate with commas
    #[arg(long, value_delimiter = ',')]
    pub catalog: Vec<PathBuf>,

    /// Only sync these addons (chart in values mode, release in catalog mode)
    #[arg(long)]
    pub only: Vec<String>,

    /// Skip these addons
    #[arg(long)]
    pub exclude: Vec<String>,
}

impl InputArgs {
    pub fn mode(&self) -> DiscoveryMode {
        if self.catalog.is_empty() {
            DiscoveryMode::Values
        } else {
            DiscoveryMode::Catalog
        }
    }

    /// Discover, report rejected entries, then filter
    pub fn load(&self) -> Result<Vec<Addon>> {
        let mode = self.mode();
        let discovery = match (&self.values, mode) {
            (Some(path), DiscoveryMode::Values) => discover_in_values_file(path)?,
            _ => discover_in_catalog_files(self.catalog.as_slice())?,
        };

        for error in &discovery.errors {
            display::print_warning(&format!("ignoring addon entry: {}", error));
        }
        if discovery.addons.is_empty() {
            return Err(CliError::discovery_with_help(
                "no addons found in input",
                "entries need a chart field and a repository field",
            ));
        }

        let filter = AddonFilter::new(
            AddonFilter::split_list(&self.only),
            AddonFilter::split_list(&self.exclude),
        );
        let found = discovery.addons.len();
        let addons = filter.apply(discovery.addons, mode);
        tracing::debug!(found, selected = addons.len(), "filtered addons");

        if addons.is_empty() {
            return Err(CliError::discovery(format!(
                "all {} discovered addon(s) were filtered out",
                found
            )));
        }
        Ok(addons)
    }
}
