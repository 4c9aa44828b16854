//! Discover command - list the addons an input declares

use std::path::PathBuf;

use chartsync_core::Catalog;
use clap::Args;

use super::InputArgs;
use crate::display;
use crate::error::{CliError, Result};
use crate::exit_codes;

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Write the selected addons as a catalog document
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: &DiscoverArgs) -> Result<i32> {
    let addons = args.input.load()?;
    display::print_addons(&addons, args.input.mode());

    if let Some(path) = &args.output {
        Catalog::new(addons).save_to(path).map_err(|e| CliError::Io {
            message: format!("cannot write {}: {}", path.display(), e),
        })?;
        println!("Catalog written to {}", path.display());
    }
    Ok(exit_codes::SUCCESS)
}
