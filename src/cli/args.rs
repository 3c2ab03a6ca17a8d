use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Dependency management tool for recipe packages.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub cmd: Command,
    /// Name of the recipes manifest file, relative to the project root
    #[arg(short, long, default_value = "recipes.toml")]
    pub manifest_location: PathBuf,
    /// Name of the resolved closure file, relative to the project root
    #[arg(short, long, default_value = "recipes.lock")]
    pub closure_location: PathBuf,
    /// Location of the recipefetch cache directory
    #[arg(long)]
    pub cache_directory: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolves the dependency closure and materializes it on disk
    Fetch {
        /// Verify that the closure file is up to date instead of updating it
        #[arg(short, long)]
        locked: bool,
        /// Recreate the closure file from scratch
        #[arg(short, long, conflicts_with = "locked")]
        relock: bool,
    },
    /// Resolves the dependency closure and writes the closure file
    Resolve {
        /// Verify that the closure file is up to date instead of updating it
        #[arg(short, long)]
        locked: bool,
        /// Recreate the closure file from scratch
        #[arg(short, long, conflicts_with = "locked")]
        relock: bool,
    },
    /// Prints the materialization plan in dependency order
    Plan,
    /// Creates an initial recipefetch setup in the project root
    Init {
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Deletes the closure file
    Clean,
    /// Deletes the whole repository cache
    ClearCache,
}
