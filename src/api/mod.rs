use std::{error::Error, path::PathBuf, sync::Arc};

use crate::{
    cli::command_handlers::{do_clean, do_clear_cache, do_fetch, do_init, do_plan, do_resolve},
    git::cache::RecipeGitCache,
    model::recipes::closure::ResolvedClosure,
};

mod builder;

pub use builder::RecipefetchBuilder;

pub struct Recipefetch {
    cache: Arc<RecipeGitCache>,
    root: PathBuf,
    manifest_file_name: PathBuf,
    closure_file_name: PathBuf,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockMode {
    /// Verify that the closure file is up to date. This mode should be normally used on CI.
    Locked,
    /// Update the closure file if necessary.
    Update,
    /// Recreate the closure file from scratch.
    Recreate,
}

impl Recipefetch {
    pub fn builder() -> RecipefetchBuilder {
        RecipefetchBuilder::default()
    }

    /// Creates an initial recipefetch setup
    pub fn init(&self, name: Option<String>) -> Result<(), Box<dyn Error>> {
        do_init(&self.root, name, &self.manifest_file_name)
    }

    /// Resolves and materializes the dependency closure of the manifest
    pub async fn fetch(&self, lock_mode: LockMode) -> Result<(), Box<dyn Error>> {
        do_fetch(
            lock_mode,
            &self.cache,
            &self.root,
            &self.manifest_file_name,
            &self.closure_file_name,
        )
        .await
    }

    /// Creates, updates or verifies the closure file based on the manifest
    pub async fn resolve(&self, lock_mode: LockMode) -> Result<ResolvedClosure, Box<dyn Error>> {
        do_resolve(
            lock_mode,
            &self.cache,
            &self.root,
            &self.manifest_file_name,
            &self.closure_file_name,
        )
        .await
    }

    /// Prints the materialization plan without executing it
    pub async fn plan(&self) -> Result<(), Box<dyn Error>> {
        do_plan(
            &self.cache,
            &self.root,
            &self.manifest_file_name,
            &self.closure_file_name,
        )
        .await
    }

    /// Deletes the closure file
    pub fn clean(&self) -> Result<(), Box<dyn Error>> {
        do_clean(&self.root, &self.closure_file_name)
    }

    pub fn clear_cache(&self) -> Result<(), Box<dyn Error>> {
        do_clear_cache(&self.cache)
    }
}
