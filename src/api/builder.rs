use std::{env, error::Error, path::PathBuf, sync::Arc};

use home::home_dir;

use crate::{git::cache::RecipeGitCache, model::recipes::Protocol, Recipefetch};

#[derive(Default)]
pub struct RecipefetchBuilder {
    // All other paths are relative to `root`
    root: Option<PathBuf>,
    manifest_file_name: Option<PathBuf>,
    closure_file_name: Option<PathBuf>,
    cache_directory_path: Option<PathBuf>,
    default_protocol: Option<Protocol>,
}

impl RecipefetchBuilder {
    /// Project root directory.
    ///
    /// Defaults to the current directory.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.root = Some(path.into());
        self
    }

    /// Name of the recipes manifest toml file.
    ///
    /// Defaults to `recipes.toml`.
    pub fn manifest_file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_file_name = Some(path.into());
        self
    }

    /// Name of the resolved closure file.
    ///
    /// Defaults to `recipes.lock`.
    pub fn closure_file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.closure_file_name = Some(path.into());
        self
    }

    /// Location of the recipefetch cache directory.
    ///
    /// Defaults to `$HOME/.recipefetch/cache`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory_path = Some(path.into());
        self
    }

    /// Transport used for repository urls that do not name one.
    ///
    /// Defaults to https.
    pub fn default_protocol(mut self, protocol: Protocol) -> Self {
        self.default_protocol = Some(protocol);
        self
    }

    pub fn try_build(self) -> Result<Recipefetch, Box<dyn Error>> {
        let Self {
            root,
            manifest_file_name,
            closure_file_name,
            cache_directory_path,
            default_protocol,
        } = self;
        let root = match root {
            Some(root) => root,
            None => env::current_dir()?,
        };

        let manifest_file_name = manifest_file_name.unwrap_or_else(|| PathBuf::from("recipes.toml"));

        let closure_file_name = closure_file_name.unwrap_or_else(|| PathBuf::from("recipes.lock"));

        let cache_directory =
            root.join(cache_directory_path.unwrap_or_else(default_cache_directory));

        let default_protocol = default_protocol.unwrap_or(Protocol::Https);

        let cache = RecipeGitCache::new(cache_directory, default_protocol)?;

        Ok(Recipefetch {
            cache: Arc::new(cache),
            root,
            manifest_file_name,
            closure_file_name,
        })
    }
}

fn default_cache_directory() -> PathBuf {
    let mut cache_directory =
        home_dir().expect("Could not find home dir. Please define $HOME env variable.");
    cache_directory.push(".recipefetch/cache");
    cache_directory
}
