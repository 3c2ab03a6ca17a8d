use std::{
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use log::debug;
use tokio::sync::OnceCell;

use crate::model::recipes::{
    Manifest, RepositoryUrl, Revision, RevisionSpecification, SUPPORTED_API_VERSION,
};

use super::{DescriptorSource, ResolutionError};

/// Cache identity of a descriptor request.
///
/// A pinned revision fully determines the descriptor contents, so the branch is
/// dropped from the key; an unpinned request floats with its branch head and is
/// keyed by the branch instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorKey {
    url: RepositoryUrl,
    specification: RevisionSpecification,
    path_override: Option<PathBuf>,
}

impl DescriptorKey {
    pub fn new(
        url: RepositoryUrl,
        specification: RevisionSpecification,
        path_override: Option<PathBuf>,
    ) -> Self {
        let specification = match specification {
            RevisionSpecification {
                revision: revision @ Revision::Pinned { .. },
                branch: _,
            } => RevisionSpecification {
                revision,
                branch: None,
            },
            arbitrary => arbitrary,
        };
        DescriptorKey {
            url,
            specification,
            path_override,
        }
    }

    pub fn url(&self) -> &RepositoryUrl {
        &self.url
    }

    pub fn specification(&self) -> &RevisionSpecification {
        &self.specification
    }

    pub fn path_override(&self) -> Option<&Path> {
        self.path_override.as_deref()
    }
}

impl Display for DescriptorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.url, self.specification)?;
        if let Some(path_override) = &self.path_override {
            write!(f, " at /{}", path_override.display())?;
        }
        Ok(())
    }
}

/// A descriptor once fetched and admitted into the store.
#[derive(Debug, Clone)]
pub struct StoredDescriptor {
    pub manifest: Arc<Manifest>,
    pub commit_hash: String,
}

/// Run-scoped descriptor cache.
///
/// Each key maps to a single-assignment cell; concurrent requesters for the
/// same key await one fetch instead of issuing duplicates. Descriptors are
/// immutable once fetched and the whole store is discarded with the run.
pub struct DescriptorStore<S> {
    source: Arc<S>,
    entries: DashMap<DescriptorKey, Arc<OnceCell<StoredDescriptor>>>,
}

impl<S> DescriptorStore<S>
where
    S: DescriptorSource + Send + Sync + 'static,
{
    pub fn new(source: Arc<S>) -> Self {
        DescriptorStore {
            source,
            entries: DashMap::new(),
        }
    }

    pub async fn descriptor(&self, key: &DescriptorKey) -> Result<StoredDescriptor, ResolutionError> {
        let cell = self.entries.entry(key.clone()).or_default().clone();
        let stored = cell
            .get_or_try_init(|| async {
                debug!("Fetching descriptor of {key}");
                let source = Arc::clone(&self.source);
                let fetch_key = key.clone();
                let fetched = tokio::task::spawn_blocking(move || {
                    source.fetch_descriptor(
                        fetch_key.url(),
                        fetch_key.specification(),
                        fetch_key.path_override(),
                    )
                })
                .await
                .expect("descriptor fetch task panicked")
                .map_err(|source| ResolutionError::DescriptorUnavailable {
                    url: key.url.clone(),
                    specification: key.specification.clone(),
                    source,
                })?;
                if fetched.manifest.api_version != SUPPORTED_API_VERSION {
                    return Err(ResolutionError::UnsupportedApiVersion {
                        url: key.url.clone(),
                        specification: key.specification.clone(),
                        found: fetched.manifest.api_version,
                    });
                }
                Ok(StoredDescriptor {
                    manifest: Arc::new(fetched.manifest),
                    commit_hash: fetched.commit_hash,
                })
            })
            .await?;
        Ok(stored.clone())
    }
}
