pub mod conflict;
pub mod finalize;
pub mod graph;
mod lock;
pub mod store;

pub use conflict::{ConflictingRequest, ProjectConflict};
pub use lock::ClosureFileSource;

use std::{fmt::Write, path::Path, sync::Arc};

use thiserror::Error;

use crate::model::recipes::{
    closure::ResolvedClosure, Manifest, ProjectId, RepositoryUrl, RevisionSpecification,
    SUPPORTED_API_VERSION,
};

use self::{graph::DependencyGraph, store::DescriptorStore};

/// External source of package descriptors. Implementations perform the actual
/// transfer (git, in tests an in-memory registry); the resolution engine only
/// ever talks to this trait.
pub trait DescriptorSource {
    fn fetch_descriptor(
        &self,
        url: &RepositoryUrl,
        specification: &RevisionSpecification,
        path_override: Option<&Path>,
    ) -> anyhow::Result<FetchedDescriptor>;
}

#[derive(Debug, Clone)]
pub struct FetchedDescriptor {
    /// Commit the specification was resolved to by the fetch layer.
    pub commit_hash: String,
    pub manifest: Manifest,
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error(
        "descriptor of {url} {specification} declares api_version {found}, \
         this engine supports {}",
        SUPPORTED_API_VERSION
    )]
    UnsupportedApiVersion {
        url: RepositoryUrl,
        specification: RevisionSpecification,
        found: i64,
    },
    #[error(
        "root manifest declares api_version {found}, this engine supports {}",
        SUPPORTED_API_VERSION
    )]
    UnsupportedRootApiVersion { found: i64 },
    #[error("descriptor of {url} {specification} is unavailable: {source}")]
    DescriptorUnavailable {
        url: RepositoryUrl,
        specification: RevisionSpecification,
        #[source]
        source: anyhow::Error,
    },
    #[error("{}", format_conflicts(.0))]
    DependencyConflict(Vec<ProjectConflict>),
    #[error("{}", format_cycles(.0))]
    DependencyCycle(Vec<Vec<ProjectId>>),
}

fn format_conflicts(conflicts: &[ProjectConflict]) -> String {
    let mut out = String::new();
    for conflict in conflicts {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(
            out,
            "conflicting requests for project `{}`:",
            conflict.project_id
        );
        for request in &conflict.requests {
            let _ = write!(
                out,
                "\n  {} via {}",
                request.spec,
                format_chain(&request.chain)
            );
        }
    }
    out
}

fn format_cycles(cycles: &[Vec<ProjectId>]) -> String {
    let mut out = String::new();
    for cycle in cycles {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "dependency cycle: {}", format_chain(cycle));
    }
    out
}

fn format_chain(chain: &[ProjectId]) -> String {
    chain
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Resolve the full dependency closure of a root manifest.
///
/// Builds the transitive dependency graph through the store, reconciles every
/// project requested from more than one place, rejects cycles and freezes the
/// result. Partial closures are never returned: the first phase that fails
/// terminates the run with all of its diagnostics collected.
pub async fn resolve<S>(
    root: &Manifest,
    store: &Arc<DescriptorStore<S>>,
) -> Result<ResolvedClosure, ResolutionError>
where
    S: DescriptorSource + Send + Sync + 'static,
{
    if root.api_version != SUPPORTED_API_VERSION {
        return Err(ResolutionError::UnsupportedRootApiVersion {
            found: root.api_version,
        });
    }
    let graph = DependencyGraph::build(root.clone(), store).await?;
    let winners = conflict::resolve_conflicts(&graph)?;
    finalize::finalize(&graph, winners)
}
