use std::collections::BTreeMap;

use log::debug;

use crate::model::recipes::{DepSpec, ProjectId, Revision};

use super::{
    graph::{DependencyGraph, GraphNode},
    ResolutionError,
};

/// One irreconcilable project together with every request that named it.
#[derive(Debug)]
pub struct ProjectConflict {
    pub project_id: ProjectId,
    pub requests: Vec<ConflictingRequest>,
}

#[derive(Debug)]
pub struct ConflictingRequest {
    /// Requester chain from the root down to the node that declared the spec.
    pub chain: Vec<ProjectId>,
    pub spec: DepSpec,
}

/// Select the winning spec for every non-root project of the graph.
///
/// Nodes are reconciled in discovery order and all conflicts are collected
/// before the run fails, so a deep graph reports every divergence at once
/// instead of one per run.
pub(super) fn resolve_conflicts(
    graph: &DependencyGraph,
) -> Result<BTreeMap<ProjectId, DepSpec>, ResolutionError> {
    let mut winners = BTreeMap::new();
    let mut conflicts = Vec::new();

    for id in graph.discovery_order() {
        if id == graph.root() {
            continue;
        }
        let node = graph.node(id);
        match reconcile(node) {
            Some(winner) => {
                if node.incoming.len() > 1 {
                    debug!(
                        "Merged {} requests for {} into {}",
                        node.incoming.len(),
                        id,
                        winner
                    );
                }
                winners.insert(id.clone(), winner);
            }
            None => conflicts.push(ProjectConflict {
                project_id: id.clone(),
                requests: node
                    .incoming
                    .iter()
                    .map(|edge| ConflictingRequest {
                        chain: graph.ancestor_chain(&edge.requester),
                        spec: edge.spec.clone(),
                    })
                    .collect(),
            }),
        }
    }

    if conflicts.is_empty() {
        Ok(winners)
    } else {
        Err(ResolutionError::DependencyConflict(conflicts))
    }
}

/// Reconciliation policy, applied in order:
///
/// 1. every request agrees on url, revision and path override — adopt the
///    first-discovered spec;
/// 2. requests differ only by branch while the revision is pinned — the pin
///    wins, the branch is informational;
/// 3. anything else is a genuine conflict. In particular two unpinned requests
///    naming different branches would float to different heads, so they are
///    never merged silently.
fn reconcile(node: &GraphNode) -> Option<DepSpec> {
    let first = &node.incoming[0].spec;
    let identity = first.fetch_identity();
    if !node
        .incoming
        .iter()
        .all(|edge| edge.spec.fetch_identity() == identity)
    {
        return None;
    }
    match &first.specification.revision {
        Revision::Pinned { .. } => Some(first.clone()),
        Revision::Arbitrary => {
            let branch = &first.specification.branch;
            node.incoming
                .iter()
                .all(|edge| &edge.spec.specification.branch == branch)
                .then(|| first.clone())
        }
    }
}
