use std::{collections::HashMap, sync::Arc};

use log::debug;
use tokio::task::JoinSet;

use crate::model::recipes::{DepSpec, Manifest, ProjectId};

use super::{
    store::{DescriptorKey, DescriptorStore, StoredDescriptor},
    DescriptorSource, ResolutionError,
};

/// One recorded request for a project: who asked, and with what spec.
#[derive(Debug, Clone)]
pub struct IncomingEdge {
    pub requester: ProjectId,
    pub spec: DepSpec,
}

pub struct GraphNode {
    pub project_id: ProjectId,
    pub manifest: Arc<Manifest>,
    /// Commit the descriptor was extracted from. None for the root, which is
    /// read from the local checkout.
    pub commit_hash: Option<String>,
    /// Every edge pointing at this project, in discovery order.
    pub incoming: Vec<IncomingEdge>,
    /// The node that first requested this project. None for the root.
    pub first_parent: Option<ProjectId>,
}

/// Directed graph of every project reachable from the root.
///
/// Edges that close a loop (including edges back to the root id) are recorded
/// like any other; classifying them as cycles is the finalizer's job so that
/// conflicts and cycles can be diagnosed over the complete graph.
pub struct DependencyGraph {
    root: ProjectId,
    nodes: HashMap<ProjectId, GraphNode>,
    discovery_order: Vec<ProjectId>,
}

impl DependencyGraph {
    /// Breadth-first traversal from the root.
    ///
    /// Nodes are processed in first-discovered order and each node's deps in
    /// declaration order, so the graph shape is deterministic for identical
    /// inputs. Descriptor fetches of one BFS layer fan out in parallel and are
    /// joined before the next layer starts.
    pub(super) async fn build<S>(
        root: Manifest,
        store: &Arc<DescriptorStore<S>>,
    ) -> Result<Self, ResolutionError>
    where
        S: DescriptorSource + Send + Sync + 'static,
    {
        let root_id = root.project_id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(
            root_id.clone(),
            GraphNode {
                project_id: root_id.clone(),
                manifest: Arc::new(root),
                commit_hash: None,
                incoming: Vec::new(),
                first_parent: None,
            },
        );
        let mut discovery_order = vec![root_id.clone()];
        let mut frontier = vec![root_id.clone()];

        while !frontier.is_empty() {
            let mut edges: Vec<(ProjectId, DepSpec)> = Vec::new();
            for requester in &frontier {
                let manifest = Arc::clone(&nodes[requester].manifest);
                for dep in &manifest.deps {
                    edges.push((requester.clone(), dep.clone()));
                }
            }

            let mut discovered: Vec<(ProjectId, DepSpec, ProjectId)> = Vec::new();
            for (requester, dep) in &edges {
                let target = &dep.project_id;
                let known = nodes.contains_key(target)
                    || discovered.iter().any(|(id, _, _)| id == target);
                if !known {
                    discovered.push((target.clone(), dep.clone(), requester.clone()));
                }
            }

            let mut set = JoinSet::new();
            for (index, (_, spec, _)) in discovered.iter().enumerate() {
                let store = Arc::clone(store);
                let key = DescriptorKey::new(
                    spec.url.clone(),
                    spec.specification.clone(),
                    spec.path_override.clone(),
                );
                set.spawn(async move { (index, store.descriptor(&key).await) });
            }
            let mut results: Vec<Option<Result<StoredDescriptor, ResolutionError>>> =
                discovered.iter().map(|_| None).collect();
            while let Some(joined) = set.join_next().await {
                let (index, result) = joined.expect("descriptor fetch task panicked");
                results[index] = Some(result);
            }

            // Process the layer results in discovery order, not completion
            // order, so the first error of a run is stable as well.
            let mut next_frontier = Vec::with_capacity(discovered.len());
            for ((target, spec, first_parent), result) in discovered.into_iter().zip(results) {
                let stored = result.expect("one result per discovered project")?;
                if stored.manifest.project_id != target {
                    return Err(ResolutionError::DescriptorUnavailable {
                        url: spec.url.clone(),
                        specification: spec.specification.clone(),
                        source: anyhow::anyhow!(
                            "descriptor declares project_id `{}`, expected `{}`",
                            stored.manifest.project_id,
                            target
                        ),
                    });
                }
                debug!("Discovered {} at commit {}", target, stored.commit_hash);
                nodes.insert(
                    target.clone(),
                    GraphNode {
                        project_id: target.clone(),
                        manifest: stored.manifest,
                        commit_hash: Some(stored.commit_hash),
                        incoming: Vec::new(),
                        first_parent: Some(first_parent),
                    },
                );
                discovery_order.push(target.clone());
                next_frontier.push(target);
            }

            for (requester, dep) in edges {
                let node = nodes
                    .get_mut(&dep.project_id)
                    .expect("edge targets exist once the layer is processed");
                node.incoming.push(IncomingEdge {
                    requester,
                    spec: dep,
                });
            }

            frontier = next_frontier;
        }

        Ok(DependencyGraph {
            root: root_id,
            nodes,
            discovery_order,
        })
    }

    pub fn root(&self) -> &ProjectId {
        &self.root
    }

    pub fn node(&self, id: &ProjectId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn discovery_order(&self) -> &[ProjectId] {
        &self.discovery_order
    }

    /// Chain of first-discovery requesters from the root to `id` inclusive.
    /// This is the shortest explanation of why `id` is in the graph.
    pub fn ancestor_chain(&self, id: &ProjectId) -> Vec<ProjectId> {
        let mut chain = vec![id.clone()];
        let mut current = id;
        while let Some(parent) = &self.nodes[current].first_parent {
            chain.push(parent.clone());
            current = parent;
        }
        chain.reverse();
        chain
    }
}
