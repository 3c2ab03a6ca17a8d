use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::model::recipes::{
    closure::{ClosureEntry, ResolvedClosure},
    DepSpec, ProjectId,
};

use super::{graph::DependencyGraph, ResolutionError};

enum Mark {
    InProgress,
    Done,
}

/// Classify loops, order the graph and freeze the closure.
///
/// Depth-first traversal in stable order; every back-edge to a node still on
/// the traversal stack is reported as a full cycle path. On success the
/// post-order visit sequence is the topological order (dependencies before
/// dependents), with the root dropped from the entry set.
pub(super) fn finalize(
    graph: &DependencyGraph,
    winners: BTreeMap<ProjectId, DepSpec>,
) -> Result<ResolvedClosure, ResolutionError> {
    let mut marks: HashMap<ProjectId, Mark> = HashMap::new();
    let mut path: Vec<ProjectId> = Vec::new();
    let mut order: Vec<ProjectId> = Vec::new();
    let mut cycles: Vec<Vec<ProjectId>> = Vec::new();

    visit(
        graph,
        graph.root(),
        &mut marks,
        &mut path,
        &mut order,
        &mut cycles,
    );

    if !cycles.is_empty() {
        return Err(ResolutionError::DependencyCycle(cycles));
    }

    // The root closes the post-order; it is not an entry of the closure.
    order.pop();

    let entries = order
        .iter()
        .map(|id| {
            let node = graph.node(id);
            let spec = &winners[id];
            let entry = ClosureEntry {
                project_id: id.clone(),
                url: spec.url.clone(),
                specification: spec.specification.clone(),
                path_override: spec.path_override.clone(),
                commit_hash: node
                    .commit_hash
                    .clone()
                    .expect("dependency nodes always carry a commit hash"),
                recipes_path: node.manifest.recipes_path.clone(),
                dependencies: node
                    .manifest
                    .deps
                    .iter()
                    .map(|dep| dep.project_id.clone())
                    .collect::<BTreeSet<_>>(),
                stable: !spec.specification.revision.is_arbitrary(),
            };
            (id.clone(), entry)
        })
        .collect();

    Ok(ResolvedClosure {
        root: graph.root().clone(),
        entries,
        order,
    })
}

fn visit(
    graph: &DependencyGraph,
    id: &ProjectId,
    marks: &mut HashMap<ProjectId, Mark>,
    path: &mut Vec<ProjectId>,
    order: &mut Vec<ProjectId>,
    cycles: &mut Vec<Vec<ProjectId>>,
) {
    path.push(id.clone());
    marks.insert(id.clone(), Mark::InProgress);

    for target in dep_ids(graph, id) {
        match marks.get(&target) {
            Some(Mark::InProgress) => {
                let start = path
                    .iter()
                    .position(|node| node == &target)
                    .expect("in-progress nodes are on the path");
                let mut cycle = path[start..].to_vec();
                cycle.push(target.clone());
                cycles.push(cycle);
            }
            Some(Mark::Done) => {}
            None => visit(graph, &target, marks, path, order, cycles),
        }
    }

    path.pop();
    marks.insert(id.clone(), Mark::Done);
    order.push(id.clone());
}

fn dep_ids(graph: &DependencyGraph, id: &ProjectId) -> Vec<ProjectId> {
    graph
        .node(id)
        .manifest
        .deps
        .iter()
        .map(|dep| dep.project_id.clone())
        .collect()
}
