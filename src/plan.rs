use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use crate::model::recipes::{closure::ResolvedClosure, ProjectId, RepositoryUrl};

/// One materialization step: check out `url` at `commit_hash` into `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeAction {
    pub project_id: ProjectId,
    pub url: RepositoryUrl,
    pub commit_hash: String,
    /// Checkout directory of the whole repository.
    pub target: PathBuf,
    /// Subtree of the checkout the dependency is rooted at, if any.
    pub path_override: Option<PathBuf>,
    /// Recipe source root of the project, relative to its dependency root.
    pub recipes_path: PathBuf,
}

impl MaterializeAction {
    /// Directory the recipe sources of this dependency live in once the
    /// checkout exists.
    pub fn recipes_root(&self) -> PathBuf {
        let mut root = self.target.clone();
        if let Some(path_override) = &self.path_override {
            root.push(path_override);
        }
        root.push(&self.recipes_path);
        root
    }
}

impl Display for MaterializeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}@{} -> {}",
            self.project_id,
            self.url,
            self.commit_hash,
            self.target.display()
        )
    }
}

/// Ordered materialization plan for a resolved closure.
///
/// Pure transformation, no I/O. Actions follow the closure's topological
/// order, so a dependency is always materialized before any dependent that
/// might reference files within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub actions: Vec<MaterializeAction>,
}

impl FetchPlan {
    pub fn for_closure(closure: &ResolvedClosure, output_root: &Path) -> FetchPlan {
        let actions = closure
            .order
            .iter()
            .map(|id| {
                let entry = &closure.entries[id];
                MaterializeAction {
                    project_id: id.clone(),
                    url: entry.url.clone(),
                    commit_hash: entry.commit_hash.clone(),
                    target: output_root.join(id.as_str()).join(&entry.commit_hash),
                    path_override: entry.path_override.clone(),
                    recipes_path: entry.recipes_path.clone(),
                }
            })
            .collect();
        FetchPlan { actions }
    }
}

/// External VCS collaborator that executes a single action. Failures are
/// surfaced to the caller and never retried by the core.
pub trait Materializer {
    fn materialize(&self, action: &MaterializeAction) -> anyhow::Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use crate::model::recipes::{
        closure::ClosureEntry, RevisionSpecification,
    };

    use super::*;

    use pretty_assertions::assert_eq;

    fn entry(project_id: &str, path_override: Option<&str>) -> ClosureEntry {
        ClosureEntry {
            project_id: ProjectId::from(project_id),
            url: format!("example.com/org/{project_id}").parse().unwrap(),
            specification: RevisionSpecification::default(),
            path_override: path_override.map(PathBuf::from),
            commit_hash: format!("commit-{project_id}"),
            recipes_path: PathBuf::from("recipes"),
            dependencies: BTreeSet::new(),
            stable: true,
        }
    }

    fn closure() -> ResolvedClosure {
        // b depends on c; topological order puts c first.
        let mut c = entry("c", Some("subtree"));
        c.recipes_path = PathBuf::from(".");
        let mut b = entry("b", None);
        b.dependencies = BTreeSet::from([ProjectId::from("c")]);
        ResolvedClosure {
            root: ProjectId::from("root"),
            entries: BTreeMap::from([
                (ProjectId::from("b"), b),
                (ProjectId::from("c"), c),
            ]),
            order: vec![ProjectId::from("c"), ProjectId::from("b")],
        }
    }

    #[test]
    fn actions_follow_topological_order() {
        let plan = FetchPlan::for_closure(&closure(), Path::new("/deps"));
        let order: Vec<&str> = plan
            .actions
            .iter()
            .map(|action| action.project_id.as_str())
            .collect();
        assert_eq!(order, vec!["c", "b"]);
        for action in &plan.actions {
            for dependency in &closure().entries[&action.project_id].dependencies {
                let position = |id: &ProjectId| {
                    plan.actions
                        .iter()
                        .position(|a| &a.project_id == id)
                        .unwrap()
                };
                assert!(position(dependency) < position(&action.project_id));
            }
        }
    }

    #[test]
    fn target_is_keyed_by_project_and_commit() {
        let plan = FetchPlan::for_closure(&closure(), Path::new("/deps"));
        assert_eq!(plan.actions[1].target, PathBuf::from("/deps/b/commit-b"));
    }

    #[test]
    fn recipes_root_honors_path_override() {
        let plan = FetchPlan::for_closure(&closure(), Path::new("/deps"));
        assert_eq!(
            plan.actions[0].recipes_root(),
            PathBuf::from("/deps/c/commit-c/subtree/.")
        );
        assert_eq!(
            plan.actions[1].recipes_root(),
            PathBuf::from("/deps/b/commit-b/recipes")
        );
    }
}
