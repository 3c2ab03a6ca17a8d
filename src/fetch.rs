use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use crate::{
    model::recipes::ProjectId,
    plan::{FetchPlan, Materializer},
};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to materialize {project_id}: {source}")]
    MaterializationFailed {
        project_id: ProjectId,
        #[source]
        source: anyhow::Error,
    },
    #[error("Bad output dir {0}")]
    BadOutputDir(String),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// Execute a fetch plan through the VCS collaborator, in plan order.
///
/// Collaborator failures are reported as `MaterializationFailed` and never
/// retried here; whatever retry policy applies belongs to the collaborator.
pub fn materialize<M: Materializer>(
    plan: &FetchPlan,
    materializer: &M,
    output_root: &Path,
) -> Result<(), FetchError> {
    info!("Materializing dependency closure...");

    if !output_root.exists() {
        std::fs::create_dir_all(output_root)?;
    }
    if !output_root.is_dir() {
        return Err(FetchError::BadOutputDir(
            output_root.to_str().unwrap_or("").to_string(),
        ));
    }

    for action in &plan.actions {
        // Checkout directories are keyed by commit and immutable once created.
        if action.target.exists() {
            debug!("Skipping {}. Already materialized", action.project_id);
            continue;
        }
        materializer
            .materialize(action)
            .map_err(|source| FetchError::MaterializationFailed {
                project_id: action.project_id.clone(),
                source,
            })?;
        info!(
            "Materialized {} with recipes at {}",
            action.project_id,
            action.recipes_root().display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex};

    use crate::plan::MaterializeAction;

    use super::*;

    use pretty_assertions::assert_eq;

    struct RecordingMaterializer {
        seen: Mutex<Vec<ProjectId>>,
    }

    impl Materializer for RecordingMaterializer {
        fn materialize(&self, action: &MaterializeAction) -> anyhow::Result<PathBuf> {
            self.seen.lock().unwrap().push(action.project_id.clone());
            Ok(action.target.clone())
        }
    }

    fn action(project_id: &str, target: PathBuf) -> MaterializeAction {
        MaterializeAction {
            project_id: ProjectId::from(project_id),
            url: format!("example.com/org/{project_id}").parse().unwrap(),
            commit_hash: format!("commit-{project_id}"),
            target,
            path_override: None,
            recipes_path: PathBuf::from("recipes"),
        }
    }

    #[test]
    fn actions_are_executed_in_plan_order() {
        let output_root = tempfile::tempdir().unwrap();
        let plan = FetchPlan {
            actions: vec![
                action("c", output_root.path().join("c/commit-c")),
                action("b", output_root.path().join("b/commit-b")),
            ],
        };
        let materializer = RecordingMaterializer {
            seen: Mutex::new(Vec::new()),
        };

        materialize(&plan, &materializer, output_root.path()).unwrap();

        assert_eq!(
            *materializer.seen.lock().unwrap(),
            vec![ProjectId::from("c"), ProjectId::from("b")]
        );
    }

    #[test]
    fn existing_checkouts_are_skipped() {
        let output_root = tempfile::tempdir().unwrap();
        let existing = output_root.path().join("c/commit-c");
        std::fs::create_dir_all(&existing).unwrap();
        let plan = FetchPlan {
            actions: vec![
                action("c", existing),
                action("b", output_root.path().join("b/commit-b")),
            ],
        };
        let materializer = RecordingMaterializer {
            seen: Mutex::new(Vec::new()),
        };

        materialize(&plan, &materializer, output_root.path()).unwrap();

        assert_eq!(
            *materializer.seen.lock().unwrap(),
            vec![ProjectId::from("b")]
        );
    }

    #[test]
    fn collaborator_failures_are_not_retried() {
        struct FailingMaterializer;
        impl Materializer for FailingMaterializer {
            fn materialize(&self, _action: &MaterializeAction) -> anyhow::Result<PathBuf> {
                anyhow::bail!("remote hung up")
            }
        }

        let output_root = tempfile::tempdir().unwrap();
        let plan = FetchPlan {
            actions: vec![action("b", output_root.path().join("b/commit-b"))],
        };

        let error = materialize(&plan, &FailingMaterializer, output_root.path()).unwrap_err();
        assert!(matches!(
            error,
            FetchError::MaterializationFailed { .. }
        ));
    }
}
