use std::{path::Path, sync::Arc};

use anyhow::bail;
use log::debug;

use crate::model::recipes::{
    closure::ClosureFile, RepositoryUrl, Revision, RevisionSpecification,
};

use super::{DescriptorSource, FetchedDescriptor};

/// Resolves descriptors against a previously written closure file.
///
/// A request recorded in the file is re-fetched at its recorded commit, so
/// repeated runs stay on the pinned history; a drifted commit is an error. In
/// locked mode a request that is missing from the file is an error as well.
pub struct ClosureFileSource<S> {
    inner: Arc<S>,
    closure_file: ClosureFile,
    locked: bool,
}

impl<S> ClosureFileSource<S> {
    pub fn new(inner: Arc<S>, closure_file: ClosureFile, locked: bool) -> Self {
        Self {
            inner,
            closure_file,
            locked,
        }
    }
}

impl<S> DescriptorSource for ClosureFileSource<S>
where
    S: DescriptorSource,
{
    fn fetch_descriptor(
        &self,
        url: &RepositoryUrl,
        specification: &RevisionSpecification,
        path_override: Option<&Path>,
    ) -> anyhow::Result<FetchedDescriptor> {
        let dependency = self.closure_file.find(url, specification, path_override);
        match dependency {
            Some(dependency) => {
                debug!(
                    "Dependency {} {} found in the closure file with commit {}",
                    url, specification, dependency.commit_hash
                );
                let recorded = RevisionSpecification {
                    revision: Revision::pinned(dependency.commit_hash.as_str()),
                    branch: None,
                };
                let resolved = self
                    .inner
                    .fetch_descriptor(url, &recorded, path_override)?;
                if resolved.commit_hash != dependency.commit_hash {
                    bail!(
                        "Commit hash of {} {} changed: the closure file specifies {}, but the actual commit hash is {}",
                        url,
                        specification,
                        dependency.commit_hash,
                        resolved.commit_hash
                    );
                }
                Ok(resolved)
            }
            None if self.locked => {
                bail!(
                    "No entry for {} {} in the closure file",
                    url,
                    specification
                );
            }
            None => {
                debug!(
                    "Dependency {} {} not found in the closure file",
                    url, specification
                );
                self.inner
                    .fetch_descriptor(url, specification, path_override)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, path::PathBuf};

    use crate::model::recipes::{closure::LockedDependency, Manifest, ProjectId};

    use super::*;

    struct StubSource;

    impl DescriptorSource for StubSource {
        fn fetch_descriptor(
            &self,
            _url: &RepositoryUrl,
            specification: &RevisionSpecification,
            _path_override: Option<&Path>,
        ) -> anyhow::Result<FetchedDescriptor> {
            let commit_hash = match &specification.revision {
                Revision::Pinned { revision } => revision.clone(),
                Revision::Arbitrary => "branch-head".to_string(),
            };
            Ok(FetchedDescriptor {
                commit_hash,
                manifest: Manifest {
                    api_version: 1,
                    engine_revision: None,
                    project_id: ProjectId::from("build"),
                    recipes_path: PathBuf::from("recipes"),
                    deps: vec![],
                },
            })
        }
    }

    fn closure_file(commit_hash: &str) -> ClosureFile {
        ClosureFile {
            root: ProjectId::from("root"),
            dependencies: vec![LockedDependency {
                project_id: ProjectId::from("build"),
                url: "example.com/org/build".parse().unwrap(),
                specification: RevisionSpecification {
                    revision: Revision::Arbitrary,
                    branch: Some("main".to_owned()),
                },
                path_override: None,
                commit_hash: commit_hash.to_string(),
                recipes_path: PathBuf::from("recipes"),
                dependencies: BTreeSet::new(),
                stable: false,
            }],
        }
    }

    fn floating_spec() -> RevisionSpecification {
        RevisionSpecification {
            revision: Revision::Arbitrary,
            branch: Some("main".to_owned()),
        }
    }

    #[test]
    fn recorded_entry_is_reused_at_its_commit() {
        let source = ClosureFileSource::new(Arc::new(StubSource), closure_file("abc123"), false);
        let fetched = source
            .fetch_descriptor(
                &"example.com/org/build".parse().unwrap(),
                &floating_spec(),
                None,
            )
            .unwrap();
        assert_eq!(fetched.commit_hash, "abc123");
    }

    #[test]
    fn drifted_commit_is_an_error() {
        // The stub resolves an arbitrary revision to "branch-head", which can
        // never match a pinned request, so drift requires a pinned entry that
        // the stub refuses to honor. Simulate it with a source that always
        // returns a fixed commit.
        struct DriftingSource;
        impl DescriptorSource for DriftingSource {
            fn fetch_descriptor(
                &self,
                _url: &RepositoryUrl,
                _specification: &RevisionSpecification,
                _path_override: Option<&Path>,
            ) -> anyhow::Result<FetchedDescriptor> {
                Ok(FetchedDescriptor {
                    commit_hash: "something-else".to_string(),
                    manifest: Manifest {
                        api_version: 1,
                        engine_revision: None,
                        project_id: ProjectId::from("build"),
                        recipes_path: PathBuf::from("recipes"),
                        deps: vec![],
                    },
                })
            }
        }

        let source =
            ClosureFileSource::new(Arc::new(DriftingSource), closure_file("abc123"), false);
        let error = source
            .fetch_descriptor(
                &"example.com/org/build".parse().unwrap(),
                &floating_spec(),
                None,
            )
            .unwrap_err();
        assert!(error.to_string().contains("changed"));
    }

    #[test]
    fn locked_mode_rejects_unknown_requests() {
        let source = ClosureFileSource::new(Arc::new(StubSource), closure_file("abc123"), true);
        let error = source
            .fetch_descriptor(
                &"example.com/org/other".parse().unwrap(),
                &floating_spec(),
                None,
            )
            .unwrap_err();
        assert!(error.to_string().contains("No entry"));
    }

    #[test]
    fn update_mode_falls_through_for_unknown_requests() {
        let source = ClosureFileSource::new(Arc::new(StubSource), closure_file("abc123"), false);
        let fetched = source
            .fetch_descriptor(
                &"example.com/org/other".parse().unwrap(),
                &floating_spec(),
                None,
            )
            .unwrap();
        assert_eq!(fetched.commit_hash, "branch-head");
    }
}
