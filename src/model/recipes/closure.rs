use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::model::ParseError;

use super::{DepSpec, ProjectId, RepositoryUrl, Revision, RevisionSpecification};

/// Final output of a resolution run: one winning entry per reachable project,
/// in a dependency-before-dependent order. Immutable once finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClosure {
    pub root: ProjectId,
    pub entries: BTreeMap<ProjectId, ClosureEntry>,
    /// Topological order over `entries`. The root, which depends on
    /// everything, is implicit and last.
    pub order: Vec<ProjectId>,
}

impl ResolvedClosure {
    pub fn to_file(&self) -> ClosureFile {
        ClosureFile {
            root: self.root.clone(),
            dependencies: self
                .order
                .iter()
                .map(|id| LockedDependency::from(&self.entries[id]))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureEntry {
    pub project_id: ProjectId,
    pub url: RepositoryUrl,
    pub specification: RevisionSpecification,
    pub path_override: Option<PathBuf>,
    /// Commit the fetch layer resolved the specification to.
    pub commit_hash: String,
    /// Recipe source root of the project itself, relative to its checkout.
    pub recipes_path: PathBuf,
    pub dependencies: BTreeSet<ProjectId>,
    /// False when the project was requested without a pinned revision.
    pub stable: bool,
}

impl ClosureEntry {
    pub fn winning_spec(&self) -> DepSpec {
        DepSpec {
            project_id: self.project_id.clone(),
            url: self.url.clone(),
            specification: self.specification.clone(),
            path_override: self.path_override.clone(),
        }
    }
}

const VERSION: i64 = 1;

/// On-disk form of a resolved closure (`recipes.lock`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClosureFile {
    pub root: ProjectId,
    #[serde(default)]
    pub dependencies: Vec<LockedDependency>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct VersionedClosureFile<'a> {
    pub version: i64,
    #[serde(flatten)]
    pub content: &'a ClosureFile,
}

impl ClosureFile {
    pub fn from_file(file: &Path) -> Result<ClosureFile, ParseError> {
        ClosureFile::from_str(&std::fs::read_to_string(file)?)
    }

    pub fn from_str(s: &str) -> Result<ClosureFile, ParseError> {
        let mut table = toml::from_str::<toml::Table>(s)?;
        match table.remove("version") {
            Some(toml::Value::Integer(VERSION)) => {
                table.try_into::<ClosureFile>().map_err(Into::into)
            }
            Some(other) => Err(ParseError::UnsupportedClosureFileVersion(other)),
            None => Err(ParseError::MissingClosureFileVersion),
        }
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&VersionedClosureFile {
            version: VERSION,
            content: self,
        })
    }

    /// Look up the entry a request would have resolved to. A pinned request
    /// matches on its revision alone (the branch is informational once
    /// pinned); an unpinned request matches on its branch.
    pub fn find(
        &self,
        url: &RepositoryUrl,
        specification: &RevisionSpecification,
        path_override: Option<&Path>,
    ) -> Option<&LockedDependency> {
        self.dependencies.iter().find(|dependency| {
            if &dependency.url != url || dependency.path_override.as_deref() != path_override {
                return false;
            }
            match &specification.revision {
                revision @ Revision::Pinned { .. } => {
                    &dependency.specification.revision == revision
                }
                Revision::Arbitrary => {
                    dependency.specification.revision.is_arbitrary()
                        && dependency.specification.branch == specification.branch
                }
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LockedDependency {
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub url: RepositoryUrl,
    #[serde(flatten)]
    pub specification: RevisionSpecification,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path_override: Option<PathBuf>,
    pub commit_hash: String,
    pub recipes_path: PathBuf,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub dependencies: BTreeSet<ProjectId>,
    #[serde(skip_serializing_if = "is_true", default = "default_true")]
    pub stable: bool,
}

fn is_true(stable: &bool) -> bool {
    *stable
}

fn default_true() -> bool {
    true
}

impl From<&ClosureEntry> for LockedDependency {
    fn from(entry: &ClosureEntry) -> Self {
        LockedDependency {
            project_id: entry.project_id.clone(),
            url: entry.url.clone(),
            specification: entry.specification.clone(),
            path_override: entry.path_override.clone(),
            commit_hash: entry.commit_hash.clone(),
            recipes_path: entry.recipes_path.clone(),
            dependencies: entry.dependencies.clone(),
            stable: entry.stable,
        }
    }
}

#[cfg(test)]
mod tests {
    use toml::toml;

    use crate::model::recipes::{Protocol, Revision};

    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn load_save_closure_file() {
        let text = toml::to_string_pretty(&toml! {
            version = 1
            root = "tools"

            [[dependencies]]
            project_id = "build"
            host = "example.com"
            path = "org/build"
            protocol = "https"
            revision = "1.0.0"
            branch = "main"
            commit_hash = "hash1"
            recipes_path = "recipes"

            [[dependencies]]
            project_id = "infra"
            host = "example.com"
            path = "org/infra"
            path_override = "recipe_subtree"
            commit_hash = "hash2"
            recipes_path = "."
            dependencies = ["build"]
            stable = false
        })
        .unwrap();
        let data = ClosureFile {
            root: ProjectId::from("tools"),
            dependencies: vec![
                LockedDependency {
                    project_id: ProjectId::from("build"),
                    url: RepositoryUrl::from_str_protocol(
                        "example.com/org/build",
                        Some(Protocol::Https),
                    )
                    .unwrap(),
                    specification: RevisionSpecification {
                        revision: Revision::pinned("1.0.0"),
                        branch: Some("main".to_owned()),
                    },
                    path_override: None,
                    commit_hash: "hash1".to_string(),
                    recipes_path: PathBuf::from("recipes"),
                    dependencies: BTreeSet::new(),
                    stable: true,
                },
                LockedDependency {
                    project_id: ProjectId::from("infra"),
                    url: "example.com/org/infra".parse().unwrap(),
                    specification: RevisionSpecification::default(),
                    path_override: Some(PathBuf::from("recipe_subtree")),
                    commit_hash: "hash2".to_string(),
                    recipes_path: PathBuf::from("."),
                    dependencies: BTreeSet::from([ProjectId::from("build")]),
                    stable: false,
                },
            ],
        };
        let parsed = ClosureFile::from_str(&text).unwrap();
        let formatted = data.to_string().unwrap();
        assert_eq!(parsed, data);
        assert_eq!(formatted, text);
    }

    #[test]
    fn load_closure_file_without_version() {
        let text = toml::to_string_pretty(&toml! {
            root = "tools"
        })
        .unwrap();
        assert!(matches!(
            ClosureFile::from_str(&text),
            Err(ParseError::MissingClosureFileVersion)
        ));
    }

    #[test]
    fn load_closure_file_newer_version() {
        let text = toml::to_string_pretty(&toml! {
            version = 9
            root = "tools"
        })
        .unwrap();
        assert!(matches!(
            ClosureFile::from_str(&text),
            Err(ParseError::UnsupportedClosureFileVersion(_))
        ));
    }
}
