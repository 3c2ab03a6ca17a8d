use std::{
    path::{Path, PathBuf},
    str::Utf8Error,
};

use git2::{Oid, Repository, ResetType};
use log::{debug, warn};
use thiserror::Error;

use crate::model::recipes::{Manifest, Revision, RevisionSpecification, MANIFEST_FILE};

use super::cache::RecipeGitCache;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Error while performing revparse of {0} for commit {1}: {2}")]
    Revparse(String, String, git2::Error),
    #[error("Git error: {0}")]
    GitError(#[from] git2::Error),
    #[error("Error while decoding utf8 bytes from blob")]
    BlobRead(#[from] Utf8Error),
    #[error("Error while parsing descriptor")]
    Parsing(#[from] crate::model::ParseError),
    #[error("Bad git object kind {kind} found for {commit_hash} (expected blob)")]
    BadObjectKind { kind: String, commit_hash: String },
    #[error("Missing {path} for {commit_hash}")]
    MissingDescriptor { commit_hash: String, path: String },
    #[error("Branch {branch} was not found.")]
    BranchNotFound { branch: String },
    #[error("Revision {revision} does not belong to the branch {branch}.")]
    RevisionNotOnBranch { revision: String, branch: String },
    #[error("Worktree with name {name} already exists at {existing_path} but we need it at {wanted_path}")]
    WorktreeExists {
        name: String,
        existing_path: String,
        wanted_path: String,
    },
    #[error("Error while canonicalizing path {path}: {error}")]
    Canonicalization { path: String, error: std::io::Error },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

pub struct RecipeGitRepository<'a> {
    cache: &'a RecipeGitCache,
    git_repo: Repository,
}

impl<'a> RecipeGitRepository<'a> {
    pub fn new(cache: &'a RecipeGitCache, git_repo: Repository) -> RecipeGitRepository<'a> {
        RecipeGitRepository { cache, git_repo }
    }

    pub fn fetch(&self) -> anyhow::Result<()> {
        let mut remote = self.git_repo.find_remote("origin")?;
        let refspecs: Vec<String> = remote
            .refspecs()
            .filter_map(|refspec| refspec.str().map(|s| s.to_string()))
            .collect();
        remote.fetch(&refspecs, Some(&mut self.cache.fetch_options()?), None)?;
        Ok(())
    }

    /// Bring the objects a specification needs into the local clone. A pinned
    /// revision that is already present costs nothing; an unpinned one always
    /// refreshes the remote heads.
    pub fn fetch_specification(
        &self,
        specification: &RevisionSpecification,
    ) -> anyhow::Result<()> {
        match &specification.revision {
            Revision::Pinned { revision } => self.fetch_commit(revision),
            Revision::Arbitrary => self.fetch(),
        }
    }

    pub fn fetch_commit(&self, commit_hash: &str) -> anyhow::Result<()> {
        if let Ok(oid) = Oid::from_str(commit_hash) {
            if self.git_repo.find_commit(oid).is_ok() {
                return Ok(());
            }
        }
        let mut remote = self.git_repo.find_remote("origin")?;

        if let Err(error) =
            remote.fetch(&[commit_hash], Some(&mut self.cache.fetch_options()?), None)
        {
            warn!(
                "Failed to fetch a single commit {}, falling back to a full fetch: {}",
                commit_hash, error
            );
            self.fetch()?;
        }

        Ok(())
    }

    /// Read and decode the package descriptor blob at `commit_hash`, honoring
    /// a path override. A repository without a descriptor at the requested
    /// location is an error, not an implicit leaf.
    pub fn extract_manifest(
        &self,
        commit_hash: &str,
        path_override: Option<&Path>,
    ) -> Result<Manifest, RepoError> {
        let descriptor_path = match path_override {
            Some(path_override) => format!("{}/{}", path_override.display(), MANIFEST_FILE),
            None => MANIFEST_FILE.to_string(),
        };
        debug!("Extracting {descriptor_path} at {commit_hash}");

        let result = self
            .git_repo
            .revparse_single(&format!("{commit_hash}:{descriptor_path}"));

        match result {
            Err(e) if e.code() == git2::ErrorCode::NotFound => Err(RepoError::MissingDescriptor {
                commit_hash: commit_hash.to_owned(),
                path: descriptor_path,
            }),
            Err(e) => Err(RepoError::Revparse(
                descriptor_path,
                commit_hash.to_owned(),
                e,
            )),
            Ok(obj) => match obj.kind() {
                Some(git2::ObjectType::Blob) => {
                    let blob = obj.peel_to_blob()?;
                    let content = std::str::from_utf8(blob.content())?;
                    let manifest = Manifest::from_toml_str(content)?;

                    Ok(manifest)
                }
                Some(kind) => Err(RepoError::BadObjectKind {
                    kind: kind.to_string(),
                    commit_hash: commit_hash.to_owned(),
                }),
                None => Err(RepoError::MissingDescriptor {
                    commit_hash: commit_hash.to_owned(),
                    path: descriptor_path,
                }),
            },
        }
    }

    pub fn resolve_commit_hash(
        &self,
        specification: &RevisionSpecification,
    ) -> Result<String, RepoError> {
        let RevisionSpecification { branch, revision } = specification;
        let oid = match (branch, revision) {
            (None, Revision::Arbitrary) => self.commit_hash_for_obj_str("HEAD")?,
            (None, Revision::Pinned { revision }) => self.commit_hash_for_obj_str(revision)?,
            (Some(branch), Revision::Arbitrary) => self
                .commit_hash_for_obj_str(&format!("origin/{branch}"))
                .map_err(|_| RepoError::BranchNotFound {
                    branch: branch.to_owned(),
                })?,
            (Some(branch), Revision::Pinned { revision }) => {
                let branch_commit = self
                    .commit_hash_for_obj_str(&format!("origin/{branch}"))
                    .map_err(|_| RepoError::BranchNotFound {
                        branch: branch.to_owned(),
                    })?;
                let revision_commit = self.commit_hash_for_obj_str(revision)?;
                if self.is_ancestor(revision_commit, branch_commit)? {
                    revision_commit
                } else {
                    return Err(RepoError::RevisionNotOnBranch {
                        revision: revision.to_owned(),
                        branch: branch.to_owned(),
                    });
                }
            }
        };
        Ok(oid.to_string())
    }

    pub fn create_worktree(
        &self,
        name: &str,
        target: &Path,
        commit_hash: &str,
    ) -> Result<PathBuf, RepoError> {
        if let Some(parent) = target.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        debug!("Finding worktree {name}.");

        match self.git_repo.find_worktree(name) {
            Ok(worktree) => {
                let canonical_existing_path = worktree.path().canonicalize().map_err(|e| {
                    RepoError::Canonicalization {
                        path: worktree.path().to_string_lossy().to_string(),
                        error: e,
                    }
                })?;

                let canonical_wanted_path =
                    target
                        .canonicalize()
                        .map_err(|e| RepoError::Canonicalization {
                            path: target.to_string_lossy().to_string(),
                            error: e,
                        })?;

                if canonical_existing_path != canonical_wanted_path {
                    return Err(RepoError::WorktreeExists {
                        name: name.to_string(),
                        existing_path: worktree.path().to_str().unwrap_or("").to_string(),
                        wanted_path: target.to_str().unwrap_or("").to_string(),
                    });
                } else {
                    log::info!(
                        "Found existing worktree {} at {}.",
                        name,
                        canonical_wanted_path.to_string_lossy()
                    );
                }
            }
            Err(_) => {
                log::info!(
                    "Creating new worktree {} at {}.",
                    name,
                    target.to_string_lossy()
                );

                self.git_repo.worktree(name, target, None)?;
            }
        };

        let worktree_repo = Repository::open(target)?;
        let worktree_head_object = worktree_repo.revparse_single(commit_hash)?;

        worktree_repo.reset(&worktree_head_object, ResetType::Hard, None)?;

        Ok(target.to_path_buf())
    }

    fn commit_hash_for_obj_str(&self, str: &str) -> Result<Oid, RepoError> {
        Ok(self.git_repo.revparse_single(str)?.peel_to_commit()?.id())
    }

    // Check if `a` is an ancestor of `b`
    fn is_ancestor(&self, a: Oid, b: Oid) -> Result<bool, RepoError> {
        Ok(self.git_repo.merge_base(a, b)? == a)
    }
}
