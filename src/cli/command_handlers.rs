use log::{debug, info, warn};

use crate::{
    api::LockMode,
    fetch,
    git::cache::RecipeGitCache,
    model::recipes::{
        closure::{ClosureFile, ResolvedClosure},
        Manifest, ProjectId, SUPPORTED_API_VERSION,
    },
    plan::FetchPlan,
    resolver::{self, store::DescriptorStore, ClosureFileSource, DescriptorSource},
};
use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Handler to fetch command
pub async fn do_fetch(
    lock_mode: LockMode,
    cache: &Arc<RecipeGitCache>,
    root: &Path,
    manifest_file_name: &Path,
    closure_file_name: &Path,
) -> Result<(), Box<dyn Error>> {
    let closure = do_resolve(lock_mode, cache, root, manifest_file_name, closure_file_name).await?;

    let plan = FetchPlan::for_closure(&closure, cache.workspaces_path());
    let materializer = Arc::clone(cache);
    let workspaces = cache.workspaces_path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        fetch::materialize(&plan, materializer.as_ref(), &workspaces)
    })
    .await
    .expect("materialization task panicked")?;

    Ok(())
}

/// Handler to resolve command
/// Loads the root manifest, resolves the dependency closure and writes the
/// closure file
pub async fn do_resolve(
    lock_mode: LockMode,
    cache: &Arc<RecipeGitCache>,
    root: &Path,
    manifest_file_name: &Path,
    closure_file_name: &Path,
) -> Result<ResolvedClosure, Box<dyn Error>> {
    let manifest = Manifest::from_file(&root.join(manifest_file_name))?;

    let closure_file_path = root.join(closure_file_name);

    let (old_file, closure) = match (lock_mode, closure_file_path.exists()) {
        (LockMode::Locked, false) => return Err("Closure file does not exist".into()),

        (LockMode::Locked, true) => {
            let old_file = ClosureFile::from_file(&closure_file_path)?;
            let source = ClosureFileSource::new(Arc::clone(cache), old_file.clone(), true);
            debug!("Verifying closure file...");
            let closure = resolve_with(&manifest, Arc::new(source)).await?;
            (Some(old_file), closure)
        }

        (LockMode::Update, false) => {
            debug!("Generating closure file...");
            (None, resolve_with(&manifest, Arc::clone(cache)).await?)
        }

        (LockMode::Update, true) => {
            let old_file = ClosureFile::from_file(&closure_file_path)?;
            let source = ClosureFileSource::new(Arc::clone(cache), old_file.clone(), false);
            debug!("Updating closure file...");
            let closure = resolve_with(&manifest, Arc::new(source)).await?;
            (Some(old_file), closure)
        }

        (LockMode::Recreate, _) => {
            debug!("Generating closure file...");
            (None, resolve_with(&manifest, Arc::clone(cache)).await?)
        }
    };

    for entry in closure.entries.values() {
        if !entry.stable {
            warn!(
                "Dependency {} is not pinned to a revision; the resolved commit {} is unstable",
                entry.project_id, entry.commit_hash
            );
        }
    }

    let new_file = closure.to_file();
    if old_file.is_some_and(|old_file| old_file == new_file) {
        debug!("Closure file is up to date");
    } else {
        std::fs::write(&closure_file_path, new_file.to_string()?)?;
        info!("Wrote closure file to {}", closure_file_path.display());
    }

    Ok(closure)
}

/// Handler to plan command
/// Resolves the closure (reusing the closure file when present) and prints the
/// materialization actions in dependency order without executing them
pub async fn do_plan(
    cache: &Arc<RecipeGitCache>,
    root: &Path,
    manifest_file_name: &Path,
    closure_file_name: &Path,
) -> Result<(), Box<dyn Error>> {
    let manifest = Manifest::from_file(&root.join(manifest_file_name))?;

    let closure_file_path = root.join(closure_file_name);
    let closure = if closure_file_path.exists() {
        let old_file = ClosureFile::from_file(&closure_file_path)?;
        let source = ClosureFileSource::new(Arc::clone(cache), old_file, false);
        resolve_with(&manifest, Arc::new(source)).await?
    } else {
        resolve_with(&manifest, Arc::clone(cache)).await?
    };

    let plan = FetchPlan::for_closure(&closure, cache.workspaces_path());
    for action in &plan.actions {
        println!("{action}");
    }

    Ok(())
}

async fn resolve_with<S>(
    manifest: &Manifest,
    source: Arc<S>,
) -> Result<ResolvedClosure, resolver::ResolutionError>
where
    S: DescriptorSource + Send + Sync + 'static,
{
    let store = Arc::new(DescriptorStore::new(source));
    resolver::resolve(manifest, &store).await
}

/// Handler to init command
pub fn do_init(
    root: &Path,
    name: Option<String>,
    manifest_file_name: &Path,
) -> Result<(), Box<dyn Error>> {
    let project_id = build_project_id(name, root)?;
    let manifest = Manifest {
        api_version: SUPPORTED_API_VERSION,
        engine_revision: None,
        project_id,
        recipes_path: PathBuf::from("recipes"),
        deps: vec![],
    };
    create_manifest_file(manifest, &root.join(manifest_file_name))
}

/// Handler to clean command
/// Deletes the closure file
pub fn do_clean(root: &Path, closure_file_name: &Path) -> Result<(), Box<dyn Error>> {
    let closure_file_path = root.join(closure_file_name);

    info!("Cleaning closure file {}.", closure_file_path.display());
    match std::fs::remove_file(&closure_file_path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(
                "{} is already removed, nothing to do",
                closure_file_path.display()
            );
            Ok(())
        }
        otherwise => otherwise,
    }?;

    Ok(())
}

pub fn do_clear_cache(cache: &RecipeGitCache) -> Result<(), Box<dyn Error>> {
    cache.clear()?;
    Ok(())
}

/// Name if present otherwise attempt to extract from directory
fn build_project_id(name: Option<String>, path: &Path) -> Result<ProjectId, Box<dyn Error>> {
    match name {
        Some(name) => Ok(ProjectId::new(name)),
        None => match path.canonicalize()?.file_name() {
            Some(dir) => Ok(ProjectId::new(dir.to_string_lossy().to_string())),
            None => {
                Err("Project id not given and could not convert location to directory name".into())
            }
        },
    }
}

fn create_manifest_file(manifest: Manifest, path: &Path) -> Result<(), Box<dyn Error>> {
    if path.exists() {
        return Err(format!("File already exists: {}", path.display()).into());
    }
    std::fs::write(path, toml::to_string_pretty(&manifest.into_toml())?)?;
    Ok(())
}
