//! Projects are the directories under `<workdir>/projects`.
//!
//! A project may carry a `.deploy/` directory:
//!
//! ```text
//! .deploy/bin/deploy               required to deploy, run with DEPLOY_ENV and DEPLOY_USER
//! .deploy/bin/checkout_overwrite   replaces the built-in checkout script
//! .deploy/config/deploy_envs       one environment name per line
//! .deploy/config/readme.html       shown on the project page
//! ```

mod branch_cache;

pub use branch_cache::DefaultBranchCache;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::errors::{PployError, Result};
use crate::git;
use crate::locks::{Lock, LockTable};
use crate::workdir::Workdir;

pub const DEPLOY_SCRIPT: &str = ".deploy/bin/deploy";
pub const CHECKOUT_OVERRIDE_SCRIPT: &str = ".deploy/bin/checkout_overwrite";
const DEPLOY_ENVS_FILE: &str = ".deploy/config/deploy_envs";
const README_FILE: &str = ".deploy/config/readme.html";

/// Used when a project has no `deploy_envs` file or it lists nothing.
pub fn default_deploy_envs() -> Vec<String> {
    vec!["staging".to_string(), "production".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub lock: Option<Lock>,
    pub deploy_envs: Vec<String>,
    pub readme: String,
    pub default_branch: String,
}

impl Project {
    fn bare(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lock: None,
            deploy_envs: Vec::new(),
            readme: String::new(),
            default_branch: String::new(),
        }
    }
}

/// Maps project names to directories and per-project metadata.
pub struct ProjectResolver {
    workdir: Workdir,
    locks: Arc<LockTable>,
    branches: DefaultBranchCache,
}

impl ProjectResolver {
    pub fn new(workdir: Workdir, locks: Arc<LockTable>) -> Self {
        Self {
            workdir,
            locks,
            branches: DefaultBranchCache::default(),
        }
    }

    /// The project's working directory, if `name` names an existing project.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let not_found = || PployError::ProjectNotFound {
            name: name.to_string(),
        };
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(not_found());
        }
        let dir = self.workdir.project_dir(name);
        if !dir.is_dir() {
            return Err(not_found());
        }
        Ok(dir)
    }

    /// Every project with its current lock, sorted by name.
    pub fn list(&self) -> Result<Vec<Project>> {
        let now = Utc::now();
        let names = self.workdir.project_names()?;
        Ok(names
            .into_iter()
            .map(|name| Project {
                lock: self.locks.check(&name, now),
                ..Project::bare(&name)
            })
            .collect())
    }

    /// A project with readme, deploy envs, lock and default branch filled in.
    /// Metadata that cannot be read is left empty and logged.
    pub async fn full(&self, name: &str) -> Result<Project> {
        let dir = self.resolve(name)?;
        let readme = read_readme(&dir).await.unwrap_or_else(|e| {
            tracing::warn!(project = name, "failed to read readme: {}", e);
            String::new()
        });
        let deploy_envs = read_deploy_envs(&dir).await.unwrap_or_else(|e| {
            tracing::warn!(project = name, "failed to read deploy envs: {}", e);
            default_deploy_envs()
        });
        let default_branch = self.default_branch(name).await.unwrap_or_else(|e| {
            tracing::warn!(project = name, "failed to determine default branch: {}", e);
            String::new()
        });
        Ok(Project {
            name: name.to_string(),
            lock: self.locks.check(name, Utc::now()),
            deploy_envs,
            readme,
            default_branch,
        })
    }

    pub async fn deploy_envs(&self, name: &str) -> Result<Vec<String>> {
        read_deploy_envs(&self.resolve(name)?).await
    }

    pub async fn readme(&self, name: &str) -> Result<String> {
        read_readme(&self.resolve(name)?).await
    }

    /// Cached default branch. Computed from `origin/HEAD` when the clone
    /// recorded it, otherwise by asking the remote.
    pub async fn default_branch(&self, name: &str) -> Result<String> {
        if let Some(branch) = self.branches.get(name) {
            return Ok(branch);
        }
        let dir = self.resolve(name)?;

        let refs_dir = dir.clone();
        let from_refs = tokio::task::spawn_blocking(move || git::default_branch_from_refs(&refs_dir))
            .await
            .map_err(|e| anyhow::anyhow!("default branch lookup panicked: {}", e))??;
        let branch = match from_refs {
            Some(branch) => branch,
            None => git::default_branch_from_remote(&dir).await?,
        };

        self.branches.store(name, &branch);
        Ok(branch)
    }

    pub fn invalidate_default_branch(&self, name: &str) {
        self.branches.invalidate(name);
    }

    /// Clone a repository into the projects root and return the new project.
    pub async fn clone_repo(&self, url: &str, depth: u32) -> Result<Project> {
        let name = git::clone_repo(&self.workdir.projects_dir(), url, depth).await?;
        self.resolve(&name)?;
        self.invalidate_default_branch(&name);
        Ok(Project::bare(&name))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PployError::io(format!("failed to read {}", path.display()), e)),
    }
}

async fn read_readme(dir: &Path) -> Result<String> {
    Ok(read_optional(&dir.join(README_FILE)).await?.unwrap_or_default())
}

async fn read_deploy_envs(dir: &Path) -> Result<Vec<String>> {
    let Some(content) = read_optional(&dir.join(DEPLOY_ENVS_FILE)).await? else {
        return Ok(default_deploy_envs());
    };
    let envs = parse_deploy_envs(&content);
    if envs.is_empty() {
        Ok(default_deploy_envs())
    } else {
        Ok(envs)
    }
}

fn parse_deploy_envs(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifierSet;
    use std::time::Duration;
    use tempfile::tempdir;

    fn resolver(dir: &Path) -> (Workdir, Arc<LockTable>, ProjectResolver) {
        let workdir = Workdir::init(dir).unwrap();
        let locks = Arc::new(LockTable::new(Duration::from_secs(600), NotifierSet::default()));
        let resolver = ProjectResolver::new(workdir.clone(), Arc::clone(&locks));
        (workdir, locks, resolver)
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn resolve_rejects_bad_names() {
        let dir = tempdir().unwrap();
        let (workdir, _, resolver) = resolver(dir.path());
        std::fs::create_dir(workdir.project_dir("site-a")).unwrap();

        assert!(resolver.resolve("site-a").is_ok());
        for bad in ["", "..", "../etc", "a/b", ".hidden", "missing"] {
            assert!(
                matches!(resolver.resolve(bad), Err(PployError::ProjectNotFound { .. })),
                "{:?} should not resolve",
                bad
            );
        }
    }

    #[test]
    fn list_includes_valid_locks() {
        let dir = tempdir().unwrap();
        let (workdir, locks, resolver) = resolver(dir.path());
        std::fs::create_dir(workdir.project_dir("b-site")).unwrap();
        std::fs::create_dir(workdir.project_dir("a-site")).unwrap();
        locks.gain("b-site", "alice", Utc::now()).unwrap();

        let projects = resolver.list().unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].name, "a-site");
        assert!(projects[0].lock.is_none());
        assert_eq!(projects[1].lock.as_ref().unwrap().holder, "alice");
    }

    #[tokio::test]
    async fn deploy_envs_default_and_file() {
        let dir = tempdir().unwrap();
        let (workdir, _, resolver) = resolver(dir.path());
        let project = workdir.project_dir("site-a");
        std::fs::create_dir(&project).unwrap();
        assert_eq!(resolver.deploy_envs("site-a").await.unwrap(), default_deploy_envs());

        write(&project, DEPLOY_ENVS_FILE, "\n\n");
        assert_eq!(resolver.deploy_envs("site-a").await.unwrap(), default_deploy_envs());

        write(&project, DEPLOY_ENVS_FILE, "qa\n\nstaging\nproduction\n");
        assert_eq!(
            resolver.deploy_envs("site-a").await.unwrap(),
            vec!["qa", "staging", "production"]
        );
    }

    #[tokio::test]
    async fn readme_is_optional() {
        let dir = tempdir().unwrap();
        let (workdir, _, resolver) = resolver(dir.path());
        let project = workdir.project_dir("site-a");
        std::fs::create_dir(&project).unwrap();
        assert_eq!(resolver.readme("site-a").await.unwrap(), "");

        write(&project, README_FILE, "<p>Deploy on Tuesdays</p>");
        assert_eq!(resolver.readme("site-a").await.unwrap(), "<p>Deploy on Tuesdays</p>");
    }

    #[tokio::test]
    async fn default_branch_is_cached_until_invalidated() {
        let dir = tempdir().unwrap();
        let (workdir, _, resolver) = resolver(dir.path());
        let project = workdir.project_dir("site-a");
        let repo = git2::Repository::init(&project).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
        repo.reference("refs/remotes/origin/main", oid, true, "test").unwrap();
        repo.reference_symbolic("refs/remotes/origin/HEAD", "refs/remotes/origin/main", true, "test")
            .unwrap();

        assert_eq!(resolver.default_branch("site-a").await.unwrap(), "main");

        repo.reference("refs/remotes/origin/trunk", oid, true, "test").unwrap();
        repo.reference_symbolic("refs/remotes/origin/HEAD", "refs/remotes/origin/trunk", true, "test")
            .unwrap();
        assert_eq!(resolver.default_branch("site-a").await.unwrap(), "main");

        resolver.invalidate_default_branch("site-a");
        assert_eq!(resolver.default_branch("site-a").await.unwrap(), "trunk");
    }

    #[tokio::test]
    async fn full_fills_metadata_best_effort() {
        let dir = tempdir().unwrap();
        let (workdir, locks, resolver) = resolver(dir.path());
        let project = workdir.project_dir("site-a");
        std::fs::create_dir(&project).unwrap();
        write(&project, README_FILE, "hello");
        locks.gain("site-a", "alice", Utc::now()).unwrap();

        // not a git repository: default branch stays empty
        let full = resolver.full("site-a").await.unwrap();
        assert_eq!(full.readme, "hello");
        assert_eq!(full.deploy_envs, default_deploy_envs());
        assert_eq!(full.lock.unwrap().holder, "alice");
        assert_eq!(full.default_branch, "");

        assert!(matches!(
            resolver.full("missing").await,
            Err(PployError::ProjectNotFound { .. })
        ));
    }
}
