//! On-disk layout of a pploy work directory.
//!
//! ```text
//! <root>/
//!   pploy.toml            optional configuration
//!   projects/<name>/      git working trees, one per project
//!   logs/<name>.log       current deploy log
//!   logs/<name>.log.N     previous deploy logs, N = 1 is the newest
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Workdir {
    root: PathBuf,
}

impl Workdir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the work directory and its `projects/` and `logs/` children.
    ///
    /// The root is made absolute: project scripts are spawned with their
    /// project directory as cwd, so a relative program path would no longer
    /// resolve.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = std::path::absolute(&root)
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        let workdir = Self::new(root);
        for dir in [workdir.projects_dir(), workdir.logs_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(workdir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.projects_dir().join(name)
    }

    /// Path of a deploy log. Generation 0 is the current log.
    pub fn log_file(&self, name: &str, generation: usize) -> PathBuf {
        let file_name = if generation == 0 {
            format!("{}.log", name)
        } else {
            format!("{}.log.{}", name, generation)
        };
        self.logs_dir().join(file_name)
    }

    /// Names of all project directories, sorted. Hidden directories are not projects.
    pub fn project_names(&self) -> Result<Vec<String>> {
        let dir = self.projects_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", dir.display()));
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete a project's working tree and every log generation up to `max_generations`.
    pub fn remove_project_files(&self, name: &str, max_generations: usize) -> Result<()> {
        let dir = self.project_dir(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", dir.display())),
        }
        for generation in 0..=max_generations {
            let log = self.log_file(name, generation);
            match std::fs::remove_file(&log) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", log.display()));
                }
            }
        }
        tracing::info!(project = name, "project files removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_layout() {
        let dir = tempdir().unwrap();
        let workdir = Workdir::init(dir.path().join("work")).unwrap();
        assert!(workdir.projects_dir().is_dir());
        assert!(workdir.logs_dir().is_dir());
    }

    #[test]
    fn log_file_names_by_generation() {
        let workdir = Workdir::new("/srv/pploy");
        assert_eq!(workdir.log_file("site-a", 0), PathBuf::from("/srv/pploy/logs/site-a.log"));
        assert_eq!(workdir.log_file("site-a", 3), PathBuf::from("/srv/pploy/logs/site-a.log.3"));
    }

    #[test]
    fn project_names_are_sorted_directories_only() {
        let dir = tempdir().unwrap();
        let workdir = Workdir::init(dir.path()).unwrap();
        for name in ["zeta", "alpha", "mid"] {
            std::fs::create_dir(workdir.project_dir(name)).unwrap();
        }
        std::fs::write(workdir.projects_dir().join("stray.txt"), "").unwrap();
        assert_eq!(workdir.project_names().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn hidden_directories_are_not_projects() {
        let dir = tempdir().unwrap();
        let workdir = Workdir::init(dir.path()).unwrap();
        std::fs::create_dir(workdir.project_dir("site-a")).unwrap();
        std::fs::create_dir(workdir.projects_dir().join(".cache")).unwrap();
        assert_eq!(workdir.project_names().unwrap(), vec!["site-a"]);
    }

    #[test]
    fn init_makes_relative_root_absolute() {
        let dir = tempfile::tempdir_in(".").unwrap();
        let relative = Path::new(".").join(dir.path().file_name().unwrap());
        let workdir = Workdir::init(&relative).unwrap();
        assert!(workdir.root().is_absolute());
        assert!(workdir.project_dir("site-a").is_absolute());
        assert!(workdir.projects_dir().is_dir());
        assert_eq!(
            workdir.root().canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn project_names_without_projects_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(Workdir::new(dir.path()).project_names().unwrap().is_empty());
    }

    #[test]
    fn remove_project_files_clears_tree_and_logs() {
        let dir = tempdir().unwrap();
        let workdir = Workdir::init(dir.path()).unwrap();
        std::fs::create_dir_all(workdir.project_dir("site-a").join(".deploy/bin")).unwrap();
        std::fs::write(workdir.log_file("site-a", 0), "current").unwrap();
        std::fs::write(workdir.log_file("site-a", 2), "old").unwrap();
        std::fs::write(workdir.log_file("site-b", 0), "other").unwrap();

        workdir.remove_project_files("site-a", 20).unwrap();

        assert!(!workdir.project_dir("site-a").exists());
        assert!(!workdir.log_file("site-a", 0).exists());
        assert!(!workdir.log_file("site-a", 2).exists());
        assert!(workdir.log_file("site-b", 0).exists());
    }

    #[test]
    fn remove_missing_project_is_ok() {
        let dir = tempdir().unwrap();
        let workdir = Workdir::init(dir.path()).unwrap();
        assert!(workdir.remove_project_files("ghost", 5).is_ok());
    }
}
