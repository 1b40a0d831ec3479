//! Project listing and cleanup: `pploy projects`.

use std::path::Path;

use anyhow::Result;
use pploy::config::PployConfig;
use pploy::workdir::Workdir;

pub fn cmd_projects(workdir: &Path, remove: Option<&str>) -> Result<()> {
    let config = PployConfig::load_or_default(workdir)?;
    let workdir = Workdir::new(workdir);

    if let Some(name) = remove {
        if !workdir.project_names()?.iter().any(|p| p == name) {
            anyhow::bail!("project not found: {}", name);
        }
        workdir.remove_project_files(name, config.logs.max_generations)?;
        println!("Removed {} and its deploy logs", name);
        return Ok(());
    }

    let names = workdir.project_names()?;
    if names.is_empty() {
        println!("No projects in {}", workdir.projects_dir().display());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}
