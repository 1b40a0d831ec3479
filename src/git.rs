//! Read-only git queries against project working trees, plus cloning.
//!
//! History and refs are read in-process with `git2`. Cloning and the
//! `git remote show` fallback shell out to the `git` binary, which handles
//! credentials and transports the same way an operator's shell does.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use git2::{Delta, DiffFindOptions, Oid, Repository};
use regex::Regex;
use serde::Serialize;
use tokio::process::Command;

use crate::errors::PployError;

/// One entry of a project's recent history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub hash: String,
    pub time: DateTime<FixedOffset>,
    pub author: String,
    /// Fully qualified refs pointing at this commit, `HEAD` first.
    pub other_refs: Vec<String>,
    pub subject: String,
    pub body: String,
    /// `git log --name-status` style summary, one `<status>\t<path>` per line.
    pub name_status: String,
}

/// The last `limit` commits reachable from HEAD along first parents.
pub fn recent_commits(dir: &Path, limit: usize) -> Result<Vec<Commit>> {
    let repo = Repository::open(dir)
        .with_context(|| format!("Failed to open git repository at {}", dir.display()))?;
    let decorations = decorations(&repo)?;

    let mut walk = repo.revwalk()?;
    if walk.push_head().is_err() {
        // unborn branch
        return Ok(Vec::new());
    }
    walk.simplify_first_parent()?;

    let mut commits = Vec::new();
    for oid in walk.take(limit) {
        let commit = repo.find_commit(oid?)?;
        let other_refs = decorations.get(&commit.id()).cloned().unwrap_or_default();
        commits.push(Commit {
            hash: commit.id().to_string(),
            time: commit_time(&commit.time())?,
            author: commit.author().name().unwrap_or_default().to_string(),
            other_refs,
            subject: commit.summary().unwrap_or_default().to_string(),
            body: commit.body().unwrap_or_default().trim().to_string(),
            name_status: name_status(&repo, &commit)?,
        });
    }
    Ok(commits)
}

fn commit_time(time: &git2::Time) -> Result<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60)
        .context("Commit has an out of range timezone offset")?;
    let utc = DateTime::from_timestamp(time.seconds(), 0)
        .context("Commit has an out of range timestamp")?;
    Ok(utc.with_timezone(&offset))
}

/// Map each commit to the refs pointing at it, like `--decorate=full`.
fn decorations(repo: &Repository) -> Result<HashMap<Oid, Vec<String>>> {
    let mut map: HashMap<Oid, Vec<String>> = HashMap::new();
    for reference in repo.references()? {
        let reference = reference?;
        let Some(name) = reference.name() else {
            continue;
        };
        let name = name.to_string();
        if let Ok(commit) = reference.peel_to_commit() {
            map.entry(commit.id()).or_default().push(name);
        }
    }
    for refs in map.values_mut() {
        refs.sort();
    }
    if let Ok(head) = repo.head()
        && let Ok(commit) = head.peel_to_commit()
    {
        map.entry(commit.id()).or_default().insert(0, "HEAD".to_string());
    }
    Ok(map)
}

/// Changes of `commit` relative to its first parent.
fn name_status(repo: &Repository, commit: &git2::Commit<'_>) -> Result<String> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };
    let mut diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    diff.find_similar(Some(DiffFindOptions::new().renames(true)))?;

    let mut lines = Vec::new();
    for delta in diff.deltas() {
        let old = delta.old_file().path().map(|p| p.display().to_string());
        let new = delta.new_file().path().map(|p| p.display().to_string());
        let line = match delta.status() {
            Delta::Added => format!("A\t{}", new.unwrap_or_default()),
            Delta::Deleted => format!("D\t{}", old.unwrap_or_default()),
            Delta::Modified => format!("M\t{}", new.unwrap_or_default()),
            Delta::Typechange => format!("T\t{}", new.unwrap_or_default()),
            Delta::Renamed => format!("R\t{}\t{}", old.unwrap_or_default(), new.unwrap_or_default()),
            Delta::Copied => format!("C\t{}\t{}", old.unwrap_or_default(), new.unwrap_or_default()),
            _ => continue,
        };
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// Default branch as recorded by `refs/remotes/origin/HEAD`, if the clone has it.
pub fn default_branch_from_refs(dir: &Path) -> Result<Option<String>> {
    let repo = Repository::open(dir)
        .with_context(|| format!("Failed to open git repository at {}", dir.display()))?;
    let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD") else {
        return Ok(None);
    };
    Ok(reference
        .symbolic_target()
        .and_then(|target| target.strip_prefix("refs/remotes/origin/"))
        .map(str::to_string))
}

static HEAD_BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HEAD branch: (\S+)").expect("valid regex"));

/// Extract the branch name from `git remote show origin` output.
pub fn parse_head_branch(output: &str) -> Option<String> {
    HEAD_BRANCH_RE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// Ask the remote for its default branch. Needs network access to origin.
pub async fn default_branch_from_remote(dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["remote", "show", "origin"])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run git remote show")?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_head_branch(&stdout).with_context(|| {
        format!(
            "git remote show origin did not report a HEAD branch: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )
    })
}

static REPO_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^/:]+?)(?:\.git)?/?$").expect("valid regex"));

/// Project name a clone of `url` ends up in: the last path component without
/// `.git` or a trailing slash.
pub fn repo_name_from_url(url: &str) -> Option<String> {
    let name = REPO_NAME_RE.captures(url.trim())?.get(1)?.as_str();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// `git clone --depth <depth> --no-single-branch -- <url> <name>` inside
/// `projects_dir`.
/// Returns the new project's name.
pub async fn clone_repo(projects_dir: &Path, url: &str, depth: u32) -> crate::errors::Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PployError::Validation("url is required".to_string()));
    }
    let name = repo_name_from_url(url)
        .ok_or_else(|| PployError::Validation(format!("cannot determine a project name from {}", url)))?;
    if projects_dir.join(&name).exists() {
        return Err(PployError::Validation(format!("project {} already exists", name)));
    }

    tracing::info!(url, project = %name, "cloning repository");
    let output = Command::new("git")
        .arg("clone")
        .args(["--depth", &depth.to_string(), "--no-single-branch", "--"])
        .arg(url)
        .arg(&name)
        .current_dir(projects_dir)
        .output()
        .await
        .map_err(|source| PployError::Spawn {
            program: "git".to_string(),
            source,
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("failed to clone {}: {}", url, stderr.trim()).into());
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        dir
    }

    fn commit_all(dir: &Path, msg: &str) -> Oid {
        let repo = Repository::open(dir).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("alice", "alice@example.com").unwrap();
        match repo.head() {
            Ok(head) => {
                let parent = head.peel_to_commit().unwrap();
                repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
                    .unwrap()
            }
            Err(_) => repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[]).unwrap(),
        }
    }

    #[test]
    fn recent_commits_newest_first_with_name_status() {
        let dir = setup_repo();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        commit_all(dir.path(), "add a");
        fs::write(dir.path().join("a.txt"), "two").unwrap();
        fs::write(dir.path().join("b.txt"), "new").unwrap();
        commit_all(dir.path(), "change a\n\nand add b\n");

        let commits = recent_commits(dir.path(), 20).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject, "change a");
        assert_eq!(commits[0].body, "and add b");
        assert_eq!(commits[0].author, "alice");
        assert_eq!(commits[0].name_status, "M\ta.txt\nA\tb.txt");
        assert_eq!(commits[1].subject, "add a");
        assert_eq!(commits[1].name_status, "A\ta.txt");
    }

    #[test]
    fn head_commit_is_decorated() {
        let dir = setup_repo();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        let first = commit_all(dir.path(), "first");
        fs::write(dir.path().join("a.txt"), "two").unwrap();
        commit_all(dir.path(), "second");

        let repo = Repository::open(dir.path()).unwrap();
        let target = repo.find_commit(first).unwrap();
        repo.tag_lightweight("v1", target.as_object(), false).unwrap();

        let commits = recent_commits(dir.path(), 20).unwrap();
        assert_eq!(commits[0].other_refs[0], "HEAD");
        assert!(commits[0].other_refs.iter().any(|r| r.starts_with("refs/heads/")));
        assert_eq!(commits[1].other_refs, vec!["refs/tags/v1"]);
    }

    #[test]
    fn limit_is_respected() {
        let dir = setup_repo();
        for i in 0..5 {
            fs::write(dir.path().join("f.txt"), i.to_string()).unwrap();
            commit_all(dir.path(), &format!("commit {}", i));
        }
        let commits = recent_commits(dir.path(), 3).unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].subject, "commit 4");
    }

    #[test]
    fn unborn_repository_has_no_commits() {
        let dir = setup_repo();
        assert!(recent_commits(dir.path(), 20).unwrap().is_empty());
    }

    #[test]
    fn not_a_repository_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(recent_commits(dir.path(), 20).is_err());
    }

    #[test]
    fn commit_serializes_camel_case() {
        let dir = setup_repo();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        commit_all(dir.path(), "first");
        let commits = recent_commits(dir.path(), 1).unwrap();
        let json = serde_json::to_value(&commits[0]).unwrap();
        assert!(json.get("otherRefs").is_some());
        assert!(json.get("nameStatus").is_some());
    }

    #[test]
    fn default_branch_from_origin_head() {
        let dir = setup_repo();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        let oid = commit_all(dir.path(), "first");
        let repo = Repository::open(dir.path()).unwrap();
        assert_eq!(default_branch_from_refs(dir.path()).unwrap(), None);

        repo.reference("refs/remotes/origin/develop", oid, true, "test")
            .unwrap();
        repo.reference_symbolic(
            "refs/remotes/origin/HEAD",
            "refs/remotes/origin/develop",
            true,
            "test",
        )
        .unwrap();
        assert_eq!(
            default_branch_from_refs(dir.path()).unwrap().as_deref(),
            Some("develop")
        );
    }

    #[test]
    fn parses_remote_show_output() {
        let output = "* remote origin\n  Fetch URL: git@example.com:team/app.git\n  HEAD branch: main\n  Remote branches:\n";
        assert_eq!(parse_head_branch(output).as_deref(), Some("main"));
        assert_eq!(parse_head_branch("nothing here"), None);
    }

    #[test]
    fn repo_names_from_urls() {
        assert_eq!(repo_name_from_url("https://github.com/team/app.git").as_deref(), Some("app"));
        assert_eq!(repo_name_from_url("https://github.com/team/app/").as_deref(), Some("app"));
        assert_eq!(repo_name_from_url("git@github.com:team/app.git").as_deref(), Some("app"));
        assert_eq!(repo_name_from_url("/srv/git/site-a").as_deref(), Some("site-a"));
        assert_eq!(repo_name_from_url(""), None);
        assert_eq!(repo_name_from_url("https://example.com/.."), None);
    }

    #[tokio::test]
    async fn clone_rejects_empty_url() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            clone_repo(dir.path(), "  ", 20).await,
            Err(PployError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn clone_local_repository() {
        let upstream = setup_repo();
        fs::write(upstream.path().join("README"), "hi").unwrap();
        commit_all(upstream.path(), "init");
        let projects = tempdir().unwrap();
        let url = format!("file://{}", upstream.path().display());

        let name = clone_repo(projects.path(), &url, 20).await.unwrap();
        let expected = upstream.path().file_name().unwrap().to_str().unwrap();
        assert_eq!(name, expected);
        assert!(projects.path().join(&name).join("README").exists());

        let again = clone_repo(projects.path(), &url, 20).await;
        assert!(matches!(again, Err(PployError::Validation(_))));
    }

    #[tokio::test]
    async fn clone_treats_dash_url_as_repository() {
        let projects = tempdir().unwrap();
        let upstream = projects.path().join("-upstream.git");
        fs::create_dir(&upstream).unwrap();
        Repository::init(&upstream).unwrap();
        fs::write(upstream.join("README"), "hi").unwrap();
        commit_all(&upstream, "init");

        let name = clone_repo(projects.path(), "-upstream.git", 20).await.unwrap();
        assert_eq!(name, "-upstream");
        assert!(projects.path().join("-upstream").join("README").exists());
    }

    #[tokio::test]
    async fn clone_never_passes_url_as_option() {
        let projects = tempdir().unwrap();
        let result = clone_repo(projects.path(), "--template=x", 20).await;
        assert!(result.is_err());
        assert_eq!(fs::read_dir(projects.path()).unwrap().count(), 0);
    }
}
