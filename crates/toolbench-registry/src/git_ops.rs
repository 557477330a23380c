use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

fn base_git_command() -> Command {
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg("core.autocrlf=false")
        .arg("-c")
        .arg("core.eol=lf");
    if cfg!(windows) {
        command.arg("-c").arg("core.longpaths=true");
    }
    command
}

fn run_git_clone(location: &str, branch: &str, destination: &Path) -> Result<()> {
    let output = base_git_command()
        .arg("clone")
        .arg("--branch")
        .arg(branch)
        .arg("--")
        .arg(location)
        .arg(destination)
        .output()
        .with_context(|| format!("failed launching git clone for feed {location}"))?;
    if !output.status.success() {
        anyhow::bail!(
            "git clone of feed {} failed: {}",
            location,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn run_git_command(repo_root: &Path, args: &[&str]) -> Result<()> {
    let output = base_git_command()
        .args(args)
        .current_dir(repo_root)
        .output()
        .with_context(|| format!("failed launching git {}", args.join(" ")))?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed in {}: {}",
            args.join(" "),
            repo_root.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Clones or refreshes the feed repository in `cache_dir` at `branch` and
/// returns the path of `feeds/<name>.xml` inside it.
pub(crate) fn sync_git_feed(
    location: &str,
    branch: &str,
    name: &str,
    cache_dir: &Path,
) -> Result<PathBuf> {
    if cache_dir.join(".git").is_dir() {
        debug!(location, branch, "refreshing git feed");
        run_git_command(cache_dir, &["fetch", "--prune", "--", location, branch])?;
        run_git_command(cache_dir, &["reset", "--hard", "FETCH_HEAD"])?;
    } else {
        debug!(location, branch, "cloning git feed");
        if cache_dir.exists() {
            fs::remove_dir_all(cache_dir)
                .with_context(|| format!("failed clearing {}", cache_dir.display()))?;
        }
        if let Some(parent) = cache_dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        run_git_clone(location, branch, cache_dir)?;
    }

    let feed_path = cache_dir.join("feeds").join(format!("{name}.xml"));
    if !feed_path.is_file() {
        anyhow::bail!(
            "no feed named '{}' on branch '{}' of {} (expected {})",
            name,
            branch,
            location,
            feed_path.display()
        );
    }
    Ok(feed_path)
}
