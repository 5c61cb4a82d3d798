//! Operations that need a checkout: they clone or check out into a
//! temporary directory that is removed when the operation ends.

use crate::error::GitsError;
use crate::repository::{AddFile, DEFAULT_BRANCH, Git};
use bytes::Bytes;
use std::path::{Component, Path};
use tempfile::TempDir;
use tracing::{debug, info};

const DEFAULT_MESSAGE: &str = "Add files";
const DEFAULT_MODE: u32 = 0o644;

fn temp_dir() -> Result<TempDir, GitsError> {
    tempfile::Builder::new()
        .prefix("gits-")
        .tempdir()
        .map_err(|e| GitsError::Io(format!("unable to create temporary directory: {}", e)))
}

/// Rejects absolute paths and anything that climbs out of the work tree.
pub fn check_relative(path: &str) -> Result<(), GitsError> {
    let ok = !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(())
    } else {
        Err(GitsError::BadRequest(format!("path `{}` is not relative to the repository", path)))
    }
}

async fn write_file(clone: &Path, file: &AddFile) -> Result<(), GitsError> {
    let full = clone.join(&file.path);
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&full, &file.content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = file.mode.unwrap_or(DEFAULT_MODE);
        tokio::fs::set_permissions(&full, std::fs::Permissions::from_mode(mode)).await?;
    }
    Ok(())
}

/// Commits `files` on top of `branch` (the remote HEAD when `None`) and
/// pushes the result back into the bare repository at `dir`.
pub async fn add(
    git: &Git,
    dir: &Path,
    branch: Option<&str>,
    files: &[AddFile],
    message: Option<&str>,
) -> Result<(), GitsError> {
    for file in files {
        check_relative(&file.path)?;
    }
    let clone = temp_dir()?;
    let mut args = vec!["clone".to_string()];
    if let Some(branch) = branch {
        args.extend(["--branch".to_string(), branch.to_string()]);
    }
    args.push(dir.display().to_string());
    args.push(clone.path().display().to_string());
    git.run(Path::new("/"), &args)
        .await
        .map_err(|e| GitsError::Git(format!("unable to clone `{}`: {}", dir.display(), e.message())))?;

    for file in files {
        write_file(clone.path(), file).await?;
    }
    let mut add = vec!["add", "--"];
    add.extend(files.iter().map(|f| f.path.as_str()));
    git.run(clone.path(), &add).await?;

    let message = message.filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MESSAGE);
    let commit = git.output(clone.path(), ["commit", "-m", message]).await?;
    if !commit.status.success() {
        if String::from_utf8_lossy(&commit.stdout).contains("nothing to commit") {
            debug!("Nothing to commit in `{}`", dir.display());
            return Ok(());
        }
        return Err(GitsError::Git(format!(
            "unable to commit in clone of `{}`: {}",
            dir.display(),
            String::from_utf8_lossy(&commit.stderr).trim()
        )));
    }
    git.run(clone.path(), ["push"])
        .await
        .map_err(|e| GitsError::Git(format!("unable to push into `{}`: {}", dir.display(), e.message())))?;

    let added: Vec<String> = files
        .iter()
        .map(|f| match f.mode {
            Some(mode) => format!("{} ({:04o})", f.path, mode),
            None => f.path.clone(),
        })
        .collect();
    info!("Added `{}` to `{}`", added.join(", "), dir.display());
    Ok(())
}

/// Content of a single regular file at `git_ref`.
pub async fn blob(git: &Git, dir: &Path, git_ref: Option<&str>, path: &str) -> Result<Bytes, GitsError> {
    check_relative(path)?;
    let git_ref = git_ref.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_BRANCH);
    let worktree = temp_dir()?;
    let tree = worktree.path().display().to_string();
    let output = git
        .output(dir, ["--work-tree", tree.as_str(), "checkout", git_ref, "--", path])
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("did not match any") || String::from_utf8_lossy(&output.stdout).contains("did not match any") {
            return Err(GitsError::NotFound(format!("`{}` at `{}`", path, git_ref)));
        }
        return Err(GitsError::Git(format!(
            "unable to checkout `{}` at `{}`: {}",
            path,
            git_ref,
            stderr.trim()
        )));
    }

    let full = worktree.path().join(path);
    let meta = tokio::fs::symlink_metadata(&full).await?;
    if meta.is_dir() {
        return Err(GitsError::BadRequest(format!("`{}` is a directory", path)));
    }
    if !meta.file_type().is_file() {
        return Err(GitsError::Conflict(format!("`{}` is not a regular file", path)));
    }
    Ok(Bytes::from(tokio::fs::read(&full).await?))
}
