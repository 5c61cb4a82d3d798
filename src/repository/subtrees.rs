use crate::error::GitsError;
use crate::repository::worktree::check_relative;
use crate::repository::{DEFAULT_BRANCH, Git, Subtree};
use reqwest::Url;
use std::path::Path;
use tracing::{info, trace};

const REMOTE_SCHEMES: [&str; 4] = ["http:", "https:", "git:", "git@"];

/// Hides credentials embedded in a remote URL before it reaches a log line.
pub fn mask_auth(remote: &str) -> String {
    match Url::parse(remote) {
        Ok(mut url) if url.has_host() => {
            let _ = url.set_username("masked");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => remote.to_string(),
    }
}

/// Checks required fields and fills in the default ref.
pub fn validate(subtrees: &mut [Subtree]) -> Result<(), GitsError> {
    for (i, subtree) in subtrees.iter_mut().enumerate() {
        let remote_ok = REMOTE_SCHEMES.iter().any(|s| subtree.remote.starts_with(s));
        if check_relative(&subtree.prefix).is_err() || !remote_ok {
            return Err(GitsError::BadRequest(format!(
                "invalid subtree at index {}: prefix `{}`, remote `{}`",
                i,
                subtree.prefix,
                mask_auth(&subtree.remote)
            )));
        }
        if subtree.git_ref.is_empty() {
            subtree.git_ref = DEFAULT_BRANCH.to_string();
        }
    }
    Ok(())
}

/// Unique `(remote, ref)` pairs that have at least one split prefix, in
/// request order.
fn split_remotes(subtrees: &[Subtree]) -> Vec<(String, String)> {
    let mut remotes: Vec<(String, String)> = Vec::new();
    for subtree in subtrees.iter().filter(|s| !s.split_prefix.is_empty()) {
        let pair = (subtree.remote.clone(), subtree.git_ref.clone());
        if !remotes.contains(&pair) {
            remotes.push(pair);
        }
    }
    remotes
}

/// Adds each subtree under its prefix on `branch` and pushes.
pub async fn add_subtrees(
    git: &Git,
    dir: &Path,
    branch: Option<&str>,
    mut subtrees: Vec<Subtree>,
) -> Result<(), GitsError> {
    validate(&mut subtrees)?;
    let branch = branch.filter(|b| !b.is_empty()).unwrap_or(DEFAULT_BRANCH);

    let clone = tempfile::Builder::new()
        .prefix("gits-")
        .tempdir()
        .map_err(|e| GitsError::Io(format!("unable to create temporary directory: {}", e)))?;
    let work = clone.path();
    let source = dir.display().to_string();
    let target = work.display().to_string();
    git.run(
        Path::new("/"),
        ["clone", "--branch", branch, "--single-branch", "--no-tags", source.as_str(), target.as_str()],
    )
    .await
    .map_err(|e| GitsError::Git(format!("unable to clone `{}`: {}", source, e.message())))?;

    for subtree in &subtrees {
        if tokio::fs::symlink_metadata(work.join(&subtree.prefix)).await.is_ok() {
            return Err(GitsError::Conflict(format!("path `{}` already exist", subtree.prefix)));
        }
    }

    let remotes = split_remotes(&subtrees);
    let mut split_branches: Vec<Option<String>> = vec![None; subtrees.len()];
    let mut split_index = 0;
    for (remote_index, (remote, git_ref)) in remotes.iter().enumerate() {
        let masked = mask_auth(remote);
        let name = format!("remote-{}", remote_index);
        git.run(work, ["remote", "add", name.as_str(), remote.as_str()])
            .await
            .map_err(|e| GitsError::Git(format!("unable to add remote `{}`: {}", masked, e.message())))?;
        let fetched = format!("_{}/{}", name, git_ref);
        let refspec = format!("{}:{}", git_ref, fetched);
        git.run(work, ["fetch", name.as_str(), refspec.as_str()])
            .await
            .map_err(|e| GitsError::Git(format!("unable to fetch `{}` ref `{}`: {}", masked, git_ref, e.message())))?;
        let local = format!("_{}-{}", name, git_ref);
        git.run(work, ["checkout", "-b", local.as_str(), fetched.as_str()])
            .await
            .map_err(|e| GitsError::Git(format!("unable to checkout `{}` ref `{}`: {}", masked, git_ref, e.message())))?;

        for (i, subtree) in subtrees.iter().enumerate() {
            if subtree.split_prefix.is_empty() || subtree.remote != *remote || subtree.git_ref != *git_ref {
                continue;
            }
            let split = format!("_split-{}", split_index);
            split_index += 1;
            let mut args = vec![
                "subtree".to_string(),
                "split".to_string(),
                "-q".to_string(),
                format!("--prefix={}", subtree.split_prefix),
                "-b".to_string(),
                split.clone(),
            ];
            if subtree.squash {
                args.push("--squash".to_string());
            }
            git.run(work, &args).await.map_err(|e| {
                GitsError::Git(format!(
                    "unable to split `{}` ref `{}` prefix `{}`: {}",
                    masked,
                    git_ref,
                    subtree.split_prefix,
                    e.message()
                ))
            })?;
            split_branches[i] = Some(split);
        }
    }
    if !remotes.is_empty() {
        git.run(work, ["checkout", branch]).await?;
    }

    for (subtree, split) in subtrees.iter().zip(&split_branches) {
        let mut args = vec!["subtree".to_string(), "add".to_string(), format!("--prefix={}", subtree.prefix)];
        match split {
            Some(split) => args.push(split.clone()),
            None => args.extend([subtree.remote.clone(), subtree.git_ref.clone()]),
        }
        if subtree.squash {
            args.push("--squash".to_string());
        }
        git.run(work, &args).await.map_err(|e| {
            GitsError::Git(format!(
                "unable to add subtree `{}` ref `{}`: {}",
                mask_auth(&subtree.remote),
                subtree.git_ref,
                e.message()
            ))
        })?;
    }
    git.run(work, ["push"]).await?;

    for subtree in &subtrees {
        trace!("\t{} => {} /{} @ {}", subtree.prefix, mask_auth(&subtree.remote), subtree.split_prefix, subtree.git_ref);
    }
    let prefixes: Vec<&str> = subtrees.iter().map(|s| s.prefix.as_str()).collect();
    info!("Subtrees added to `{}`: {:?}", source, prefixes);
    Ok(())
}
