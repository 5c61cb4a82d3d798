use crate::error::GitsError;
use crate::repository::{DEFAULT_BRANCH, Git, RepoStatus};
use std::path::Path;

/// A full 40 hex digit SHA-1 is used as a commit as is.
pub fn is_commit_hash(git_ref: &str) -> bool {
    git_ref.len() == 40 && git_ref.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Picks the single `(commit, ref)` out of `git show-ref` output.
pub fn parse_show_ref(git_ref: &str, output: &str) -> Result<(String, String), GitsError> {
    let matches: Vec<(&str, &str)> = output
        .lines()
        .filter_map(|line| line.split_once(' '))
        .collect();
    match matches.as_slice() {
        [] => Err(GitsError::NotFound(format!("ref `{}` not found", git_ref))),
        [(commit, canonical)] => Ok((commit.to_string(), canonical.to_string())),
        many => Err(GitsError::Conflict(format!(
            "ref `{}` refer to multiple refs {:?}",
            git_ref,
            many.iter().map(|(_, r)| *r).collect::<Vec<_>>()
        ))),
    }
}

fn parse_show(commit: String, canonical: String, output: &str) -> RepoStatus {
    let mut lines = output.lines();
    let mut next = || lines.next().unwrap_or_default().to_string();
    RepoStatus {
        commit,
        git_ref: canonical,
        date: next(),
        author: next(),
        subject: next(),
    }
}

pub async fn status(git: &Git, dir: &Path, git_ref: Option<&str>) -> Result<RepoStatus, GitsError> {
    let git_ref = git_ref.filter(|r| !r.is_empty()).unwrap_or(DEFAULT_BRANCH);
    let (commit, canonical) = if is_commit_hash(git_ref) {
        (git_ref.to_string(), String::new())
    } else {
        let output = git.output(dir, ["show-ref", git_ref]).await?;
        parse_show_ref(git_ref, &String::from_utf8_lossy(&output.stdout))?
    };

    let output = git
        .output(dir, ["show", "-q", "--pretty=format:%aI%n%cn <%ce>%n%s", commit.as_str()])
        .await?;
    if output.stdout.is_empty() {
        return Err(GitsError::NotFound(format!("commit `{}` not found", commit)));
    }
    if !output.status.success() {
        return Err(GitsError::Git(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    Ok(parse_show(commit, canonical, &String::from_utf8_lossy(&output.stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "8a3c1f0e7d2b4c6a9e0f1d2c3b4a596877665544";

    #[test]
    fn test_commit_hash() {
        assert!(is_commit_hash(SHA));
        assert!(!is_commit_hash("master"));
        assert!(!is_commit_hash(&SHA[..39]));
        assert!(!is_commit_hash(&SHA.replace('8', "z")));
    }

    #[test]
    fn test_show_ref_cases() {
        let one = format!("{} refs/heads/master\n", SHA);
        assert_eq!(
            parse_show_ref("master", &one).unwrap(),
            (SHA.to_string(), "refs/heads/master".to_string())
        );
        assert!(matches!(parse_show_ref("gone", ""), Err(GitsError::NotFound(_))));
        let two = format!("{} refs/heads/v1\n{} refs/tags/v1\n", SHA, SHA);
        assert!(matches!(parse_show_ref("v1", &two), Err(GitsError::Conflict(_))));
    }

    #[test]
    fn test_show_output() {
        let status = parse_show(
            SHA.to_string(),
            "refs/heads/master".to_string(),
            "2024-03-01T10:00:00+00:00\nAnn <ann@example.com>\nInitial import",
        );
        assert_eq!(status.author, "Ann <ann@example.com>");
        assert_eq!(status.subject, "Initial import");
        let short = parse_show(SHA.to_string(), String::new(), "2024-03-01T10:00:00+00:00");
        assert!(short.subject.is_empty());
    }
}
