use crate::error::GitsError;
use crate::model::repository::RepositoryId;
use crate::service::GitService;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GitCommand {
    pub service: GitService,
    pub repo: RepositoryId,
}

/// Drops whatever a client puts in front of the `git-` verb
/// (`/usr/bin/git-upload-pack ...` and the like).
fn strip_launcher(command: &str) -> &str {
    match command.find("git-") {
        Some(i) if i > 0 => &command[i..],
        _ => command,
    }
}

/// The repository argument as a single token, either `'quoted'` or bare.
fn repo_token(arg: &str) -> Option<&str> {
    let arg = arg.trim();
    let inner = match arg.strip_prefix('\'') {
        Some(rest) => rest.strip_suffix('\'')?,
        None => arg,
    };
    let malformed = inner.is_empty() || inner.contains(|c: char| c.is_whitespace() || c == '\'');
    (!malformed).then_some(inner)
}

/// Parses an exec request of the form `<verb> '<org>/<repo>[.git]'`.
pub fn parse_command(command: &str) -> Result<GitCommand, GitsError> {
    let command = strip_launcher(command.trim());
    let Some((verb, repo)) = command.split_once(' ') else {
        return Err(GitsError::BadRequest(format!("unknown repo name in {:?}", command)));
    };
    let service = GitService::from_string(verb)
        .ok_or_else(|| GitsError::BadRequest(format!("{:?} is not allowed Git sub-command", verb)))?;
    let repo = repo_token(repo)
        .ok_or_else(|| GitsError::BadRequest(format!("malformed repo argument in {:?}", command)))?
        .trim_start_matches('/');
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Ok(GitCommand {
        service,
        repo: RepositoryId::parse(repo)?,
    })
}
