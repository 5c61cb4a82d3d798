//! Repository management under `/api/v1/repositories/{org}/{repo}`.
//! Every route is guarded by the shared API secret only.

use crate::error::GitsError;
use crate::http::guard;
use crate::model::repository::RepositoryId;
use crate::repository::{AddFile, CreateRequest, Subtree};
use crate::serve::AppCore;
use actix_multipart::Multipart;
use actix_web::web::{Bytes, Data, Path, Query};
use actix_web::{HttpRequest, HttpResponse};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

#[derive(Deserialize, Clone, Debug, Default)]
pub struct CommitQuery {
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct RefQuery {
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct SubtreesRequest {
    #[serde(default)]
    pub subtrees: Vec<Subtree>,
}

/// Octal permission bits as sent in `?mode=` or a `Mode` part header.
/// Unparsable modes are logged and ignored.
pub fn parse_mode(mode: Option<&str>, what: &str) -> Option<u32> {
    let mode = mode.filter(|m| !m.is_empty())?;
    match u32::from_str_radix(mode, 8) {
        Ok(bits) => Some(bits),
        Err(e) => {
            warn!("Bad file mode `{}` of `{}`: {}", mode, what, e);
            None
        }
    }
}

fn repo_id(path: &(String, String)) -> Result<RepositoryId, GitsError> {
    RepositoryId::from_segments(&path.0, &path.1)
}

/// Secret check, then the repository must exist. Mutating routes also
/// respect maintenance mode.
async fn prepare(
    core: &AppCore,
    req: &HttpRequest,
    repo: &RepositoryId,
    mutating: bool,
) -> Result<Option<HttpResponse>, GitsError> {
    if let Some(denied) = guard::management(core, req) {
        return Ok(Some(denied));
    }
    if mutating {
        if let Some(unavailable) = guard::maintenance(core) {
            return Ok(Some(unavailable));
        }
    }
    guard::existing(core, repo).await?;
    Ok(None)
}

pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain; charset=utf-8").body("pong")
}

/// `PUT /api/v1/repositories/{org}/{repo}`
pub async fn create(
    req: HttpRequest,
    path: Path<(String, String)>,
    core: Data<AppCore>,
    body: Bytes,
) -> Result<HttpResponse, GitsError> {
    if let Some(denied) = guard::management(&core, &req) {
        return Ok(denied);
    }
    if let Some(unavailable) = guard::maintenance(&core) {
        return Ok(unavailable);
    }
    let repo = repo_id(&path)?;
    let request: CreateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };
    core.lifecycle.create(&repo, &request).await.inspect_err(|e| {
        warn!("Unable to create Git repo `{}`: {}", repo, e);
    })?;
    Ok(HttpResponse::Created().finish())
}

/// `DELETE /api/v1/repositories/{org}/{repo}`
pub async fn delete(req: HttpRequest, path: Path<(String, String)>, core: Data<AppCore>) -> Result<HttpResponse, GitsError> {
    let repo = repo_id(&path)?;
    if let Some(response) = prepare(&core, &req, &repo, true).await? {
        return Ok(response);
    }
    core.lifecycle.delete(&repo).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `PUT /api/v1/repositories/{org}/{repo}/commit/{file...}`, body is the content.
pub async fn commit_file(
    req: HttpRequest,
    path: Path<(String, String, String)>,
    query: Query<CommitQuery>,
    core: Data<AppCore>,
    body: Bytes,
) -> Result<HttpResponse, GitsError> {
    let (org, name, file) = path.into_inner();
    let repo = RepositoryId::from_segments(&org, &name)?;
    if let Some(response) = prepare(&core, &req, &repo, true).await? {
        return Ok(response);
    }
    let files = vec![AddFile {
        mode: parse_mode(query.mode.as_deref(), &file),
        path: file,
        content: body,
    }];
    core.lifecycle
        .add(&repo, query.git_ref.as_deref(), files, query.message.as_deref())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `POST /api/v1/repositories/{org}/{repo}/commit`, one file per multipart
/// field; the field name is the path.
pub async fn commit_files(
    req: HttpRequest,
    path: Path<(String, String)>,
    query: Query<CommitQuery>,
    core: Data<AppCore>,
    mut form: Multipart,
) -> Result<HttpResponse, GitsError> {
    let repo = repo_id(&path)?;
    if let Some(response) = prepare(&core, &req, &repo, true).await? {
        return Ok(response);
    }
    let mut files: Vec<AddFile> = Vec::new();
    while let Some(field) = form.next().await {
        let mut field = field.map_err(|e| GitsError::BadRequest(format!("multipart request: {}", e)))?;
        let Some(name) = field.name().map(str::to_string).filter(|n| !n.is_empty()) else {
            return Err(GitsError::BadRequest("multipart part without a name".to_string()));
        };
        let mode = parse_mode(
            field.headers().get("Mode").and_then(|value| value.to_str().ok()),
            &name,
        );
        let mut content = BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| GitsError::BadRequest(format!("multipart part `{}`: {}", name, e)))?;
            content.extend_from_slice(&chunk);
        }
        if files.iter().any(|f| f.path == name) {
            continue;
        }
        files.push(AddFile {
            path: name,
            content: content.freeze(),
            mode,
        });
    }
    if files.is_empty() {
        return Err(GitsError::BadRequest("no files in multipart request".to_string()));
    }
    core.lifecycle
        .add(&repo, query.git_ref.as_deref(), files, query.message.as_deref())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `POST /api/v1/repositories/{org}/{repo}/subtrees?ref=`
pub async fn subtrees(
    req: HttpRequest,
    path: Path<(String, String)>,
    query: Query<RefQuery>,
    core: Data<AppCore>,
    body: Bytes,
) -> Result<HttpResponse, GitsError> {
    let repo = repo_id(&path)?;
    if let Some(response) = prepare(&core, &req, &repo, true).await? {
        return Ok(response);
    }
    let request: SubtreesRequest = serde_json::from_slice(&body)?;
    if request.subtrees.is_empty() {
        return Err(GitsError::BadRequest("request `subtrees` is empty".to_string()));
    }
    core.lifecycle
        .add_subtrees(&repo, query.git_ref.as_deref(), request.subtrees)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// `GET /api/v1/repositories/{org}/{repo}/blob/{file...}?ref=`
pub async fn blob(
    req: HttpRequest,
    path: Path<(String, String, String)>,
    query: Query<RefQuery>,
    core: Data<AppCore>,
) -> Result<HttpResponse, GitsError> {
    let (org, name, file) = path.into_inner();
    let repo = RepositoryId::from_segments(&org, &name)?;
    if let Some(response) = prepare(&core, &req, &repo, false).await? {
        return Ok(response);
    }
    let content = core.lifecycle.blob(&repo, query.git_ref.as_deref(), &file).await?;
    Ok(HttpResponse::Ok().content_type("application/octet-stream").body(content))
}

/// `GET /api/v1/repositories/{org}/{repo}/log?ref=`
pub async fn log(
    req: HttpRequest,
    path: Path<(String, String)>,
    query: Query<RefQuery>,
    core: Data<AppCore>,
) -> Result<HttpResponse, GitsError> {
    let repo = repo_id(&path)?;
    if let Some(response) = prepare(&core, &req, &repo, false).await? {
        return Ok(response);
    }
    let log = core.lifecycle.log(&repo, query.git_ref.as_deref()).await?;
    Ok(HttpResponse::Ok().content_type("text/plain; charset=utf-8").body(log))
}

/// `GET /api/v1/repositories/{org}/{repo}/status?ref=`
pub async fn status(
    req: HttpRequest,
    path: Path<(String, String)>,
    query: Query<RefQuery>,
    core: Data<AppCore>,
) -> Result<HttpResponse, GitsError> {
    let repo = repo_id(&path)?;
    if let Some(response) = prepare(&core, &req, &repo, false).await? {
        return Ok(response);
    }
    let status = core.lifecycle.status(&repo, query.git_ref.as_deref()).await?;
    debug!("Status of `{}`: {}", repo, status.commit);
    Ok(HttpResponse::Ok().json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode(Some("0755"), "run.sh"), Some(0o755));
        assert_eq!(parse_mode(Some("644"), "a"), Some(0o644));
        assert_eq!(parse_mode(Some("rwx"), "a"), None);
        assert_eq!(parse_mode(Some(""), "a"), None);
        assert_eq!(parse_mode(None, "a"), None);
    }
}
