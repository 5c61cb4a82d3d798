use crate::auth::authorize_git;
use crate::error::GitsError;
use crate::http::guard;
use crate::pkt_line::service_announcement;
use crate::serve::AppCore;
use crate::service::GitService;
use crate::stream;
use actix_web::web::{Data, Path, Query};
use actix_web::{HttpRequest, HttpResponse};
use serde::Deserialize;
use tokio_stream::StreamExt;

#[derive(Deserialize, Clone, Debug)]
pub struct RefsQuery {
    #[serde(default)]
    service: Option<String>,
}

/// `GET /repo/{org}/{repo}/info/refs?service=...`
pub async fn refs(
    req: HttpRequest,
    path: Path<(String, String)>,
    core: Data<AppCore>,
    query: Query<RefsQuery>,
) -> Result<HttpResponse, GitsError> {
    let (org, name) = path.into_inner();
    let requested = query.service.clone().unwrap_or_default();
    let credentials = guard::credentials(&req);
    let repo = match guard::transport_repo(&core, &credentials, &org, &name) {
        Ok(repo) => repo,
        Err(rejected) => return Ok(rejected),
    };
    if !authorize_git(&core, &credentials, &org, &repo, &requested).await {
        return Ok(guard::challenge());
    }
    let service = GitService::from_http(&requested)
        .ok_or_else(|| GitsError::BadRequest(format!("service `{}` not supported", requested)))?;
    guard::existing(&core, &repo).await?;

    let advertisement = core.repos.refs_info(&repo, service).await?;
    let body = stream::once(service_announcement(service.as_str())).chain(advertisement);
    Ok(HttpResponse::Ok()
        .insert_header(("Pragma", "no-cache"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Expires", "Fri, 01 Jan 1980 00:00:00 GMT"))
        .content_type(service.advertisement_content_type())
        .streaming(body))
}
