use crate::auth::{Credentials, check_api_secret};
use crate::error::GitsError;
use crate::model::repository::RepositoryId;
use crate::serve::AppCore;
use actix_web::http::header::Header;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use tracing::debug;

pub const API_SECRET_HEADER: &str = "X-API-Secret";

pub fn credentials(req: &HttpRequest) -> Credentials {
    let api_secret = req
        .headers()
        .get(API_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let basic = Authorization::<Basic>::parse(req).ok().map(|auth| {
        let scheme = auth.into_scheme();
        (
            scheme.user_id().to_string(),
            scheme.password().unwrap_or("").to_string(),
        )
    });
    Credentials { api_secret, basic }
}

/// Git clients only prompt for credentials after a challenge.
pub fn challenge() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header(("WWW-Authenticate", r#"Basic realm=".""#))
        .finish()
}

/// Parses the repository of a transport URL. Only holders of the shared
/// secret learn that a name is malformed; everyone else is challenged, as
/// nothing could authorize them against it.
pub fn transport_repo(
    core: &AppCore,
    credentials: &Credentials,
    org: &str,
    name: &str,
) -> Result<RepositoryId, HttpResponse> {
    RepositoryId::from_segments(org, name).map_err(|e| {
        if check_api_secret(core.api_secret.as_deref(), credentials) {
            e.error_response()
        } else {
            debug!("Challenging request for malformed repository {}/{}: {}", org, name, e);
            challenge()
        }
    })
}

/// Management endpoints answer a bare 401, without a challenge.
pub fn management(core: &AppCore, req: &HttpRequest) -> Option<HttpResponse> {
    if check_api_secret(core.api_secret.as_deref(), &credentials(req)) {
        return None;
    }
    debug!("Rejected {} {}: bad API secret", req.method(), req.path());
    Some(HttpResponse::Unauthorized().finish())
}

/// 404 unless the repository directory exists.
pub async fn existing(core: &AppCore, repo: &RepositoryId) -> Result<(), GitsError> {
    if core.repos.exist(repo).await {
        Ok(())
    } else {
        Err(GitsError::NotFound(format!("repository `{}` not found", repo)))
    }
}

/// 503 with the operator's message while the maintenance marker exists.
pub fn maintenance(core: &AppCore) -> Option<HttpResponse> {
    let (on, message) = core.maintenance.check();
    if !on {
        return None;
    }
    let mut response = HttpResponse::ServiceUnavailable();
    Some(if message.is_empty() {
        response.finish()
    } else {
        response.content_type("text/plain; charset=utf-8").body(message)
    })
}
