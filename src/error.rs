use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug)]
pub enum GitsError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    NotSupported(String),
    BadRepoName(String),
    Dependency(String),
    Storage(String),
    Git(String),
    Io(String),
    Config(String),
    Internal(String),
    RusshError(String),
    SshServerStartError(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl GitsError {
    pub fn message(&self) -> &str {
        match self {
            GitsError::BadRequest(msg)
            | GitsError::Unauthorized(msg)
            | GitsError::NotFound(msg)
            | GitsError::Conflict(msg)
            | GitsError::NotSupported(msg)
            | GitsError::BadRepoName(msg)
            | GitsError::Dependency(msg)
            | GitsError::Storage(msg)
            | GitsError::Git(msg)
            | GitsError::Io(msg)
            | GitsError::Config(msg)
            | GitsError::Internal(msg)
            | GitsError::RusshError(msg)
            | GitsError::SshServerStartError(msg) => msg,
        }
    }
}

impl Display for GitsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GitsError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            GitsError::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            GitsError::NotFound(msg) => write!(f, "not found: {}", msg),
            GitsError::Conflict(msg) => write!(f, "conflict: {}", msg),
            GitsError::NotSupported(msg) => write!(f, "not supported: {}", msg),
            GitsError::BadRepoName(msg) => write!(f, "bad repository name: {}", msg),
            GitsError::Dependency(msg) => write!(f, "external service: {}", msg),
            GitsError::Storage(msg) => write!(f, "archive storage: {}", msg),
            GitsError::Git(msg) => write!(f, "git: {}", msg),
            GitsError::Io(msg) => write!(f, "io: {}", msg),
            GitsError::Config(msg) => write!(f, "config: {}", msg),
            GitsError::Internal(msg) => write!(f, "internal: {}", msg),
            GitsError::RusshError(msg) => write!(f, "ssh: {}", msg),
            GitsError::SshServerStartError(msg) => write!(f, "ssh server start: {}", msg),
        }
    }
}

impl std::error::Error for GitsError {}

impl ResponseError for GitsError {
    fn status_code(&self) -> StatusCode {
        match self {
            GitsError::BadRequest(_) | GitsError::NotSupported(_) | GitsError::BadRepoName(_) => {
                StatusCode::BAD_REQUEST
            }
            // dependency failures are indistinguishable from a deny for the caller
            GitsError::Unauthorized(_) | GitsError::Dependency(_) => StatusCode::UNAUTHORIZED,
            GitsError::NotFound(_) => StatusCode::NOT_FOUND,
            GitsError::Conflict(_) => StatusCode::CONFLICT,
            GitsError::Storage(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.message(),
        })
    }
}

impl From<std::io::Error> for GitsError {
    fn from(e: std::io::Error) -> Self {
        GitsError::Io(e.to_string())
    }
}

impl From<russh::Error> for GitsError {
    fn from(e: russh::Error) -> Self {
        GitsError::RusshError(format!("{}", e))
    }
}

impl From<reqwest::Error> for GitsError {
    fn from(e: reqwest::Error) -> Self {
        GitsError::Dependency(e.to_string())
    }
}

impl From<serde_json::Error> for GitsError {
    fn from(e: serde_json::Error) -> Self {
        GitsError::BadRequest(e.to_string())
    }
}

impl From<object_store::Error> for GitsError {
    fn from(e: object_store::Error) -> Self {
        GitsError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GitsError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(GitsError::Dependency("hub down".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(GitsError::Conflict("exists".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(GitsError::Storage("s3".into()).status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(GitsError::Git("exit 128".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_json_body() {
        let response = GitsError::NotFound("repo `a/b`".into()).error_response();
        let body = response.into_body().try_into_bytes().unwrap();
        assert_eq!(&body[..], br#"{"error":"repo `a/b`"}"#);
    }
}
