use crate::auth::authorize_git;
use crate::error::GitsError;
use crate::http::guard;
use crate::serve::AppCore;
use crate::service::GitService;
use actix_web::http::header::CONTENT_ENCODING;
use actix_web::web::{Data, Path, Payload};
use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use flate2::write::GzDecoder;
use std::io::Write;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

fn gunzip(decoder: &mut GzDecoder<Vec<u8>>, chunk: &[u8]) -> Result<Bytes, GitsError> {
    decoder
        .write_all(chunk)
        .map_err(|e| GitsError::Internal(format!("unable to decompress request: {}", e)))?;
    Ok(Bytes::from(std::mem::take(decoder.get_mut())))
}

/// `POST /repo/{org}/{repo}/{service}`
pub async fn pack(
    req: HttpRequest,
    mut payload: Payload,
    path: Path<(String, String, String)>,
    core: Data<AppCore>,
) -> Result<HttpResponse, GitsError> {
    let (org, name, requested) = path.into_inner();
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
    if let Some(unavailable) = guard::maintenance(&core) {
        return Ok(unavailable);
    }

    let gzipped = req
        .headers()
        .get(CONTENT_ENCODING)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"gzip"));
    let mut decoder = gzipped.then(|| GzDecoder::new(Vec::new()));
    // A broken gzip header must fail before any response byte is written.
    let mut primed = None;
    if let Some(decoder) = decoder.as_mut() {
        match payload.next().await {
            Some(Ok(chunk)) => primed = Some(gunzip(decoder, &chunk)?),
            Some(Err(e)) => return Err(GitsError::BadRequest(format!("request body: {}", e))),
            None => {}
        }
    }

    let (tx, rx) = mpsc::channel(8);
    tokio::task::spawn_local(async move {
        if let Some(first) = primed {
            if tx.send(Ok(first)).await.is_err() {
                return;
            }
        }
        while let Some(next) = payload.next().await {
            let item = match next {
                Ok(chunk) => match decoder.as_mut() {
                    Some(decoder) => gunzip(decoder, &chunk),
                    None => Ok(chunk),
                },
                Err(e) => Err(GitsError::BadRequest(format!("request body: {}", e))),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                return;
            }
        }
        if let Some(decoder) = decoder {
            match decoder.finish() {
                Ok(rest) if !rest.is_empty() => {
                    tx.send(Ok(Bytes::from(rest))).await.ok();
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Unable to decompress request tail: {}", e);
                    tx.send(Err(GitsError::Internal(e.to_string()))).await.ok();
                }
            }
        }
        debug!("Request body forwarded");
    });

    let output = core
        .repos
        .pack(&repo, service, Box::pin(ReceiverStream::new(rx)))
        .await?;
    Ok(HttpResponse::Ok()
        .insert_header(("Cache-Control", "no-cache"))
        .content_type(service.result_content_type())
        .streaming(output))
}
