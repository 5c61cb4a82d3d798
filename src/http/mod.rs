use crate::config::http::HttpConfig;
use crate::error::GitsError;
use crate::serve::AppCore;
use actix_web::web::{Data, PayloadConfig, ServiceConfig, delete, get, post, put, resource, scope};
use actix_web::App;
use std::time::Duration;
use tracing::info;

pub const LOG_FORMAT: &str = "%a %r %s %b bytes in %D microseconds %{git-protocol}i";

/// Largest buffered management request body, a committed file in particular.
pub const MANAGEMENT_BODY_LIMIT: usize = 1 << 30;

#[derive(Clone)]
pub struct HttpServer {
    pub config: HttpConfig,
    pub core: AppCore,
}

/// Smart HTTP transport plus the management API.
pub fn routes(cfg: &mut ServiceConfig) {
    cfg.route("/api/v1/ping", get().to(api::ping))
        .service(
            scope("/api/v1/repositories/{org}/{repo}")
                .app_data(PayloadConfig::new(MANAGEMENT_BODY_LIMIT))
                .service(resource("").route(put().to(api::create)).route(delete().to(api::delete)))
                .route("/commit/{file:.*}", put().to(api::commit_file))
                .route("/commit", post().to(api::commit_files))
                .route("/subtrees", post().to(api::subtrees))
                .route("/blob/{file:.*}", get().to(api::blob))
                .route("/log", get().to(api::log))
                .route("/status", get().to(api::status)),
        )
        .service(
            scope("/repo/{org}/{repo}")
                .route("/info/refs", get().to(refs::refs))
                .route("/{service}", post().to(pack::pack)),
        );
}

impl HttpServer {
    pub fn new(config: HttpConfig, core: AppCore) -> Self {
        Self { config, core }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    pub async fn run(&self) -> Result<(), GitsError> {
        let core = self.core.clone();
        info!("HTTP listening on {}", self.bind_addr());
        actix_web::HttpServer::new(move || {
            App::new()
                .app_data(Data::new(core.clone()))
                .wrap(actix_web::middleware::Logger::new(LOG_FORMAT))
                .configure(routes)
        })
        .client_request_timeout(Duration::from_secs(self.config.read_timeout_secs))
        .keep_alive(Duration::from_secs(self.config.write_timeout_secs))
        .bind(self.bind_addr())?
        .run()
        .await?;
        Ok(())
    }
}

pub mod api;
pub mod guard;
pub mod pack;
pub mod refs;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extapi::stub::StubDirectory;
    use crate::maintenance::Maintenance;
    use crate::model::template::{Organization, TeamAccess, Template};
    use crate::model::user::LoginUser;
    use crate::serve::testing::{ADVERTISEMENT, MemoryRepos, core_with};
    use crate::token::{DeploymentKey, DeploymentKeys};
    use actix_web::http::StatusCode;
    use actix_web::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
    use actix_web::test;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use std::sync::Arc;

    const SECRET: &str = "s3cret";
    const REFS: &str = "/repo/acme/app-t1/info/refs?service=git-upload-pack";
    const RECEIVE: &str = "/repo/acme/app-t1/git-receive-pack";
    const UPLOAD: &str = "/repo/acme/app-t1/git-upload-pack";

    fn basic(user: &str, pass: &str) -> (&'static str, String) {
        ("Authorization", format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass))))
    }

    fn owned_by(owner: &str) -> Template {
        Template {
            owner_user_id: owner.to_string(),
            teams: vec![TeamAccess {
                team_id: "10".to_string(),
                team_name: "ACME.Readers".to_string(),
                can_write: false,
            }],
        }
    }

    async fn directory() -> Arc<StubDirectory> {
        let directory = Arc::new(StubDirectory::new());
        directory
            .put_org(Organization {
                id: "ACME".to_string(),
                show_source: true,
            })
            .await;
        directory.put_template("t1", owned_by("owner")).await;
        directory.put_team("10", &["reader"]).await;
        for (user, groups) in [("owner", vec![]), ("reader", vec!["ACME.Readers".to_string()])] {
            directory
                .put_login(
                    user,
                    Some("pw"),
                    LoginUser {
                        uid: user.to_string(),
                        organization: "acme".to_string(),
                        groups,
                    },
                )
                .await;
        }
        directory
    }

    fn keys() -> DeploymentKeys {
        DeploymentKeys::from_secrets(Some("hub"), Some(SECRET))
    }

    async fn core(directory: Arc<StubDirectory>) -> AppCore {
        let repos = Arc::new(MemoryRepos::new().with_repo("acme", "app-t1"));
        core_with(repos, directory, keys(), Some(SECRET))
    }

    macro_rules! app {
        ($core:expr) => {
            test::init_service(App::new().app_data(Data::new($core)).configure(routes)).await
        };
    }

    fn preamble() -> Vec<u8> {
        let mut expected = b"001e# service=git-upload-pack\n0000".to_vec();
        expected.extend_from_slice(ADVERTISEMENT);
        expected
    }

    #[actix_web::test]
    async fn test_refs_with_shared_secret() {
        let app = app!(core(directory().await).await);
        let req = test::TestRequest::get()
            .uri(REFS)
            .insert_header(basic(SECRET, ""))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/x-git-upload-pack-advertisement"
        );
        assert_eq!(resp.headers().get("Cache-Control").unwrap(), "no-cache");
        let body = test::read_body(resp).await;
        assert_eq!(body.as_ref(), preamble().as_slice());
    }

    #[actix_web::test]
    async fn test_refs_with_deployment_key() {
        let directory = directory().await;
        let app = app!(core(directory.clone()).await);
        let token = keys().encode(&DeploymentKey::new("owner", None)).unwrap();

        let req = test::TestRequest::get()
            .uri(REFS)
            .insert_header(basic(&token, ""))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await.as_ref(), preamble().as_slice());

        directory.put_template("t1", owned_by("someone-else")).await;
        let req = test::TestRequest::get()
            .uri(REFS)
            .insert_header(basic(&token, ""))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get("WWW-Authenticate").unwrap(), r#"Basic realm=".""#);
    }

    #[actix_web::test]
    async fn test_receive_pack_by_login() {
        let app = app!(core(directory().await).await);
        let req = test::TestRequest::post()
            .uri(RECEIVE)
            .insert_header(basic("reader", "pw"))
            .set_payload("0000")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri(RECEIVE)
            .insert_header(basic("owner", "pw"))
            .set_payload("0000")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/x-git-receive-pack-result"
        );
        assert_eq!(test::read_body(resp).await.as_ref(), b"0000");
    }

    #[actix_web::test]
    async fn test_reader_may_fetch() {
        let app = app!(core(directory().await).await);
        let req = test::TestRequest::post()
            .uri(UPLOAD)
            .insert_header(basic("reader", "pw"))
            .set_payload("0009done\n")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_gzip_request_body() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let app = app!(core(directory().await).await);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"0032want 8a3c1f0e7d2b4c6a9e0f1d2c3b4a596877665544\n00000009done\n").unwrap();
        let req = test::TestRequest::post()
            .uri(UPLOAD)
            .insert_header(basic(SECRET, ""))
            .insert_header((CONTENT_ENCODING, "gzip"))
            .set_payload(encoder.finish().unwrap())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            test::read_body(resp).await.as_ref(),
            b"0032want 8a3c1f0e7d2b4c6a9e0f1d2c3b4a596877665544\n00000009done\n"
        );

        let req = test::TestRequest::post()
            .uri(UPLOAD)
            .insert_header(basic(SECRET, ""))
            .insert_header((CONTENT_ENCODING, "gzip"))
            .set_payload("definitely not gzip")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_transport_rejections() {
        let app = app!(core(directory().await).await);
        let req = test::TestRequest::get().uri(REFS).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key("WWW-Authenticate"));

        let req = test::TestRequest::get()
            .uri("/repo/acme/app-t1/info/refs")
            .insert_header(basic(SECRET, ""))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/repo/acme/app-t1/info/refs?service=git-upload-archive")
            .insert_header(basic(SECRET, ""))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/repo/acme/missing-t1/info/refs?service=git-upload-pack")
            .insert_header(basic(SECRET, ""))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_malformed_repo_challenged_before_validation() {
        let app = app!(core(directory().await).await);
        let requests = || {
            [
                test::TestRequest::get().uri("/repo/acme/.git/info/refs?service=git-upload-pack"),
                test::TestRequest::post().uri("/repo/acme/.git/git-upload-pack").set_payload("0000"),
            ]
        };
        for req in requests() {
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert!(resp.headers().contains_key("WWW-Authenticate"));
        }
        for req in requests() {
            let resp = test::call_service(&app, req.insert_header(basic("owner", "pw")).to_request()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }

        let req = test::TestRequest::get()
            .uri("/repo/acme/.git/info/refs?service=git-upload-pack")
            .insert_header(basic(SECRET, ""))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_maintenance_blocks_pack_only() {
        let marker = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(marker.path(), "upgrading storage").unwrap();
        let mut core = core(directory().await).await;
        core.maintenance = Arc::new(Maintenance::new(Some(marker.path().to_path_buf())));
        let app = app!(core);

        let req = test::TestRequest::get()
            .uri(REFS)
            .insert_header(basic(SECRET, ""))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri(RECEIVE)
            .insert_header(basic(SECRET, ""))
            .set_payload("0000")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(test::read_body(resp).await.as_ref(), b"upgrading storage");
    }

    #[actix_web::test]
    async fn test_ping() {
        let app = app!(core(directory().await).await);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/ping").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await.as_ref(), b"pong");
    }

    #[actix_web::test]
    async fn test_repository_lifecycle() {
        let app = app!(core(directory().await).await);
        let secret = ("X-API-Secret", SECRET);

        let req = test::TestRequest::put().uri("/api/v1/repositories/acme/new-t2").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(!resp.headers().contains_key("WWW-Authenticate"));

        let req = test::TestRequest::put()
            .uri("/api/v1/repositories/acme/new-t2")
            .insert_header(secret)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
        let req = test::TestRequest::put()
            .uri("/api/v1/repositories/acme/new-t2")
            .insert_header(secret)
            .set_payload("{}")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::put()
            .uri("/api/v1/repositories/acme/new-t2/commit/docs/README.md?mode=0600&message=docs")
            .insert_header(secret)
            .set_payload("# New\n")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri("/api/v1/repositories/acme/new-t2/blob/docs/README.md")
            .insert_header(secret)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await.as_ref(), b"# New\n");

        let req = test::TestRequest::get()
            .uri("/api/v1/repositories/acme/new-t2/blob/missing.txt")
            .insert_header(secret)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert!(body["error"].is_string());

        let req = test::TestRequest::delete()
            .uri("/api/v1/repositories/acme/new-t2")
            .insert_header(secret)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
        let req = test::TestRequest::get()
            .uri("/api/v1/repositories/acme/new-t2/log")
            .insert_header(secret)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_commit_large_file() {
        let app = app!(core(directory().await).await);
        let content = vec![b'x'; 300 * 1024];
        let req = test::TestRequest::put()
            .uri("/api/v1/repositories/acme/app-t1/commit/big.bin")
            .insert_header(("X-API-Secret", SECRET))
            .set_payload(content.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get()
            .uri("/api/v1/repositories/acme/app-t1/blob/big.bin")
            .insert_header(("X-API-Secret", SECRET))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await.len(), content.len());
    }

    #[actix_web::test]
    async fn test_status_and_subtrees() {
        let app = app!(core(directory().await).await);
        let req = test::TestRequest::get()
            .uri("/api/v1/repositories/acme/app-t1/status?ref=develop")
            .insert_header(basic("", SECRET))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let status: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert_eq!(status["ref"], "refs/heads/develop");
        assert!(status.get("author").is_none());

        let req = test::TestRequest::post()
            .uri("/api/v1/repositories/acme/app-t1/subtrees")
            .insert_header(("X-API-Secret", SECRET))
            .set_payload(r#"{"subtrees": []}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/repositories/acme/app-t1/subtrees")
            .insert_header(("X-API-Secret", SECRET))
            .set_payload(r#"{"subtrees": [{"prefix": "lib", "remote": "https://github.com/acme/lib.git"}]}"#)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);
    }
}
