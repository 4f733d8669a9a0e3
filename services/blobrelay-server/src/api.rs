//! API handlers for the attachment service

use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::AppState;

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/upload", web::post().to(upload))
        .route("/statistics.json", web::get().to(statistics))
        .route("/health", web::get().to(health));
}

/// Upload query parameters
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Declared byte length; authoritative for the whole pipeline
    cl: Option<String>,
}

/// Accept an attachment upload and answer with its raw 16-byte identifier.
async fn upload(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<UploadQuery>,
    body: web::Payload,
) -> ActixResult<HttpResponse, ApiError> {
    let declared = match query.cl.as_deref() {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ApiError::InvalidLength(raw.to_string()))?,
        None => return Err(ApiError::MissingLength),
    };

    let identity = resolve_identity(&req, state.trusted_proxy)?;
    info!("upload of {} bytes from {}", declared, identity);

    let id = state.store.store(&identity, declared, body).await?;

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(id.as_bytes().to_vec()))
}

/// Resolve the rate-limiting identity for a request.
///
/// Behind a trusted proxy the forwarded address is taken verbatim; the
/// operator is responsible for stripping it from untrusted traffic upstream.
/// Otherwise the transport peer address is required, and a request without
/// one fails before any rate or quota state is touched.
fn resolve_identity(req: &HttpRequest, trusted_proxy: bool) -> Result<String, ApiError> {
    if trusted_proxy {
        Ok(req
            .headers()
            .get("X-Real-IP")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string())
    } else {
        req.peer_addr()
            .map(|addr| addr.ip().to_string())
            .ok_or(ApiError::PeerAddress)
    }
}

/// Quota statistics
async fn statistics(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.store.snapshot())
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

async fn health(_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "blobrelay-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use blobrelay_core::{AttachmentStore, RateLimitConfig, RelayConfig, UploadLimits};
    use bytes::Bytes;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tempfile::TempDir;

    macro_rules! test_app {
        ($config:expr, $trusted_proxy:expr) => {{
            let store = Arc::new(AttachmentStore::open(&$config).await.unwrap());
            let state = web::Data::new(AppState {
                store,
                trusted_proxy: $trusted_proxy,
            });
            test::init_service(App::new().app_data(state).configure(configure)).await
        }};
    }

    fn test_relay_config(tmp: &TempDir) -> RelayConfig {
        RelayConfig {
            storage_dir: tmp.path().to_path_buf(),
            storage_limit: 10_000,
            limits: UploadLimits {
                max_upload_bytes: 1000,
                attachment_ttl_secs: 600,
                eviction_floor_secs: 0,
            },
            turn: None,
            ..Default::default()
        }
    }

    fn peer() -> SocketAddr {
        "10.1.2.3:4000".parse().unwrap()
    }

    #[actix_web::test]
    async fn test_upload_roundtrips_through_identifier() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        let payload = Bytes::from_static(b"attachment body");
        let req = test::TestRequest::post()
            .uri(&format!("/upload?cl={}", payload.len()))
            .peer_addr(peer())
            .set_payload(payload.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let id_bytes = test::read_body(resp).await;
        assert_eq!(id_bytes.len(), 16);

        let id = uuid::Uuid::from_slice(&id_bytes).unwrap();
        let stored = std::fs::read(tmp.path().join(id.to_string())).unwrap();
        assert_eq!(Bytes::from(stored), payload);
    }

    #[actix_web::test]
    async fn test_missing_declared_length_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        let req = test::TestRequest::post()
            .uri("/upload")
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_garbage_declared_length_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        let req = test::TestRequest::post()
            .uri("/upload?cl=banana")
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_oversized_declaration_is_entity_too_large() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        // Tiny actual body; the declaration alone decides.
        let req = test::TestRequest::post()
            .uri("/upload?cl=1001")
            .peer_addr(peer())
            .set_payload(Bytes::from_static(b"tiny"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[actix_web::test]
    async fn test_short_body_is_conflict() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        let req = test::TestRequest::post()
            .uri("/upload?cl=500")
            .peer_addr(peer())
            .set_payload(Bytes::from_static(b"only a few bytes"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_unresolvable_peer_is_bad_gateway() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        // No peer address on the test request.
        let req = test::TestRequest::post()
            .uri("/upload?cl=4")
            .set_payload(Bytes::from_static(b"data"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_web::test]
    async fn test_trusted_proxy_uses_forwarded_identity() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_relay_config(&tmp);
        config.rate_limit = RateLimitConfig {
            max_bytes: 10,
            ..Default::default()
        };
        let app = test_app!(config, true);

        // First upload crosses the forwarded identity's budget.
        let req = test::TestRequest::post()
            .uri("/upload?cl=20")
            .insert_header(("X-Real-IP", "198.51.100.7"))
            .set_payload(Bytes::from(vec![0u8; 20]))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        // Same forwarded identity is now rate limited.
        let req = test::TestRequest::post()
            .uri("/upload?cl=1")
            .insert_header(("X-Real-IP", "198.51.100.7"))
            .set_payload(Bytes::from_static(b"x"))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        // A different forwarded identity is admitted.
        let req = test::TestRequest::post()
            .uri("/upload?cl=1")
            .insert_header(("X-Real-IP", "198.51.100.8"))
            .set_payload(Bytes::from_static(b"x"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_statistics_reflect_uploads() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        let req = test::TestRequest::post()
            .uri("/upload?cl=100")
            .peer_addr(peer())
            .set_payload(Bytes::from(vec![0u8; 100]))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/statistics.json").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let stats: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(stats["used_bytes"], 100);
        assert_eq!(stats["limit"], 10_000);
        assert!(stats["available_space"].as_u64().unwrap() <= 10_000);
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let tmp = TempDir::new().unwrap();
        let app = test_app!(test_relay_config(&tmp), false);

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
    }
}
