//! Axum router construction.
//!
//! Builds the full application router with all route groups and middleware
//! layers.

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::middleware::session::session_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Extraction
        .route(
            "/assets/{asset_id}/segment",
            get(routes::segment::get_segment).post(routes::segment::post_segment),
        )
        // Previews
        .route(
            "/previews/{preview_id}",
            get(routes::previews::get_preview).delete(routes::previews::delete_preview),
        )
        // Admin
        .route("/admin/status", get(routes::admin::status))
        .route("/admin/tools", get(routes::admin::tools));

    // Every API request is bound to a session.
    let api = api.layer(middleware::from_fn_with_state(ctx.clone(), session_middleware));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use tc_av::{ConcurrencyGate, ToolRegistry, Transcoder};
    use tc_core::config::Config;
    use tc_core::{AssetId, AssetMetadata, Error, Result, SessionId, TimeRange, TrimMode};

    use crate::previews::NewPreview;
    use crate::store::{AssetStore, ByteStream};

    struct NoStore;

    #[async_trait]
    impl AssetStore for NoStore {
        async fn metadata(&self, asset_id: &AssetId) -> Result<AssetMetadata> {
            Err(Error::metadata_unavailable(asset_id, "not public"))
        }

        async fn fetch(&self, asset_id: &AssetId) -> Result<ByteStream> {
            Err(Error::fetch_failed(asset_id, "unreachable"))
        }
    }

    fn test_ctx(root: &Path) -> AppContext {
        let mut config = Config::default();
        config.cache.root_dir = root.join("sessions");
        config.preview.dir = root.join("previews");
        let transcoder =
            Transcoder::with_program("/nonexistent/ffmpeg", ConcurrencyGate::new(1), &config.encode);
        AppContext::with_transcoder(config, ToolRegistry::default(), transcoder, Arc::new(NoStore))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn cookie_for(session: SessionId) -> String {
        format!("trimcast_session={session}")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_ctx(dir.path()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn api_issues_session_cookie_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let app = build_router(ctx.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/api/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("trimcast_session="));
        assert!(cookie.contains("HttpOnly"));

        let pair = cookie.split(';').next().unwrap().to_string();
        let again = app
            .oneshot(
                Request::get("/api/admin/status")
                    .header(header::COOKIE, pair)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(again.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(ctx.sessions.len(), 1);
    }

    #[tokio::test]
    async fn invalid_range_is_400_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_ctx(dir.path()));

        let response = app
            .oneshot(
                Request::get("/api/assets/clip/segment?start=5&end=2")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "invalid_range");
        assert_eq!(body["request_id"], "req-42");
    }

    #[tokio::test]
    async fn malformed_asset_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_ctx(dir.path()));

        let response = app
            .oneshot(
                Request::get("/api/assets/bad.id/segment?start=1&end=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "validation_error");
    }

    #[tokio::test]
    async fn unavailable_metadata_is_424() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_ctx(dir.path()));

        let response = app
            .oneshot(
                Request::post("/api/assets/clip/segment")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"start_ms": 1000, "end_ms": 3000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FAILED_DEPENDENCY);
        assert_eq!(json_body(response).await["code"], "metadata_unavailable");
    }

    #[tokio::test]
    async fn unknown_preview_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_ctx(dir.path()));

        for id in [SessionId::new().to_string(), "garbage".to_string()] {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/api/previews/{id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn preview_access_is_session_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        std::fs::create_dir_all(ctx.previews.dir()).unwrap();
        let path = ctx.previews.dir().join("p.mp4");
        std::fs::write(&path, vec![1u8; 500]).unwrap();

        let owner = SessionId::new();
        let handle = ctx.previews.register(NewPreview {
            session_id: owner,
            path,
            size_bytes: 500,
            mode: TrimMode::Copy,
            range: TimeRange::new(0, 2_000).unwrap(),
            file_name: "clip_0.000-2.000.mp4".into(),
        });
        let url = format!("/api/previews/{}", handle.id);
        let app = build_router(ctx.clone());

        let ranged = app
            .clone()
            .oneshot(
                Request::get(&url)
                    .header(header::COOKIE, cookie_for(owner))
                    .header(header::RANGE, "bytes=0-99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(ranged.headers()[header::CONTENT_RANGE], "bytes 0-99/500");

        let stranger = app
            .clone()
            .oneshot(
                Request::get(&url)
                    .header(header::COOKIE, cookie_for(SessionId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stranger.status(), StatusCode::FORBIDDEN);

        let deleted = app
            .clone()
            .oneshot(
                Request::delete(&url)
                    .header(header::COOKIE, cookie_for(owner))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        assert!(ctx.previews.is_empty());
    }

    #[tokio::test]
    async fn admin_status_reports_gate() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_ctx(dir.path()));

        let response = app
            .oneshot(Request::get("/api/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["gate"]["capacity"], 1);
        assert_eq!(body["gate"]["running"], 0);
        assert_eq!(body["previews"], 0);
    }
}
