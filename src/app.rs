use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{groups, photos, text};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(photos::router())
                .merge(text::router())
                .merge(groups::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::inference::provider::ProviderPayload;
    use crate::inference::repo::TaskStatus;
    use crate::inference::worker::Worker;
    use crate::nutrition::RawItem;
    use crate::test_utils::{png_bytes, token_for, Harness, ScriptedProvider};

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn bearer(h: &Harness, user: Uuid) -> String {
        format!("Bearer {}", token_for(&h.state.config.jwt, user))
    }

    #[tokio::test]
    async fn health_is_public() {
        let h = Harness::new();
        let res = build_app(h.state.clone())
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn pipeline_routes_require_a_token() {
        let h = Harness::new();
        let res = build_app(h.state.clone())
            .oneshot(
                Request::post("/api/v1/normalize")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"text":"rice 100 g"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn normalize_returns_items() {
        let payload = ProviderPayload {
            items: vec![RawItem {
                unit: Some("g".into()),
                amount: Some(100.0),
                kcal: Some(130.0),
                protein_g: Some(2.7),
                fat_g: Some(0.3),
                carb_g: Some(28.0),
                ..RawItem::named("rice")
            }],
            ..Default::default()
        };
        let h = Harness::with_provider(ScriptedProvider::new().with_normalized(Ok(payload)));
        let res = build_app(h.state.clone())
            .oneshot(
                Request::post("/api/v1/normalize")
                    .header(header::AUTHORIZATION, bearer(&h, Uuid::new_v4()))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"text":"rice 100 g","locale":"en"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["source"], "provider");
        assert_eq!(body["items"][0]["name"], "rice");
        assert_eq!(body["items"][0]["unit"], "g");
    }

    #[tokio::test]
    async fn base64_upload_then_status_after_worker() {
        let h = Harness::new();
        let user = Uuid::new_v4();
        let app = build_app(h.state.clone());

        use base64ct::{Base64, Encoding};
        let b64 = Base64::encode_string(&png_bytes(8, 8, 1));
        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/photos/base64")
                    .header(header::AUTHORIZATION, bearer(&h, user))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        serde_json::json!({ "image_b64": b64, "content_type": "image/png" })
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let receipt = json_body(res).await;
        assert_eq!(receipt["status"], "queued");
        assert_eq!(receipt["duplicate"], false);
        let id = receipt["image_id"].as_str().unwrap().to_string();

        let worker = Worker::from_state(&h.state);
        let (_, status) = worker.tick().await.unwrap().unwrap();
        assert_eq!(status, TaskStatus::Ready);

        let res = app
            .oneshot(
                Request::get(format!("/api/v1/photos/{id}"))
                    .header(header::AUTHORIZATION, bearer(&h, user))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "ready");
        assert!(body["result"].is_object());
        assert!(body["url"].as_str().unwrap().contains("images"));
    }

    #[tokio::test]
    async fn bad_base64_and_unknown_photo_map_to_client_errors() {
        let h = Harness::new();
        let user = Uuid::new_v4();
        let app = build_app(h.state.clone());

        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/photos/base64")
                    .header(header::AUTHORIZATION, bearer(&h, user))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"image_b64":"%%%"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await["error"], "invalid_input");

        let res = app
            .oneshot(
                Request::get(format!("/api/v1/photos/{}", Uuid::new_v4()))
                    .header(header::AUTHORIZATION, bearer(&h, user))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn photo_status_is_visible_to_its_owner_only() {
        let h = Harness::new();
        let (alice, mallory) = (Uuid::new_v4(), Uuid::new_v4());
        let app = build_app(h.state.clone());

        use base64ct::{Base64, Encoding};
        let b64 = Base64::encode_string(&png_bytes(8, 8, 7));
        let res = app
            .clone()
            .oneshot(
                Request::post("/api/v1/photos/base64")
                    .header(header::AUTHORIZATION, bearer(&h, alice))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::json!({ "image_b64": b64, "content_type": "image/png" })
                            .to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let id = json_body(res).await["image_id"].as_str().unwrap().to_string();

        let get = |user: Uuid| {
            Request::get(format!("/api/v1/photos/{id}"))
                .header(header::AUTHORIZATION, bearer(&h, user))
                .body(Body::empty())
                .unwrap()
        };
        let res = app.clone().oneshot(get(mallory)).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body = json_body(res).await;
        assert_eq!(body["error"], "not_found");
        assert!(body.get("url").is_none());

        let res = app.oneshot(get(alice)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["status"], "queued");
    }

    #[tokio::test]
    async fn empty_media_group_finalize_is_unprocessable() {
        let h = Harness::new();
        let res = build_app(h.state.clone())
            .oneshot(
                Request::post("/api/v1/media-groups/album-9/finalize")
                    .header(header::AUTHORIZATION, bearer(&h, Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(res).await["error"], "empty_group");
    }
}
