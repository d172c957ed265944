//! HTTP surface: `POST /api/chat`.
//!
//! A thin JSON wrapper over one [`ChatSession`] cycle. Each request starts a
//! fresh session (system turn + one user turn), so the endpoint keeps no
//! conversation state between calls.
//!
//! ```text
//! POST /api/chat  { "message": "…", "snippet": "<base64 png>"? }
//!   200 { "reply": "…" }
//!   4xx/5xx { "error": "…" }
//! OPTIONS /api/chat  → 200, empty body
//! ```

use crate::capture::{encode::PNG_MIME, Artifact};
use crate::config::SessionConfig;
use crate::error::{ChatError, ServiceError};
use crate::session::{ChatSession, CompletionService};
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted request body; captured regions arrive base64-encoded.
pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Shared state for every request.
#[derive(Clone)]
pub struct AppState {
    pub config: SessionConfig,
    pub service: Arc<dyn CompletionService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// Captured region as base64 PNG, optionally as a `data:` URL.
    #[serde(default)]
    pub snippet: Option<String>,
    /// Alternate name for `snippet`.
    #[serde(default)]
    pub image_data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Errors returned as `{ "error": … }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(ServiceError),
    Internal(String),
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::EmptyInput => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Service(err) => {
                let status = match err {
                    ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, err.user_message().to_string())
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat).options(preflight))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serve the router on `listener` until the process is stopped.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(state)).await
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let mut session = ChatSession::new(&state.config, Arc::clone(&state.service));

    if let Some(data) = req.snippet.or(req.image_data).filter(|s| !s.is_empty()) {
        let (mime_type, payload) = split_data_url(&data);
        session.attach(Artifact::from_base64(payload, mime_type))?;
    }
    session.submit(req.message).await?;

    if let Some(err) = session.controller().last_error() {
        warn!("Chat request failed: {}", err);
        return Err(ApiError::Service(err.clone()));
    }
    let reply = session
        .transcript()
        .last()
        .content
        .display_text()
        .unwrap_or_default();
    Ok(Json(ChatReply { reply }))
}

/// Accept both bare base64 and `data:<mime>;base64,…`.
///
/// Returns the media type and the payload. Bare base64 and data URLs without
/// a media type are taken to be PNG.
fn split_data_url(data: &str) -> (&str, &str) {
    let Some(rest) = data.strip_prefix("data:") else {
        return (PNG_MIME, data);
    };
    match rest.split_once(',') {
        Some((meta, b64)) => {
            let mime = meta.split(';').next().unwrap_or_default().trim();
            (if mime.is_empty() { PNG_MIME } else { mime }, b64)
        }
        None => (PNG_MIME, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CompletionRequest;
    use axum::body::Body;
    use axum::http::Request;
    use futures::future::BoxFuture;
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct Canned {
        outcome: Result<String, ServiceError>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl CompletionService for Canned {
        fn complete<'a>(
            &'a self,
            request: &'a CompletionRequest,
        ) -> BoxFuture<'a, Result<String, ServiceError>> {
            self.seen.lock().unwrap().push(request.clone());
            let outcome = self.outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    fn app(outcome: Result<String, ServiceError>) -> (Router, Arc<Canned>) {
        let service = Arc::new(Canned {
            outcome,
            seen: Mutex::new(Vec::new()),
        });
        let state = AppState {
            config: SessionConfig::default(),
            service: service.clone(),
        };
        (router(state), service)
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn chat_returns_reply_and_attaches_snippet() {
        let (app, service) = app(Ok("It is a 20 mm bore.".into()));
        let resp = app
            .oneshot(post_json(
                r#"{"message":"what bore?","snippet":"data:image/png;base64,QUJD"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["reply"], "It is a 20 mm bore.");

        let seen = service.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].image_count(), 1);
        let json = serde_json::to_value(&seen[0].messages[1]).unwrap();
        assert_eq!(json["content"][1]["encodedValue"], "QUJD");
    }

    #[tokio::test]
    async fn snippet_keeps_its_data_url_media_type() {
        let (app, service) = app(Ok("A weld symbol.".into()));
        let resp = app
            .oneshot(post_json(
                r#"{"message":"what symbol?","imageData":"data:image/jpeg;base64,/9j/"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let seen = service.seen.lock().unwrap();
        let json = serde_json::to_value(&seen[0].messages[1]).unwrap();
        assert_eq!(json["content"][1]["mimeType"], "image/jpeg");
        assert_eq!(json["content"][1]["encodedValue"], "/9j/");
    }

    #[tokio::test]
    async fn service_failure_is_non_2xx_with_error() {
        let (app, _) = app(Err(ServiceError::Api {
            retries: 2,
            detail: "upstream 500".into(),
        }));
        let resp = app.oneshot(post_json(r#"{"message":"hi"}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(resp).await;
        assert!(body["error"].as_str().unwrap().contains("Error communicating"));
        assert!(body.get("reply").is_none());
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let (app, service) = app(Ok("unused".into()));
        let resp = app.oneshot(post_json(r#"{"message":""}"#)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(service.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn options_is_ok_with_empty_body() {
        let (app, _) = app(Ok("unused".into()));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/chat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn get_is_method_not_allowed() {
        let (app, _) = app(Ok("unused".into()));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/chat")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn data_url_prefix_is_stripped() {
        assert_eq!(
            split_data_url("data:image/png;base64,QUJD"),
            ("image/png", "QUJD")
        );
        assert_eq!(split_data_url("QUJD"), (PNG_MIME, "QUJD"));
        assert_eq!(split_data_url("data:;base64,QUJD"), (PNG_MIME, "QUJD"));
    }
}
