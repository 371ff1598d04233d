//! REST API.
//!
//! POST   /api/shell/connect         - Create a session (CONNECTING)
//! GET    /api/shell/sessions        - List sessions for `?owner=`
//! GET    /api/shell/sessions/:id    - Session status and audit fields
//! DELETE /api/shell/sessions/:id    - Close a session (idempotent)

use crate::session::model::ConnectRequest;
use crate::shell::ShellService;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shellgate_core::{
    ApiResponse, ConnectResponse, ErrorKind, ShellError, ShellSessionInfo,
};
use std::sync::Arc;
use tracing::warn;

/// Header naming the caller; authentication happens upstream.
pub const OWNER_HEADER: &str = "x-owner-identity";
const ANONYMOUS_OWNER: &str = "anonymous";

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<T>>)>;

pub fn router(service: Arc<ShellService>) -> Router {
    Router::new()
        .route("/api/shell/connect", post(connect))
        .route("/api/shell/sessions", get(list_sessions))
        .route(
            "/api/shell/sessions/:id",
            get(get_session).delete(close_session),
        )
        .with_state(service)
}

fn status_for(error: &ShellError) -> StatusCode {
    match (error.kind(), error) {
        (ErrorKind::Usage, ShellError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
        (ErrorKind::Usage, ShellError::InvalidState(_)) => StatusCode::CONFLICT,
        (ErrorKind::Usage, _) => StatusCode::BAD_REQUEST,
        (ErrorKind::Transport, _) => StatusCode::BAD_GATEWAY,
        (ErrorKind::Io | ErrorKind::Internal, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject<T>(error: ShellError) -> (StatusCode, Json<ApiResponse<T>>) {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!(error = %error, "request failed");
    }
    (status, Json(ApiResponse::error(error.to_string())))
}

fn owner_of(headers: &HeaderMap) -> String {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_OWNER)
        .to_string()
}

async fn connect(
    State(service): State<Arc<ShellService>>,
    headers: HeaderMap,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<ConnectResponse> {
    let owner = owner_of(&headers);
    service
        .connect(request, &owner)
        .await
        .map(|r| Json(ApiResponse::success(r)))
        .map_err(reject)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    owner: Option<String>,
}

async fn list_sessions(
    State(service): State<Arc<ShellService>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<ShellSessionInfo>> {
    let owner = query.owner.unwrap_or_else(|| owner_of(&headers));
    service
        .list_sessions(&owner)
        .await
        .map(|s| Json(ApiResponse::success(s)))
        .map_err(reject)
}

async fn get_session(
    State(service): State<Arc<ShellService>>,
    Path(id): Path<String>,
) -> ApiResult<ShellSessionInfo> {
    service
        .session_info(&id)
        .await
        .map(|s| Json(ApiResponse::success(s)))
        .map_err(reject)
}

async fn close_session(
    State(service): State<Arc<ShellService>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    service
        .disconnect(&id)
        .await
        .map(|()| Json(ApiResponse::success(())))
        .map_err(reject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::manager::tests::harness;
    use crate::shell::service::tests::service;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use shellgate_core::ShellStatus;
    use tower::ServiceExt;

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn connect_request(body: Value, owner: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/shell/connect")
            .header("content-type", "application/json");
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn demo_body() -> Value {
        json!({
            "host": "10.0.0.5",
            "port": 22,
            "username": "demo",
            "credentialRef": { "type": "password", "password": "secret" }
        })
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let h = harness();
        let (svc, _, _) = service(&h);
        let app = router(svc);

        let (status, body) = call(&app, connect_request(demo_body(), Some("alice"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let id = body["data"]["sessionId"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["status"], "CONNECTING");
        assert_eq!(body["data"]["subscribeTopic"], format!("/topic/shell/{id}"));

        let (status, body) = call(&app, get(&format!("/api/shell/sessions/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["ownerIdentity"], "alice");
        assert_eq!(body["data"]["commandCount"], 0);

        let (_, body) = call(&app, get("/api/shell/sessions?owner=alice")).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        let (_, body) = call(&app, get("/api/shell/sessions?owner=bob")).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let delete = || {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/shell/sessions/{id}"))
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(call(&app, delete()).await.0, StatusCode::OK);
        assert_eq!(call(&app, delete()).await.0, StatusCode::OK);
        assert_eq!(
            h.manager.session_info(&id).await.unwrap().status,
            ShellStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn owner_defaults_to_anonymous() {
        let h = harness();
        let (svc, _, _) = service(&h);
        let app = router(svc);
        call(&app, connect_request(demo_body(), None)).await;
        let (_, body) = call(&app, get("/api/shell/sessions?owner=anonymous")).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn error_mapping() {
        let h = harness();
        let (svc, _, _) = service(&h);
        let app = router(svc);

        let (status, body) = call(&app, get("/api/shell/sessions/shell_missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let mut bad = demo_body();
        bad["host"] = json!("  ");
        let (status, _) = call(&app, connect_request(bad, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(
            status_for(&ShellError::AuthFailed("demo".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ShellError::InvalidState("max sessions reached".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ShellError::Store("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
