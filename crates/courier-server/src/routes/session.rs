use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Header set by the hosting platform's authentication layer
pub const PRINCIPAL_HEADER: &str = "x-ms-client-principal-name";

#[derive(Debug, Deserialize, Serialize)]
struct CreateSessionRequest {
    model: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct CreateSessionResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Display name of the caller, used for log correlation only
fn user_id(headers: &HeaderMap) -> &str {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let descriptor = match state.registry.resolve(&request.model) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    };

    let ctx = state.open_session(descriptor, user_id(&headers));
    tracing::info!(session_id = %ctx.session_id, user_id = %ctx.user_id, model = %request.model, "session opened");
    (
        StatusCode::OK,
        Json(CreateSessionResponse {
            session_id: ctx.session_id,
        }),
    )
        .into_response()
}

async fn delete_session(State(state): State<AppState>, Path(session_id): Path<String>) -> StatusCode {
    match state.close_session(&session_id) {
        Some(ctx) => {
            tracing::info!(session_id = %ctx.session_id, user_id = %ctx.user_id, "session closed");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use axum::{
        body::{self, Body},
        http::Request,
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn create_request(model: &str, principal: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/sessions")
            .method("POST")
            .header("content-type", "application/json");
        if let Some(principal) = principal {
            builder = builder.header(PRINCIPAL_HEADER, principal);
        }
        builder
            .body(Body::from(
                serde_json::to_string(&CreateSessionRequest {
                    model: model.to_string(),
                })
                .unwrap(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_delete_session() {
        let state = test_support::state(json!([{"id": "openai/gpt-4o-mini"}]));
        let app = routes(state.clone());

        let response = app
            .clone()
            .oneshot(create_request("openai/gpt-4o-mini", Some("alice@example.com")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: CreateSessionResponse = serde_json::from_slice(&body).unwrap();

        let entry = state.session(&created.session_id).unwrap();
        assert_eq!(entry.ctx.user_id, "alice@example.com");

        let delete_request = Request::builder()
            .uri(format!("/sessions/{}", created.session_id))
            .method("DELETE")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete_request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.session(&created.session_id).is_none());
    }

    #[tokio::test]
    async fn test_anonymous_user() {
        let state = test_support::state(json!([{"id": "openai/gpt-4o-mini"}]));
        let response = routes(state.clone())
            .oneshot(create_request("openai/gpt-4o-mini", None))
            .await
            .unwrap();
        let body = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let created: CreateSessionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(state.session(&created.session_id).unwrap().ctx.user_id, "anonymous");
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let app = routes(test_support::state(json!([{"id": "openai/gpt-4o-mini"}])));
        let response = app.oneshot(create_request("openai/gpt-5", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_unknown_session() {
        let app = routes(test_support::state(json!([])));
        let request = Request::builder()
            .uri("/sessions/missing")
            .method("DELETE")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
