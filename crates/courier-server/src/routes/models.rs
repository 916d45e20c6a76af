use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

/// A chat profile offered to clients
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ModelSummary {
    pub id: String,
    pub provider_tag: String,
    pub description: String,
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelSummary>> {
    let models = state
        .registry
        .descriptors()
        .map(|descriptor| ModelSummary {
            id: descriptor.id.clone(),
            provider_tag: descriptor.provider_tag.clone(),
            description: descriptor.description.clone(),
        })
        .collect();
    Json(models)
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/models", get(list_models))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;
    use axum::{
        body::{self, Body},
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_models_in_configuration_order() {
        let app = routes(test_support::state(json!([
            {"id": "openai/gpt-4o", "description": "GPT-4o"},
            {"id": "foundry/analyst", "endpoint": "https://agents.example", "agent_id": "asst_1",
             "description": "Data analyst"},
            {"id": "foundry/broken"}
        ])));

        let request = Request::builder().uri("/models").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let models: Vec<ModelSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            models,
            vec![
                ModelSummary {
                    id: "openai/gpt-4o".to_string(),
                    provider_tag: "openai".to_string(),
                    description: "GPT-4o".to_string(),
                },
                ModelSummary {
                    id: "foundry/analyst".to_string(),
                    provider_tag: "foundry".to_string(),
                    description: "Data analyst".to_string(),
                },
            ]
        );
    }
}
