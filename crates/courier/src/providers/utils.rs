use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::{CourierError, CourierResult};
use crate::history::ChatHistory;
use crate::models::content::ContentPart;
use crate::utils::truncate_for_log;

/// OpenAI-compatible base URLs for vendors reachable without a configured endpoint
const DEFAULT_HOSTS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("gemini", "https://generativelanguage.googleapis.com/v1beta/openai"),
    ("perplexity", "https://api.perplexity.ai"),
    ("anthropic", "https://api.anthropic.com/v1"),
    ("groq", "https://api.groq.com/openai/v1"),
    ("mistral", "https://api.mistral.ai/v1"),
    ("deepseek", "https://api.deepseek.com/v1"),
    ("openrouter", "https://openrouter.ai/api/v1"),
];

pub fn default_host(provider_tag: &str) -> Option<&'static str> {
    DEFAULT_HOSTS
        .iter()
        .find(|(tag, _)| *tag == provider_tag)
        .map(|(_, host)| *host)
}

pub fn http_client(timeout: Duration) -> CourierResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CourierError::Provider(format!("cannot build HTTP client: {}", e)))
}

/// Convert a history to the OpenAI chat message array, keeping roles and order.
/// Text-only messages use the plain string form; images become `image_url` parts.
pub fn messages_to_openai_spec(history: &ChatHistory) -> Vec<Value> {
    history
        .messages()
        .map(|message| {
            let content = if message.has_images() {
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => json!({"type": "text", "text": text.text}),
                        ContentPart::Image(image) => json!({
                            "type": "image_url",
                            "image_url": {"url": image.data_url()}
                        }),
                    })
                    .collect();
                json!(parts)
            } else {
                json!(message.text())
            };
            json!({"role": message.role, "content": content})
        })
        .collect()
}

/// Turn a non-success response into a provider error carrying the service's message
pub async fn status_error(response: Response) -> CourierError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| error_message(&value))
        .unwrap_or(body);
    CourierError::Provider(format!("{}: {}", status, truncate_for_log(&detail)))
}

/// The message of an `{"error": ...}` payload, if the value is one
pub fn error_message(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    if error.is_null() {
        return None;
    }
    Some(
        error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;

    #[test]
    fn test_messages_to_openai_spec() {
        let history = ChatHistory::with_instructions("be brief")
            .append(Message::user().with_text("What is this?").with_image("aGVsbG8=", "image/png"))
            .append(Message::assistant().with_text("A greeting."));

        let spec = messages_to_openai_spec(&history);
        assert_eq!(
            spec,
            vec![
                json!({"role": "system", "content": "be brief"}),
                json!({"role": "user", "content": [
                    {"type": "text", "text": "What is this?"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,aGVsbG8="}}
                ]}),
                json!({"role": "assistant", "content": "A greeting."}),
            ]
        );
    }

    #[test]
    fn test_default_host() {
        assert_eq!(default_host("perplexity"), Some("https://api.perplexity.ai"));
        assert_eq!(default_host("azure"), None);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(&json!({"error": {"message": "quota exceeded", "code": 429}})),
            Some("quota exceeded".to_string())
        );
        assert_eq!(error_message(&json!({"error": "boom"})), Some("boom".to_string()));
        assert_eq!(error_message(&json!({"error": null})), None);
        assert_eq!(error_message(&json!({"choices": []})), None);
    }
}
