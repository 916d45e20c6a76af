use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use courier::models::attachment::Attachment;
use courier::models::event::StreamEvent;
use courier::models::message::Message;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;

#[derive(Debug, Deserialize)]
struct ImagePayload {
    /// base64
    data: String,
    mime: String,
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    text: String,
    #[serde(default)]
    images: Vec<ImagePayload>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

impl ReplyRequest {
    /// Agents take every file as an upload. Standard models take images as image
    /// parts and text files inline; any other file is refused.
    fn into_turn(self, agent: bool) -> Result<(Message, Vec<Attachment>), StatusCode> {
        let mut message = Message::user().with_text(self.text);
        let mut attachments = Vec::new();
        for attachment in self.attachments {
            if agent {
                attachments.push(attachment);
            } else if attachment.is_image() {
                message = message.with_image(attachment.to_base64(), attachment.mime);
            } else {
                let body = std::str::from_utf8(&attachment.data).map_err(|_| StatusCode::BAD_REQUEST)?;
                message = message.with_text(format!("File {}:\n{}", attachment.name, body));
            }
        }
        for (n, image) in self.images.into_iter().enumerate() {
            if agent {
                let data = STANDARD
                    .decode(image.data.as_bytes())
                    .map_err(|_| StatusCode::BAD_REQUEST)?;
                let name = format!(
                    "image_{}.{}",
                    n + 1,
                    image.mime.rsplit('/').next().unwrap_or("png")
                );
                attachments.push(Attachment::new(name, image.mime, data));
            } else {
                message = message.with_image(image.data, image.mime);
            }
        }
        Ok((message, attachments))
    }
}

/// Streamed body in the AI SDK data stream protocol
pub struct DataStreamResponse {
    body: BoxStream<'static, Result<Bytes, Infallible>>,
}

impl IntoResponse for DataStreamResponse {
    fn into_response(self) -> axum::response::Response {
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (HeaderName::from_static("x-vercel-ai-data-stream"), "v1"),
            ],
            Body::from_stream(self.body),
        )
            .into_response()
    }
}

// Protocol-specific line formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_event(event: &StreamEvent) -> String {
        match event {
            StreamEvent::Delta { text } => Self::format_text(text),
            // message annotations
            StreamEvent::Citation(_) => format!("8:{}\n", json!([event])),
            // data parts
            StreamEvent::ToolOutput { .. } | StreamEvent::Attachment(_) => {
                format!("2:{}\n", json!([event]))
            }
            StreamEvent::Error { message, .. } => {
                format!("3:{}\n{}", json!(message), Self::format_finish("error"))
            }
            StreamEvent::Done => Self::format_finish("stop"),
        }
    }

    fn format_text(text: &str) -> String {
        format!("0:{}\n", json!(text))
    }

    fn format_finish(reason: &str) -> String {
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": 0,
                "completionTokens": 0
            }
        });
        format!("d:{}\n", finish)
    }
}

async fn handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ReplyRequest>,
) -> Result<DataStreamResponse, StatusCode> {
    let entry = state.session(&session_id).ok_or(StatusCode::NOT_FOUND)?;
    let conversation = entry.conversation.try_lock_owned().map_err(|_| {
        tracing::warn!(
            session_id = %entry.ctx.session_id,
            user_id = %entry.ctx.user_id,
            "reply rejected while a turn is streaming"
        );
        StatusCode::CONFLICT
    })?;
    let (message, attachments) = request.into_turn(conversation.descriptor().is_agent())?;

    // Dropping the body (client gone) drops the turn, which cancels it
    let body = async_stream::stream! {
        let mut conversation = conversation;
        match conversation.begin_turn(message, attachments).await {
            Ok(mut turn) => {
                while let Some(event) = turn.next().await {
                    yield Ok::<_, Infallible>(Bytes::from(ProtocolFormatter::format_event(&event)));
                }
            }
            Err(error) => {
                yield Ok(Bytes::from(ProtocolFormatter::format_event(&StreamEvent::from(error))));
            }
        };
    };

    Ok(DataStreamResponse { body: body.boxed() })
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/sessions/:id/reply", post(handler))
        .with_state(state)
}
