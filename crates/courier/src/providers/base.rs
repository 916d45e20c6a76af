use async_trait::async_trait;
use std::sync::Arc;

use crate::context::SessionContext;
use crate::errors::CourierResult;
use crate::history::ChatHistory;
use crate::models::attachment::Attachment;
use crate::normalizer::{normalize, EventStream, RawStream};
use crate::registry::ModelDescriptor;

/// Everything an adapter needs for one assistant turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub ctx: SessionContext,
    pub descriptor: Arc<ModelDescriptor>,
    /// Full history; the last message is the user turn being answered
    pub history: ChatHistory,
    /// Files submitted with the user turn, already normalized by the caller
    pub attachments: Vec<Attachment>,
}

/// Shared contract of the backend adapters (standard completions, managed agents, ...)
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start the backend call and return its raw events.
    ///
    /// An `Err` means the call could not start (missing credential, unusable descriptor)
    /// and nothing has been shown. Failures after this point travel inside the stream.
    async fn open(&self, request: TurnRequest) -> CourierResult<RawStream>;

    /// Release whatever server-side state the adapter keeps for a session
    fn end_session(&self, _ctx: &SessionContext) {}

    /// Start the call and normalize its events
    async fn produce(&self, request: TurnRequest) -> CourierResult<EventStream> {
        let ctx = request.ctx.clone();
        let raw = self.open(request).await?;
        Ok(normalize(raw, ctx))
    }
}
