use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::context::SessionContext;
use crate::dispatcher::Dispatcher;
use crate::errors::CourierResult;
use crate::history::ChatHistory;
use crate::models::attachment::Attachment;
use crate::models::event::{Citation, StreamEvent};
use crate::models::message::Message;
use crate::normalizer::EventStream;
use crate::registry::ModelDescriptor;

/// One session's conversation: its history, the model it talks to and its log context.
///
/// Turns are strictly sequential. [`Conversation::begin_turn`] borrows the conversation
/// mutably for as long as the turn streams.
pub struct Conversation {
    ctx: SessionContext,
    descriptor: Arc<ModelDescriptor>,
    dispatcher: Arc<Dispatcher>,
    history: ChatHistory,
}

impl Conversation {
    pub fn new(ctx: SessionContext, descriptor: Arc<ModelDescriptor>, dispatcher: Arc<Dispatcher>) -> Self {
        let history = ChatHistory::with_instructions(dispatcher.settings().instructions.clone());
        Self {
            ctx,
            descriptor,
            dispatcher,
            history,
        }
    }

    pub fn ctx(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.descriptor
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Replace the system message the next turn is sent with
    pub fn set_instructions<S: Into<String>>(&mut self, instructions: S) {
        self.history = self
            .history
            .with_system(Message::system().with_text(instructions));
    }

    /// Send a user message and start streaming the reply.
    ///
    /// History only changes when the returned turn reaches `Done`: the user message and the
    /// assembled reply are appended together, then the history is pruned. A turn that fails
    /// or is dropped early leaves it as it was.
    pub async fn begin_turn(&mut self, message: Message, attachments: Vec<Attachment>) -> CourierResult<Turn<'_>> {
        let staged = self.history.append(message);
        let events = self
            .dispatcher
            .dispatch(&self.ctx, staged.clone(), Arc::clone(&self.descriptor), attachments)
            .await?;

        Ok(Turn {
            conversation: self,
            staged,
            events,
            outcome: TurnOutcome::default(),
            state: TurnState::Streaming,
        })
    }

    /// Drop adapter state kept for this session
    pub fn end(self) {
        self.dispatcher.end_session(&self.ctx);
    }
}

/// What a turn assembled from its events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    pub text: String,
    pub citations: Vec<Citation>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Streaming,
    Committed,
    Failed,
}

/// A streaming assistant turn. Dropping it before the end cancels the turn and closes the
/// backend connection.
pub struct Turn<'a> {
    conversation: &'a mut Conversation,
    staged: ChatHistory,
    events: EventStream,
    outcome: TurnOutcome,
    state: TurnState,
}

impl Turn<'_> {
    pub fn outcome(&self) -> &TurnOutcome {
        &self.outcome
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Delta { text } => self.outcome.text.push_str(text),
            StreamEvent::Citation(citation) => self.outcome.citations.push(citation.clone()),
            StreamEvent::Attachment(attachment) => self.outcome.attachments.push(attachment.clone()),
            StreamEvent::ToolOutput { .. } => {}
            StreamEvent::Done => self.commit(),
            StreamEvent::Error { .. } => self.state = TurnState::Failed,
        }
    }

    fn commit(&mut self) {
        let ctx = &self.conversation.ctx;
        let reply = Message::assistant().with_text(self.outcome.text.clone());
        let history = self.staged.append(reply).prune();
        if let Err(error) = history.check_retention() {
            tracing::error!(
                session_id = %ctx.session_id,
                user_id = %ctx.user_id,
                kind = %error.kind(),
                detail = %error.detail(),
                "history exceeds the retention window"
            );
        }
        tracing::debug!(
            session_id = %ctx.session_id,
            user_id = %ctx.user_id,
            messages = history.len(),
            "turn committed"
        );
        self.conversation.history = history;
        self.state = TurnState::Committed;
    }
}

impl Stream for Turn<'_> {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        if this.state != TurnState::Streaming {
            return Poll::Ready(None);
        }

        match this.events.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => {
                this.observe(&event);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.state = TurnState::Failed;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if self.state == TurnState::Streaming {
            let ctx = &self.conversation.ctx;
            tracing::info!(session_id = %ctx.session_id, user_id = %ctx.user_id, "turn cancelled");
        }
    }
}
