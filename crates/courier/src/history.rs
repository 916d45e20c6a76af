use std::sync::Arc;

use crate::errors::{CourierError, CourierResult};
use crate::models::message::Message;
use crate::models::role::Role;

/// Non-system messages kept by [`ChatHistory::prune`]
pub const RETENTION_WINDOW: usize = 10;

/// The ordered messages of one conversation.
///
/// Index 0, when present, is the system message; it is never pruned and does not count
/// against the retention window. Every operation returns a new history and leaves the
/// receiver untouched, so a renderer can keep reading an older snapshot while a turn
/// builds the next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatHistory {
    messages: Vec<Arc<Message>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a history whose system message carries `instructions`
    pub fn with_instructions<S: Into<String>>(instructions: S) -> Self {
        Self::new().with_system(Message::system().with_text(instructions))
    }

    /// Append a message. A system message replaces the one at index 0 instead of
    /// landing at the end.
    pub fn append(&self, message: Message) -> Self {
        if message.role == Role::System {
            return self.with_system(message);
        }
        let mut messages = self.messages.clone();
        messages.push(Arc::new(message));
        Self { messages }
    }

    /// Replace the system message, or insert one at index 0
    pub fn with_system(&self, message: Message) -> Self {
        let mut messages = self.messages.clone();
        let message = Arc::new(message);
        if self.system().is_some() {
            messages[0] = message;
        } else {
            messages.insert(0, message);
        }
        Self { messages }
    }

    /// Insert a system message built from `instructions` only when none is present
    pub fn ensure_system(&self, instructions: &str) -> Self {
        if self.system().is_some() {
            self.clone()
        } else {
            self.with_system(Message::system().with_text(instructions))
        }
    }

    /// Drop the oldest non-system messages until at most [`RETENTION_WINDOW`] remain
    pub fn prune(&self) -> Self {
        let excess = self.non_system_len().saturating_sub(RETENTION_WINDOW);
        if excess == 0 {
            return self.clone();
        }

        let offset = usize::from(self.system().is_some());
        let mut messages = Vec::with_capacity(self.messages.len() - excess);
        messages.extend(self.messages[..offset].iter().cloned());
        messages.extend(self.messages[offset + excess..].iter().cloned());
        Self { messages }
    }

    /// Err when more non-system messages are held than the window allows
    pub fn check_retention(&self) -> CourierResult<()> {
        match self.non_system_len().checked_sub(RETENTION_WINDOW) {
            Some(excess) if excess > 0 => Err(CourierError::HistoryOverflow(excess)),
            _ => Ok(()),
        }
    }

    pub fn system(&self) -> Option<&Message> {
        self.messages
            .first()
            .map(Arc::as_ref)
            .filter(|message| message.role == Role::System)
    }

    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.messages.iter().map(Arc::as_ref)
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index).map(Arc::as_ref)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last().map(Arc::as_ref)
    }

    /// The most recent user message, which is the turn being answered
    pub fn last_user(&self) -> Option<&Message> {
        self.messages()
            .rev()
            .find(|message| message.role == Role::User)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn non_system_len(&self) -> usize {
        self.messages.len() - usize::from(self.system().is_some())
    }
}
