use super::attachment::Attachment;
use crate::errors::{CourierError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A numbered reference to an external source.
///
/// `index` is 1-based, unique within a turn and assigned in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub url: String,
    pub title: String,
}

/// One normalized unit of an assistant turn's incremental output.
///
/// The events of a turn end with exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta { text: String },
    Citation(Citation),
    ToolOutput { kind: String, payload: Value },
    Attachment(Attachment),
    Done,
    Error { kind: ErrorKind, message: String },
}

impl StreamEvent {
    pub fn delta<S: Into<String>>(text: S) -> Self {
        StreamEvent::Delta { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

impl From<&CourierError> for StreamEvent {
    fn from(err: &CourierError) -> Self {
        StreamEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<CourierError> for StreamEvent {
    fn from(err: CourierError) -> Self {
        StreamEvent::from(&err)
    }
}
