use serde::{Deserialize, Serialize};

/// Correlation data for one conversation, passed explicitly to every call that logs
/// or talks to a stateful backend. Never part of the history content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
}

impl SessionContext {
    pub fn new<S: Into<String>, U: Into<String>>(session_id: S, user_id: U) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn anonymous<S: Into<String>>(session_id: S) -> Self {
        Self::new(session_id, "anonymous")
    }
}

impl std::fmt::Display for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.session_id, self.user_id)
    }
}
