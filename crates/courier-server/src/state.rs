use courier::context::SessionContext;
use courier::conversation::Conversation;
use courier::dispatcher::Dispatcher;
use courier::registry::{ModelDescriptor, ModelRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One live conversation. Its mutex is held for as long as a turn streams.
#[derive(Clone)]
pub struct SessionEntry {
    pub ctx: SessionContext,
    pub conversation: Arc<tokio::sync::Mutex<Conversation>>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
}

impl AppState {
    pub fn new(registry: ModelRegistry, dispatcher: Dispatcher) -> Self {
        Self {
            registry: Arc::new(registry),
            dispatcher: Arc::new(dispatcher),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn open_session(&self, descriptor: Arc<ModelDescriptor>, user_id: &str) -> SessionContext {
        let ctx = SessionContext::new(uuid::Uuid::new_v4().to_string(), user_id);
        let conversation = Conversation::new(ctx.clone(), descriptor, Arc::clone(&self.dispatcher));
        let entry = SessionEntry {
            ctx: ctx.clone(),
            conversation: Arc::new(tokio::sync::Mutex::new(conversation)),
        };
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ctx.session_id.clone(), entry);
        ctx
    }

    pub fn session(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Forget a session and release the backend state kept for it. A turn still
    /// streaming keeps its conversation until the client goes away.
    pub fn close_session(&self, session_id: &str) -> Option<SessionContext> {
        let entry = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)?;
        self.dispatcher.end_session(&entry.ctx);
        Some(entry.ctx)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use courier::config::Settings;

    pub fn state(models: serde_json::Value) -> AppState {
        let registry = ModelRegistry::from_json(&models.to_string()).unwrap();
        let dispatcher = Dispatcher::new(Settings::default().with_instructions("You are terse.")).unwrap();
        AppState::new(registry, dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_lifecycle() {
        let state = test_support::state(json!([{"id": "openai/gpt-4o-mini"}]));
        let descriptor = state.registry.resolve("openai/gpt-4o-mini").unwrap();

        let ctx = state.open_session(descriptor, "alice");
        assert_eq!(ctx.user_id, "alice");
        let entry = state.session(&ctx.session_id).unwrap();
        assert_eq!(entry.ctx, ctx);

        assert_eq!(state.close_session(&ctx.session_id), Some(ctx.clone()));
        assert!(state.session(&ctx.session_id).is_none());
        assert!(state.close_session(&ctx.session_id).is_none());
    }
}
