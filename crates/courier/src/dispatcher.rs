use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Settings;
use crate::context::SessionContext;
use crate::errors::CourierResult;
use crate::history::ChatHistory;
use crate::models::attachment::Attachment;
use crate::normalizer::EventStream;
use crate::providers::agent::AgentProvider;
use crate::providers::base::{Provider, TurnRequest};
use crate::providers::standard::StandardProvider;
use crate::registry::{ModelDescriptor, AGENT_PROVIDER_TAG};

/// Routes each turn to the adapter registered for its descriptor's provider tag.
///
/// Tags without an entry go to the fallback adapter. Adding a backend means adding a
/// route, nothing else.
pub struct Dispatcher {
    settings: Settings,
    routes: HashMap<String, Arc<dyn Provider>>,
    fallback: Arc<dyn Provider>,
}

pub struct DispatcherBuilder {
    settings: Settings,
    routes: HashMap<String, Arc<dyn Provider>>,
    fallback: Arc<dyn Provider>,
}

impl DispatcherBuilder {
    /// Tags match exactly; the registry stores them lowercase
    pub fn route<S: Into<String>>(mut self, provider_tag: S, provider: Arc<dyn Provider>) -> Self {
        self.routes.insert(provider_tag.into(), provider);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            settings: self.settings,
            routes: self.routes,
            fallback: self.fallback,
        }
    }
}

impl Dispatcher {
    /// Standard completions for every tag, managed agents for the agent tag
    pub fn new(settings: Settings) -> CourierResult<Self> {
        let standard: Arc<dyn Provider> = Arc::new(StandardProvider::new(&settings)?);
        let agent: Arc<dyn Provider> = Arc::new(AgentProvider::new(&settings)?);
        Ok(Self::builder(settings, standard)
            .route(AGENT_PROVIDER_TAG, agent)
            .build())
    }

    pub fn builder(settings: Settings, fallback: Arc<dyn Provider>) -> DispatcherBuilder {
        DispatcherBuilder {
            settings,
            routes: HashMap::new(),
            fallback,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn route_for(&self, provider_tag: &str) -> &Arc<dyn Provider> {
        self.routes.get(provider_tag).unwrap_or(&self.fallback)
    }

    /// Start one assistant turn over `history`.
    ///
    /// A history without a system message gets one from the active instructions first.
    /// An `Err` means the adapter could not start and no event exists; anything that goes
    /// wrong later arrives as the stream's single `Error` event.
    pub async fn dispatch(
        &self,
        ctx: &SessionContext,
        history: ChatHistory,
        descriptor: Arc<ModelDescriptor>,
        attachments: Vec<Attachment>,
    ) -> CourierResult<EventStream> {
        let history = history.ensure_system(&self.settings.instructions);
        let provider = self.route_for(&descriptor.provider_tag);

        tracing::info!(
            session_id = %ctx.session_id,
            user_id = %ctx.user_id,
            model = %descriptor.id,
            provider = provider.name(),
            "dispatching turn"
        );

        let request = TurnRequest {
            ctx: ctx.clone(),
            descriptor,
            history,
            attachments,
        };
        provider.produce(request).await.map_err(|error| {
            tracing::error!(
                session_id = %ctx.session_id,
                user_id = %ctx.user_id,
                kind = %error.kind(),
                detail = %error.detail(),
                "turn could not start"
            );
            error
        })
    }

    /// Let every adapter drop the state it keeps for a finished session
    pub fn end_session(&self, ctx: &SessionContext) {
        for provider in self.routes.values().chain(std::iter::once(&self.fallback)) {
            provider.end_session(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CourierError;
    use crate::models::event::StreamEvent;
    use crate::models::message::Message;
    use crate::models::role::Role;
    use crate::normalizer::RawEvent;
    use crate::providers::mock::ScriptedProvider;
    use crate::registry::CredentialRef;
    use futures::StreamExt;

    fn descriptor(provider_tag: &str) -> Arc<ModelDescriptor> {
        Arc::new(ModelDescriptor {
            id: format!("{}/model", provider_tag),
            provider_tag: provider_tag.to_string(),
            deployment_name: "model".to_string(),
            endpoint: Some("https://example.invalid".to_string()),
            credential_ref: CredentialRef::None,
            agent_id: Some("asst".to_string()),
            api_version: None,
            description: String::new(),
            accepts_temperature: true,
        })
    }

    fn scripted(name: &'static str, scripts: Vec<Vec<RawEvent>>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new(name, scripts))
    }

    #[test]
    fn test_agent_tag_routes_to_agent_adapter() {
        let dispatcher = Dispatcher::new(Settings::default()).unwrap();
        assert_eq!(dispatcher.route_for("foundry").name(), "agent");
        for tag in ["openai", "azure", "perplexity", "gemini", "foundry2", "", "FOUNDRY"] {
            assert_eq!(dispatcher.route_for(tag).name(), "standard", "tag {:?}", tag);
        }
    }

    #[test]
    fn test_route_and_lookup_use_the_same_tag() {
        let fallback = scripted("fallback", Vec::new());
        let custom = scripted("custom", Vec::new());
        let dispatcher = Dispatcher::builder(Settings::default(), fallback)
            .route("Custom", custom)
            .build();
        assert_eq!(dispatcher.route_for("Custom").name(), "custom");
        assert_eq!(dispatcher.route_for("custom").name(), "fallback");
    }

    #[tokio::test]
    async fn test_dispatch_synthesizes_system_message() {
        let standard = scripted("standard", vec![vec![RawEvent::Finished]]);
        let dispatcher = Dispatcher::builder(
            Settings::default().with_instructions("be brief"),
            standard.clone(),
        )
        .build();

        let history = ChatHistory::new().append(Message::user().with_text("hi"));
        let events: Vec<StreamEvent> = dispatcher
            .dispatch(&SessionContext::anonymous("s"), history, descriptor("openai"), Vec::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events, vec![StreamEvent::Done]);

        let sent = &standard.requests()[0].history;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent.get(0).map(|m| m.role), Some(Role::System));
        assert_eq!(sent.get(0).map(Message::text).as_deref(), Some("be brief"));
    }

    #[tokio::test]
    async fn test_registered_route_wins_over_fallback() {
        let standard = scripted("standard", vec![]);
        let search = scripted("search", vec![vec![RawEvent::Finished]]);
        let dispatcher = Dispatcher::builder(Settings::default(), standard.clone())
            .route("Search", search.clone())
            .build();

        let result = dispatcher
            .dispatch(
                &SessionContext::anonymous("s"),
                ChatHistory::new(),
                descriptor("search"),
                Vec::new(),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(search.requests().len(), 1);
        assert!(standard.requests().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_returned_not_streamed() {
        let standard = scripted("standard", vec![]);
        let dispatcher = Dispatcher::builder(Settings::default(), standard).build();
        let result = dispatcher
            .dispatch(
                &SessionContext::anonymous("s"),
                ChatHistory::new(),
                descriptor("openai"),
                Vec::new(),
            )
            .await;
        assert!(matches!(result, Err(CourierError::Provider(_))));
    }
}
