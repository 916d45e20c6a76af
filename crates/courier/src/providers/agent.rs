use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;

use super::base::{Provider, TurnRequest};
use super::sse::{sse_stream, SseEvent};
use super::utils::{error_message, http_client, status_error};
use crate::config::Settings;
use crate::context::SessionContext;
use crate::errors::{CourierError, CourierResult};
use crate::models::attachment::Attachment;
use crate::normalizer::{RawEvent, RawStream, Source};
use crate::utils::truncate_for_log;

pub const DEFAULT_AGENT_API_VERSION: &str = "2025-05-01";

/// Title given to a cited file whose name cannot be found
const UNNAMED_DOCUMENT: &str = "Document";

/// REST client for a managed agents project (threads, files, messages, streamed runs)
#[derive(Clone)]
struct AgentsApi {
    client: Client,
    base: String,
    token: Option<String>,
    api_version: String,
}

impl AgentsApi {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base, path))
            .query(&[("api-version", self.api_version.as_str())]);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> CourierResult<Response> {
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(response).await)
        }
    }

    async fn json(&self, builder: RequestBuilder) -> CourierResult<Value> {
        Ok(self.send(builder).await?.json().await?)
    }

    async fn create_thread(&self) -> CourierResult<String> {
        let thread = self.json(self.request(Method::POST, "threads").json(&json!({}))).await?;
        id_of(&thread)
    }

    async fn upload(&self, attachment: &Attachment) -> CourierResult<String> {
        let part = Part::bytes(attachment.data.to_vec())
            .file_name(attachment.name.clone())
            .mime_str(&attachment.mime)?;
        let form = Form::new().text("purpose", "assistants").part("file", part);
        let file = self.json(self.request(Method::POST, "files").multipart(form)).await?;
        id_of(&file)
    }

    async fn create_message(&self, thread: &str, content: Vec<Value>, attachments: Vec<Value>) -> CourierResult<()> {
        let mut body = json!({"role": "user", "content": content});
        if !attachments.is_empty() {
            body["attachments"] = json!(attachments);
        }
        let path = format!("threads/{}/messages", thread);
        self.json(self.request(Method::POST, &path).json(&body)).await?;
        Ok(())
    }

    async fn cancel_run(&self, thread: &str, run_id: &str) -> CourierResult<()> {
        let path = format!("threads/{}/runs/{}/cancel", thread, run_id);
        self.send(self.request(Method::POST, &path)).await?;
        Ok(())
    }

    async fn run(&self, thread: &str, agent_id: &str) -> CourierResult<Response> {
        let path = format!("threads/{}/runs", thread);
        let body = json!({"assistant_id": agent_id, "stream": true});
        self.send(self.request(Method::POST, &path).json(&body)).await
    }

    /// The file's own name, without any sandbox directory
    async fn file_name(&self, file_id: &str) -> CourierResult<Option<String>> {
        let info = self.json(self.request(Method::GET, &format!("files/{}", file_id))).await?;
        Ok(info["filename"]
            .as_str()
            .map(|name| name.rsplit('/').next().unwrap_or(name).to_string())
            .filter(|name| !name.is_empty()))
    }

    async fn file_content(&self, file_id: &str) -> CourierResult<Bytes> {
        let path = format!("files/{}/content", file_id);
        Ok(self.send(self.request(Method::GET, &path)).await?.bytes().await?)
    }

    async fn fetch(&self, file_id: &str, fallback: &str) -> CourierResult<Attachment> {
        let name = self
            .file_name(file_id)
            .await?
            .unwrap_or_else(|| fallback.to_string());
        let data = self.file_content(file_id).await?;
        Ok(Attachment::from_name(name, data))
    }
}

fn id_of(value: &Value) -> CourierResult<String> {
    value["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CourierError::Stream(format!("response has no id: {}", truncate_for_log(&value.to_string()))))
}

/// Server-side state bound to one conversation on one agent
#[derive(Default)]
struct AgentSession {
    thread: OnceCell<String>,
    uploads: Mutex<HashMap<String, String>>,
}

impl AgentSession {
    fn remember_upload(&self, file_id: String, name: String) {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_id, name);
    }

    fn upload_name(&self, file_id: &str) -> Option<String> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file_id)
            .cloned()
    }
}

/// Tool-capable turns through a managed agent: one server-side thread per session,
/// uploads with the code interpreter attached, and generated files fetched into the stream.
pub struct AgentProvider {
    client: Client,
    first_byte_timeout: Duration,
    document_link_base: Option<String>,
    sessions: Mutex<HashMap<(String, String), Arc<AgentSession>>>,
}

impl AgentProvider {
    pub fn new(settings: &Settings) -> CourierResult<Self> {
        Ok(Self {
            client: http_client(settings.request_timeout)?,
            first_byte_timeout: settings.first_byte_timeout,
            document_link_base: settings.document_link_base.clone(),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn session(&self, ctx: &SessionContext, model: &str) -> Arc<AgentSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry((ctx.session_id.clone(), model.to_string()))
                .or_default(),
        )
    }
}

/// Cancels the server-side run if the turn goes away before the run settles,
/// so the thread accepts the next message.
struct RunGuard {
    api: AgentsApi,
    thread: String,
    ctx: SessionContext,
    run_id: Option<String>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let Some(run_id) = self.run_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let api = self.api.clone();
        let thread = std::mem::take(&mut self.thread);
        let ctx = self.ctx.clone();
        handle.spawn(async move {
            match api.cancel_run(&thread, &run_id).await {
                Ok(()) => tracing::info!(
                    session_id = %ctx.session_id,
                    user_id = %ctx.user_id,
                    run = %run_id,
                    "cancelled agent run"
                ),
                Err(e) => tracing::warn!(
                    session_id = %ctx.session_id,
                    user_id = %ctx.user_id,
                    run = %run_id,
                    kind = %e.kind(),
                    detail = %e.detail(),
                    "failed to cancel agent run"
                ),
            }
        });
    }
}

/// Everything a turn does before the run starts streaming. Returns the thread and the run body.
async fn start_run(
    api: &AgentsApi,
    session: &AgentSession,
    ctx: &SessionContext,
    agent_id: &str,
    text: String,
    attachments: &[Attachment],
    first_byte_timeout: Duration,
) -> CourierResult<(String, Response)> {
    let thread = session
        .thread
        .get_or_try_init(|| async {
            let thread = api.create_thread().await?;
            tracing::info!(session_id = %ctx.session_id, user_id = %ctx.user_id, thread = %thread, "created agent thread");
            Ok::<_, CourierError>(thread)
        })
        .await?
        .clone();

    let mut content = vec![json!({"type": "text", "text": text})];
    let mut files = Vec::new();
    for attachment in attachments {
        let file_id = api.upload(attachment).await?;
        tracing::info!(
            session_id = %ctx.session_id,
            user_id = %ctx.user_id,
            file_id = %file_id,
            name = %attachment.name,
            "uploaded attachment"
        );
        if attachment.is_image() {
            content.push(json!({
                "type": "image_file",
                "image_file": {"file_id": file_id, "detail": "high"}
            }));
        }
        files.push(json!({"file_id": file_id, "tools": [{"type": "code_interpreter"}]}));
        session.remember_upload(file_id, attachment.name.clone());
    }

    api.create_message(&thread, content, files).await?;

    let run = tokio::time::timeout(first_byte_timeout, api.run(&thread, agent_id))
        .await
        .map_err(|_| {
            CourierError::Provider(format!("no response within {}s", first_byte_timeout.as_secs()))
        })??;
    Ok((thread, run))
}

#[async_trait]
impl Provider for AgentProvider {
    fn name(&self) -> &'static str {
        "agent"
    }

    async fn open(&self, request: TurnRequest) -> CourierResult<RawStream> {
        let descriptor = &request.descriptor;
        let (endpoint, agent_id) = descriptor
            .endpoint
            .clone()
            .zip(descriptor.agent_id.clone())
            .ok_or_else(|| {
                CourierError::Provider(format!("{}: agent models need an endpoint and an agent id", descriptor.id))
            })?;
        let text = request
            .history
            .last_user()
            .map(|message| message.text())
            .ok_or_else(|| CourierError::Provider("no user message to send".to_string()))?;

        let api = AgentsApi {
            client: self.client.clone(),
            base: endpoint.trim_end_matches('/').to_string(),
            token: descriptor.credential_ref.resolve()?,
            api_version: descriptor
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AGENT_API_VERSION.to_string()),
        };
        let session = self.session(&request.ctx, &descriptor.id);

        tracing::info!(
            session_id = %request.ctx.session_id,
            user_id = %request.ctx.user_id,
            model = %descriptor.id,
            attachments = request.attachments.len(),
            "starting agent run"
        );

        let ctx = request.ctx;
        let attachments = request.attachments;
        let first_byte_timeout = self.first_byte_timeout;
        let mut reader = RunReader::new(self.document_link_base.clone());

        Ok(Box::pin(async_stream::stream! {
            let run = start_run(&api, &session, &ctx, &agent_id, text, &attachments, first_byte_timeout).await;
            let (thread, run) = match run {
                Ok(run) => run,
                Err(e) => {
                    yield RawEvent::Failed(e);
                    return;
                }
            };
            let mut guard = RunGuard {
                api: api.clone(),
                thread,
                ctx: ctx.clone(),
                run_id: None,
            };

            let mut events = sse_stream(run.bytes_stream());
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield RawEvent::Failed(e);
                        return;
                    }
                };

                let actions = reader.read(&event);
                guard.run_id = reader.active_run().map(str::to_string);
                for action in actions {
                    match action {
                        Action::Emit(raw) => {
                            let terminal = raw.is_terminal();
                            yield raw;
                            if terminal {
                                return;
                            }
                        }
                        Action::Fetch { file_id, fallback } => match api.fetch(&file_id, &fallback).await {
                            Ok(attachment) => yield RawEvent::Attachment(attachment),
                            Err(e) => {
                                yield RawEvent::Failed(e);
                                return;
                            }
                        },
                        Action::CiteFile { marker, file_id } => {
                            let name = match session.upload_name(&file_id) {
                                Some(name) => Some(name),
                                None => api.file_name(&file_id).await.ok().flatten(),
                            };
                            let name = name.unwrap_or_else(|| UNNAMED_DOCUMENT.to_string());
                            let source = reader.document_source(&file_id, &name);
                            yield RawEvent::Annotation { marker, source };
                        }
                    }
                }
            }
        }))
    }

    fn end_session(&self, ctx: &SessionContext) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(session_id, _), _| *session_id != ctx.session_id);
    }
}

/// What the stream has to do for one run event
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Emit(RawEvent),
    /// Download a generated file into an attachment
    Fetch { file_id: String, fallback: String },
    /// Bind a marker to a file whose name may need a lookup
    CiteFile { marker: String, file_id: String },
}

/// Maps the `thread.*` events of one run to actions. Generated files are fetched
/// once per id and markers are bound once, however often the service repeats them.
struct RunReader {
    document_link_base: Option<String>,
    fetched: HashSet<String>,
    cited: HashSet<String>,
    run_id: Option<String>,
    settled: bool,
}

impl RunReader {
    fn new(document_link_base: Option<String>) -> Self {
        Self {
            document_link_base,
            fetched: HashSet::new(),
            cited: HashSet::new(),
            run_id: None,
            settled: false,
        }
    }

    /// The run that is still open on the service, once its id has been seen
    fn active_run(&self) -> Option<&str> {
        self.run_id.as_deref().filter(|_| !self.settled)
    }

    fn track_run(&mut self, name: &str, data: &Value) {
        if !name.starts_with("thread.run.") || name.starts_with("thread.run.step.") {
            return;
        }
        if let Some(id) = data["id"].as_str() {
            self.run_id = Some(id.to_string());
        }
        if matches!(
            name,
            "thread.run.completed"
                | "thread.run.failed"
                | "thread.run.cancelled"
                | "thread.run.expired"
                | "thread.run.incomplete"
        ) {
            self.settled = true;
        }
    }

    fn read(&mut self, event: &SseEvent) -> Vec<Action> {
        if event.data.trim() == "[DONE]" {
            return Vec::new();
        }
        let data: Value = match serde_json::from_str(&event.data) {
            Ok(data) => data,
            Err(e) => return vec![Action::Emit(RawEvent::Failed(e.into()))],
        };

        let name = event.event.as_deref().unwrap_or_default();
        self.track_run(name, &data);

        match name {
            "thread.message.delta" => self.message_content(&data["delta"]["content"], true),
            "thread.message.completed" => self.message_content(&data["content"], false),
            "thread.run.step.completed" => self.step(&data),
            "thread.run.completed" => vec![Action::Emit(RawEvent::Finished)],
            "thread.run.failed" | "thread.run.cancelled" | "thread.run.expired" | "thread.run.incomplete" => {
                let status = data["status"].as_str().unwrap_or("failed");
                let reason = data["last_error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| data["incomplete_details"]["reason"].as_str().map(str::to_string))
                    .unwrap_or_else(|| "no details".to_string());
                vec![Action::Emit(RawEvent::Failed(CourierError::Provider(format!(
                    "agent run {}: {}",
                    status, reason
                ))))]
            }
            "thread.run.requires_action" => vec![Action::Emit(RawEvent::Failed(CourierError::Provider(
                "agent run requires an action that cannot be handled".to_string(),
            )))],
            "error" => {
                let message = error_message(&data).unwrap_or_else(|| data.to_string());
                vec![Action::Emit(RawEvent::Failed(CourierError::Provider(message)))]
            }
            _ => Vec::new(),
        }
    }

    fn message_content(&mut self, content: &Value, with_text: bool) -> Vec<Action> {
        let mut actions = Vec::new();
        for part in content.as_array().into_iter().flatten() {
            match part["type"].as_str() {
                Some("text") => {
                    for annotation in part["text"]["annotations"].as_array().into_iter().flatten() {
                        actions.extend(self.annotation(annotation));
                    }
                    let value = part["text"]["value"].as_str().unwrap_or_default();
                    if with_text && !value.is_empty() {
                        actions.push(Action::Emit(RawEvent::Text(value.to_string())));
                    }
                }
                Some("image_file") => {
                    if let Some(file_id) = part["image_file"]["file_id"].as_str() {
                        actions.extend(self.fetch(file_id, format!("{}_image_file.png", file_id)));
                    }
                }
                _ => {}
            }
        }
        actions
    }

    fn annotation(&mut self, annotation: &Value) -> Option<Action> {
        let kind = annotation["type"].as_str()?;
        let file_id = annotation[kind]["file_id"].as_str();
        if kind == "file_path" {
            let file_id = file_id?;
            return self.fetch(file_id, file_id.to_string());
        }

        let marker = annotation["text"]
            .as_str()
            .filter(|text| !text.is_empty())
            .map(str::to_string);

        match kind {
            "url_citation" => {
                let url = annotation["url_citation"]["url"].as_str()?;
                let title = annotation["url_citation"]["title"]
                    .as_str()
                    .filter(|title| !title.is_empty())
                    .unwrap_or(url);
                let marker = marker.unwrap_or_else(|| format!("url_citation:{}", url));
                if !self.cited.insert(marker.clone()) {
                    return None;
                }
                let source = if url.starts_with("doc_") {
                    self.document_source(url, title)
                } else {
                    Source::new(url, title)
                };
                Some(Action::Emit(RawEvent::Annotation { marker, source }))
            }
            "file_citation" => {
                let file_id = file_id?.to_string();
                let marker = marker.unwrap_or_else(|| format!("file_citation:{}", file_id));
                if !self.cited.insert(marker.clone()) {
                    return None;
                }
                Some(Action::CiteFile { marker, file_id })
            }
            _ => None,
        }
    }

    fn step(&mut self, data: &Value) -> Vec<Action> {
        if data["step_details"]["type"] != "tool_calls" {
            return Vec::new();
        }

        let mut actions = Vec::new();
        for call in data["step_details"]["tool_calls"].as_array().into_iter().flatten() {
            let kind = call["type"].as_str().unwrap_or("tool").to_string();
            actions.push(Action::Emit(RawEvent::ToolOutput {
                kind: kind.clone(),
                payload: call.clone(),
            }));

            for output in call[kind.as_str()]["outputs"].as_array().into_iter().flatten() {
                if output["type"] == "image" {
                    if let Some(file_id) = output["image"]["file_id"].as_str() {
                        actions.extend(self.fetch(file_id, format!("{}_image_file.png", file_id)));
                    }
                }
            }
        }
        actions
    }

    fn fetch(&mut self, file_id: &str, fallback: String) -> Option<Action> {
        self.fetched.insert(file_id.to_string()).then(|| Action::Fetch {
            file_id: file_id.to_string(),
            fallback,
        })
    }

    /// A cited document, linked under the configured document base when there is one
    fn document_source(&self, reference: &str, name: &str) -> Source {
        let url = match &self.document_link_base {
            Some(base) => format!("{}{}", base, urlencoding::encode(name)),
            None => reference.to_string(),
        };
        Source::new(url, name)
    }
}
