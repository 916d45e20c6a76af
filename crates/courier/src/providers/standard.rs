use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, TurnRequest};
use super::sse::sse_stream;
use super::utils::{default_host, error_message, http_client, messages_to_openai_spec, status_error};
use crate::config::Settings;
use crate::errors::{CourierError, CourierResult};
use crate::history::ChatHistory;
use crate::normalizer::{RawEvent, RawStream, Source};
use crate::registry::ModelDescriptor;

/// Stateless streamed completions against OpenAI-compatible chat APIs
pub struct StandardProvider {
    client: Client,
    temperature: Option<f32>,
    first_byte_timeout: Duration,
}

/// How a descriptor is addressed on the wire, decided from its fields alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallShape {
    /// `{endpoint}/openai/deployments/{deployment}` with an `api-key` header
    Deployment,
    /// `{base}/chat/completions` naming the model in the body, bearer auth
    ModelName,
}

impl CallShape {
    fn of(descriptor: &ModelDescriptor) -> Self {
        if descriptor.is_endpoint_addressed() {
            CallShape::Deployment
        } else {
            CallShape::ModelName
        }
    }
}

#[derive(Debug, Clone)]
struct Call {
    url: String,
    headers: HeaderMap,
    body: Value,
}

impl StandardProvider {
    pub fn new(settings: &Settings) -> CourierResult<Self> {
        Ok(Self {
            client: http_client(settings.request_timeout)?,
            temperature: settings.temperature,
            first_byte_timeout: settings.first_byte_timeout,
        })
    }

    fn prepare(&self, descriptor: &ModelDescriptor, history: &ChatHistory) -> CourierResult<Call> {
        let key = descriptor.credential_ref.resolve()?;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));

        let mut body = json!({
            "messages": messages_to_openai_spec(history),
            "stream": true,
        });

        let url = match CallShape::of(descriptor) {
            CallShape::Deployment => {
                let (endpoint, version) = descriptor
                    .endpoint
                    .as_deref()
                    .zip(descriptor.api_version.as_deref())
                    .ok_or_else(|| {
                        CourierError::Provider(format!("{}: endpoint and api version required", descriptor.id))
                    })?;
                if let Some(key) = key {
                    headers.insert("api-key", header_value(&key)?);
                }
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint.trim_end_matches('/'),
                    descriptor.deployment_name,
                    version
                )
            }
            CallShape::ModelName => {
                let base = descriptor
                    .endpoint
                    .as_deref()
                    .or_else(|| default_host(&descriptor.provider_tag))
                    .ok_or_else(|| {
                        CourierError::Provider(format!(
                            "{}: no endpoint configured for provider {}",
                            descriptor.id, descriptor.provider_tag
                        ))
                    })?;
                if let Some(key) = key {
                    headers.insert(header::AUTHORIZATION, header_value(&format!("Bearer {}", key))?);
                }
                body["model"] = json!(descriptor.deployment_name);
                format!("{}/chat/completions", base.trim_end_matches('/'))
            }
        };

        if descriptor.accepts_temperature {
            if let Some(temperature) = self.temperature {
                // widened as-is, 0.7f32 would go out as 0.699999988
                body["temperature"] = json!((f64::from(temperature) * 1000.0).round() / 1000.0);
            }
        }

        Ok(Call { url, headers, body })
    }
}

fn header_value(value: &str) -> CourierResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| CourierError::Provider("credential is not a valid header value".to_string()))
}

#[async_trait]
impl Provider for StandardProvider {
    fn name(&self) -> &'static str {
        "standard"
    }

    async fn open(&self, request: TurnRequest) -> CourierResult<RawStream> {
        let call = self.prepare(&request.descriptor, &request.history)?;
        tracing::info!(
            session_id = %request.ctx.session_id,
            user_id = %request.ctx.user_id,
            model = %request.descriptor.id,
            url = %call.url,
            messages = request.history.len(),
            "starting completion"
        );

        let client = self.client.clone();
        let first_byte_timeout = self.first_byte_timeout;
        let ctx = request.ctx;

        Ok(Box::pin(async_stream::stream! {
            let mut attempt = 0;
            'connect: loop {
                attempt += 1;
                let pending = client
                    .post(&call.url)
                    .headers(call.headers.clone())
                    .json(&call.body)
                    .send();

                let response = match tokio::time::timeout(first_byte_timeout, pending).await {
                    Err(_) => {
                        yield RawEvent::Failed(CourierError::Provider(format!(
                            "no response within {}s",
                            first_byte_timeout.as_secs()
                        )));
                        return;
                    }
                    Ok(Err(e)) if e.is_connect() && attempt == 1 => {
                        tracing::warn!(session_id = %ctx.session_id, user_id = %ctx.user_id, "connect failed, retrying once: {}", e);
                        continue 'connect;
                    }
                    Ok(Err(e)) => {
                        yield RawEvent::Failed(e.into());
                        return;
                    }
                    Ok(Ok(response)) => response,
                };

                if !response.status().is_success() {
                    yield RawEvent::Failed(status_error(response).await);
                    return;
                }

                let mut events = sse_stream(response.bytes_stream());
                let mut reader = ChunkReader::default();
                while let Some(event) = events.next().await {
                    match event {
                        Err(e) if !reader.emitted_text && attempt == 1 => {
                            tracing::warn!(session_id = %ctx.session_id, user_id = %ctx.user_id, "stream dropped before any text, reconnecting: {}", e);
                            continue 'connect;
                        }
                        Err(e) => {
                            yield RawEvent::Failed(e);
                            return;
                        }
                        Ok(event) => {
                            for raw in reader.read(&event.data) {
                                let terminal = raw.is_terminal();
                                yield raw;
                                if terminal {
                                    return;
                                }
                            }
                        }
                    }
                }

                for raw in reader.end() {
                    yield raw;
                }
                return;
            }
        }))
    }
}

/// Reads the `data` payloads of one completion stream
#[derive(Debug, Default)]
struct ChunkReader {
    emitted_text: bool,
    finish_reason: bool,
    sources: usize,
}

impl ChunkReader {
    fn read(&mut self, data: &str) -> Vec<RawEvent> {
        let data = data.trim();
        if data.is_empty() {
            return Vec::new();
        }
        if data == "[DONE]" {
            return vec![RawEvent::Finished];
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => return vec![RawEvent::Failed(e.into())],
        };
        if let Some(message) = error_message(&chunk) {
            return vec![RawEvent::Failed(CourierError::Provider(message))];
        }

        let mut out = Vec::new();
        let sources = sources_of(&chunk);
        if sources.len() > self.sources {
            self.sources = sources.len();
            out.push(RawEvent::Sources(sources));
        }

        let choice = &chunk["choices"][0];
        if let Some(text) = choice["delta"]["content"].as_str() {
            if !text.is_empty() {
                self.emitted_text = true;
                out.push(RawEvent::Text(text.to_string()));
            }
        }
        if choice["finish_reason"].is_string() {
            self.finish_reason = true;
        }
        out
    }

    /// Called when the body ends without `[DONE]`
    fn end(&self) -> Vec<RawEvent> {
        if self.finish_reason {
            vec![RawEvent::Finished]
        } else {
            vec![RawEvent::Failed(CourierError::Stream(
                "stream ended without [DONE] or a finish reason".to_string(),
            ))]
        }
    }
}

/// Search-grounded vendors attach their sources to the chunks, either as titled
/// `search_results` or as a bare `citations` URL list
fn sources_of(chunk: &Value) -> Vec<Source> {
    if let Some(results) = chunk["search_results"].as_array() {
        let sources: Vec<Source> = results
            .iter()
            .filter_map(|result| {
                let url = result["url"].as_str()?;
                let title = result["title"].as_str().filter(|t| !t.is_empty()).unwrap_or(url);
                Some(Source::new(url, title))
            })
            .collect();
        if !sources.is_empty() {
            return sources;
        }
    }

    chunk["citations"]
        .as_array()
        .map(|urls| {
            urls.iter()
                .filter_map(Value::as_str)
                .map(|url| Source::new(url, url))
                .collect()
        })
        .unwrap_or_default()
}
