use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::errors::{CourierError, CourierResult};

/// Provider tag served by the agent adapter; every other tag is a standard completion
pub const AGENT_PROVIDER_TAG: &str = "foundry";

/// Environment variable that may hold the whole model list as a JSON array
pub const LLM_CONFIG_ENV: &str = "LLM_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "llm_config/llm_config.json";

/// Where the secret for a backend comes from. Resolved when an adapter starts a call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialRef {
    /// The key itself
    Key(String),
    /// Name of an environment variable holding the key
    Env(String),
    /// The backend needs no credential
    None,
}

impl CredentialRef {
    pub fn resolve(&self) -> CourierResult<Option<String>> {
        match self {
            CredentialRef::Key(key) => Ok(Some(key.clone())),
            CredentialRef::Env(var) => std::env::var(var).map(Some).map_err(|_| {
                CourierError::Provider(format!("Credential variable {} is not set", var))
            }),
            CredentialRef::None => Ok(None),
        }
    }
}

impl std::fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialRef::Key(_) => f.write_str("Key(***)"),
            CredentialRef::Env(var) => f.debug_tuple("Env").field(var).finish(),
            CredentialRef::None => f.write_str("None"),
        }
    }
}

/// One configured model record as supplied by the configuration resolver.
///
/// Older configuration files name the fields after the deployment they describe;
/// both spellings are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelRecord {
    #[serde(alias = "model_deployment")]
    pub id: Option<String>,
    pub provider_tag: Option<String>,
    pub deployment_name: Option<String>,
    #[serde(alias = "api_endpoint")]
    pub endpoint: Option<String>,
    pub credential_ref: Option<CredentialRef>,
    pub api_key: Option<String>,
    #[serde(alias = "model_id")]
    pub agent_id: Option<String>,
    pub api_version: Option<String>,
    #[serde(default)]
    pub description: String,
    pub accepts_temperature: Option<bool>,
}

/// An immutable, validated description of one selectable backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider_tag: String,
    pub deployment_name: String,
    pub endpoint: Option<String>,
    #[serde(skip)]
    pub credential_ref: CredentialRef,
    pub agent_id: Option<String>,
    pub api_version: Option<String>,
    pub description: String,
    pub accepts_temperature: bool,
}

impl ModelDescriptor {
    pub fn is_agent(&self) -> bool {
        self.provider_tag == AGENT_PROVIDER_TAG
    }

    /// Endpoint-addressed backends are called by endpoint + deployment + api version
    /// rather than by a bare model name.
    pub fn is_endpoint_addressed(&self) -> bool {
        self.endpoint.is_some() && self.api_version.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl TryFrom<ModelRecord> for ModelDescriptor {
    type Error = CourierError;

    fn try_from(record: ModelRecord) -> CourierResult<Self> {
        let id = non_empty(record.id)
            .ok_or_else(|| CourierError::Config("model record has no id".to_string()))?;

        let (id_provider, id_deployment) = match id.split_once('/') {
            Some((provider, deployment)) => (Some(provider.to_string()), deployment.to_string()),
            None => (None, id.clone()),
        };

        let provider_tag = non_empty(record.provider_tag)
            .or(non_empty(id_provider))
            .map(|tag| tag.to_ascii_lowercase())
            .ok_or_else(|| CourierError::Config(format!("{}: no provider tag", id)))?;

        let deployment_name = non_empty(record.deployment_name).unwrap_or(id_deployment);
        if deployment_name.is_empty() {
            return Err(CourierError::Config(format!("{}: no deployment name", id)));
        }

        let endpoint = non_empty(record.endpoint);
        if let Some(endpoint) = &endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                CourierError::Config(format!("{}: invalid endpoint {}: {}", id, endpoint, e))
            })?;
        }

        let agent_id = non_empty(record.agent_id);
        if provider_tag == AGENT_PROVIDER_TAG {
            if endpoint.is_none() {
                return Err(CourierError::Config(format!(
                    "{}: agent models require an endpoint",
                    id
                )));
            }
            if agent_id.is_none() {
                return Err(CourierError::Config(format!(
                    "{}: agent models require an agent id",
                    id
                )));
            }
        }

        let credential_ref = match (record.credential_ref, non_empty(record.api_key)) {
            (Some(credential), _) => credential,
            (None, Some(key)) => CredentialRef::Key(key),
            (None, None) => CredentialRef::None,
        };

        Ok(ModelDescriptor {
            id,
            provider_tag,
            deployment_name,
            endpoint,
            credential_ref,
            agent_id,
            api_version: non_empty(record.api_version),
            description: record.description,
            accepts_temperature: record.accepts_temperature.unwrap_or(true),
        })
    }
}

/// A model that failed validation and is not offered
#[derive(Debug, Clone)]
pub struct RejectedModel {
    pub position: usize,
    pub error: CourierError,
}

/// Read-only table of the models offered to conversations, built once at startup
#[derive(Debug, Default)]
pub struct ModelRegistry {
    descriptors: Vec<Arc<ModelDescriptor>>,
    by_id: HashMap<String, usize>,
    rejected: Vec<RejectedModel>,
}

impl ModelRegistry {
    /// Validate records in order. Invalid records and repeated ids are excluded
    /// and reported, never surfaced to a conversation.
    pub fn from_records<I: IntoIterator<Item = ModelRecord>>(records: I) -> Self {
        let mut registry = ModelRegistry::default();
        for (position, record) in records.into_iter().enumerate() {
            registry.admit(position, ModelDescriptor::try_from(record));
        }
        registry
    }

    /// Parse a JSON array of records; a record with the wrong shape only excludes itself
    pub fn from_json(json: &str) -> CourierResult<Self> {
        let values: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| CourierError::Config(format!("model list is not a JSON array: {}", e)))?;

        let mut registry = ModelRegistry::default();
        for (position, value) in values.into_iter().enumerate() {
            let descriptor = serde_json::from_value::<ModelRecord>(value)
                .map_err(|e| CourierError::Config(format!("malformed model record: {}", e)))
                .and_then(ModelDescriptor::try_from);
            registry.admit(position, descriptor);
        }
        Ok(registry)
    }

    /// Load from `LLM_CONFIG` when it holds a usable JSON array, otherwise from the file
    pub fn from_env_or_file<P: AsRef<Path>>(path: P) -> CourierResult<Self> {
        if let Ok(raw) = std::env::var(LLM_CONFIG_ENV) {
            if !raw.trim().is_empty() {
                match Self::from_json(&raw) {
                    Ok(registry) => return Ok(registry),
                    Err(e) => tracing::warn!("ignoring {}: {}", LLM_CONFIG_ENV, e),
                }
            }
        }

        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CourierError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    fn admit(&mut self, position: usize, descriptor: CourierResult<ModelDescriptor>) {
        let descriptor = descriptor.and_then(|descriptor| {
            if self.by_id.contains_key(&descriptor.id) {
                Err(CourierError::Config(format!("{}: duplicate model id", descriptor.id)))
            } else {
                Ok(descriptor)
            }
        });

        match descriptor {
            Ok(descriptor) => {
                tracing::debug!(
                    model = %descriptor.id,
                    provider = %descriptor.provider_tag,
                    "registered model"
                );
                self.by_id
                    .insert(descriptor.id.clone(), self.descriptors.len());
                self.descriptors.push(Arc::new(descriptor));
            }
            Err(error) => {
                tracing::warn!(position, kind = %error.kind(), detail = %error.detail(), "model excluded");
                self.rejected.push(RejectedModel { position, error });
            }
        }
    }

    pub fn resolve(&self, id: &str) -> CourierResult<Arc<ModelDescriptor>> {
        self.by_id
            .get(id)
            .map(|&index| Arc::clone(&self.descriptors[index]))
            .ok_or_else(|| CourierError::NotFound(id.to_string()))
    }

    /// Offered models in configuration order
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.descriptors.iter()
    }

    pub fn rejected(&self) -> &[RejectedModel] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
