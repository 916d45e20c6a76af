use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use courier::config::{Settings as ChatConfig, DEFAULT_TEMPERATURE};
use courier::registry::DEFAULT_CONFIG_PATH;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// The chat configuration handed to the dispatcher
#[derive(Debug, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub document_link_base: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            instructions: None,
            temperature: default_temperature(),
            first_byte_timeout_secs: default_first_byte_timeout(),
            request_timeout_secs: default_request_timeout(),
            document_link_base: None,
        }
    }
}

impl ChatSettings {
    pub fn into_config(self) -> ChatConfig {
        let mut config = ChatConfig::default()
            .with_temperature(self.temperature)
            .with_first_byte_timeout(Duration::from_secs(self.first_byte_timeout_secs));
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        if let Some(instructions) = self.instructions.filter(|i| !i.trim().is_empty()) {
            config = config.with_instructions(instructions);
        }
        if let Some(base) = self.document_link_base {
            config = config.with_document_link_base(base);
        }
        config
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelSettings {
    /// JSON model list read when `LLM_CONFIG` is not set
    #[serde(default = "default_config_path")]
    pub config_path: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub models: ModelSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("models.config_path", default_config_path())?
            .add_source(
                Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_temperature() -> Option<f32> {
    Some(DEFAULT_TEMPERATURE)
}

fn default_first_byte_timeout() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    600
}

fn default_config_path() -> String {
    DEFAULT_CONFIG_PATH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier::config::DEFAULT_INSTRUCTIONS;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "COURIER_SERVER__HOST",
        "COURIER_SERVER__PORT",
        "COURIER_CHAT__INSTRUCTIONS",
        "COURIER_CHAT__TEMPERATURE",
        "COURIER_CHAT__FIRST_BYTE_TIMEOUT_SECS",
        "COURIER_CHAT__DOCUMENT_LINK_BASE",
        "COURIER_MODELS__CONFIG_PATH",
    ];

    fn clean_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.models.config_path, DEFAULT_CONFIG_PATH);

        let chat = settings.chat.into_config();
        assert_eq!(chat, ChatConfig::default());
        assert_eq!(chat.instructions, DEFAULT_INSTRUCTIONS);
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("COURIER_SERVER__PORT", "8080");
        env::set_var("COURIER_CHAT__INSTRUCTIONS", "Answer in French.");
        env::set_var("COURIER_CHAT__TEMPERATURE", "0.2");
        env::set_var("COURIER_CHAT__FIRST_BYTE_TIMEOUT_SECS", "15");
        env::set_var("COURIER_CHAT__DOCUMENT_LINK_BASE", "https://docs.example/shared/");
        env::set_var("COURIER_MODELS__CONFIG_PATH", "/etc/courier/models.json");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.models.config_path, "/etc/courier/models.json");

        let chat = settings.chat.into_config();
        assert_eq!(chat.instructions, "Answer in French.");
        assert_eq!(chat.temperature, Some(0.2));
        assert_eq!(chat.first_byte_timeout, Duration::from_secs(15));
        assert_eq!(chat.document_link_base.as_deref(), Some("https://docs.example/shared/"));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_invalid_port_is_reported() {
        clean_env();
        env::set_var("COURIER_SERVER__PORT", "not-a-port");

        assert!(matches!(Settings::new(), Err(ConfigError::Other(_))));

        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        assert_eq!(server_settings.socket_addr().unwrap().to_string(), "127.0.0.1:3000");

        let bad = ServerSettings {
            host: "not a host".to_string(),
            port: 3000,
        };
        assert!(bad.socket_addr().is_err());
    }
}
