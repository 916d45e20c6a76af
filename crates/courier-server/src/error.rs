use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a dotted settings path, e.g. `chat.temperature`
pub fn to_env_var(field_path: &str) -> String {
    let path = field_path
        .split('.')
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join("__");
    format!("COURIER_{}", path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("chat.temperature"), "COURIER_CHAT__TEMPERATURE");
        assert_eq!(to_env_var("models.config_path"), "COURIER_MODELS__CONFIG_PATH");
        assert_eq!(to_env_var("port"), "COURIER_PORT");
    }
}
