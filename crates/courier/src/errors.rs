use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum CourierError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("History holds {0} messages past the retention window")]
    HistoryOverflow(usize),
}

/// The structured `kind` half of a `{kind, detail}` error report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Config,
    Provider,
    Stream,
    HistoryOverflow,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Config => "config",
            ErrorKind::Provider => "provider",
            ErrorKind::Stream => "stream",
            ErrorKind::HistoryOverflow => "history_overflow",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::NotFound(_) => ErrorKind::NotFound,
            CourierError::Config(_) => ErrorKind::Config,
            CourierError::Provider(_) => ErrorKind::Provider,
            CourierError::Stream(_) => ErrorKind::Stream,
            CourierError::HistoryOverflow(_) => ErrorKind::HistoryOverflow,
        }
    }

    /// The detail string without the kind prefix, for structured logs
    pub fn detail(&self) -> String {
        match self {
            CourierError::NotFound(detail)
            | CourierError::Config(detail)
            | CourierError::Provider(detail)
            | CourierError::Stream(detail) => detail.clone(),
            CourierError::HistoryOverflow(excess) => excess.to_string(),
        }
    }
}

impl From<reqwest::Error> for CourierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CourierError::Provider(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            CourierError::Provider(format!("Connection failed: {}", err))
        } else if err.is_status() {
            CourierError::Provider(format!("API returned error status: {}", err))
        } else if err.is_body() || err.is_decode() {
            CourierError::Stream(format!("Response body failed: {}", err))
        } else {
            CourierError::Provider(format!("Request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Stream(format!("Malformed event payload: {}", err))
    }
}

pub type CourierResult<T> = Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_detail() {
        let err = CourierError::Provider("401 Unauthorized".to_string());
        assert_eq!(err.kind(), ErrorKind::Provider);
        assert_eq!(err.detail(), "401 Unauthorized");
        assert_eq!(err.to_string(), "Provider error: 401 Unauthorized");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let kind = serde_json::to_value(ErrorKind::HistoryOverflow).unwrap();
        assert_eq!(kind, serde_json::json!("history_overflow"));
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }

    #[test]
    fn test_json_error_is_stream_error() {
        let err: CourierError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Stream);
    }
}
