use std::time::Duration;

/// Instructions sent as the system message when the active configuration has none
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are a helpful workplace assistant.
Provide accurate, timely and relevant information and help people get their work done.

### Style
- Professional: keep a formal and respectful tone.
- Concise: prefer short, clear answers over long ones.
- Honest: if you are unsure, say so and suggest how the answer could be verified.

### Safety
- Never share confidential information outside the scope of the request.
- Tell the user when a request exceeds your capabilities.";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// The active chat configuration consumed by the core
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// System prompt placed at index 0 of every history
    pub instructions: String,
    pub temperature: Option<f32>,
    /// Upper bound on the wait for the first byte of a provider response
    pub first_byte_timeout: Duration,
    /// Whole-request bound applied to every HTTP client
    pub request_timeout: Duration,
    /// Base URL for links to documents cited by agents (`doc_N` references)
    pub document_link_base: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: Some(DEFAULT_TEMPERATURE),
            first_byte_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(600),
            document_link_base: None,
        }
    }
}

impl Settings {
    pub fn with_instructions<S: Into<String>>(mut self, instructions: S) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_first_byte_timeout(mut self, timeout: Duration) -> Self {
        self.first_byte_timeout = timeout;
        self
    }

    pub fn with_document_link_base<S: Into<String>>(mut self, base: S) -> Self {
        self.document_link_base = Some(base.into());
        self
    }
}
