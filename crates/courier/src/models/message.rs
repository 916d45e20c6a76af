use super::content::ContentPart;
use super::role::Role;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<ContentPart>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Message::new(Role::System)
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message::new(Role::Assistant)
    }

    /// Add any ContentPart to the message
    pub fn with_content(mut self, content: ContentPart) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(ContentPart::text(text))
    }

    /// Add image content to the message
    pub fn with_image<S: Into<String>, T: Into<String>>(self, data: S, mime_type: T) -> Self {
        self.with_content(ContentPart::image(data, mime_type))
    }

    /// All text parts joined by blank lines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn has_images(&self) -> bool {
        self.content.iter().any(|part| part.as_image().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let message = Message::user()
            .with_text("What is in this picture?")
            .with_image("aGVsbG8=", "image/png")
            .with_text("<file_name:notes.txt>hello</file_name:notes.txt>");

        assert_eq!(message.role, Role::User);
        assert_eq!(message.content.len(), 3);
        assert!(message.has_images());
        assert_eq!(
            message.text(),
            "What is in this picture?\n\n<file_name:notes.txt>hello</file_name:notes.txt>"
        );
    }

    #[test]
    fn test_serialization_keeps_order() {
        let message = Message::assistant().with_text("4").with_text(".");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"][0]["text"], "4");
        assert_eq!(value["content"][1]["text"], ".");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
