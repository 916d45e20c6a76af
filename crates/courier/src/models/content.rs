use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// An image already encoded for transport by whoever built the message.
///
/// `data` is base64 without a `data:` prefix; adapters pass it through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub data: String,
    pub mime_type: String,
}

impl ImageContent {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// One fragment of a chat message
pub enum ContentPart {
    Text(TextContent),
    Image(ImageContent),
}

impl ContentPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentPart::Text(TextContent { text: text.into() })
    }

    pub fn image<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        ContentPart::Image(ImageContent {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    /// Get the image content if this is an ImageContent variant
    pub fn as_image(&self) -> Option<&ImageContent> {
        match self {
            ContentPart::Image(image) => Some(image),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_part_tags() {
        let text = serde_json::to_value(ContentPart::text("hi")).unwrap();
        assert_eq!(text, json!({"type": "text", "text": "hi"}));

        let image = serde_json::to_value(ContentPart::image("aGVsbG8=", "image/png")).unwrap();
        assert_eq!(
            image,
            json!({"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"})
        );
    }

    #[test]
    fn test_data_url() {
        let part = ContentPart::image("aGVsbG8=", "image/jpeg");
        assert_eq!(
            part.as_image().map(ImageContent::data_url).as_deref(),
            Some("data:image/jpeg;base64,aGVsbG8=")
        );
        assert!(part.as_text().is_none());
    }
}
