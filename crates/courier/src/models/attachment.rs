use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A named binary payload travelling with a turn, either uploaded by the user
/// or produced by a backend tool. Serialized with its bytes as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    #[serde(serialize_with = "encode", deserialize_with = "decode")]
    pub data: Bytes,
}

impl Attachment {
    pub fn new<N: Into<String>, M: Into<String>, D: Into<Bytes>>(name: N, mime: M, data: D) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// Build an attachment whose MIME type is inferred from the file name
    pub fn from_name<N: Into<String>, D: Into<Bytes>>(name: N, data: D) -> Self {
        let name = name.into();
        let mime = mime_from_name(&name).to_string();
        Self::new(name, mime, data)
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

fn encode<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

/// Best-effort MIME type for a file name, falling back to octet-stream
pub fn mime_from_name(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_data_as_base64() {
        let attachment = Attachment::new("hello.txt", "text/plain", &b"hello"[..]);
        let value = serde_json::to_value(&attachment).unwrap();
        assert_eq!(
            value,
            json!({"name": "hello.txt", "mime": "text/plain", "data": "aGVsbG8="})
        );

        let back: Attachment = serde_json::from_value(value).unwrap();
        assert_eq!(back.data, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_rejects_invalid_base64() {
        let result: Result<Attachment, _> =
            serde_json::from_value(json!({"name": "a", "mime": "b", "data": "%%%"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_mime_from_name() {
        assert_eq!(mime_from_name("generated_chart.PNG"), "image/png");
        assert_eq!(mime_from_name("report.csv"), "text/csv");
        assert_eq!(mime_from_name("no_extension"), "application/octet-stream");
        assert!(Attachment::from_name("chart.jpeg", vec![1u8, 2]).is_image());
    }
}
