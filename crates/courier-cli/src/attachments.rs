use anyhow::{anyhow, Context, Result};
use courier::models::attachment::Attachment;
use courier::models::message::Message;
use std::path::{Path, PathBuf};

pub fn load(path: &Path) -> Result<Attachment> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("attachment")
        .to_string();
    Ok(Attachment::from_name(name, data))
}

/// Build the user turn. Agents receive files as uploads; standard models get images
/// as image parts and text files inline.
pub fn prepare(text: String, files: &[PathBuf], agent: bool) -> Result<(Message, Vec<Attachment>)> {
    let mut message = Message::user().with_text(text);
    let mut uploads = Vec::new();

    for path in files {
        let attachment = load(path)?;
        if agent {
            uploads.push(attachment);
        } else if attachment.is_image() {
            message = message.with_image(attachment.to_base64(), attachment.mime);
        } else {
            let body = std::str::from_utf8(&attachment.data).map_err(|_| {
                anyhow!(
                    "{} is not a text file; this model only accepts text and images",
                    attachment.name
                )
            })?;
            message = message.with_text(format!("File {}:\n{}", attachment.name, body));
        }
    }

    Ok((message, uploads))
}

/// Write a generated file into `dir` under its own base name
pub fn save(dir: &Path, attachment: &Attachment) -> Result<PathBuf> {
    let name = Path::new(&attachment.name)
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "attachment".into());
    let path = dir.join(name);
    std::fs::write(&path, &attachment.data).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
