use anyhow::Result;
use courier::models::event::Citation;
use serde_json::Value;
use std::path::Path;

pub mod rustyline;

pub trait Prompt {
    fn get_input(&mut self) -> Result<Input>;
    /// Streamed reply text, printed as it arrives
    fn render_text(&mut self, text: &str);
    fn render_tool_output(&mut self, kind: &str, payload: &Value);
    fn render_sources(&mut self, citations: &[Citation]);
    fn render_saved(&mut self, path: &Path);
    fn render_error(&mut self, message: &str);
    fn render_notice(&mut self, notice: &str);
    fn turn_finished(&mut self);
    fn close(&self);
}

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>,
}

impl Input {
    pub fn of(input_type: InputType) -> Self {
        Self {
            input_type,
            content: None,
        }
    }
}

pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Attach,   // Attach a file to the next message
    Exit,     // User wants to exit the session
}
