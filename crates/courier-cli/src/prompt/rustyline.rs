use std::io::{self, Write};
use std::path::Path;

use ::rustyline::error::ReadlineError;
use ::rustyline::DefaultEditor;
use anyhow::Result;
use console::style;
use courier::models::event::Citation;
use serde_json::Value;

use super::{Input, InputType, Prompt};

const PROMPT: &str = "\x1b[1m\x1b[38;5;30m> \x1b[0m";
const MAX_PAYLOAD_LENGTH: usize = 400;

pub struct RustylinePrompt {
    editor: DefaultEditor,
}

impl RustylinePrompt {
    pub fn new() -> Result<Self> {
        Ok(RustylinePrompt {
            editor: DefaultEditor::new()?,
        })
    }
}

/// Map one line of input to a message or a command
pub fn parse_input(line: &str) -> Input {
    let text = line.trim();

    if text.eq_ignore_ascii_case("/exit") || text.eq_ignore_ascii_case("/quit") {
        Input::of(InputType::Exit)
    } else if text.eq_ignore_ascii_case("/?") || text.eq_ignore_ascii_case("/help") {
        println!("Commands:");
        println!("/file <path> - Attach a file to the next message");
        println!("/exit - Exit the session");
        println!("/? | /help - Display this help message");
        println!("Ctrl+C - Interrupt the reply (the interrupted message is discarded)");
        Input::of(InputType::AskAgain)
    } else if let Some(path) = text.strip_prefix("/file ") {
        Input {
            input_type: InputType::Attach,
            content: Some(path.trim().to_string()),
        }
    } else if text.is_empty() {
        Input::of(InputType::AskAgain)
    } else {
        Input {
            input_type: InputType::Message,
            content: Some(text.to_string()),
        }
    }
}

impl Prompt for RustylinePrompt {
    fn get_input(&mut self) -> Result<Input> {
        match self.editor.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.editor.add_history_entry(line.as_str());
                }
                Ok(parse_input(&line))
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(Input::of(InputType::Exit)),
            Err(e) => {
                eprintln!("Input error: {}", e);
                Ok(Input::of(InputType::Exit))
            }
        }
    }

    fn render_text(&mut self, text: &str) {
        print!("{}", text);
        let _ = io::stdout().flush();
    }

    fn render_tool_output(&mut self, kind: &str, payload: &Value) {
        println!();
        println!("{}", style(format!("─── {} ───", kind)).magenta().dim());
        match payload[kind]["input"].as_str() {
            Some(input) => println!("{}", style(input).green()),
            None => {
                let mut text = payload.to_string();
                if text.len() > MAX_PAYLOAD_LENGTH {
                    let cut = (0..=MAX_PAYLOAD_LENGTH)
                        .rev()
                        .find(|&i| text.is_char_boundary(i))
                        .unwrap_or(0);
                    text.truncate(cut);
                    text.push_str("...");
                }
                println!("{}", style(text).dim());
            }
        }
    }

    fn render_sources(&mut self, citations: &[Citation]) {
        if citations.is_empty() {
            return;
        }
        println!();
        println!();
        println!("{}", style("Sources").bold());
        for citation in citations {
            println!(
                "[{}] {} {}",
                citation.index,
                citation.title,
                style(&citation.url).cyan().dim()
            );
        }
    }

    fn render_saved(&mut self, path: &Path) {
        println!();
        println!("{} {}", style("Saved").green(), path.display());
    }

    fn render_error(&mut self, message: &str) {
        println!();
        eprintln!("{}", style(message).red());
    }

    fn render_notice(&mut self, notice: &str) {
        println!("{}", style(notice).dim());
    }

    fn turn_finished(&mut self) {
        println!();
        println!();
    }

    fn close(&self) {
        // No cleanup required
    }
}
