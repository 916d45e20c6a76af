use anyhow::Result;
use futures::StreamExt;
use std::path::PathBuf;

use crate::attachments;
use crate::prompt::{InputType, Prompt};
use courier::conversation::Conversation;
use courier::models::event::StreamEvent;

pub struct Session<'a> {
    conversation: Conversation,
    prompt: Box<dyn Prompt + 'a>,
    /// Files waiting to go out with the next message
    pending: Vec<PathBuf>,
    /// Where generated attachments are written
    output_dir: PathBuf,
}

impl<'a> Session<'a> {
    pub fn new(conversation: Conversation, prompt: Box<impl Prompt + 'a>, output_dir: PathBuf) -> Self {
        Session {
            conversation,
            prompt,
            pending: Vec::new(),
            output_dir,
        }
    }

    pub fn attach(&mut self, path: PathBuf) {
        self.pending.push(path);
    }

    pub async fn start(&mut self) -> Result<()> {
        self.prompt.render_notice(&format!(
            "Chatting with {}. Type /help for commands.",
            self.conversation.descriptor().id
        ));

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = input.content {
                        self.process(content).await;
                    }
                }
                InputType::Attach => {
                    if let Some(path) = input.content {
                        self.prompt
                            .render_notice(&format!("{} will be sent with the next message", path));
                        self.attach(PathBuf::from(path));
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }
        }
        self.prompt.close();
        Ok(())
    }

    /// Run one turn. Failures are shown and the session carries on.
    async fn process(&mut self, text: String) {
        let files = std::mem::take(&mut self.pending);
        let agent = self.conversation.descriptor().is_agent();
        let (message, uploads) = match attachments::prepare(text, &files, agent) {
            Ok(turn) => turn,
            Err(e) => {
                self.prompt.render_error(&format!("{:#}", e));
                return;
            }
        };

        let mut turn = match self.conversation.begin_turn(message, uploads).await {
            Ok(turn) => turn,
            Err(e) => {
                self.prompt.render_error(&e.to_string());
                return;
            }
        };

        loop {
            tokio::select! {
                event = turn.next() => {
                    match event {
                        Some(StreamEvent::Delta { text }) => self.prompt.render_text(&text),
                        // listed under the reply once it is complete
                        Some(StreamEvent::Citation(_)) => {}
                        Some(StreamEvent::ToolOutput { kind, payload }) => {
                            self.prompt.render_tool_output(&kind, &payload)
                        }
                        Some(StreamEvent::Attachment(attachment)) => {
                            match attachments::save(&self.output_dir, &attachment) {
                                Ok(path) => self.prompt.render_saved(&path),
                                Err(e) => self.prompt.render_error(&format!("{:#}", e)),
                            }
                        }
                        Some(StreamEvent::Done) => self.prompt.render_sources(&turn.outcome().citations),
                        Some(StreamEvent::Error { message, .. }) => self.prompt.render_error(&message),
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    drop(turn);
                    tracing::debug!(model = %self.conversation.descriptor().id, "turn interrupted");
                    self.prompt.render_notice("\nInterrupted: the last message was discarded");
                    break;
                }
            }
        }
        self.prompt.turn_finished();
    }

    /// Release the backend state kept for this session
    pub fn finish(self) {
        self.conversation.end();
    }
}
