//! Turns the raw events of any adapter into the one event sequence a caller renders.
//!
//! Adapters only translate their wire protocol into [`RawEvent`]s. Everything that must
//! hold regardless of backend lives here: citation markup never reaches a delta, citation
//! numbers are contiguous and first-seen ordered, and a turn ends in exactly one `Done`
//! or `Error`.
pub mod citations;
pub mod scanner;

use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use crate::context::SessionContext;
use crate::errors::CourierError;
use crate::models::attachment::Attachment;
use crate::models::event::StreamEvent;
use crate::utils::truncate_for_log;
pub use citations::{CitationBook, Source};
pub use scanner::{MarkupScanner, Marker, Piece};

/// What an adapter reports while it reads its backend's stream
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Visible text, possibly carrying citation markup
    Text(String),
    /// The numbered source list `[n]` markers refer to
    Sources(Vec<Source>),
    /// A literal marker in the text and the source it stands for
    Annotation { marker: String, source: Source },
    ToolOutput { kind: String, payload: Value },
    Attachment(Attachment),
    Finished,
    Failed(CourierError),
}

impl RawEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RawEvent::Finished | RawEvent::Failed(_))
    }
}

pub type RawStream = BoxStream<'static, RawEvent>;

/// The normalized events of one turn, pulled lazily by the caller
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Wrap an adapter's raw stream. The raw stream is dropped, and its connection with it,
/// as soon as a terminal event has been produced.
pub fn normalize(raw: RawStream, ctx: SessionContext) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut raw = raw;
        let mut normalizer = Normalizer::new(ctx);

        while let Some(event) = raw.next().await {
            for out in normalizer.handle(event) {
                yield out;
            }
            if normalizer.is_finished() {
                break;
            }
        }
        drop(raw);

        if !normalizer.is_finished() {
            let cut = CourierError::Stream("stream ended before the response completed".to_string());
            for out in normalizer.handle(RawEvent::Failed(cut)) {
                yield out;
            }
        }
    })
}

/// The synchronous state machine behind [`normalize`]
#[derive(Debug)]
pub struct Normalizer {
    ctx: SessionContext,
    scanner: MarkupScanner,
    book: CitationBook,
    finished: bool,
}

impl Normalizer {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            scanner: MarkupScanner::new(),
            book: CitationBook::new(),
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn handle(&mut self, event: RawEvent) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            RawEvent::Text(text) => {
                let pieces = self.scanner.push(&text);
                self.place(pieces, &mut out);
            }
            RawEvent::Sources(sources) => {
                self.book.announce(sources);
                if self.book.has_sources() {
                    self.scanner.enable_numeric_markers();
                }
                out.extend(self.book.drain().into_iter().map(StreamEvent::Citation));
            }
            RawEvent::Annotation { marker, source } => {
                self.book.annotate(marker, source);
                out.extend(self.book.drain().into_iter().map(StreamEvent::Citation));
            }
            RawEvent::ToolOutput { kind, payload } => {
                tracing::debug!(
                    session_id = %self.ctx.session_id,
                    user_id = %self.ctx.user_id,
                    kind = %kind,
                    payload = %truncate_for_log(&payload.to_string()),
                    "tool output"
                );
                out.push(StreamEvent::ToolOutput { kind, payload });
            }
            RawEvent::Attachment(attachment) => {
                tracing::debug!(
                    session_id = %self.ctx.session_id,
                    user_id = %self.ctx.user_id,
                    name = %attachment.name,
                    bytes = attachment.data.len(),
                    "attachment"
                );
                out.push(StreamEvent::Attachment(attachment));
            }
            RawEvent::Finished => {
                let pieces = self.scanner.finish();
                self.place(pieces, &mut out);
                out.extend(self.book.finish().into_iter().map(StreamEvent::Citation));
                out.push(StreamEvent::Done);
                self.finished = true;
            }
            RawEvent::Failed(error) => {
                tracing::error!(
                    session_id = %self.ctx.session_id,
                    user_id = %self.ctx.user_id,
                    kind = %error.kind(),
                    detail = %truncate_for_log(&error.detail()),
                    "turn failed"
                );
                out.push(StreamEvent::from(error));
                self.finished = true;
            }
        }
        out
    }

    fn place(&mut self, pieces: Vec<Piece>, out: &mut Vec<StreamEvent>) {
        for piece in pieces {
            match piece {
                Piece::Text(text) => out.push(StreamEvent::delta(text)),
                Piece::Marker(marker) => {
                    self.book.reference(marker);
                    out.extend(self.book.drain().into_iter().map(StreamEvent::Citation));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::event::Citation;
    use futures::stream;

    fn ctx() -> SessionContext {
        SessionContext::new("s-1", "tester")
    }

    fn text_of(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Delta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn citations_of(events: &[StreamEvent]) -> Vec<Citation> {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Citation(citation) => Some(citation.clone()),
                _ => None,
            })
            .collect()
    }

    async fn collect(raw: Vec<RawEvent>) -> Vec<StreamEvent> {
        normalize(Box::pin(stream::iter(raw)), ctx()).collect().await
    }

    #[tokio::test]
    async fn test_plain_completion() {
        let events = collect(vec![
            RawEvent::Text("4".to_string()),
            RawEvent::Text(".".to_string()),
            RawEvent::Finished,
        ])
        .await;

        assert_eq!(
            events,
            vec![StreamEvent::delta("4"), StreamEvent::delta("."), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_cjk_brackets_reach_the_reader() {
        let events = collect(vec![
            RawEvent::Text("【重要】会議は明日です。".to_string()),
            RawEvent::Finished,
        ])
        .await;

        assert_eq!(text_of(&events), "【重要】会議は明日です。");
        assert!(citations_of(&events).is_empty());
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_missing_terminal_becomes_stream_error() {
        let events = collect(vec![RawEvent::Text("par".to_string())]).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Error { kind: ErrorKind::Stream, .. })
        ));
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let events = collect(vec![
            RawEvent::Failed(CourierError::Provider("401".to_string())),
            RawEvent::Text("late".to_string()),
            RawEvent::Finished,
        ])
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Error { kind: ErrorKind::Provider, .. }
        ));
    }

    #[tokio::test]
    async fn test_numbered_sources_every_chunking() {
        let body = "Rust[2] is fast[1][2] and safe.";
        for split in 0..=body.len() {
            if !body.is_char_boundary(split) {
                continue;
            }
            let events = collect(vec![
                RawEvent::Sources(vec![
                    Source::new("https://a.example", "a"),
                    Source::new("https://b.example", "b"),
                    Source::new("https://c.example", "c"),
                ]),
                RawEvent::Text(body[..split].to_string()),
                RawEvent::Text(body[split..].to_string()),
                RawEvent::Finished,
            ])
            .await;

            assert_eq!(text_of(&events), "Rust is fast and safe.", "split at {}", split);
            let citations = citations_of(&events);
            let urls: Vec<&str> = citations.iter().map(|c| c.url.as_str()).collect();
            assert_eq!(
                urls,
                vec!["https://b.example", "https://a.example", "https://c.example"]
            );
            let indices: Vec<usize> = citations.iter().map(|c| c.index).collect();
            assert_eq!(indices, vec![1, 2, 3]);
            assert!(events.iter().all(|e| !matches!(e, StreamEvent::Delta { text } if text.is_empty())));
            assert_eq!(events.last(), Some(&StreamEvent::Done));
        }
    }

    #[tokio::test]
    async fn test_annotated_markers() {
        let events = collect(vec![
            RawEvent::Annotation {
                marker: "【4:0†source】".to_string(),
                source: Source::new("https://docs.example/a", "A"),
            },
            RawEvent::Text("Revenue grew【4:".to_string()),
            RawEvent::Text("0†source】 by 5%【4:1†source】.".to_string()),
            RawEvent::Annotation {
                marker: "【4:1†source】".to_string(),
                source: Source::new("https://docs.example/b", "B"),
            },
            RawEvent::Finished,
        ])
        .await;

        assert_eq!(text_of(&events), "Revenue grew by 5%.");
        let citations = citations_of(&events);
        assert_eq!(citations.len(), 2);
        assert_eq!((citations[0].index, citations[0].title.as_str()), (1, "A"));
        assert_eq!((citations[1].index, citations[1].title.as_str()), (2, "B"));
    }

    #[tokio::test]
    async fn test_tool_output_and_attachment_pass_through() {
        let attachment = Attachment::from_name("generated_chart.png", vec![0x89u8, 0x50]);
        let events = collect(vec![
            RawEvent::ToolOutput {
                kind: "code_interpreter".to_string(),
                payload: serde_json::json!({"input": "plot()"}),
            },
            RawEvent::Attachment(attachment.clone()),
            RawEvent::Finished,
        ])
        .await;

        assert_eq!(
            events[1],
            StreamEvent::Attachment(attachment)
        );
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_reasoning_block_hidden() {
        let mut normalizer = Normalizer::new(ctx());
        let mut events = normalizer.handle(RawEvent::Text("<think>hmm</think>\n".to_string()));
        events.extend(normalizer.handle(RawEvent::Text("Hello".to_string())));
        events.extend(normalizer.handle(RawEvent::Finished));

        assert_eq!(text_of(&events), "Hello");
        assert!(normalizer.is_finished());
    }
}
