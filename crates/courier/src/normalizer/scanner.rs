use lazy_static::lazy_static;
use regex::Regex;

/// Longest bracketed marker body held back while waiting for its closing bracket
const MAX_MARKER_CHARS: usize = 64;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

const MARKER_OPEN: char = '【';

lazy_static! {
    static ref NUMERIC_MARKER: Regex = Regex::new(r"^\[(\d{1,3})\]").unwrap();
    static ref PARTIAL_NUMERIC: Regex = Regex::new(r"^\[\d{0,3}$").unwrap();
    static ref BRACKETED_MARKER: Regex =
        Regex::new(&format!(r"^【[0-9]+(?::[0-9]+)?†[^】]{{0,{}}}】", MAX_MARKER_CHARS)).unwrap();
    static ref PARTIAL_BRACKETED: Regex =
        Regex::new(&format!(r"^【(?:[0-9]+(?::[0-9]*)?(?:†[^】]{{0,{}}})?)?$", MAX_MARKER_CHARS)).unwrap();
}

/// Citation markup found inline in provider text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Marker {
    /// `[n]`, a 1-based position in the announced source list
    Numeric(usize),
    /// `【4:0†source】`, bound to a source by a separate annotation. Other
    /// `【…】` spans are punctuation and stay text.
    Bracketed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Text(String),
    Marker(Marker),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing visible yet; a reasoning block may still open the response
    Leading,
    Thinking,
    /// Dropping whitespace after a reasoning block
    AfterThinking,
    Body,
}

/// Splits streamed text into visible prose and citation markers.
///
/// Markup can be cut anywhere by chunk boundaries, so a possible marker prefix is held
/// back until the next chunk decides it. Numeric markers only count once a source list
/// has been announced; before that `[1]` is ordinary text.
#[derive(Debug)]
pub struct MarkupScanner {
    pending: String,
    numeric: bool,
    phase: Phase,
}

impl Default for MarkupScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupScanner {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            numeric: false,
            phase: Phase::Leading,
        }
    }

    pub fn enable_numeric_markers(&mut self) {
        self.numeric = true;
    }

    pub fn numeric_markers(&self) -> bool {
        self.numeric
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Piece> {
        self.pending.push_str(chunk);
        let mut out = Pieces::default();
        self.advance(&mut out, false);
        out.into_vec()
    }

    /// Flush whatever is held back; partial markup at the end is plain text
    pub fn finish(&mut self) -> Vec<Piece> {
        let mut out = Pieces::default();
        self.advance(&mut out, true);
        out.into_vec()
    }

    fn advance(&mut self, out: &mut Pieces, last: bool) {
        loop {
            match self.phase {
                Phase::Leading => {
                    let trimmed = self.pending.trim_start();
                    if trimmed.starts_with(THINK_OPEN) {
                        let skip = self.pending.len() - trimmed.len() + THINK_OPEN.len();
                        self.pending.drain(..skip);
                        self.phase = Phase::Thinking;
                    } else if !last && THINK_OPEN.starts_with(trimmed) {
                        return;
                    } else {
                        self.phase = Phase::Body;
                    }
                }
                Phase::Thinking => match self.pending.find(THINK_CLOSE) {
                    Some(at) => {
                        self.pending.drain(..at + THINK_CLOSE.len());
                        self.phase = Phase::AfterThinking;
                    }
                    None if last => {
                        // an unterminated block was never reasoning
                        self.pending.insert_str(0, THINK_OPEN);
                        self.phase = Phase::Body;
                    }
                    None => return,
                },
                Phase::AfterThinking => {
                    let trimmed = self.pending.trim_start();
                    if trimmed.is_empty() {
                        self.pending.clear();
                        return;
                    }
                    self.pending = trimmed.to_string();
                    self.phase = Phase::Body;
                }
                Phase::Body => {
                    self.scan_body(out, last);
                    return;
                }
            }
        }
    }

    fn scan_body(&mut self, out: &mut Pieces, last: bool) {
        let text = std::mem::take(&mut self.pending);
        let numeric = self.numeric;
        let mut rest = text.as_str();

        while let Some(at) = rest.find(|c: char| c == MARKER_OPEN || (numeric && c == '[')) {
            out.text(&rest[..at]);
            rest = &rest[at..];

            let (consumed, held) = if rest.starts_with(MARKER_OPEN) {
                Self::bracketed(rest, out, last)
            } else {
                Self::numbered(rest, out, last)
            };
            if held {
                self.pending = rest.to_string();
                return;
            }
            rest = &rest[consumed..];
        }
        out.text(rest);
    }

    /// Returns the bytes consumed and whether `rest` must be held for more input
    fn bracketed(rest: &str, out: &mut Pieces, last: bool) -> (usize, bool) {
        if let Some(found) = BRACKETED_MARKER.find(rest) {
            out.marker(Marker::Bracketed(found.as_str().to_string()));
            return (found.end(), false);
        }
        if !last && PARTIAL_BRACKETED.is_match(rest) {
            return (0, true);
        }
        let open = MARKER_OPEN.len_utf8();
        out.text(&rest[..open]);
        (open, false)
    }

    fn numbered(rest: &str, out: &mut Pieces, last: bool) -> (usize, bool) {
        if let Some(captures) = NUMERIC_MARKER.captures(rest) {
            let index = captures[1].parse::<usize>().unwrap_or(0);
            if index > 0 {
                out.marker(Marker::Numeric(index));
                return (captures[0].len(), false);
            }
        } else if !last && PARTIAL_NUMERIC.is_match(rest) {
            return (0, true);
        }
        out.text("[");
        (1, false)
    }
}

/// Output buffer that merges neighbouring text and never keeps empty text
#[derive(Default)]
struct Pieces(Vec<Piece>);

impl Pieces {
    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.0.last_mut() {
            Some(Piece::Text(prev)) => prev.push_str(text),
            _ => self.0.push(Piece::Text(text.to_string())),
        }
    }

    fn marker(&mut self, marker: Marker) {
        self.0.push(Piece::Marker(marker));
    }

    fn into_vec(self) -> Vec<Piece> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Piece {
        Piece::Text(s.to_string())
    }

    fn run(scanner: &mut MarkupScanner, chunks: &[&str]) -> Vec<Piece> {
        let mut pieces = Vec::new();
        for chunk in chunks {
            pieces.extend(scanner.push(chunk));
        }
        pieces.extend(scanner.finish());
        pieces
    }

    fn visible(pieces: &[Piece]) -> String {
        pieces
            .iter()
            .filter_map(|piece| match piece {
                Piece::Text(text) => Some(text.as_str()),
                Piece::Marker(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_text_passes_through() {
        let mut scanner = MarkupScanner::new();
        assert_eq!(scanner.push("4"), vec![text("4")]);
        assert_eq!(scanner.push("."), vec![text(".")]);
        assert!(scanner.finish().is_empty());
    }

    #[test]
    fn test_numeric_markers_need_sources() {
        let mut scanner = MarkupScanner::new();
        assert_eq!(scanner.push("see [1]"), vec![text("see [1]")]);

        scanner.enable_numeric_markers();
        assert_eq!(
            scanner.push("Rust[1][2] is fast"),
            vec![
                text("Rust"),
                Piece::Marker(Marker::Numeric(1)),
                Piece::Marker(Marker::Numeric(2)),
                text(" is fast"),
            ]
        );
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut scanner = MarkupScanner::new();
        scanner.enable_numeric_markers();
        let pieces = run(&mut scanner, &["fast", "[", "1", "2", "]", " and safe【4:", "0†source", "】."]);

        assert_eq!(
            pieces,
            vec![
                text("fast"),
                Piece::Marker(Marker::Numeric(12)),
                text(" and safe"),
                Piece::Marker(Marker::Bracketed("【4:0†source】".to_string())),
                text("."),
            ]
        );
    }

    #[test]
    fn test_non_markers_stay_text() {
        let mut scanner = MarkupScanner::new();
        scanner.enable_numeric_markers();
        let pieces = run(&mut scanner, &["a[b] c[0] d[1234] e[", "x"]);
        assert!(pieces.iter().all(|piece| matches!(piece, Piece::Text(_))));
        assert_eq!(visible(&pieces), "a[b] c[0] d[1234] e[x");
    }

    #[test]
    fn test_cjk_brackets_stay_text() {
        let mut scanner = MarkupScanner::new();
        let pieces = run(&mut scanner, &["【重要】会議は明日です。", "【注", "意】"]);
        assert!(pieces.iter().all(|piece| matches!(piece, Piece::Text(_))));
        assert_eq!(visible(&pieces), "【重要】会議は明日です。【注意】");
    }

    #[test]
    fn test_stray_open_bracket_before_marker() {
        let mut scanner = MarkupScanner::new();
        let pieces = run(&mut scanner, &["see 【", "【4:0†source】 and 【4†doc】"]);
        assert_eq!(
            pieces,
            vec![
                text("see "),
                text("【"),
                Piece::Marker(Marker::Bracketed("【4:0†source】".to_string())),
                text(" and "),
                Piece::Marker(Marker::Bracketed("【4†doc】".to_string())),
            ]
        );
    }

    #[test]
    fn test_unclosed_marker_is_flushed_as_text() {
        let mut scanner = MarkupScanner::new();
        scanner.enable_numeric_markers();
        assert_eq!(scanner.push("tail【4:0"), vec![text("tail")]);
        assert_eq!(scanner.finish(), vec![text("【4:0")]);

        let mut scanner = MarkupScanner::new();
        scanner.enable_numeric_markers();
        assert_eq!(visible(&run(&mut scanner, &["x [1"])), "x [1");
    }

    #[test]
    fn test_overlong_bracket_is_text() {
        let mut scanner = MarkupScanner::new();
        let long = format!("【{}】", "x".repeat(MAX_MARKER_CHARS + 1));
        assert_eq!(run(&mut scanner, &[&long]), vec![text(&long)]);
    }

    #[test]
    fn test_leading_reasoning_block_dropped() {
        let mut scanner = MarkupScanner::new();
        let pieces = run(&mut scanner, &["<thi", "nk>let me", " think</th", "ink>\n\n", "  The answer", " is 4."]);
        assert_eq!(visible(&pieces), "The answer is 4.");
    }

    #[test]
    fn test_reasoning_block_only_at_start() {
        let mut scanner = MarkupScanner::new();
        let pieces = run(&mut scanner, &["Use <think> tags </think> here"]);
        assert_eq!(visible(&pieces), "Use <think> tags </think> here");
    }

    #[test]
    fn test_unterminated_reasoning_block_is_text() {
        let mut scanner = MarkupScanner::new();
        let pieces = run(&mut scanner, &["<think>never closed"]);
        assert_eq!(visible(&pieces), "<think>never closed");
    }

    #[test]
    fn test_short_prefix_is_not_held_at_end() {
        let mut scanner = MarkupScanner::new();
        assert!(scanner.push("<th").is_empty());
        assert_eq!(scanner.finish(), vec![text("<th")]);
    }
}
