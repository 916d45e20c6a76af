use std::collections::{HashMap, HashSet, VecDeque};

use super::scanner::Marker;
use crate::models::event::Citation;

/// Something a response cites, before it is given a number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Source {
    pub url: String,
    pub title: String,
}

impl Source {
    pub fn new<U: Into<String>, T: Into<String>>(url: U, title: T) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Numbers the sources of one turn.
///
/// Markers are queued in the order they appear in the text. A marker is numbered only
/// once its source is known and every marker before it has been numbered, so indices
/// come out contiguous, 1-based and in first-seen order. Two markers naming the same
/// source share one citation.
#[derive(Debug, Default)]
pub struct CitationBook {
    sources: Vec<Source>,
    annotations: HashMap<String, Source>,
    annotated: Vec<Source>,
    queue: VecDeque<Marker>,
    seen: HashSet<Marker>,
    numbered: HashMap<Source, usize>,
}

impl CitationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the numbered source list `[n]` markers point into
    pub fn announce(&mut self, sources: Vec<Source>) {
        if !sources.is_empty() {
            self.sources = sources;
        }
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Bind a literal marker to its source; the first binding wins
    pub fn annotate(&mut self, marker: String, source: Source) {
        if self.annotations.contains_key(&marker) {
            return;
        }
        if !self.annotated.contains(&source) {
            self.annotated.push(source.clone());
        }
        self.annotations.insert(marker, source);
    }

    /// Record a marker seen in the text
    pub fn reference(&mut self, marker: Marker) {
        if self.seen.insert(marker.clone()) {
            self.queue.push_back(marker);
        }
    }

    /// Number every queued marker that can be numbered now
    pub fn drain(&mut self) -> Vec<Citation> {
        let mut citations = Vec::new();
        while let Some(source) = self.queue.front().and_then(|marker| self.resolve(marker)) {
            self.queue.pop_front();
            citations.extend(self.number(source));
        }
        citations
    }

    /// Number what is left at the end of the turn. Markers that never resolved are
    /// dropped; sources the text never pointed at follow in list order.
    pub fn finish(&mut self) -> Vec<Citation> {
        let mut citations = Vec::new();
        while let Some(marker) = self.queue.pop_front() {
            if let Some(source) = self.resolve(&marker) {
                citations.extend(self.number(source));
            }
        }

        let rest: Vec<Source> = self
            .sources
            .iter()
            .chain(self.annotated.iter())
            .cloned()
            .collect();
        for source in rest {
            citations.extend(self.number(source));
        }
        citations
    }

    fn resolve(&self, marker: &Marker) -> Option<Source> {
        match marker {
            Marker::Numeric(n) => self.sources.get(n.checked_sub(1)?).cloned(),
            Marker::Bracketed(text) => self.annotations.get(text).cloned(),
        }
    }

    fn number(&mut self, source: Source) -> Option<Citation> {
        if self.numbered.contains_key(&source) {
            return None;
        }
        let index = self.numbered.len() + 1;
        self.numbered.insert(source.clone(), index);
        Some(Citation {
            index,
            url: source.url,
            title: source.title,
        })
    }
}
