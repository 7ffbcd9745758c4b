//! Incremental title/body splitting of a model's fragment stream.
//!
//! A [`StreamSplitter`] is fed fragments in arrival order and returns the
//! partial events that can be forwarded right away. Fragment boundaries carry
//! no meaning: a newline or the `TITLE:` marker may straddle two fragments, so
//! boundary detection always searches the accumulated text.
//!
//! The incremental events are a display optimization. The authoritative
//! [`GenerationResult`] is re-derived from the full text by
//! [`SplitPolicy::finalize`], which depends only on the concatenated text.

use log::debug;

use crate::types::{GenerationMode, GenerationResult, StreamEvent, FALLBACK_BODY, FALLBACK_TITLE};

pub const TITLE_MARKER: &str = "TITLE:";

const REWRITE_TITLE_PREFIX: &str = "Rewrite: ";
const REWRITE_TITLE_WORDS: usize = 6;
const REWRITE_TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitPolicy {
    /// First line is the title, the rest (after blank lines) is the body.
    TitleFirst,
    /// Body first, title after the `TITLE:` marker.
    ///
    /// Text is forwarded as body as soon as it arrives, so a marker split
    /// across fragments can leak its first half (`"TIT"`) into the streamed
    /// body. The finalized result is unaffected.
    MarkerTitle,
    /// Everything is body; the title is fixed up front from the user input.
    Passthrough { title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ScanningForBoundary,
    InTitle,
    InBody,
}

impl GenerationMode {
    pub fn split_policy(&self, user_input: &str) -> SplitPolicy {
        match self {
            GenerationMode::Write => SplitPolicy::MarkerTitle,
            GenerationMode::Rewrite => SplitPolicy::Passthrough {
                title: rewrite_title(user_input),
            },
            GenerationMode::Classic => SplitPolicy::TitleFirst,
        }
    }
}

impl SplitPolicy {
    fn initial_phase(&self) -> Phase {
        match self {
            SplitPolicy::TitleFirst => Phase::ScanningForBoundary,
            SplitPolicy::MarkerTitle | SplitPolicy::Passthrough { .. } => Phase::InBody,
        }
    }

    /// Splits a complete model response into title and body.
    pub fn finalize(&self, text: &str) -> GenerationResult {
        match self {
            SplitPolicy::TitleFirst => finalize_title_first(text),
            SplitPolicy::MarkerTitle => finalize_marker_title(text),
            SplitPolicy::Passthrough { title } => GenerationResult {
                title: title.clone(),
                body: text.to_string(),
            },
        }
    }
}

fn finalize_title_first(text: &str) -> GenerationResult {
    let lines: Vec<&str> = text.split('\n').collect();
    let is_blank = |line: &&str| line.trim().is_empty();

    let Some(title_index) = lines.iter().position(|line| !is_blank(line)) else {
        return GenerationResult {
            title: FALLBACK_TITLE.to_string(),
            body: FALLBACK_BODY.to_string(),
        };
    };

    let rest = &lines[title_index + 1..];
    let body_start = rest
        .iter()
        .position(|line| !is_blank(line))
        .unwrap_or(rest.len());
    let body = rest[body_start..].join("\n").trim().to_string();

    GenerationResult {
        title: lines[title_index].trim().to_string(),
        body: if body.is_empty() { FALLBACK_BODY.to_string() } else { body },
    }
}

fn finalize_marker_title(text: &str) -> GenerationResult {
    match text.find(TITLE_MARKER) {
        Some(start) => {
            let title = text[start + TITLE_MARKER.len()..].trim();
            GenerationResult {
                title: if title.is_empty() {
                    FALLBACK_TITLE.to_string()
                } else {
                    title.to_string()
                },
                body: text[..start].trim().to_string(),
            }
        }
        None => GenerationResult {
            title: FALLBACK_TITLE.to_string(),
            body: text.trim().to_string(),
        },
    }
}

/// Title for rewrite mode: a label plus the first few words of the user input.
pub fn rewrite_title(user_input: &str) -> String {
    let excerpt = user_input
        .split_whitespace()
        .take(REWRITE_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ");

    if excerpt.is_empty() {
        return FALLBACK_TITLE.to_string();
    }

    let excerpt = if excerpt.chars().count() > REWRITE_TITLE_MAX_CHARS {
        excerpt.chars().take(REWRITE_TITLE_MAX_CHARS).collect::<String>() + "..."
    } else {
        excerpt
    };

    format!("{REWRITE_TITLE_PREFIX}{excerpt}")
}

/// What is left once the fragment sequence is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Events to forward before `Complete`.
    pub trailing: Vec<StreamEvent>,
    pub result: GenerationResult,
}

#[derive(Debug)]
pub struct StreamSplitter {
    policy: SplitPolicy,
    phase: Phase,
    accumulated: String,
    body: String,
    title: String,
    // Byte offset into `accumulated` already forwarded as body (marker policy).
    forwarded_body: usize,
    title_sent: bool,
}

impl StreamSplitter {
    pub fn new(policy: SplitPolicy) -> Self {
        Self {
            phase: policy.initial_phase(),
            policy,
            accumulated: String::new(),
            body: String::new(),
            title: String::new(),
            forwarded_body: 0,
            title_sent: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Body text seen so far, as tracked while streaming.
    pub fn body_buffer(&self) -> &str {
        &self.body
    }

    /// Title text seen so far, as tracked while streaming.
    pub fn title_buffer(&self) -> &str {
        &self.title
    }

    /// Consumes one fragment and returns the events it makes available.
    pub fn push(&mut self, fragment: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if fragment.is_empty() {
            return events;
        }
        self.accumulated.push_str(fragment);

        match self.phase {
            Phase::ScanningForBoundary => self.scan_title_line(&mut events),
            Phase::InBody if self.policy == SplitPolicy::MarkerTitle => {
                self.scan_marker(&mut events)
            }
            Phase::InBody => {
                self.body.push_str(fragment);
                events.push(StreamEvent::content(fragment));
            }
            Phase::InTitle => self.extend_title(fragment, &mut events),
        }

        events
    }

    fn scan_title_line(&mut self, events: &mut Vec<StreamEvent>) {
        // Leading blank lines are skipped, as in `finalize`.
        let mut line_start = 0;
        while let Some(offset) = self.accumulated[line_start..].find('\n') {
            let newline = line_start + offset;
            let title = self.accumulated[line_start..newline].trim().to_string();
            if title.is_empty() {
                line_start = newline + 1;
                continue;
            }

            debug!("title line complete at byte {newline}: {title:?}");
            events.push(StreamEvent::title(title.clone()));
            self.title = title;
            self.title_sent = true;

            self.body = self.accumulated[newline + 1..].to_string();
            self.phase = Phase::InBody;
            if !self.body.trim().is_empty() {
                events.push(StreamEvent::content(self.body.clone()));
            }
            return;
        }
    }

    /// Title text after the marker. Nothing is sent until the title has a
    /// non-blank character, so a blank title still gets the fallback at finish.
    fn extend_title(&mut self, fragment: &str, events: &mut Vec<StreamEvent>) {
        if self.title_sent {
            self.title.push_str(fragment);
            events.push(StreamEvent::title(fragment));
            return;
        }

        self.title.push_str(fragment);
        let title = self.title.trim_start();
        if !title.is_empty() {
            self.title = title.to_string();
            events.push(StreamEvent::title(self.title.clone()));
            self.title_sent = true;
        }
    }

    fn scan_marker(&mut self, events: &mut Vec<StreamEvent>) {
        // Everything before `forwarded_body` was searched already, so only a
        // marker straddling the last fragment boundary can start before it.
        let mut search_from = self.forwarded_body.saturating_sub(TITLE_MARKER.len() - 1);
        while !self.accumulated.is_char_boundary(search_from) {
            search_from -= 1;
        }

        let Some(start) = self.accumulated[search_from..]
            .find(TITLE_MARKER)
            .map(|offset| search_from + offset)
        else {
            let pending = &self.accumulated[self.forwarded_body..];
            if !pending.is_empty() {
                events.push(StreamEvent::content(pending));
                self.body.push_str(pending);
            }
            self.forwarded_body = self.accumulated.len();
            return;
        };

        debug!("title marker found at byte {start}");
        if start > self.forwarded_body {
            events.push(StreamEvent::content(&self.accumulated[self.forwarded_body..start]));
            self.forwarded_body = start;
        }
        self.body = self.accumulated[..start].trim().to_string();
        self.phase = Phase::InTitle;

        let tail = self.accumulated[start + TITLE_MARKER.len()..].to_string();
        self.extend_title(&tail, events);
    }

    /// Current result if the stream ended now. Does not consume the splitter.
    pub fn snapshot(&self) -> GenerationResult {
        self.policy.finalize(&self.accumulated)
    }

    pub fn finish(self) -> Finalized {
        let result = self.snapshot();
        let mut trailing = Vec::new();
        if !self.title_sent {
            trailing.push(StreamEvent::title(result.title.clone()));
        }
        Finalized { trailing, result }
    }
}
