use log::{debug, warn};
use thiserror::Error;

use crate::client::history::NewGeneration;
use crate::types::{GenerationMode, GenerationResult, ReferenceSummary, StreamEvent};

const DATA_FIELD: &str = "data:";

/// How title chunks combine on the client.
///
/// The title-first policy sends the whole title as one chunk, so the latest
/// chunk replaces the previous one. The other policies stream the title in
/// pieces which must be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleAccumulation {
    Replace,
    Append,
}

impl TitleAccumulation {
    pub fn for_mode(mode: GenerationMode) -> Self {
        match mode {
            GenerationMode::Classic => TitleAccumulation::Replace,
            GenerationMode::Write | GenerationMode::Rewrite => TitleAccumulation::Append,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("event line is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedGeneration {
    pub prompt: String,
    pub mode: GenerationMode,
    pub result: GenerationResult,
    pub used_references: Vec<ReferenceSummary>,
}

impl From<CompletedGeneration> for NewGeneration {
    fn from(done: CompletedGeneration) -> Self {
        NewGeneration {
            prompt: done.prompt,
            mode: done.mode,
            title: done.result.title,
            content: done.result.body,
            used_references: done.used_references,
        }
    }
}

/// Display-relevant change produced by one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    References(Vec<ReferenceSummary>),
    /// Current accumulated title.
    Title(String),
    /// Current accumulated body.
    Content(String),
    Completed(CompletedGeneration),
    Failed(String),
}

/// Client state for one generation request.
#[derive(Debug)]
pub struct StreamingSession {
    prompt: String,
    mode: GenerationMode,
    title_rule: TitleAccumulation,
    pending: Vec<u8>,
    accumulated_title: String,
    accumulated_content: String,
    used_references: Vec<ReferenceSummary>,
    finished: bool,
}

impl StreamingSession {
    pub fn new(prompt: impl Into<String>, mode: GenerationMode) -> Self {
        Self {
            prompt: prompt.into(),
            mode,
            title_rule: TitleAccumulation::for_mode(mode),
            pending: Vec::new(),
            accumulated_title: String::new(),
            accumulated_content: String::new(),
            used_references: Vec::new(),
            finished: false,
        }
    }

    pub fn title_rule(&self) -> TitleAccumulation {
        self.title_rule
    }

    pub fn streaming_title(&self) -> &str {
        &self.accumulated_title
    }

    pub fn streaming_content(&self) -> &str {
        &self.accumulated_content
    }

    pub fn used_references(&self) -> &[ReferenceSummary] {
        &self.used_references
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds raw response body bytes. Lines may be split anywhere across calls.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SessionUpdate> {
        self.pending.extend_from_slice(bytes);

        let mut updates = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            match parse_line(&line) {
                Ok(Some(event)) => updates.extend(self.apply(event)),
                Ok(None) => {}
                Err(e) => warn!("Error parsing SSE data: {e}"),
            }
        }
        updates
    }

    /// Call when the response body ends. Reports a failure if no terminal
    /// event was received.
    pub fn end_of_stream(&mut self) -> Option<SessionUpdate> {
        if self.finished {
            return None;
        }
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            match parse_line(&line) {
                Ok(Some(event)) => {
                    let update = self.apply(event);
                    if self.finished {
                        return update;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Error parsing SSE data: {e}"),
            }
        }
        Some(self.fail("The connection closed before the article was finished.".to_string()))
    }

    pub fn apply(&mut self, event: StreamEvent) -> Option<SessionUpdate> {
        if self.finished {
            debug!("Ignoring event after stream end: {event:?}");
            return None;
        }

        match event {
            StreamEvent::Metadata { used_references } => {
                self.used_references = used_references.clone();
                Some(SessionUpdate::References(used_references))
            }
            StreamEvent::TitleChunk { chunk } => {
                match self.title_rule {
                    TitleAccumulation::Replace => self.accumulated_title = chunk,
                    TitleAccumulation::Append => self.accumulated_title.push_str(&chunk),
                }
                Some(SessionUpdate::Title(self.accumulated_title.clone()))
            }
            StreamEvent::ContentChunk { chunk } => {
                self.accumulated_content.push_str(&chunk);
                Some(SessionUpdate::Content(self.accumulated_content.clone()))
            }
            StreamEvent::Complete => {
                self.finished = true;
                let result = GenerationResult {
                    title: std::mem::take(&mut self.accumulated_title).trim().to_string(),
                    body: std::mem::take(&mut self.accumulated_content).trim().to_string(),
                };
                Some(SessionUpdate::Completed(CompletedGeneration {
                    prompt: self.prompt.clone(),
                    mode: self.mode,
                    result,
                    used_references: self.used_references.clone(),
                }))
            }
            StreamEvent::Error { error } => Some(self.fail(error)),
        }
    }

    fn fail(&mut self, message: String) -> SessionUpdate {
        self.finished = true;
        self.accumulated_title.clear();
        self.accumulated_content.clear();
        SessionUpdate::Failed(message)
    }
}

/// Parses one SSE line. Lines that are not `data:` lines yield `None`.
pub fn parse_line(line: &[u8]) -> Result<Option<StreamEvent>, SessionError> {
    let line = std::str::from_utf8(line).map_err(|_| SessionError::InvalidUtf8)?;
    let line = line.trim_end_matches(['\n', '\r']);
    match line.strip_prefix(DATA_FIELD) {
        Some(payload) => {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            Ok(Some(serde_json::from_str(payload)?))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::history::{HistoryStore, MemoryStorage};

    fn frames(events: &[StreamEvent]) -> Vec<u8> {
        events
            .iter()
            .map(StreamEvent::to_frame)
            .collect::<String>()
            .into_bytes()
    }

    fn completed(updates: &[SessionUpdate]) -> Option<&CompletedGeneration> {
        updates.iter().find_map(|update| match update {
            SessionUpdate::Completed(done) => Some(done),
            _ => None,
        })
    }

    fn references() -> Vec<ReferenceSummary> {
        vec![ReferenceSummary {
            title: "Queen Buys Boat".to_string(),
            filename: "boat.txt".to_string(),
        }]
    }

    #[test]
    fn test_append_rule_for_marker_titles() {
        let mut session = StreamingSession::new("corgis", GenerationMode::Write);
        let bytes = frames(&[
            StreamEvent::Metadata { used_references: references() },
            StreamEvent::content("The corgis "),
            StreamEvent::content("are loose.\n"),
            StreamEvent::title("Corgis "),
            StreamEvent::title("Escape "),
            StreamEvent::Complete,
        ]);
        let updates = session.feed(&bytes);

        let done = completed(&updates).unwrap();
        assert_eq!(done.result.title, "Corgis Escape");
        assert_eq!(done.result.body, "The corgis are loose.");
        assert_eq!(done.used_references, references());
        assert_eq!(done.mode, GenerationMode::Write);
        assert!(session.streaming_title().is_empty());
        assert!(session.streaming_content().is_empty());
    }

    #[test]
    fn test_replace_rule_for_title_first() {
        let mut session = StreamingSession::new("tea", GenerationMode::Classic);
        assert_eq!(session.title_rule(), TitleAccumulation::Replace);

        session.apply(StreamEvent::title("First"));
        let update = session.apply(StreamEvent::title("Second"));
        assert_eq!(update, Some(SessionUpdate::Title("Second".to_string())));
    }

    #[test]
    fn test_lines_split_across_byte_chunks() {
        let mut session = StreamingSession::new("crown", GenerationMode::Rewrite);
        let bytes = frames(&[
            StreamEvent::Metadata { used_references: vec![] },
            StreamEvent::content("Über 👑 "),
            StreamEvent::content("jewels"),
            StreamEvent::title("Rewrite: crown"),
            StreamEvent::Complete,
        ]);

        let mut updates = Vec::new();
        for piece in bytes.chunks(3) {
            updates.extend(session.feed(piece));
        }

        let done = completed(&updates).unwrap();
        assert_eq!(done.result.body, "Über 👑 jewels");
        assert_eq!(done.result.title, "Rewrite: crown");
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let mut session = StreamingSession::new("p", GenerationMode::Write);
        let mut bytes = b"data: {broken\n\ndata: {\"type\":\"mystery\"}\n\n: keep-alive\n\n".to_vec();
        bytes.extend(frames(&[StreamEvent::content("still here"), StreamEvent::Complete]));

        let updates = session.feed(&bytes);
        assert_eq!(completed(&updates).unwrap().result.body, "still here");
    }

    #[test]
    fn test_error_clears_buffers_and_ends_session() {
        let mut session = StreamingSession::new("p", GenerationMode::Write);
        let updates = session.feed(&frames(&[
            StreamEvent::content("partial"),
            StreamEvent::error("Failed to generate content. Please try again."),
            StreamEvent::content("late"),
            StreamEvent::Complete,
        ]));

        assert!(completed(&updates).is_none());
        assert_eq!(
            updates.last(),
            Some(&SessionUpdate::Failed(
                "Failed to generate content. Please try again.".to_string()
            ))
        );
        assert!(session.is_finished());
        assert!(session.streaming_content().is_empty());
        assert_eq!(session.end_of_stream(), None);
    }

    #[test]
    fn test_end_without_terminal_event_fails() {
        let mut session = StreamingSession::new("p", GenerationMode::Write);
        session.feed(&frames(&[StreamEvent::content("half")]));
        assert!(matches!(session.end_of_stream(), Some(SessionUpdate::Failed(_))));
    }

    #[test]
    fn test_unterminated_final_line_is_parsed_at_end() {
        let mut session = StreamingSession::new("p", GenerationMode::Write);
        session.feed(&frames(&[StreamEvent::content("body")]));
        session.feed(b"data: {\"type\":\"complete\"}");
        assert!(matches!(
            session.end_of_stream(),
            Some(SessionUpdate::Completed(_))
        ));
    }

    #[test]
    fn test_completion_hands_off_to_history() {
        let mut history = HistoryStore::load(MemoryStorage::new());
        let mut session = StreamingSession::new("corgis", GenerationMode::Write);
        let updates = session.feed(&frames(&[
            StreamEvent::Metadata { used_references: references() },
            StreamEvent::content("Body"),
            StreamEvent::title("Title"),
            StreamEvent::Complete,
        ]));

        let done = completed(&updates).cloned().unwrap();
        let entry = history.save(done.into()).unwrap();
        assert_eq!(entry.prompt, "corgis");
        assert_eq!(entry.title, "Title");
        assert_eq!(entry.content, "Body");
        assert_eq!(history.entries().len(), 1);
    }
}
