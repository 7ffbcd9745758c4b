use serde::{Deserialize, Serialize};

pub const FALLBACK_TITLE: &str = "Generated Article";
pub const FALLBACK_BODY: &str = "Article content not found";

/// Which prompt template and matching split policy a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Body first, then a `TITLE:` line.
    #[default]
    Write,
    /// Paragraph-preserving rewrite with no title in the model output.
    #[serde(alias = "refine")]
    Rewrite,
    /// Title on the first line, then a blank line, then the body.
    Classic,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Write => "write",
            GenerationMode::Rewrite => "rewrite",
            GenerationMode::Classic => "classic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "write" => Some(GenerationMode::Write),
            "rewrite" | "refine" => Some(GenerationMode::Rewrite),
            "classic" => Some(GenerationMode::Classic),
            _ => None,
        }
    }
}

pub const MAX_INPUT_CHARS: usize = 2000;

/// A validated generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub user_input: String,
    pub mode: GenerationMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSummary {
    pub title: String,
    pub filename: String,
}

/// One frame of the generation event stream.
///
/// Serialized as the JSON payload of a `data:` line. `Metadata` always comes
/// first and exactly one of `Complete` or `Error` comes last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Metadata {
        #[serde(rename = "usedReferences")]
        used_references: Vec<ReferenceSummary>,
    },
    #[serde(rename = "title")]
    TitleChunk { chunk: String },
    #[serde(rename = "content")]
    ContentChunk { chunk: String },
    Complete,
    Error { error: String },
}

impl StreamEvent {
    pub fn title(chunk: impl Into<String>) -> Self {
        StreamEvent::TitleChunk { chunk: chunk.into() }
    }

    pub fn content(chunk: impl Into<String>) -> Self {
        StreamEvent::ContentChunk { chunk: chunk.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error { error: message.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete | StreamEvent::Error { .. })
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain strings and vectors of strings.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// `data: {json}\n\n`
    pub fn to_frame(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub title: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let metadata = StreamEvent::Metadata {
            used_references: vec![ReferenceSummary {
                title: "Queen Goes Fishing".to_string(),
                filename: "fishing.txt".to_string(),
            }],
        };
        assert_eq!(
            metadata.to_json(),
            r#"{"type":"metadata","usedReferences":[{"title":"Queen Goes Fishing","filename":"fishing.txt"}]}"#
        );
        assert_eq!(StreamEvent::title("Hi").to_json(), r#"{"type":"title","chunk":"Hi"}"#);
        assert_eq!(StreamEvent::content("x").to_json(), r#"{"type":"content","chunk":"x"}"#);
        assert_eq!(StreamEvent::Complete.to_frame(), "data: {\"type\":\"complete\"}\n\n");
        assert_eq!(
            StreamEvent::error("boom").to_json(),
            r#"{"type":"error","error":"boom"}"#
        );
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let parsed = serde_json::from_str::<StreamEvent>(r#"{"type":"usage","tokens":3}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(GenerationMode::parse("write"), Some(GenerationMode::Write));
        assert_eq!(GenerationMode::parse("refine"), Some(GenerationMode::Rewrite));
        assert_eq!(GenerationMode::parse("rewrite"), Some(GenerationMode::Rewrite));
        assert_eq!(GenerationMode::parse("classic"), Some(GenerationMode::Classic));
        assert_eq!(GenerationMode::parse("WRITE"), None);
        let mode: GenerationMode = serde_json::from_str("\"refine\"").unwrap();
        assert_eq!(mode, GenerationMode::Rewrite);
        assert_eq!(GenerationMode::default(), GenerationMode::Write);
    }
}
