//! Sentence Units
//!
//! The atomic unit of TTS work. One spoken utterance is bracketed by exactly
//! one `First` and one `Last` unit with any number of `Middle` units between
//! them; the sentence id is constant within a bracket and brackets never
//! interleave on the transport.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Position of a unit within its sentence bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentenceType {
    First,
    Middle,
    Last,
}

/// What the unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    /// Text to synthesize.
    Text,
    /// Control marker only; no audio is produced.
    Action,
    /// Pre-rendered audio file streamed as-is.
    File,
}

/// One queued piece of TTS work.
#[derive(Debug, Clone)]
pub struct SentenceUnit {
    pub sentence_id: String,
    pub sentence_type: SentenceType,
    pub content_type: ContentType,
    pub text: Option<String>,
    pub file: Option<PathBuf>,
}

impl SentenceUnit {
    /// Bracket-opening marker.
    pub fn first(sentence_id: impl Into<String>) -> Self {
        Self {
            sentence_id: sentence_id.into(),
            sentence_type: SentenceType::First,
            content_type: ContentType::Action,
            text: None,
            file: None,
        }
    }

    /// Bracket-closing marker.
    pub fn last(sentence_id: impl Into<String>) -> Self {
        Self {
            sentence_id: sentence_id.into(),
            sentence_type: SentenceType::Last,
            content_type: ContentType::Action,
            text: None,
            file: None,
        }
    }

    /// Text chunk inside a bracket.
    pub fn text(sentence_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sentence_id: sentence_id.into(),
            sentence_type: SentenceType::Middle,
            content_type: ContentType::Text,
            text: Some(text.into()),
            file: None,
        }
    }

    /// Audio file inside a bracket.
    pub fn file(sentence_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            sentence_id: sentence_id.into(),
            sentence_type: SentenceType::Middle,
            content_type: ContentType::File,
            text: None,
            file: Some(path.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_expected_shapes() {
        let first = SentenceUnit::first("s1");
        assert_eq!(first.sentence_type, SentenceType::First);
        assert_eq!(first.content_type, ContentType::Action);

        let text = SentenceUnit::text("s1", "hello");
        assert_eq!(text.sentence_type, SentenceType::Middle);
        assert_eq!(text.text.as_deref(), Some("hello"));

        let file = SentenceUnit::file("s1", "/tmp/jazz.opus");
        assert_eq!(file.content_type, ContentType::File);
        assert!(file.file.is_some());
    }
}
