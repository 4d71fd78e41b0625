//! # Backend Events
//!
//! Decodes the JSON messages emitted by the live recognition endpoint into
//! typed events the relay can route.
//!
//! ## Message Format (backend → server):
//! ```json
//! {"type": "Results", "is_final": true,
//!  "channel": {"alternatives": [{"transcript": "ok doctor",
//!     "words": [{"word": "ok", "start": 0.1, "end": 0.3, "speaker": 0}]}]}}
//! ```
//! Errors arrive as `{"type": "Error", "description": "..."}`. Metadata, speech
//! start and utterance-end notifications carry nothing the relay renders and are
//! skipped.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A single recognized word. Never mutated once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    /// Offset from the start of the stream, in seconds
    pub start: f64,
    pub end: f64,
    /// Speaker label; 0 when the backend did not diarize
    pub speaker: u32,
}

impl Word {
    pub fn new(text: impl Into<String>, start: f64, end: f64, speaker: u32) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            speaker,
        }
    }
}

/// One recognition result for the current utterance window.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveResult {
    pub is_final: bool,
    pub transcript: String,
    pub words: Vec<Word>,
}

impl LiveResult {
    /// Group the words by speaker, preserving word order within each speaker.
    pub fn words_by_speaker(&self) -> BTreeMap<u32, Vec<Word>> {
        let mut grouped: BTreeMap<u32, Vec<Word>> = BTreeMap::new();
        for word in &self.words {
            grouped.entry(word.speaker).or_default().push(word.clone());
        }
        grouped
    }
}

/// Events published by a backend connection.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A partial or final recognition result
    Transcript(LiveResult),
    /// The backend reported an error; the session may continue
    Error(String),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    channel: Option<RawChannel>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(default)]
    alternatives: Vec<RawAlternative>,
}

#[derive(Debug, Deserialize)]
struct RawAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    words: Vec<RawWord>,
}

#[derive(Debug, Deserialize)]
struct RawWord {
    word: String,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    speaker: Option<u32>,
}

/// Decode one text frame from the backend.
///
/// Returns `None` for messages the relay does not render and for frames that
/// fail to decode (logged, never fatal).
pub fn parse_message(text: &str) -> Option<BackendEvent> {
    let raw: RawMessage = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("Undecodable backend message: {}", err);
            return None;
        }
    };

    match raw.kind.as_str() {
        "Results" => {
            let alternative = raw.channel?.alternatives.into_iter().next()?;
            let words = alternative
                .words
                .into_iter()
                .map(|w| Word::new(w.word, w.start, w.end, w.speaker.unwrap_or(0)))
                .collect();

            Some(BackendEvent::Transcript(LiveResult {
                is_final: raw.is_final,
                transcript: alternative.transcript,
                words,
            }))
        }
        "Error" => {
            let message = raw
                .description
                .or(raw.message)
                .unwrap_or_else(|| "backend reported an unspecified error".to_string());
            Some(BackendEvent::Error(message))
        }
        other => {
            debug!("Skipping backend message of type {:?}", other);
            None
        }
    }
}
