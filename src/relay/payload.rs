//! Wire-level messages sent to the browser client.

use serde::{Serialize, Serializer};

/// One message delivered to the client. Order within a session is preserved.
///
/// Plain-mode messages carry a `type` tag; diarized phrases are sent bare:
/// ```json
/// {"type": "transcript", "data": "patient reports headache", "is_final": true}
/// {"speaker": "speaker_0", "text": "[00:00] ok doctor", "is_final": false, "timestamp": 1700000000.5}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Plain-mode transcript
    Transcript {
        #[serde(rename = "data")]
        text: String,
        is_final: bool,
    },

    /// Upstream or relay error surfaced to the client
    Error {
        #[serde(rename = "data")]
        message: String,
    },

    /// Diarized-mode phrase for one speaker
    #[serde(untagged)]
    SpeakerTranscript {
        #[serde(rename = "speaker", serialize_with = "speaker_label")]
        speaker_id: u32,
        text: String,
        is_final: bool,
        /// Unix time (seconds) the phrase was emitted
        timestamp: f64,
    },
}

fn speaker_label<S: Serializer>(speaker_id: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("speaker_{}", speaker_id))
}

impl Payload {
    /// JSON text frame for this payload.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
