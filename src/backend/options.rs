//! # Live Session Options
//!
//! Options sent to the backend when a session starts. Audio is fixed to
//! 16-bit little-endian PCM, 16kHz, mono; only the recognition features differ
//! between the plain and diarized profiles.

use serde::Serialize;

/// Encoding name the backend expects for raw 16-bit PCM.
pub const PCM_ENCODING: &str = "linear16";

/// Sample rate of every audio frame relayed upstream.
pub const PCM_SAMPLE_RATE: u32 = 16_000;

/// Channel count of every audio frame relayed upstream.
pub const PCM_CHANNELS: u8 = 1;

/// Options for one live recognition session.
///
/// Two sessions started with equal options are interchangeable, which is what
/// lets the pool hand a warm connection to a new client without reconnecting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveOptions {
    pub model: String,
    pub language: Option<String>,
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub smart_format: bool,
    pub interim_results: bool,
    pub diarize: bool,
    pub endpointing: bool,
    pub punctuate: bool,
    pub vad_events: bool,
}

impl LiveOptions {
    /// Options for plain transcription: final results only, no speaker labels.
    pub fn plain(model: &str, language: &str) -> Self {
        Self {
            model: model.to_string(),
            language: Some(language.to_string()).filter(|l| !l.is_empty()),
            encoding: PCM_ENCODING.to_string(),
            sample_rate: PCM_SAMPLE_RATE,
            channels: PCM_CHANNELS,
            smart_format: true,
            interim_results: false,
            diarize: false,
            endpointing: false,
            punctuate: false,
            vad_events: false,
        }
    }

    /// Options for diarized transcription.
    ///
    /// Interim results are requested so the aggregator can keep each speaker's
    /// phrase updating while the utterance is still in progress.
    pub fn diarized(model: &str) -> Self {
        Self {
            model: model.to_string(),
            language: None,
            encoding: PCM_ENCODING.to_string(),
            sample_rate: PCM_SAMPLE_RATE,
            channels: PCM_CHANNELS,
            smart_format: true,
            interim_results: true,
            diarize: true,
            endpointing: true,
            punctuate: true,
            vad_events: true,
        }
    }

    /// Query parameters understood by the live listen endpoint.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("model", self.model.clone()),
            ("encoding", self.encoding.clone()),
            ("sample_rate", self.sample_rate.to_string()),
            ("channels", self.channels.to_string()),
            ("smart_format", self.smart_format.to_string()),
            ("interim_results", self.interim_results.to_string()),
        ];

        if let Some(language) = &self.language {
            pairs.push(("language", language.clone()));
        }
        if self.diarize {
            pairs.push(("diarize", "true".to_string()));
        }
        if self.endpointing {
            pairs.push(("endpointing", "true".to_string()));
        }
        if self.punctuate {
            pairs.push(("punctuate", "true".to_string()));
        }
        if self.vad_events {
            pairs.push(("vad_events", "true".to_string()));
        }

        pairs
    }
}
