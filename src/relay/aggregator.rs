//! # Diarized Transcript Aggregation
//!
//! The backend sends overlapping, cumulative snapshots of each speaker's words
//! for the current utterance window. Concatenating them would repeat words on
//! every tick, so the aggregator keeps exactly one phrase per speaker and
//! replaces it wholesale on each update.
//!
//! ## Algorithm (per event):
//! 1. Interim event → a new window begins: forget every phrase
//! 2. Replace the phrase of each speaker present in the event
//! 3. Emit one payload per speaker with a non-empty phrase, including speakers
//!    not updated this tick so their last phrase stays visible
//! 4. Final event → forget every phrase after emitting

use crate::backend::events::Word;
use crate::relay::payload::Payload;
use std::collections::BTreeMap;

/// Current phrase of each speaker in the open utterance window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeakerPhrases {
    phrases: BTreeMap<u32, Vec<Word>>,
}

impl SpeakerPhrases {
    pub fn clear(&mut self) {
        self.phrases.clear();
    }

    /// Replace (never extend) the phrase of `speaker`.
    pub fn replace(&mut self, speaker: u32, words: Vec<Word>) {
        self.phrases.insert(speaker, words);
    }

    pub fn get(&self, speaker: u32) -> Option<&[Word]> {
        self.phrases.get(&speaker).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[Word])> {
        self.phrases.iter().map(|(speaker, words)| (*speaker, words.as_slice()))
    }
}

/// Per-session state machine folding diarized results into display phrases.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    phrases: SpeakerPhrases,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phrases(&self) -> &SpeakerPhrases {
        &self.phrases
    }

    /// Fold one backend result into the current window and return the payloads
    /// to send, ordered by speaker id.
    pub fn fold(
        &mut self,
        is_final: bool,
        words_by_speaker: BTreeMap<u32, Vec<Word>>,
        timestamp: f64,
    ) -> Vec<Payload> {
        if !is_final {
            self.phrases.clear();
        }

        for (speaker, words) in words_by_speaker {
            self.phrases.replace(speaker, words);
        }

        let payloads = self
            .phrases
            .iter()
            .filter_map(|(speaker, words)| {
                format_phrase(words).map(|text| Payload::SpeakerTranscript {
                    speaker_id: speaker,
                    text,
                    is_final,
                    timestamp,
                })
            })
            .collect();

        if is_final {
            self.phrases.clear();
        }

        payloads
    }
}

/// Render `[mm:ss] w1 w2 …` using the first word's start offset.
pub fn format_phrase(words: &[Word]) -> Option<String> {
    let first = words.first()?;
    let offset = first.start.max(0.0) as u64;
    let (minutes, seconds) = (offset / 60, offset % 60);

    let text = words
        .iter()
        .map(|word| word.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    Some(format!("[{:02}:{:02}] {}", minutes, seconds, text))
}
