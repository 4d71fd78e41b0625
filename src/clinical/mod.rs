//! # Clinical Text Services
//!
//! Single-shot calls to a generative-language service that turn a finished
//! transcript into structured medical data or a SOAP note. Nothing here is
//! stateful or shared with the streaming relay.
//!
//! ## Key Components:
//! - **validation**: keyword and length screening applied before any request
//! - **gemini**: `GeminiClient`, the production `ClinicalGenerator`

pub mod gemini;
pub mod validation;

pub use gemini::GeminiClient;
pub use validation::MedicalInputValidator;

use futures_util::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClinicalError {
    #[error("request to generative service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generative service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("generative service blocked the prompt: {0}")]
    Blocked(String),

    #[error("generative service returned no text")]
    EmptyResponse,
}

/// Seam between the HTTP handlers and the generative service.
pub trait ClinicalGenerator: Send + Sync {
    fn extract_medical_data<'a>(&'a self, transcription: &'a str) -> BoxFuture<'a, Result<String, ClinicalError>>;

    fn create_soap_note<'a>(
        &'a self,
        transcription: &'a str,
        handwritten_notes: &'a str,
    ) -> BoxFuture<'a, Result<String, ClinicalError>>;
}
