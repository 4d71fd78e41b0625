//! Clinical documentation endpoints.
//!
//! Both endpoints screen the transcript with the keyword/length validator
//! before calling the generative service. Upstream failures are logged in full
//! and reported to the client with a generic message only.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

const INVALID_CONTENT: &str = "Invalid medical content";

#[derive(Debug, Deserialize)]
pub struct TranscriptionInput {
    pub transcription: String,
}

#[derive(Debug, Deserialize)]
pub struct SoapNoteInput {
    #[serde(default)]
    pub transcription: String,
    #[serde(default)]
    pub handwritten_notes: String,
}

/// `POST /extract-medical-data`
pub async fn extract_medical_data(
    state: web::Data<AppState>,
    body: web::Json<TranscriptionInput>,
) -> Result<HttpResponse, AppError> {
    if !state.validator.is_valid(&body.transcription) {
        return Err(AppError::ValidationError(INVALID_CONTENT.to_string()));
    }

    let data = state
        .clinical
        .extract_medical_data(&body.transcription)
        .await
        .map_err(|err| {
            error!("Extraction failed: {}", err);
            AppError::Internal("Medical data extraction failed".to_string())
        })?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "data": data
    })))
}

/// `POST /create-soap-note`
pub async fn create_soap_note(
    state: web::Data<AppState>,
    body: web::Json<SoapNoteInput>,
) -> Result<HttpResponse, AppError> {
    if body.transcription.is_empty() || body.handwritten_notes.is_empty() {
        return Err(AppError::BadRequest(
            "Both transcription and handwritten notes are required".to_string(),
        ));
    }

    if !state.validator.is_valid(&body.transcription) {
        return Err(AppError::ValidationError(INVALID_CONTENT.to_string()));
    }

    let soap_note = state
        .clinical
        .create_soap_note(&body.transcription, &body.handwritten_notes)
        .await
        .map_err(|err| {
            error!("SOAP note creation error: {}", err);
            AppError::Internal("Failed to create SOAP note".to_string())
        })?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "soap_note": soap_note
    })))
}
