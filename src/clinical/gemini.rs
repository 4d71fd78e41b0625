//! Gemini `generateContent` client for the clinical endpoints.

use crate::clinical::{ClinicalError, ClinicalGenerator};
use crate::config::ClinicalConfig;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info};

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

#[derive(Debug, Clone, PartialEq)]
struct GenerationSettings {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    medical_prompt: String,
    soap_prompt: String,
    settings: GenerationSettings,
}

impl GeminiClient {
    pub fn new(config: &ClinicalConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
            medical_prompt: config.medical_prompt.clone(),
            soap_prompt: config.soap_prompt.clone(),
            settings: GenerationSettings {
                temperature: config.temperature,
                top_p: config.top_p,
                top_k: config.top_k,
                max_output_tokens: config.max_output_tokens,
            },
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, system_prompt: &str, parts: &[String]) -> Value {
        let parts: Vec<Value> = parts.iter().map(|text| json!({ "text": text })).collect();
        let safety: Vec<Value> = SAFETY_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": SAFETY_THRESHOLD }))
            .collect();

        json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "temperature": self.settings.temperature,
                "topP": self.settings.top_p,
                "topK": self.settings.top_k,
                "maxOutputTokens": self.settings.max_output_tokens,
            },
            "safetySettings": safety,
        })
    }

    async fn generate(&self, system_prompt: &str, parts: Vec<String>) -> Result<String, ClinicalError> {
        let body = self.request_body(system_prompt, &parts);

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClinicalError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response.json().await?;
        response_text(&value)
    }
}

/// Concatenated text of the first candidate.
fn response_text(value: &Value) -> Result<String, ClinicalError> {
    let text: String = value["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text);
    }

    match value["promptFeedback"]["blockReason"].as_str() {
        Some(reason) => Err(ClinicalError::Blocked(reason.to_string())),
        None => Err(ClinicalError::EmptyResponse),
    }
}

impl ClinicalGenerator for GeminiClient {
    fn extract_medical_data<'a>(&'a self, transcription: &'a str) -> BoxFuture<'a, Result<String, ClinicalError>> {
        Box::pin(async move {
            info!(chars = transcription.len(), "Extracting medical data");
            let parts = vec![format!("Conversation:\n{}", transcription)];
            let data = self.generate(&self.medical_prompt, parts).await?;
            debug!(chars = data.len(), "Medical data extracted");
            Ok(data)
        })
    }

    fn create_soap_note<'a>(
        &'a self,
        transcription: &'a str,
        handwritten_notes: &'a str,
    ) -> BoxFuture<'a, Result<String, ClinicalError>> {
        Box::pin(async move {
            info!(chars = transcription.len(), "Creating SOAP note");
            let parts = vec![
                format!("Generate a detailed SOAP note for the following text:\n\n{}", transcription),
                handwritten_notes.to_string(),
            ];
            self.generate(&self.soap_prompt, parts).await
        })
    }
}
