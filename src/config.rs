//! # Configuration Management
//!
//! This module loads the relay's settings from several layered sources:
//! - Default values (built into the code)
//! - An optional `config.toml` next to the binary
//! - Environment variables (`APP__SECTION__KEY`)
//! - A few well-known variables used by deployment platforms
//!   (`HOST`, `PORT`, `DEEPGRAM_API_KEY`, `GEMINI_API_KEY`)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: the same structs are serialized into the defaults layer and
//!   deserialized back out of the merged result
//! - **Sections**: plain structs with public fields, one per component, so
//!   each component is handed only the section it reads
//! - **Result<T, E>**: loading and validation both return `anyhow::Result`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special environment variables (`PORT`, `DEEPGRAM_API_KEY`, ...)
//! 2. Prefixed environment variables (`APP__POOL__CAPACITY=20`)
//! 3. Configuration file (`config.toml`)
//! 4. Default values (the `Default` impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1);
const MAX_KEEPALIVE_INTERVAL_SECS: f64 = 3600.0;

/// Placeholder shown instead of secrets in introspection output.
pub const REDACTED: &str = "***";

/// Main application configuration.
///
/// ## Sections:
/// - `server`: HTTP listener
/// - `backend`: streaming recognition service
/// - `pool`: backend connection reuse and keepalive
/// - `relay`: per-session buffering
/// - `clinical`: generative-language service behind the clinical endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub pool: PoolConfig,
    pub relay: RelayConfig,
    pub clinical: ClinicalConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only accept local connections (development)
/// - `host = "0.0.0.0"`: accept connections from any address (containers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Streaming recognition backend (Deepgram live API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// WebSocket base URL; `/v1/listen` is appended per connection
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Language for the plain profile; the diarized profile lets the backend detect it
    pub language: String,
}

/// Connection pool and keepalive tuning.
///
/// ## Trade-offs:
/// - Larger `capacity`: more warm connections for bursts of clients, more
///   upstream sockets held open while idle
/// - Shorter `idle_timeout_secs`: fewer stale sockets, more cold starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub capacity: usize,
    pub idle_timeout_secs: u64,
    pub keepalive_interval_secs: f64,
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Never shorter than `MIN_KEEPALIVE_INTERVAL`; out-of-range values fall
    /// back to the default of one second.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.keepalive_interval_secs)
            .unwrap_or(Duration::from_secs(1))
            .max(MIN_KEEPALIVE_INTERVAL)
    }
}

/// Per-session buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Undelivered client payloads kept for retry
    pub delivery_buffer_capacity: usize,
    /// Backend events queued between the socket task and the relay
    pub event_channel_capacity: usize,
    /// Audio frames queued between the relay and the socket task
    pub outbound_queue_capacity: usize,
    /// How often the relay pings the client
    pub heartbeat_interval_ms: u64,
    /// A client silent for this long is disconnected
    pub client_timeout_ms: u64,
}

impl RelayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

/// Generative-language service used by the clinical endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Inputs of this many characters or more are rejected
    pub max_input_chars: usize,
    /// At least one must appear (case-insensitively) in an accepted input
    pub keywords: Vec<String>,
    pub medical_prompt: String,
    pub soap_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
}

impl ClinicalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

const DEFAULT_MEDICAL_PROMPT: &str = "You are a clinical documentation assistant. \
Extract the structured medical information from the conversation: chief complaint, \
symptoms, vital signs, medications, allergies, diagnoses and the treatment plan. \
Answer with JSON only and leave out fields that are not mentioned.";

const DEFAULT_SOAP_PROMPT: &str = "You are a clinical documentation assistant. \
Write a SOAP note (Subjective, Objective, Assessment, Plan) from the visit \
transcript and the clinician's handwritten notes. Do not invent findings that \
are not supported by either source.";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            backend: BackendConfig {
                base_url: "wss://api.deepgram.com".to_string(),
                api_key: String::new(),
                model: "nova-3".to_string(),
                language: "en-US".to_string(),
            },
            pool: PoolConfig {
                capacity: 15,
                idle_timeout_secs: 300,
                keepalive_interval_secs: 1.0,
            },
            relay: RelayConfig {
                delivery_buffer_capacity: 5,
                event_channel_capacity: 64,
                outbound_queue_capacity: 256,
                heartbeat_interval_ms: 30_000,
                client_timeout_ms: 60_000,
            },
            clinical: ClinicalConfig {
                base_url: "https://generativelanguage.googleapis.com".to_string(),
                api_key: String::new(),
                model: "gemini-2.0-flash-001".to_string(),
                max_input_chars: 10_000,
                keywords: [
                    "patient",
                    "symptoms",
                    "diagnosis",
                    "treatment",
                    "prescription",
                    "doctor",
                    "assessment",
                    "blood pressure",
                ]
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
                medical_prompt: DEFAULT_MEDICAL_PROMPT.to_string(),
                soap_prompt: DEFAULT_SOAP_PROMPT.to_string(),
                temperature: 0.4,
                top_p: 1.0,
                top_k: 32,
                max_output_tokens: 8192,
                request_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`: override the listener port
    /// - `APP__POOL__IDLE_TIMEOUT_SECS=120`: shorter idle window
    /// - `DEEPGRAM_API_KEY=...`: backend credential
    /// - `GEMINI_API_KEY=...`: clinical service credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("DEEPGRAM_API_KEY", "backend.api_key"),
            ("GEMINI_API_KEY", "clinical.api_key"),
        ];
        for (variable, key) in overrides {
            if let Ok(value) = env::var(variable) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the values make sense before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.backend.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Backend model cannot be empty"));
        }

        if self.pool.capacity == 0 {
            return Err(anyhow::anyhow!("Pool capacity must be greater than 0"));
        }

        if self.pool.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Pool idle timeout must be greater than 0"));
        }

        let keepalive = self.pool.keepalive_interval_secs;
        if !(MIN_KEEPALIVE_INTERVAL.as_secs_f64()..=MAX_KEEPALIVE_INTERVAL_SECS).contains(&keepalive) {
            return Err(anyhow::anyhow!(
                "Keepalive interval must be between {} and {} seconds",
                MIN_KEEPALIVE_INTERVAL.as_secs_f64(),
                MAX_KEEPALIVE_INTERVAL_SECS
            ));
        }

        if self.relay.delivery_buffer_capacity == 0 {
            return Err(anyhow::anyhow!("Delivery buffer capacity must be greater than 0"));
        }

        if self.relay.event_channel_capacity == 0 || self.relay.outbound_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Relay channel capacities must be greater than 0"));
        }

        if self.relay.heartbeat_interval_ms == 0 || self.relay.client_timeout_ms <= self.relay.heartbeat_interval_ms {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        if self.clinical.max_input_chars == 0 {
            return Err(anyhow::anyhow!("Clinical max input length must be greater than 0"));
        }

        Ok(())
    }

    /// Secrets are only required by a running server, not by tests or tooling.
    pub fn require_credentials(&self) -> Result<()> {
        if self.backend.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("DEEPGRAM_API_KEY is not set"));
        }
        if self.clinical.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("GEMINI_API_KEY is not set"));
        }
        Ok(())
    }

    /// Copy safe to expose over HTTP.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for secret in [&mut config.backend.api_key, &mut config.clinical.api_key] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
        config
    }
}
