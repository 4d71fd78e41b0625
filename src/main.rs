//! # Transcription Relay
//!
//! Relays live PCM audio from browser clients to a streaming speech-recognition
//! backend and streams transcripts back, with optional speaker diarization.
//! Also exposes two clinical documentation endpoints backed by a
//! generative-language service.
//!
//! ## Architecture Overview:
//! - **backend**: WebSocket client for the recognition service
//! - **relay**: connection pool, per-session state, aggregation and delivery
//! - **websocket**: the per-client actor and the two streaming endpoints
//! - **clinical**: validator and generative client for the clinical endpoints
//! - **handlers / health**: plain HTTP endpoints
//!
//! ## Startup Order:
//! 1. Load `.env`, initialize tracing
//! 2. Load and validate configuration; refuse to start without credentials
//! 3. Build the backend connector, the connection pool (with its sweeper) and
//!    the clinical client
//! 4. Serve until SIGINT/SIGTERM, then drain the pool

mod backend;
mod clinical;
mod config;
mod error;
mod handlers;
mod health;
mod relay;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use backend::DeepgramConnector;
use clinical::GeminiClient;
use config::AppConfig;
use relay::ConnectionPool;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;
    config.require_credentials()?;

    info!("Starting transcription-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let connector = DeepgramConnector::new(&config.backend, config.relay.outbound_queue_capacity)?;
    let pool = ConnectionPool::new(Arc::new(connector), config.pool.capacity, config.pool.idle_timeout());
    pool.spawn_sweeper();
    info!(
        capacity = config.pool.capacity,
        idle_timeout_secs = config.pool.idle_timeout_secs,
        "Backend connection pool ready"
    );

    let clinical = GeminiClient::new(&config.clinical)?;
    let app_state = AppState::new(config.clone(), pool.clone(), Arc::new(clinical));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .route("/ws/transcribe", web::get().to(websocket::transcribe))
            .route("/transcribe-diarize", web::get().to(websocket::transcribe_diarize))
            .route("/extract-medical-data", web::post().to(handlers::extract_medical_data))
            .route("/create-soap-note", web::post().to(handlers::create_soap_note))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    pool.drain().await;
    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transcription_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
