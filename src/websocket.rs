//! # WebSocket Session Relay
//!
//! One `SessionRelay` actor per connected client. It owns the client socket
//! (through its `WebsocketContext`) and, while active, one backend connection
//! acquired from the pool.
//!
//! ## Endpoints:
//! - `GET /ws/transcribe`: plain profile, final transcripts only
//! - `GET /transcribe-diarize`: diarized profile, per-speaker phrases
//!
//! ## Lifecycle:
//! ```text
//! Connecting --acquire + start--> Active --disconnect / send failure--> Closing --> Closed
//! ```
//! - **Connecting**: `ctx.wait` holds back client frames until the backend
//!   connection is started, so no audio is forwarded to an unstarted session
//! - **Active**: binary frames go to the backend; backend events arrive as a
//!   second actor stream and are processed on this actor's context, in order
//! - **Closing**: keepalive cancelled, events unsubscribed
//! - **Closed**: the connection goes back to the pool, or is terminated if the
//!   session ended on a backend transmission failure
//!
//! ## Heartbeat:
//! The relay pings the client every `heartbeat_interval_ms`. Binary, ping and
//! pong frames count as signs of life; a client silent for `client_timeout_ms`
//! is disconnected so its backend connection goes back to the pool.
//!
//! ## Client Messages:
//! Outbound messages are the JSON payloads defined in `relay::payload`. A backend
//! transmission failure closes the socket with code 1011.

use crate::backend::BackendEvent;
use crate::relay::{DeliveryError, FrameOutcome, KeepaliveMonitor, Payload, PayloadSink, SessionMode, SessionState};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Connecting,
    Active,
    Closing,
    Closed,
}

pub struct SessionRelay {
    id: Uuid,
    mode: SessionMode,
    app: web::Data<AppState>,
    phase: RelayPhase,
    session: Option<SessionState>,
    keepalive: Option<KeepaliveMonitor>,
    last_heartbeat: Instant,
    /// Set when the backend rejected audio; the connection must not be reused
    aborted: bool,
}

impl SessionRelay {
    pub fn new(mode: SessionMode, app: web::Data<AppState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            app,
            phase: RelayPhase::Connecting,
            session: None,
            keepalive: None,
            last_heartbeat: Instant::now(),
            aborted: false,
        }
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.app.config.relay.client_timeout();

        ctx.run_interval(self.app.config.relay.heartbeat_interval(), move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(session_id = %act.id, "Client heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn connect(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let pool = self.app.pool.clone();
        let options = self.mode.live_options(&self.app.config.backend);

        let fut = async move {
            let mut connection = pool.acquire().await;
            connection.start(options).await.map(|()| connection)
        };

        ctx.wait(fut.into_actor(self).map(|result, act, ctx| match result {
            Ok(connection) => {
                let relay = &act.app.config.relay;
                let events = connection.subscribe(relay.event_channel_capacity);
                ctx.add_stream(ReceiverStream::new(events));

                act.keepalive = connection
                    .probe_handle()
                    .map(|probe| KeepaliveMonitor::spawn(probe, act.app.config.pool.keepalive_interval(), act.id));
                act.session = Some(SessionState::new(
                    act.id,
                    act.mode,
                    connection,
                    relay.delivery_buffer_capacity,
                ));
                act.phase = RelayPhase::Active;
                act.app.session_opened();
                info!(session_id = %act.id, mode = act.mode.name(), "Session active");
            }
            Err(err) => {
                error!(session_id = %act.id, "Failed to start backend session: {}", err);
                let payload = Payload::Error {
                    message: err.to_string(),
                };
                if let Ok(message) = payload.encode() {
                    ctx.text(message);
                }
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some("backend unavailable".to_string()),
                }));
                ctx.stop();
            }
        }));
    }

    fn handle_audio(&mut self, frame: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(session) = self.session.as_ref() else {
            debug!(session_id = %self.id, "Ignoring audio outside the active phase");
            return;
        };

        match session.forward_audio(frame) {
            Ok(FrameOutcome::Forwarded) => self.app.record_frame(true),
            Ok(FrameOutcome::Dropped) => self.app.record_frame(false),
            Err(err) => {
                error!(session_id = %self.id, "Transmission error: {}", err);
                self.aborted = true;
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Error,
                    description: Some("backend transmission error".to_string()),
                }));
                ctx.stop();
            }
        }
    }
}

/// Client side of the delivery buffer.
///
/// The context's write buffer is unbounded, so a write only fails once the
/// actor is shutting down. A slow but connected client is never throttled here.
struct ContextSink<'a>(&'a mut ws::WebsocketContext<SessionRelay>);

impl PayloadSink for ContextSink<'_> {
    fn deliver(&mut self, message: &str) -> Result<(), DeliveryError> {
        if !self.0.state().alive() {
            return Err(DeliveryError::Closed);
        }
        self.0.text(message.to_owned());
        Ok(())
    }
}

fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Actor for SessionRelay {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!(session_id = %self.id, mode = self.mode.name(), "Client connected");
        self.heartbeat(ctx);
        self.connect(ctx);
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        self.phase = RelayPhase::Closing;
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.cancel();
        }
        if let Some(session) = &self.session {
            session.connection().unsubscribe();
        }
        Running::Stop
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.phase = RelayPhase::Closed;

        let Some(session) = self.session.take() else {
            return;
        };
        self.app.session_closed(self.aborted);

        let connection = session.into_connection();
        if self.aborted {
            drop(connection);
            info!(session_id = %self.id, "Session aborted, backend connection terminated");
        } else {
            let pool = self.app.pool.clone();
            tokio::spawn(async move {
                pool.release(connection).await;
            });
            info!(session_id = %self.id, "Session closed");
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionRelay {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.handle_audio(data.to_vec(), ctx);
            }
            Ok(ws::Message::Text(_)) => {
                warn!(session_id = %self.id, "Ignoring text frame from client");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.id, "Client disconnected: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<BackendEvent> for SessionRelay {
    fn handle(&mut self, event: BackendEvent, ctx: &mut Self::Context) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let mut sink = ContextSink(ctx);
        let report = session.handle_event(event, &mut sink, unix_timestamp());
        self.app.record_payloads_dropped(report.dropped);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The client socket decides when the session ends.
        debug!(session_id = %self.id, "Backend event stream ended");
    }
}

fn start_relay(
    mode: SessionMode,
    req: HttpRequest,
    stream: web::Payload,
    app: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        mode = mode.name(),
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(SessionRelay::new(mode, app), &req, stream)
}

pub async fn transcribe(
    req: HttpRequest,
    stream: web::Payload,
    app: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    start_relay(SessionMode::Plain, req, stream, app)
}

pub async fn transcribe_diarize(
    req: HttpRequest,
    stream: web::Payload,
    app: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    start_relay(SessionMode::Diarized, req, stream, app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::events::{LiveResult, Word};
    use crate::config::AppConfig;
    use crate::relay::ConnectionPool;
    use crate::state::tests::{test_state, test_state_with};
    use actix_codec::{Decoder, Encoder};
    use actix_http::ws::Codec;
    use actix_web::error::PayloadError;
    use actix_web::web::{Bytes, BytesMut};
    use actix_web::{http::StatusCode, test as actix_test, App};
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    /// Client end of a relay actor, speaking masked WebSocket frames.
    struct TestClient {
        input: Option<mpsc::UnboundedSender<Result<Bytes, PayloadError>>>,
        output: mpsc::UnboundedReceiver<Bytes>,
        codec: Codec,
        buffer: BytesMut,
    }

    impl TestClient {
        fn connect(mode: SessionMode, state: AppState) -> Self {
            let (input, client_frames) = mpsc::unbounded_channel();
            let (server_frames, output) = mpsc::unbounded_channel();

            let relay = SessionRelay::new(mode, web::Data::new(state));
            let mut stream = Box::pin(ws::WebsocketContext::create(
                relay,
                UnboundedReceiverStream::new(client_frames),
            ));
            actix_web::rt::spawn(async move {
                while let Some(Ok(bytes)) = stream.next().await {
                    if server_frames.send(bytes).is_err() {
                        break;
                    }
                }
            });

            Self {
                input: Some(input),
                output,
                codec: Codec::new().client_mode(),
                buffer: BytesMut::new(),
            }
        }

        fn send(&mut self, message: ws::Message) {
            let mut frame = BytesMut::new();
            self.codec.encode(message, &mut frame).unwrap();
            if let Some(input) = &self.input {
                let _ = input.send(Ok(frame.freeze()));
            }
        }

        fn send_audio(&mut self, frame: Vec<u8>) {
            self.send(ws::Message::Binary(Bytes::from(frame)));
        }

        /// Drop the connection without a close frame.
        fn hang_up(&mut self) {
            self.input.take();
        }

        /// Next frame from the relay, or `None` once the relay has stopped.
        async fn next_frame(&mut self) -> Option<ws::Frame> {
            loop {
                if let Some(frame) = self.codec.decode(&mut self.buffer).unwrap() {
                    return Some(frame);
                }
                match tokio::time::timeout(Duration::from_secs(2), self.output.recv()).await {
                    Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                    _ => return None,
                }
            }
        }

        async fn next_json(&mut self) -> Value {
            loop {
                match self.next_frame().await {
                    Some(ws::Frame::Text(text)) => return serde_json::from_slice(&text).unwrap(),
                    Some(ws::Frame::Ping(_)) => continue,
                    other => panic!("expected a text frame, got {:?}", other),
                }
            }
        }

        async fn expect_close(&mut self) -> Option<ws::CloseReason> {
            loop {
                match self.next_frame().await {
                    Some(ws::Frame::Close(reason)) => return reason,
                    Some(ws::Frame::Ping(_)) => continue,
                    other => panic!("expected a close frame, got {:?}", other),
                }
            }
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn wait_for_idle(pool: &ConnectionPool, idle: usize) -> bool {
        for _ in 0..200 {
            if pool.stats().await.idle == idle {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn final_transcript(text: &str) -> BackendEvent {
        BackendEvent::Transcript(LiveResult {
            is_final: true,
            transcript: text.to_string(),
            words: vec![],
        })
    }

    #[test]
    fn test_new_relay_starts_connecting() {
        let (state, _) = test_state(false);
        let relay = SessionRelay::new(SessionMode::Diarized, web::Data::new(state));

        assert_eq!(relay.phase(), RelayPhase::Connecting);
        assert!(relay.session.is_none());
        assert!(!relay.aborted);
    }

    #[test]
    fn test_unix_timestamp_is_seconds() {
        let now = unix_timestamp();
        assert!(now > 1_600_000_000.0);
        assert!(now < 10_000_000_000.0);
    }

    #[actix_web::test]
    async fn test_plain_request_without_upgrade_is_rejected() {
        let (state, connector) = test_state(false);
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/ws/transcribe", web::get().to(transcribe)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/ws/transcribe").to_request();
        let response = actix_test::call_service(&app, req).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(connector.connection_count(), 0);
    }

    #[actix_web::test]
    async fn test_plain_session_relays_transcript_and_returns_connection() {
        let (state, connector) = test_state(false);
        let mut client = TestClient::connect(SessionMode::Plain, state.clone());

        client.send_audio(vec![7u8; 2048]);
        client.send_audio(vec![7u8; 100]);
        assert!(eventually(|| connector.connection_count() == 1 && connector.link(0).audio_frames().contains(&vec![7u8; 2048])).await);

        let link = connector.link(0);
        assert!(!link.options().diarize);
        assert!(link.publish(final_transcript("patient reports headache")).await);
        assert_eq!(
            client.next_json().await,
            json!({"type": "transcript", "data": "patient reports headache", "is_final": true})
        );

        client.send(ws::Message::Close(None));
        client.expect_close().await;

        assert!(wait_for_idle(&state.pool, 1).await);
        assert!(!link.was_terminated());
        assert!(!link.publish(final_transcript("after close")).await);

        let metrics = state.metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.sessions_total, 1);
        assert_eq!(metrics.frames_forwarded, 1);
        assert_eq!(metrics.frames_dropped, 1);
    }

    #[actix_web::test]
    async fn test_diarized_session_relays_speaker_phrases() {
        let (state, connector) = test_state(false);
        let mut client = TestClient::connect(SessionMode::Diarized, state.clone());

        client.send_audio(vec![7u8; 100]);
        assert!(eventually(|| connector.connection_count() == 1 && !connector.link(0).audio_frames().is_empty()).await);

        let link = connector.link(0);
        assert!(link.options().diarize);
        let interim = LiveResult {
            is_final: false,
            transcript: "ok doctor".to_string(),
            words: vec![Word::new("ok", 0.1, 0.3, 0), Word::new("doctor", 0.4, 0.8, 0)],
        };
        assert!(link.publish(BackendEvent::Transcript(interim)).await);

        let message = client.next_json().await;
        assert_eq!(message["speaker"], "speaker_0");
        assert_eq!(message["text"], "[00:00] ok doctor");
        assert_eq!(message["is_final"], false);
        assert!(message["timestamp"].as_f64().unwrap() > 0.0);

        client.hang_up();
        assert!(wait_for_idle(&state.pool, 1).await);
    }

    #[actix_web::test]
    async fn test_backend_send_failure_closes_with_error_code() {
        let (state, connector) = test_state(false);
        let mut client = TestClient::connect(SessionMode::Plain, state.clone());

        client.send_audio(vec![7u8; 2048]);
        assert!(eventually(|| connector.connection_count() == 1 && !connector.link(0).audio_frames().is_empty()).await);

        connector.link(0).kill();
        client.send_audio(vec![7u8; 2048]);

        let reason = client.expect_close().await.unwrap();
        assert_eq!(reason.code, ws::CloseCode::Error);
        assert!(client.next_frame().await.is_none());

        assert!(eventually(|| state.metrics_snapshot().sessions_aborted == 1).await);
        assert_eq!(state.pool.stats().await.idle, 0);
        assert_eq!(state.metrics_snapshot().active_sessions, 0);
    }

    #[actix_web::test]
    async fn test_connect_failure_reports_error_then_closes() {
        let (state, connector) = test_state(false);
        connector.refuse_connections();
        let mut client = TestClient::connect(SessionMode::Plain, state.clone());

        let message = client.next_json().await;
        assert_eq!(message["type"], "error");
        assert!(message["data"].is_string());

        let reason = client.expect_close().await.unwrap();
        assert_eq!(reason.code, ws::CloseCode::Error);
        assert_eq!(state.metrics_snapshot().sessions_total, 0);
        assert_eq!(state.pool.stats().await.idle, 0);
    }

    #[actix_web::test]
    async fn test_silent_client_times_out_and_releases_connection() {
        let mut config = AppConfig::default();
        config.relay.heartbeat_interval_ms = 20;
        config.relay.client_timeout_ms = 100;
        config.pool.keepalive_interval_secs = 0.01;
        let (state, connector) = test_state_with(config, false);
        let mut client = TestClient::connect(SessionMode::Plain, state.clone());

        client.send_audio(vec![7u8; 2048]);
        assert!(eventually(|| connector.connection_count() == 1).await);

        while let Some(frame) = client.next_frame().await {
            assert!(matches!(frame, ws::Frame::Ping(_)), "unexpected frame {:?}", frame);
        }

        assert!(wait_for_idle(&state.pool, 1).await);
        assert_eq!(state.metrics_snapshot().active_sessions, 0);

        let link = connector.link(0);
        let probes = link.audio_frames().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(link.audio_frames().len(), probes);
    }

    #[actix_web::test]
    async fn test_client_answering_pings_stays_connected() {
        let mut config = AppConfig::default();
        config.relay.heartbeat_interval_ms = 20;
        config.relay.client_timeout_ms = 200;
        let (state, _) = test_state_with(config, false);
        let mut client = TestClient::connect(SessionMode::Plain, state.clone());

        let deadline = Instant::now() + Duration::from_millis(400);
        while Instant::now() < deadline {
            match client.next_frame().await {
                Some(ws::Frame::Ping(data)) => client.send(ws::Message::Pong(data)),
                other => panic!("unexpected frame {:?}", other),
            }
        }

        assert_eq!(state.metrics_snapshot().active_sessions, 1);
        client.send(ws::Message::Close(None));
        client.expect_close().await;
        assert!(wait_for_idle(&state.pool, 1).await);
    }
}
