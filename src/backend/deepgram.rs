//! # Deepgram Live Connector
//!
//! Opens `wss://…/v1/listen` sockets and runs one I/O task per connection.
//!
//! ## Socket Task:
//! A single task selects over the outbound command queue and the socket's read
//! half, so audio writes and result reads never block each other's shutdown:
//! - `Outbound::Audio` → binary frame
//! - `Outbound::Close` (or every sender dropped) → `CloseStream` + close frame
//! - text frames → decoded `BackendEvent`s published into the `EventSlot`
//!
//! When the task exits its command queue closes, which is exactly what makes
//! later `send`s and liveness probes fail.

use crate::backend::events::{parse_message, BackendEvent};
use crate::backend::options::LiveOptions;
use crate::backend::session::{BackendError, Connector, EventSlot, Outbound};
use crate::config::BackendConfig;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LISTEN_PATH: &str = "/v1/listen";
const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Connector for the Deepgram live transcription API.
pub struct DeepgramConnector {
    base_url: Url,
    api_key: String,
    outbound_capacity: usize,
}

impl DeepgramConnector {
    pub fn new(config: &BackendConfig, outbound_capacity: usize) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if !matches!(base_url.scheme(), "ws" | "wss") {
            anyhow::bail!("Backend URL must use ws:// or wss://, got {}", base_url);
        }

        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            outbound_capacity: outbound_capacity.max(1),
        })
    }

    /// Full listen URL for `options`.
    pub fn listen_url(&self, options: &LiveOptions) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(LISTEN_PATH);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in options.query_pairs() {
                pairs.append_pair(key, &value);
            }
        }
        url
    }
}

impl Connector for DeepgramConnector {
    fn connect(
        &self,
        options: LiveOptions,
        events: EventSlot,
    ) -> BoxFuture<'static, Result<mpsc::Sender<Outbound>, BackendError>> {
        let url = self.listen_url(&options);
        let api_key = self.api_key.clone();
        let capacity = self.outbound_capacity;

        Box::pin(async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| BackendError::Connect(e.to_string()))?;
            let token = HeaderValue::from_str(&format!("Token {}", api_key))
                .map_err(|e| BackendError::Connect(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, token);

            let (stream, _response) = connect_async(request)
                .await
                .map_err(|e| BackendError::Connect(e.to_string()))?;
            info!(model = %options.model, diarize = options.diarize, "Connected to recognition backend");

            let (outbound, commands) = mpsc::channel(capacity);
            tokio::spawn(run_socket(stream, commands, events));
            Ok(outbound)
        })
    }
}

async fn run_socket(stream: WsStream, mut commands: mpsc::Receiver<Outbound>, events: EventSlot) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Outbound::Audio(frame)) => {
                        if let Err(err) = write.send(Message::Binary(frame)).await {
                            warn!("Backend write failed: {}", err);
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = write.send(Message::Text(CLOSE_STREAM.to_string())).await;
                        let _ = write.close().await;
                        break;
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_message(&text) {
                            events.publish(event).await;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            if frame.code != CloseCode::Normal {
                                let message = format!(
                                    "backend closed the stream (code {}): {}",
                                    u16::from(frame.code),
                                    frame.reason
                                );
                                events.publish(BackendEvent::Error(message)).await;
                            }
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Backend read failed: {}", err);
                        events.publish(BackendEvent::Error(format!("backend transport error: {}", err))).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    debug!("Backend socket task exiting");
}
