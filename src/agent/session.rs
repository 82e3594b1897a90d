//! # Voice-Agent Socket Lifecycle
//!
//! Owns the WebSocket to the conversational-AI endpoint for one call.
//!
//! # Connection Flow
//!
//! 1. `open()` — establish the WebSocket (bounded wait), spawn the writer
//!    and reader tasks, send `conversation_initiation`
//! 2. `send_audio()` / `send_text()` — queue outbound frames (non-blocking)
//! 3. Decoded inbound events arrive on the connection's channel
//! 4. `close()` — graceful `conversation_end`, short flush delay, socket
//!    close
//!
//! There is no mid-call reconnect: a dropped agent socket ends the call and
//! retry policy belongs to the call-scheduling collaborator.

use crate::agent::protocol::{decode_message, AgentEvent, AgentRequest};
use crate::config::AgentConfig;
use crate::error::{AppError, AppResult};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, info, warn};

/// Grace delay after `conversation_end` so the frame flushes before the
/// socket close.
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Capacity of the decoded-event channel toward the bridge.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Commands accepted by the writer task.
enum Command {
    Send(AgentRequest),
    Close,
}

/// Handle to an open agent socket.
///
/// Cheap to clone; one copy lives in the session registry and one in the
/// bridge actor. All senders are fire-and-forget: once the socket is gone
/// every operation degrades to a no-op.
#[derive(Clone)]
pub struct AgentSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

/// Result of a successful [`AgentSession::open`]: the session handle plus
/// the channel of decoded inbound events.
pub struct AgentConnection {
    pub session: AgentSession,
    pub events: mpsc::Receiver<AgentEvent>,
}

impl AgentSession {
    /// Connect to the voice-agent endpoint and start the conversation.
    ///
    /// Returns `Ok(None)` when the integration is unconfigured (demo /
    /// degraded mode) — callers must treat absence as "no agent leg":
    /// telephony audio flows one-way and is simply not echoed.
    ///
    /// Connection establishment is bounded by the configured timeout; on
    /// success the initiation message carrying the voice/model config and
    /// the free-text context is queued immediately.
    pub async fn open(config: &AgentConfig, context: &str) -> AppResult<Option<AgentConnection>> {
        if !config.is_configured() {
            info!("voice-agent endpoint not configured; running without agent leg");
            return Ok(None);
        }

        let url = format!("{}?agent_id={}", config.ws_url, config.agent_id);
        let mut request = url
            .into_client_request()
            .map_err(|e| AppError::Agent(format!("invalid agent URL: {}", e)))?;

        if !config.api_key.is_empty() {
            let header = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| AppError::Agent(format!("invalid API key header: {}", e)))?;
            request.headers_mut().insert("Authorization", header);
        }

        let connect_bound = Duration::from_secs(config.connect_timeout_secs);
        let (ws_stream, _response) = timeout(connect_bound, connect_async(request))
            .await
            .map_err(|_| {
                AppError::Agent(format!(
                    "agent connection timed out after {:?}",
                    connect_bound
                ))
            })?
            .map_err(|e| AppError::Agent(format!("agent connection failed: {}", e)))?;

        info!("agent socket connected");

        let (mut write, mut read) = ws_stream.split();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(EVENT_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));

        // Writer: serializes outbound frames; owns the socket sink
        let writer_open = open.clone();
        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                match command {
                    Command::Send(request) => {
                        let json = match serde_json::to_string(&request) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("failed to serialize agent frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json)).await {
                            warn!("agent socket send failed: {}", e);
                            break;
                        }
                    }
                    Command::Close => {
                        if let Ok(end) = serde_json::to_string(&AgentRequest::ConversationEnd) {
                            if let Err(e) = write.send(Message::Text(end)).await {
                                debug!("agent close notice not delivered: {}", e);
                            }
                        }
                        tokio::time::sleep(CLOSE_GRACE).await;
                        let _ = write.close().await;
                        break;
                    }
                }
            }
            writer_open.store(false, Ordering::SeqCst);
            debug!("agent writer task exiting");
        });

        // Reader: decodes inbound frames into the event channel; dropping
        // the sender ends the bridge's event stream
        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if event_tx.send(decode_message(&text)).await.is_err() {
                            debug!("agent event receiver dropped");
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("agent socket closed by remote");
                        break;
                    }
                    Err(e) => {
                        warn!("agent socket error: {}", e);
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            debug!("agent reader task exiting");
        });

        let session = AgentSession { cmd_tx, open };
        session.send(AgentRequest::initiation(config, context));

        Ok(Some(AgentConnection {
            session,
            events: event_rx,
        }))
    }

    fn send(&self, request: AgentRequest) {
        if self.cmd_tx.send(Command::Send(request)).is_err() {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    /// Queue one chunk of caller audio. No-op when the socket is not open.
    pub fn send_audio(&self, payload: String, is_final: bool) {
        if !self.is_open() {
            return;
        }
        self.send(AgentRequest::audio_input(payload, is_final));
    }

    /// Queue a text message (debugging / text-only testing). No-op when the
    /// socket is not open.
    pub fn send_text(&self, text: String) {
        if !self.is_open() {
            return;
        }
        self.send(AgentRequest::TextInput { text });
    }

    /// Queue a keepalive ping. No-op when the socket is not open.
    pub fn ping(&self) {
        if !self.is_open() {
            return;
        }
        self.send(AgentRequest::Ping);
    }

    /// Graceful shutdown: `conversation_end`, flush grace, socket close.
    /// Idempotent; all errors are swallowed.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.cmd_tx.is_closed()
    }

    /// Build a session directly from its parts (tests only).
    #[cfg(test)]
    fn from_parts(cmd_tx: mpsc::UnboundedSender<Command>, open: Arc<AtomicBool>) -> Self {
        Self { cmd_tx, open }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_unconfigured_yields_none() {
        let config = AgentConfig {
            ws_url: String::new(),
            agent_id: String::new(),
            api_key: String::new(),
            voice_id: "default".to_string(),
            model: "conversational-v1".to_string(),
            connect_timeout_secs: 1,
            keepalive_interval_secs: 30,
        };

        let connection = AgentSession::open(&config, "ignored").await.unwrap();
        assert!(connection.is_none());
    }

    #[tokio::test]
    async fn test_closed_session_is_noop() {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let session = AgentSession::from_parts(cmd_tx, open);
        assert!(session.is_open());

        // Receiver gone: the session must report closed and sends must not
        // panic or error
        drop(cmd_rx);
        assert!(!session.is_open());
        session.send_audio("AAAA".to_string(), false);
        session.send_text("are you there?".to_string());
        session.ping();
        session.close();
    }

    #[tokio::test]
    #[ignore] // Requires a reachable agent endpoint
    async fn test_live_agent_connection() {
        let config = AgentConfig {
            ws_url: std::env::var("AGENT_WS_URL").unwrap_or_default(),
            agent_id: std::env::var("AGENT_ID").unwrap_or_default(),
            api_key: std::env::var("AGENT_API_KEY").unwrap_or_default(),
            voice_id: "default".to_string(),
            model: "conversational-v1".to_string(),
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
        };

        let connection = AgentSession::open(&config, "smoke test")
            .await
            .expect("connection failed")
            .expect("agent endpoint must be configured for this test");

        assert!(connection.session.is_open());
        connection.session.ping();
        connection.session.close();
    }

    #[tokio::test]
    async fn test_close_marks_session_closed() {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let session = AgentSession::from_parts(cmd_tx, open);

        session.close();
        assert!(!session.is_open());
        assert!(matches!(cmd_rx.recv().await, Some(Command::Close)));

        // Audio after close is dropped silently
        session.send_audio("AAAA".to_string(), false);
        assert!(cmd_rx.try_recv().is_err());
    }
}
