//! # Streaming Bridge
//!
//! The orchestrator wiring one telephony media-stream socket to one
//! voice-agent socket through the audio codec, with the call registry as
//! shared state.
//!
//! ## Actor Model:
//! Each telephony connection is an independent actix actor. Telephony
//! frames arrive through the WebSocket `StreamHandler`; decoded agent
//! events are fed into the same actor via `ctx.add_stream`, so all of a
//! session's state is mutated from one execution context while the two
//! legs' orderings stay independent of each other.
//!
//! ## Call State Machine:
//! `AwaitingStart → Streaming → Closed`. Every teardown trigger — the
//! telephony `stop` event, a close or protocol error on either socket, or
//! reaper eviction — funnels through [`CallRegistry::close`], the single
//! teardown path.

use crate::agent::{AgentEvent, AgentSession};
use crate::audio::codec;
use crate::audio::{AGENT_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE};
use crate::error::AppResult;
use crate::registry::SessionUpdate;
use crate::state::AppState;
use crate::telephony::{OutboundMedia, StartMeta, TelephonyFrame};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the telephony socket is pinged.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any traffic before the connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Registry-initiated teardown of the telephony connection. Sent by
/// [`crate::registry::CallRegistry::close`], e.g. on reaper eviction.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Hangup;

/// Delivered once the spawned agent connect completes.
#[derive(Message)]
#[rtype(result = "()")]
struct AgentAttached {
    session: AgentSession,
    events: mpsc::Receiver<AgentEvent>,
}

/// Per-call bridge phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgePhase {
    AwaitingStart,
    Streaming,
    Closed,
}

/// WebSocket actor bridging one telephone call to the voice agent.
pub struct CallBridge {
    /// Connection identity for logs emitted before `start` arrives
    connection_id: Uuid,

    state: AppState,

    call_sid: Option<String>,
    stream_sid: Option<String>,
    phase: BridgePhase,

    /// Local agent handle for the per-frame fast path; the registry holds
    /// the authoritative copy
    agent: Option<AgentSession>,

    /// Recurring agent keepalive; cancelled on every teardown path
    keepalive: Option<SpawnHandle>,

    last_heartbeat: Instant,
}

impl CallBridge {
    pub fn new(state: AppState) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            state,
            call_sid: None,
            stream_sid: None,
            phase: BridgePhase::AwaitingStart,
            agent: None,
            keepalive: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// First legal entry into STREAMING: create the session, attach this
    /// socket, and kick off the agent leg.
    fn handle_start(&mut self, stream_sid: String, start: StartMeta, ctx: &mut ws::WebsocketContext<Self>) {
        if self.phase != BridgePhase::AwaitingStart {
            warn!(
                call_sid = %start.call_sid,
                "duplicate start frame dropped"
            );
            return;
        }

        let call_sid = start.call_sid.clone();
        let context = start.context().to_string();

        if let Err(err) = self.state.registry.create(&call_sid, &stream_sid) {
            warn!(call_sid = %call_sid, error = %err, "rejecting start event");
            return;
        }

        self.state.registry.update(
            &call_sid,
            SessionUpdate {
                telephony: Some(ctx.address().recipient()),
                context: Some(context.clone()),
                ..Default::default()
            },
        );

        self.call_sid = Some(call_sid.clone());
        self.stream_sid = Some(stream_sid.clone());
        self.phase = BridgePhase::Streaming;
        self.state.record_call_started();

        info!(call_sid = %call_sid, stream_sid = %stream_sid, "media stream started");

        // The agent handshake must not block the telephony mailbox; the
        // result comes back as an AgentAttached message.
        let agent_config = self.state.get_config().agent;
        let addr = ctx.address();
        tokio::spawn(async move {
            match AgentSession::open(&agent_config, &context).await {
                Ok(Some(connection)) => addr.do_send(AgentAttached {
                    session: connection.session,
                    events: connection.events,
                }),
                Ok(None) => {
                    info!(call_sid = %call_sid, "bridging one-way: agent leg absent");
                }
                Err(err) => {
                    warn!(
                        call_sid = %call_sid,
                        error = %err,
                        "agent connection failed; bridging one-way"
                    );
                }
            }
        });
    }

    /// One caller audio chunk: decode, gate on voice activity, forward.
    fn handle_media(&mut self, payload_b64: &str) {
        if self.phase != BridgePhase::Streaming {
            debug!(connection = %self.connection_id, "media frame before start dropped");
            return;
        }

        let call_sid = match &self.call_sid {
            Some(call_sid) => call_sid.clone(),
            None => return,
        };

        let config = self.state.get_config().audio;
        match transcode_caller_chunk(payload_b64, config.vad_threshold, config.forward_silence) {
            Ok(CallerChunk {
                companded,
                agent_payload,
            }) => {
                self.state.record_frame_from_caller();

                if let Some(session) = self.state.registry.get(&call_sid) {
                    session.caller_audio.push_chunk(companded);
                }

                match agent_payload {
                    Some(payload) => {
                        // In one-way mode there is nobody to forward to
                        if let Some(agent) = &self.agent {
                            agent.send_audio(payload, false);
                        }
                    }
                    None => {
                        // Deliberate lossy policy: non-voice chunks are not
                        // relayed to the agent endpoint
                        self.state.record_frame_gated();
                        debug!(call_sid = %call_sid, "silent chunk gated");
                    }
                }
            }
            Err(err) => {
                warn!(call_sid = %call_sid, error = %err, "dropping malformed media payload");
            }
        }
    }

    /// Agent speech back to the caller: downsample, compand, re-envelope.
    fn handle_agent_audio(
        &mut self,
        audio_b64: &str,
        sample_rate: u32,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        let (call_sid, stream_sid) = match (&self.call_sid, &self.stream_sid) {
            (Some(call_sid), Some(stream_sid)) => (call_sid.clone(), stream_sid.clone()),
            _ => return,
        };

        match transcode_agent_audio(audio_b64, sample_rate) {
            Ok((pcm_bytes, payload)) => {
                if let Some(session) = self.state.registry.get(&call_sid) {
                    session.agent_audio.push_chunk(pcm_bytes);
                }

                let frame = OutboundMedia::new(&stream_sid, payload);
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        ctx.text(json);
                        self.state.record_frame_to_caller();
                    }
                    Err(err) => error!(call_sid = %call_sid, error = %err, "media frame serialization failed"),
                }
            }
            Err(err) => {
                warn!(call_sid = %call_sid, error = %err, "dropping malformed agent audio");
            }
        }
    }

    /// Move to CLOSED and stop the actor; the registry teardown itself
    /// happens in `stopped` so every exit path shares it.
    fn shutdown(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.phase = BridgePhase::Closed;
        if let Some(handle) = self.keepalive.take() {
            ctx.cancel_future(handle);
        }
        ctx.stop();
    }
}

impl Actor for CallBridge {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, "telephony connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection = %act.connection_id, "telephony heartbeat timeout, closing connection");
                act.shutdown(ctx);
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Single teardown path for every exit: stop event, socket error on
    /// either leg, heartbeat timeout, reaper hangup.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.phase = BridgePhase::Closed;

        // The registry close below issues the same Close; duplicates land
        // on a closed channel and are ignored
        if let Some(agent) = self.agent.take() {
            agent.close();
        }

        if let Some(call_sid) = self.call_sid.take() {
            if let Some(metadata) = self.state.registry.close(&call_sid) {
                info!(
                    call_sid = %call_sid,
                    duration_ms = metadata.duration_ms,
                    utterances = metadata.utterance_count,
                    agent_utterances = metadata.agent_utterances,
                    user_utterances = metadata.user_utterances,
                    "call bridge closed"
                );
                self.state.record_call_completed();
            }
        } else {
            info!(connection = %self.connection_id, "telephony connection closed before start");
        }
    }
}

/// Inbound telephony frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallBridge {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<TelephonyFrame>(&text) {
                Ok(TelephonyFrame::Connected { protocol, version }) => {
                    info!(
                        connection = %self.connection_id,
                        protocol = ?protocol,
                        version = ?version,
                        "media stream connected"
                    );
                }
                Ok(TelephonyFrame::Start { stream_sid, start }) => {
                    self.handle_start(stream_sid, start, ctx);
                }
                Ok(TelephonyFrame::Media { media, .. }) => {
                    self.handle_media(&media.payload);
                }
                Ok(TelephonyFrame::Stop { .. }) => {
                    info!(call_sid = ?self.call_sid, "stop event received");
                    self.shutdown(ctx);
                }
                Ok(TelephonyFrame::Unknown) => {
                    debug!(connection = %self.connection_id, "ignoring unrecognized telephony event");
                }
                Err(err) => {
                    warn!(
                        connection = %self.connection_id,
                        error = %err,
                        "dropping malformed telephony frame"
                    );
                }
            },
            Ok(ws::Message::Binary(_)) => {
                warn!(connection = %self.connection_id, "unexpected binary frame dropped");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(call_sid = ?self.call_sid, reason = ?reason, "telephony socket closed");
                self.shutdown(ctx);
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection = %self.connection_id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(
                    connection = %self.connection_id,
                    error = %err,
                    "telephony protocol error"
                );
                self.shutdown(ctx);
            }
        }
    }
}

/// Decoded events from the agent socket.
impl StreamHandler<AgentEvent> for CallBridge {
    fn handle(&mut self, event: AgentEvent, ctx: &mut Self::Context) {
        if self.phase != BridgePhase::Streaming {
            return;
        }

        match event {
            AgentEvent::Audio { audio, sample_rate } => {
                self.handle_agent_audio(&audio, sample_rate, ctx);
            }
            AgentEvent::Transcript {
                text,
                is_final,
                speaker,
            } => {
                if let Some(call_sid) = &self.call_sid {
                    self.state
                        .registry
                        .append_transcript(call_sid, speaker, text, is_final);
                }
            }
            AgentEvent::Interruption { reason } => {
                // Conversational, not fatal: no teardown
                info!(call_sid = ?self.call_sid, reason = ?reason, "agent interruption");
            }
            AgentEvent::Error { error, code } => {
                warn!(
                    call_sid = ?self.call_sid,
                    error = %error,
                    code = ?code,
                    "agent endpoint reported an error"
                );
            }
            AgentEvent::Unknown => {
                debug!(call_sid = ?self.call_sid, "ignoring unrecognized agent event");
            }
        }
    }

    /// The agent event stream ended: the socket is gone. Transport loss on
    /// either leg tears down this session only.
    fn finished(&mut self, ctx: &mut Self::Context) {
        if self.phase == BridgePhase::Streaming {
            info!(call_sid = ?self.call_sid, "agent stream ended; closing call");
            self.shutdown(ctx);
        }
    }
}

impl Handler<AgentAttached> for CallBridge {
    type Result = ();

    fn handle(&mut self, msg: AgentAttached, ctx: &mut Self::Context) {
        if self.phase != BridgePhase::Streaming {
            // The call ended while the handshake was in flight
            msg.session.close();
            return;
        }

        let call_sid = match &self.call_sid {
            Some(call_sid) => call_sid.clone(),
            None => return,
        };

        self.agent = Some(msg.session.clone());
        self.state.registry.update(
            &call_sid,
            SessionUpdate {
                agent: Some(msg.session),
                conversation_started: Some(true),
                ..Default::default()
            },
        );

        let interval =
            Duration::from_secs(self.state.get_config().agent.keepalive_interval_secs);
        self.keepalive = Some(ctx.run_interval(interval, |act, _ctx| {
            if let Some(agent) = &act.agent {
                agent.ping();
            }
        }));

        ctx.add_stream(ReceiverStream::new(msg.events));

        info!(call_sid = %call_sid, "agent leg attached; conversation started");
    }
}

impl Handler<Hangup> for CallBridge {
    type Result = ();

    fn handle(&mut self, _msg: Hangup, ctx: &mut Self::Context) {
        info!(call_sid = ?self.call_sid, "hangup requested");
        self.shutdown(ctx);
    }
}

/// Result of transcoding one caller chunk.
struct CallerChunk {
    /// The raw companded bytes, for the session's leg buffer
    companded: Vec<u8>,
    /// Base64 PCM16 payload for the agent, present when the chunk passes
    /// the voice gate (or silence forwarding is enabled)
    agent_payload: Option<String>,
}

/// Decode a caller media payload, run voice-activity detection, and
/// prepare the upsampled agent payload for qualifying chunks.
fn transcode_caller_chunk(
    payload_b64: &str,
    vad_threshold: f64,
    forward_silence: bool,
) -> AppResult<CallerChunk> {
    let companded = codec::decode_payload(payload_b64)?;
    let samples = codec::decompand_buffer(&companded);
    let voiced = codec::has_voice(&samples, vad_threshold);

    let agent_payload = if voiced || forward_silence {
        let upsampled = codec::resample(&samples, TELEPHONY_SAMPLE_RATE, AGENT_SAMPLE_RATE);
        Some(codec::encode_payload(&codec::samples_to_bytes(&upsampled)))
    } else {
        None
    };

    Ok(CallerChunk {
        companded,
        agent_payload,
    })
}

/// Decode agent audio, downsample to the telephony rate, and compand.
/// Returns the raw PCM bytes (for the leg buffer) and the base64 companded
/// payload for the outbound media frame.
fn transcode_agent_audio(audio_b64: &str, sample_rate: u32) -> AppResult<(Vec<u8>, String)> {
    let pcm_bytes = codec::decode_payload(audio_b64)?;
    let samples = codec::bytes_to_samples(&pcm_bytes)?;
    let downsampled = codec::resample(&samples, sample_rate, TELEPHONY_SAMPLE_RATE);
    let companded = codec::compand_buffer(&downsampled);

    Ok((pcm_bytes, codec::encode_payload(&companded)))
}

/// WebSocket upgrade endpoint for the telephony media stream.
///
/// Plain HTTP requests (no upgrade headers) are rejected by the handshake
/// with an upgrade-required error status.
pub async fn call_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "new media-stream connection request"
    );

    let bridge = CallBridge::new(state.get_ref().clone());
    ws::start(bridge, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Speaker;
    use crate::state::AppState;

    /// 20 ms of mu-law silence: compand(0) is 0xFF.
    fn silent_payload() -> String {
        codec::encode_payload(&vec![0xFFu8; 160])
    }

    /// 20 ms of loud mu-law audio (alternating full-scale square wave).
    fn voiced_payload() -> String {
        let samples: Vec<i16> = (0..160)
            .map(|i| if i % 2 == 0 { 20000 } else { -20000 })
            .collect();
        codec::encode_payload(&codec::compand_buffer(&samples))
    }

    #[test]
    fn test_silent_chunk_is_gated() {
        let chunk = transcode_caller_chunk(&silent_payload(), 0.01, false).unwrap();
        assert!(chunk.agent_payload.is_none());
        assert_eq!(chunk.companded.len(), 160);
    }

    #[test]
    fn test_silence_forwarding_overrides_gate() {
        let chunk = transcode_caller_chunk(&silent_payload(), 0.01, true).unwrap();
        assert!(chunk.agent_payload.is_some());
    }

    #[test]
    fn test_voiced_chunk_is_upsampled() {
        let chunk = transcode_caller_chunk(&voiced_payload(), 0.01, false).unwrap();

        // 160 samples at 8 kHz become 320 samples (640 bytes) at 16 kHz
        let payload = chunk.agent_payload.unwrap();
        let bytes = codec::decode_payload(&payload).unwrap();
        assert_eq!(bytes.len(), 640);
    }

    #[test]
    fn test_malformed_media_payload_is_error() {
        let result = transcode_caller_chunk("@@garbage@@", 0.01, false);
        assert!(result.is_err());
    }

    #[test]
    fn test_agent_audio_is_downsampled_and_companded() {
        let samples: Vec<i16> = (0..320)
            .map(|i| if i % 2 == 0 { 10000 } else { -10000 })
            .collect();
        let audio_b64 = codec::encode_payload(&codec::samples_to_bytes(&samples));

        let (pcm_bytes, payload) = transcode_agent_audio(&audio_b64, 16000).unwrap();
        assert_eq!(pcm_bytes.len(), 640);

        // 320 samples at 16 kHz become 160 mu-law bytes at 8 kHz
        let companded = codec::decode_payload(&payload).unwrap();
        assert_eq!(companded.len(), 160);
    }

    #[test]
    fn test_agent_audio_odd_byte_count_rejected() {
        let audio_b64 = codec::encode_payload(&[1u8, 2, 3]);
        assert!(transcode_agent_audio(&audio_b64, 16000).is_err());
    }

    /// The end-to-end session flow without sockets: start creates exactly
    /// one session, silent media is gated, a transcript event lands in the
    /// session, and stop yields the expected metadata counts.
    #[test]
    fn test_call_lifecycle_through_registry() {
        let state = AppState::new(crate::config::AppConfig::default());
        let registry = &state.registry;

        // start
        registry.create("CA100", "SS100").unwrap();
        assert_eq!(registry.count(), 1);

        // media: a 160-byte silent companded payload computes RMS 0 and is
        // not forwarded when voice gating is enabled
        let chunk = transcode_caller_chunk(&silent_payload(), 0.01, false).unwrap();
        assert!(chunk.agent_payload.is_none());
        registry
            .get("CA100")
            .unwrap()
            .caller_audio
            .push_chunk(chunk.companded);

        // transcript
        registry.append_transcript("CA100", Speaker::Agent, "Hello".to_string(), true);
        let transcript = registry.get("CA100").unwrap().transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].speaker, Speaker::Agent);
        assert_eq!(transcript[0].text, "Hello");

        // stop
        let metadata = registry.close("CA100").unwrap();
        assert_eq!(metadata.utterance_count, 1);
        assert_eq!(metadata.agent_utterances, 1);
        assert_eq!(metadata.user_utterances, 0);
        assert_eq!(registry.count(), 0);
    }
}
