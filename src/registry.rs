//! # Call Session Registry
//!
//! Process-wide mapping from call identifier to live session state, with
//! concurrency-safe create/read/update/close. The registry owns every
//! session; the bridge and reaper only hold `Arc` references.
//!
//! ## Lifecycle:
//! 1. **Created**: on the telephony `start` event
//! 2. **Mutated**: by every audio/transcript event while streaming
//! 3. **Closed**: on `stop`, socket close/error, or reaper eviction —
//!    always through [`CallRegistry::close`], which best-effort closes both
//!    sockets and removes the entry
//!
//! Removal from the map is the single point of truth for "session no
//! longer exists". Update and append operations against a missing session
//! are silent no-ops because teardown races with in-flight messages are
//! expected, never exceptional.

use crate::agent::{AgentSession, Speaker};
use crate::audio::buffer::{AudioChunkBuffer, SampleEncoding};
use crate::audio::{AGENT_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE};
use crate::bridge::Hangup;
use crate::error::{AppError, AppResult};
use actix::Recipient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// One line of the running conversation transcript.
///
/// Append-only; ordering is arrival order, which across the two legs is
/// not necessarily chronological.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
}

/// Final snapshot computed when a session closes.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationMetadata {
    pub call_sid: String,
    pub utterance_count: usize,
    pub agent_utterances: usize,
    pub user_utterances: usize,
    pub duration_ms: i64,
}

/// Partial-field merge applied by [`CallRegistry::update`].
#[derive(Default)]
pub struct SessionUpdate {
    pub telephony: Option<Recipient<Hangup>>,
    pub agent: Option<AgentSession>,
    pub conversation_started: Option<bool>,
    pub context: Option<String>,
}

/// Per-call bridging state.
///
/// ## Thread Safety:
/// Mutable fields sit behind their own locks so the bridge actor, the
/// registry and the reaper can touch a session concurrently without
/// destructive interleaving.
pub struct CallSession {
    /// Unique handle for the telephone call's lifetime
    pub call_sid: String,

    /// Unique handle for this media-stream attachment
    pub stream_sid: String,

    pub started_at: DateTime<Utc>,

    /// Free-text conversation context handed to the agent
    context: RwLock<String>,

    /// Set once the agent leg accepted the initiation
    conversation_started: AtomicBool,

    /// Telephony-socket handle, attached once the actor exists
    telephony: RwLock<Option<Recipient<Hangup>>>,

    /// Agent-socket handle; absent in degraded/demo mode
    agent: RwLock<Option<AgentSession>>,

    transcript: RwLock<Vec<TranscriptEntry>>,

    /// Recent caller-leg audio (8 kHz companded)
    pub caller_audio: AudioChunkBuffer,

    /// Recent agent-leg audio (16 kHz linear)
    pub agent_audio: AudioChunkBuffer,
}

impl CallSession {
    fn new(call_sid: String, stream_sid: String, buffer_window_ms: u32) -> Self {
        Self::with_started_at(call_sid, stream_sid, buffer_window_ms, Utc::now())
    }

    fn with_started_at(
        call_sid: String,
        stream_sid: String,
        buffer_window_ms: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            call_sid,
            stream_sid,
            started_at,
            context: RwLock::new(String::new()),
            conversation_started: AtomicBool::new(false),
            telephony: RwLock::new(None),
            agent: RwLock::new(None),
            transcript: RwLock::new(Vec::new()),
            caller_audio: AudioChunkBuffer::new(
                TELEPHONY_SAMPLE_RATE,
                SampleEncoding::Companded8Bit,
                buffer_window_ms,
            ),
            agent_audio: AudioChunkBuffer::new(
                AGENT_SAMPLE_RATE,
                SampleEncoding::Linear16Bit,
                buffer_window_ms,
            ),
        }
    }

    /// Age of this session in milliseconds.
    pub fn age_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    pub fn conversation_started(&self) -> bool {
        self.conversation_started.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> String {
        self.context.read().unwrap().clone()
    }

    /// Snapshot of the transcript so far, in arrival order.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().unwrap().clone()
    }

    fn apply(&self, update: SessionUpdate) {
        if let Some(handle) = update.telephony {
            *self.telephony.write().unwrap() = Some(handle);
        }
        if let Some(agent) = update.agent {
            *self.agent.write().unwrap() = Some(agent);
        }
        if let Some(started) = update.conversation_started {
            self.conversation_started.store(started, Ordering::SeqCst);
        }
        if let Some(context) = update.context {
            *self.context.write().unwrap() = context;
        }
    }

    fn append_entry(&self, speaker: Speaker, text: String, is_final: bool) {
        self.transcript.write().unwrap().push(TranscriptEntry {
            timestamp: Utc::now(),
            speaker,
            text,
            is_final,
        });
    }

    fn metadata(&self) -> ConversationMetadata {
        let transcript = self.transcript.read().unwrap();
        let agent_utterances = transcript
            .iter()
            .filter(|e| e.speaker == Speaker::Agent)
            .count();
        let user_utterances = transcript
            .iter()
            .filter(|e| e.speaker == Speaker::User)
            .count();

        ConversationMetadata {
            call_sid: self.call_sid.clone(),
            utterance_count: transcript.len(),
            agent_utterances,
            user_utterances,
            duration_ms: self.age_ms(),
        }
    }

    /// Best-effort shutdown of both sockets. Errors are swallowed; both
    /// handles are fire-and-forget by construction.
    fn close_sockets(&self) {
        if let Some(agent) = self.agent.write().unwrap().take() {
            agent.close();
        }
        if let Some(telephony) = self.telephony.write().unwrap().take() {
            let _ = telephony.do_send(Hangup);
        }
    }
}

/// The process-wide session table.
///
/// An explicit registry object with an injected lock — never ambient
/// global state. Initialized once at process start; entries are torn down
/// individually.
pub struct CallRegistry {
    sessions: RwLock<HashMap<String, Arc<CallSession>>>,
    buffer_window_ms: u32,
}

impl CallRegistry {
    pub fn new(buffer_window_ms: u32) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            buffer_window_ms,
        }
    }

    /// Create a session for a newly started call.
    ///
    /// Fails on a duplicate call identifier: a duplicate `start` must not
    /// silently merge state with the live call.
    pub fn create(&self, call_sid: &str, stream_sid: &str) -> AppResult<Arc<CallSession>> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.contains_key(call_sid) {
            return Err(AppError::BadRequest(format!(
                "call '{}' already has an active session",
                call_sid
            )));
        }

        let session = Arc::new(CallSession::new(
            call_sid.to_string(),
            stream_sid.to_string(),
            self.buffer_window_ms,
        ));
        sessions.insert(call_sid.to_string(), session.clone());

        debug!(call_sid, stream_sid, "session created");
        Ok(session)
    }

    pub fn get(&self, call_sid: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().unwrap().get(call_sid).cloned()
    }

    /// Merge partial fields into an existing session. Silent no-op when the
    /// session is gone — updates race with teardown by design.
    pub fn update(&self, call_sid: &str, update: SessionUpdate) {
        if let Some(session) = self.get(call_sid) {
            session.apply(update);
        }
    }

    /// Append a transcript entry. Silent no-op when the session is gone.
    pub fn append_transcript(&self, call_sid: &str, speaker: Speaker, text: String, is_final: bool) {
        if let Some(session) = self.get(call_sid) {
            session.append_entry(speaker, text, is_final);
        }
    }

    /// Tear down a session: compute the final metadata, close both sockets
    /// best-effort, and remove the entry.
    ///
    /// Returns `None` when the session was already gone, making every
    /// teardown path (explicit stop, socket error, reaper) idempotent.
    pub fn close(&self, call_sid: &str) -> Option<ConversationMetadata> {
        let session = self.sessions.write().unwrap().remove(call_sid)?;

        let metadata = session.metadata();
        session.close_sockets();

        info!(
            call_sid,
            duration_ms = metadata.duration_ms,
            utterances = metadata.utterance_count,
            "session closed"
        );

        Some(metadata)
    }

    /// Identifiers of all live calls.
    pub fn list_active(&self) -> Vec<String> {
        self.sessions.read().unwrap().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Age of the oldest live session in milliseconds; 0 when idle.
    pub fn oldest_age_ms(&self) -> i64 {
        self.sessions
            .read()
            .unwrap()
            .values()
            .map(|s| s.age_ms())
            .max()
            .unwrap_or(0)
    }

    /// Close every session older than `max_age_ms`; returns how many were
    /// closed. Runs on the reaper's cadence, independent of call traffic.
    pub fn sweep_stale(&self, max_age_ms: i64) -> usize {
        let stale: Vec<String> = self
            .sessions
            .read()
            .unwrap()
            .iter()
            .filter(|(_, session)| session.age_ms() > max_age_ms)
            .map(|(call_sid, _)| call_sid.clone())
            .collect();

        stale
            .into_iter()
            .filter(|call_sid| self.close(call_sid).is_some())
            .count()
    }

    /// Insert a session with a backdated start time (tests only).
    #[cfg(test)]
    pub(crate) fn insert_backdated(&self, call_sid: &str, stream_sid: &str, age_ms: i64) {
        let started_at = Utc::now() - chrono::Duration::milliseconds(age_ms);
        let session = Arc::new(CallSession::with_started_at(
            call_sid.to_string(),
            stream_sid.to_string(),
            self.buffer_window_ms,
            started_at,
        ));
        self.sessions
            .write()
            .unwrap()
            .insert(call_sid.to_string(), session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CallRegistry {
        CallRegistry::new(5000)
    }

    #[test]
    fn test_create_then_close() {
        let registry = registry();

        let session = registry.create("CA1", "SS1").unwrap();
        assert_eq!(session.call_sid, "CA1");
        assert_eq!(session.stream_sid, "SS1");
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.list_active(), vec!["CA1".to_string()]);

        let metadata = registry.close("CA1").unwrap();
        assert_eq!(metadata.call_sid, "CA1");
        assert!(registry.get("CA1").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_duplicate_start_rejected() {
        let registry = registry();
        registry.create("CA1", "SS1").unwrap();

        let result = registry.create("CA1", "SS2");
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        // The original session is untouched
        assert_eq!(registry.get("CA1").unwrap().stream_sid, "SS1");
    }

    #[test]
    fn test_operations_on_missing_session_are_noops() {
        let registry = registry();

        registry.update(
            "missing-id",
            SessionUpdate {
                conversation_started: Some(true),
                ..Default::default()
            },
        );
        registry.append_transcript("missing-id", Speaker::User, "hello".to_string(), true);

        assert_eq!(registry.count(), 0);
        assert!(registry.close("missing-id").is_none());
    }

    #[test]
    fn test_update_merges_fields() {
        let registry = registry();
        let session = registry.create("CA1", "SS1").unwrap();
        assert!(!session.conversation_started());

        registry.update(
            "CA1",
            SessionUpdate {
                conversation_started: Some(true),
                context: Some("book a table".to_string()),
                ..Default::default()
            },
        );

        assert!(session.conversation_started());
        assert_eq!(session.context(), "book a table");
    }

    #[test]
    fn test_transcript_order_and_metadata_counts() {
        let registry = registry();
        registry.create("CA1", "SS1").unwrap();

        registry.append_transcript("CA1", Speaker::Agent, "Hello".to_string(), true);
        registry.append_transcript("CA1", Speaker::User, "Hi".to_string(), false);
        registry.append_transcript("CA1", Speaker::Agent, "How can I help?".to_string(), true);

        let transcript = registry.get("CA1").unwrap().transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].text, "Hello");
        assert_eq!(transcript[1].speaker, Speaker::User);
        assert!(!transcript[1].is_final);

        let metadata = registry.close("CA1").unwrap();
        assert_eq!(metadata.utterance_count, 3);
        assert_eq!(metadata.agent_utterances, 2);
        assert_eq!(metadata.user_utterances, 1);
        assert!(metadata.duration_ms >= 0);
    }

    #[test]
    fn test_oldest_age_zero_when_idle() {
        let registry = registry();
        assert_eq!(registry.oldest_age_ms(), 0);

        registry.insert_backdated("CA1", "SS1", 120_000);
        assert!(registry.oldest_age_ms() >= 120_000);
    }

    #[test]
    fn test_sweep_stale_respects_threshold() {
        let registry = registry();

        // Older than max duration + grace: must be reaped
        registry.insert_backdated("CA-old", "SS-old", 400_000);
        // Fresh session: must survive
        registry.create("CA-new", "SS-new").unwrap();

        let closed = registry.sweep_stale(360_000);
        assert_eq!(closed, 1);
        assert!(registry.get("CA-old").is_none());
        assert!(registry.get("CA-new").is_some());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let registry = registry();
        registry.insert_backdated("CA-old", "SS-old", 400_000);

        assert_eq!(registry.sweep_stale(360_000), 1);
        assert_eq!(registry.sweep_stale(360_000), 0);
    }

    #[test]
    fn test_audio_buffers_declare_leg_shapes() {
        let registry = registry();
        let session = registry.create("CA1", "SS1").unwrap();

        assert_eq!(session.caller_audio.sample_rate(), 8000);
        assert_eq!(
            session.caller_audio.encoding(),
            SampleEncoding::Companded8Bit
        );
        assert_eq!(session.agent_audio.sample_rate(), 16000);
        assert_eq!(session.agent_audio.encoding(), SampleEncoding::Linear16Bit);
    }
}
