//! # Voice-Agent Session Adapter
//!
//! Everything that talks to the conversational-AI endpoint: the wire
//! protocol types and the per-call socket lifecycle. One [`AgentSession`]
//! exists per bridged call; in demo/degraded mode no session is opened and
//! the bridge runs one-way.

pub mod protocol; // Wire message types + decoding
pub mod session; // Socket lifecycle (open, keepalive, graceful close)

pub use protocol::{decode_message, AgentEvent, AgentRequest, Speaker};
pub use session::{AgentConnection, AgentSession};
