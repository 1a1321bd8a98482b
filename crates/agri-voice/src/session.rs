//! Explicit per-client session record.
//!
//! Everything that used to be "the last transcript" or "the current request" lives here,
//! owned by the state machine and never shared as ambient state.

use crate::conversation::{ConversationLog, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five states of the interaction loop. `Idle` is initial; nothing is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Processing,
    Responding,
    Error,
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoiceState::Idle => "idle",
            VoiceState::Listening => "listening",
            VoiceState::Processing => "processing",
            VoiceState::Responding => "responding",
            VoiceState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Live transcript update from capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

/// Optional location attached to queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A backend request id as issued within one request slot.
///
/// Backends may reuse ids, so two tickets only match when both parts do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestTicket {
    pub slot: u64,
    pub id: String,
}

impl RequestTicket {
    pub fn new(slot: u64, id: impl Into<String>) -> Self {
        Self { slot, id: id.into() }
    }
}

/// An acknowledged query whose answer is still being computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub ticket: RequestTicket,
    pub submitted_at: DateTime<Utc>,
    pub attempts: u32,
}

impl PendingRequest {
    pub fn new(ticket: RequestTicket) -> Self {
        Self {
            ticket,
            submitted_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.ticket.id
    }
}

/// Text ready for the speech engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub locale: String,
    pub voice_hint: Option<String>,
    pub rate: f32,
    pub pitch: f32,
}

impl Utterance {
    pub fn new(text: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            locale: locale.into(),
            voice_hint: None,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// State owned by the interaction state machine.
#[derive(Debug, Default)]
pub struct VoiceSession {
    pub(crate) state: VoiceState,
    pub(crate) current_request_id: Option<String>,
    pub(crate) transcript_buffer: String,
    pub(crate) log: ConversationLog,
    /// Request slot. Bumped on every fresh listen; results tagged with an older slot are stale.
    pub(crate) query_epoch: u64,
    pub(crate) capture_epoch: Option<u64>,
    pub(crate) active_utterance: Option<u64>,
    pub(crate) location: Option<GeoPoint>,
}

impl VoiceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn current_request_id(&self) -> Option<&str> {
        self.current_request_id.as_deref()
    }

    pub fn transcript_buffer(&self) -> &str {
        &self.transcript_buffer
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Open a fresh request slot, orphaning whatever the previous one was waiting on.
    pub(crate) fn open_request_slot(&mut self) -> u64 {
        self.query_epoch = self.query_epoch.wrapping_add(1);
        self.current_request_id = None;
        self.query_epoch
    }

    pub(crate) fn append(&mut self, message: Message) -> Message {
        self.log.append(message).clone()
    }
}
