//! # Agri Voice - Voice Interaction Orchestration
//!
//! Client-side voice loop for the farm assistant: a farmer taps the mic, speaks a
//! question, and hears the answer. Long-running answers are fetched with an
//! acknowledge-then-poll protocol, and tapping the mic while the assistant talks cuts
//! it off (barge-in).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Voice Interaction State Machine (actor)           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │   Capture    │→ │  Dispatcher  │→ │ Result Poller│      │
//! │  │ (silence EP) │  │ POST /query  │  │ GET /result  │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         ↑                                    ↓              │
//! │   toggle (barge-in)                  ┌──────────────┐      │
//! │         └──────── kill signal ──────→│   Playback   │      │
//! │                                      └──────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Speech engines and the backend are traits ([`SpeechRecognizer`], [`SpeechSynthesizer`],
//! [`VoiceBackend`]); [`HttpVoiceBackend`] is the reqwest implementation.

pub mod backend;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod locale;
pub mod machine;
pub mod playback;
pub mod poller;
pub mod session;
pub mod timer;

pub use backend::{HttpVoiceBackend, QueryReply, QueryRequest, ResultStatus, VoiceBackend};
pub use capture::{
    CaptureEvent, CaptureNotice, OnCaptureEvent, RecognizerEvent, SpeechCaptureSession,
    SpeechRecognizer,
};
pub use config::{BackendConfig, CaptureConfig, PlaybackConfig, PollConfig, VoiceConfig};
pub use conversation::{ConversationLog, Message, Role};
pub use dispatch::{DispatchResult, QueryDispatcher};
pub use error::{FailureKind, VoiceError, VoiceResult};
pub use locale::{apology, normalize_locale};
pub use machine::{
    SessionSnapshot, VoiceEngines, VoiceHandle, VoiceInteractionStateMachine, VoiceUpdate,
};
pub use playback::{
    select_voice, OnPlaybackEvent, PlaybackEvent, PlaybackNotice, SpeechPlaybackController,
    SpeechSynthesizer, SynthesisEvent, SynthesisRequest, VoiceInfo,
};
pub use poller::{PollHandle, PollOutcome, ResultPoller};
pub use session::{
    GeoPoint, PendingRequest, RequestTicket, Transcript, Utterance, VoiceSession, VoiceState,
};
