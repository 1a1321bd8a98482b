//! **Speech playback** — TTS with a single "now playing" slot and the barge-in kill-switch.
//!
//! Every `speak()` cancels whatever is playing first; there is never a queue. Engine events
//! are forwarded tagged with the utterance id, and events belonging to a cancelled
//! utterance are dropped, so the owner only ever sees the latest utterance's lifecycle.

use crate::error::{VoiceError, VoiceResult};
use crate::locale::language_of;
use crate::session::Utterance;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A voice offered by the platform engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    pub locale: String,
}

impl VoiceInfo {
    pub fn new(name: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locale: locale.into(),
        }
    }
}

/// What the engine is asked to say. `voice: None` means the platform default voice.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub locale: String,
    pub voice: Option<VoiceInfo>,
    pub rate: f32,
    pub pitch: f32,
}

/// Raw engine events for one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started,
    /// Word/sentence boundary reached at this character offset.
    Boundary { char_index: usize },
    Ended,
    Error(String),
}

/// Platform text-to-speech engine. Implement for the browser bridge, a cloud TTS + sink, etc.
pub trait SpeechSynthesizer: Send + Sync {
    /// Voice catalog. May be empty while the platform is still populating it.
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Start speaking, delivering this utterance's events on `events`.
    fn speak(
        &self,
        request: SynthesisRequest,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> VoiceResult<()>;

    /// Silence everything currently playing or queued in the engine.
    fn cancel(&self);
}

/// Playback lifecycle reported to the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started,
    /// Caption reveal position.
    Progress { char_index: usize },
    Completed,
    Failed(VoiceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackNotice {
    pub utterance_id: u64,
    pub event: PlaybackEvent,
}

pub type OnPlaybackEvent = Arc<dyn Fn(PlaybackNotice) + Send + Sync>;

/// Best-effort voice choice: hinted name → exact locale → same language → any voice →
/// platform default (`None`). Never blocks on, or fails because of, an empty catalog.
pub fn select_voice(voices: &[VoiceInfo], locale: &str, hint: Option<&str>) -> Option<VoiceInfo> {
    if let Some(hint) = hint {
        if let Some(v) = voices.iter().find(|v| v.name.eq_ignore_ascii_case(hint)) {
            return Some(v.clone());
        }
    }
    let wanted = locale.replace('_', "-");
    if let Some(v) = voices
        .iter()
        .find(|v| v.locale.replace('_', "-").eq_ignore_ascii_case(&wanted))
    {
        return Some(v.clone());
    }
    let lang = language_of(locale);
    if let Some(v) = voices.iter().find(|v| language_of(&v.locale) == lang) {
        return Some(v.clone());
    }
    voices.first().cloned()
}

/// Owns the speech engine; at most one utterance is audible.
pub struct SpeechPlaybackController {
    synth: Arc<dyn SpeechSynthesizer>,
    on_event: OnPlaybackEvent,
    /// Id of the audible utterance, 0 when silent.
    active: Arc<AtomicU64>,
    next_id: u64,
    forward: Option<JoinHandle<()>>,
}

impl SpeechPlaybackController {
    pub fn new(synth: Arc<dyn SpeechSynthesizer>, on_event: OnPlaybackEvent) -> Self {
        Self {
            synth,
            on_event,
            active: Arc::new(AtomicU64::new(0)),
            next_id: 0,
            forward: None,
        }
    }

    /// Cancel anything playing, then start `utterance`. Returns its id.
    pub fn speak(&mut self, utterance: &Utterance) -> VoiceResult<u64> {
        self.cancel();

        self.next_id += 1;
        let id = self.next_id;

        if utterance.text.trim().is_empty() {
            debug!(target: "agri::voice", utterance_id = id, "Empty utterance, nothing to say");
            (self.on_event)(PlaybackNotice {
                utterance_id: id,
                event: PlaybackEvent::Completed,
            });
            return Ok(id);
        }

        let voice = select_voice(
            &self.synth.voices(),
            &utterance.locale,
            utterance.voice_hint.as_deref(),
        );
        let request = SynthesisRequest {
            text: utterance.text.clone(),
            locale: utterance.locale.clone(),
            voice,
            rate: utterance.rate,
            pitch: utterance.pitch,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.active.store(id, Ordering::SeqCst);
        if let Err(e) = self.synth.speak(request, tx) {
            self.active.store(0, Ordering::SeqCst);
            warn!(target: "agri::voice", utterance_id = id, error = %e, "Synthesizer refused utterance");
            return Err(match e {
                VoiceError::Playback(_) => e,
                other => VoiceError::Playback(other.to_string()),
            });
        }

        self.forward = Some(tokio::spawn(forward(
            id,
            rx,
            Arc::clone(&self.active),
            Arc::clone(&self.on_event),
        )));
        info!(target: "agri::voice", utterance_id = id, chars = utterance.text.len(), "🔊 Speaking");
        Ok(id)
    }

    /// Stop playback immediately. Safe to call when silent.
    pub fn cancel(&mut self) {
        if let Some(forward) = self.forward.take() {
            forward.abort();
        }
        let was = self.active.swap(0, Ordering::SeqCst);
        self.synth.cancel();
        if was != 0 {
            info!(target: "agri::voice", utterance_id = was, "Playback cancelled");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) != 0
    }

    pub fn active_utterance(&self) -> Option<u64> {
        match self.active.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }
}

impl Drop for SpeechPlaybackController {
    fn drop(&mut self) {
        if let Some(forward) = self.forward.take() {
            forward.abort();
        }
        if self.active.swap(0, Ordering::SeqCst) != 0 {
            self.synth.cancel();
        }
    }
}

async fn forward(
    id: u64,
    mut rx: mpsc::UnboundedReceiver<SynthesisEvent>,
    active: Arc<AtomicU64>,
    on_event: OnPlaybackEvent,
) {
    let emit = |event: PlaybackEvent| {
        on_event(PlaybackNotice {
            utterance_id: id,
            event,
        })
    };
    let finish = || {
        active
            .compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    };

    while let Some(event) = rx.recv().await {
        if active.load(Ordering::SeqCst) != id {
            return;
        }
        match event {
            SynthesisEvent::Started => emit(PlaybackEvent::Started),
            SynthesisEvent::Boundary { char_index } => emit(PlaybackEvent::Progress { char_index }),
            SynthesisEvent::Ended => {
                if finish() {
                    emit(PlaybackEvent::Completed);
                }
                return;
            }
            SynthesisEvent::Error(message) => {
                if finish() {
                    emit(PlaybackEvent::Failed(VoiceError::Playback(message)));
                }
                return;
            }
        }
    }

    if finish() {
        emit(PlaybackEvent::Failed(VoiceError::Playback(
            "synthesizer closed without finishing".to_string(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<VoiceInfo> {
        vec![
            VoiceInfo::new("Daniel", "en-GB"),
            VoiceInfo::new("Lekha", "hi-IN"),
            VoiceInfo::new("Veena", "en-IN"),
        ]
    }

    #[test]
    fn exact_locale_wins() {
        let v = select_voice(&catalog(), "en_IN", None).unwrap();
        assert_eq!(v.name, "Veena");
    }

    #[test]
    fn falls_back_to_language_then_anything() {
        assert_eq!(select_voice(&catalog(), "hi-XX", None).unwrap().name, "Lekha");
        assert_eq!(select_voice(&catalog(), "ta-IN", None).unwrap().name, "Daniel");
    }

    #[test]
    fn hint_overrides_locale_and_empty_catalog_is_default() {
        assert_eq!(select_voice(&catalog(), "en-IN", Some("lekha")).unwrap().name, "Lekha");
        assert!(select_voice(&[], "en-IN", Some("Lekha")).is_none());
    }
}
