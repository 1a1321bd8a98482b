//! **Speech capture** — continuous recognition with silence endpointing.
//!
//! Wraps a platform `SpeechRecognizer` (browser engine, cloud streaming STT, a console
//! stub) and turns its segment stream into live transcripts plus one finalized utterance.
//! Every update, interim or final, restarts the silence countdown; when it runs out the
//! buffered text is committed. An empty buffer never produces a finalized event.

use crate::config::CaptureConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::session::Transcript;
use crate::timer::Deadline;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Raw events from a recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// A recognized segment. Interim segments are replaced by whatever comes next.
    Segment { text: String, is_final: bool },
    /// Engine heard nothing. Non-fatal, absorbed.
    NoSpeech,
    /// Engine died (permission revoked, device lost, network gone).
    Fault(String),
    /// Engine stopped producing results on its own.
    Ended,
}

/// Platform speech-to-text engine. Implement for the browser bridge, a cloud STT stream, etc.
pub trait SpeechRecognizer: Send + Sync {
    /// False when the platform has no recognition capability at all.
    fn is_available(&self) -> bool;

    /// Begin continuous recognition, delivering events on `events` until `stop()`.
    fn start(&self, locale: &str, events: mpsc::UnboundedSender<RecognizerEvent>) -> VoiceResult<()>;

    fn stop(&self);
}

/// What capture reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Transcript(Transcript),
    Finalized(String),
    Failed(VoiceError),
    /// Engine stopped on its own before anything was heard.
    Ended,
}

/// A capture event tagged with the capture run that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureNotice {
    pub epoch: u64,
    pub event: CaptureEvent,
}

pub type OnCaptureEvent = Arc<dyn Fn(CaptureNotice) + Send + Sync>;

/// Finals accumulate; the latest interim trails them until replaced.
#[derive(Debug, Default)]
struct TranscriptAssembler {
    committed: String,
    interim: String,
}

impl TranscriptAssembler {
    fn apply(&mut self, text: &str, is_final: bool) {
        let text = text.trim();
        if is_final {
            if !text.is_empty() {
                if !self.committed.is_empty() {
                    self.committed.push(' ');
                }
                self.committed.push_str(text);
            }
            self.interim.clear();
        } else {
            self.interim = text.to_string();
        }
    }

    fn text(&self) -> String {
        match (self.committed.is_empty(), self.interim.is_empty()) {
            (_, true) => self.committed.clone(),
            (true, false) => self.interim.clone(),
            (false, false) => format!("{} {}", self.committed, self.interim),
        }
    }

    fn clear(&mut self) {
        self.committed.clear();
        self.interim.clear();
    }
}

fn lock(buffer: &Mutex<TranscriptAssembler>) -> MutexGuard<'_, TranscriptAssembler> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One microphone session at a time; owned and driven by the state machine.
pub struct SpeechCaptureSession {
    recognizer: Arc<dyn SpeechRecognizer>,
    silence_window: Duration,
    on_event: OnCaptureEvent,
    buffer: Arc<Mutex<TranscriptAssembler>>,
    pump: Option<JoinHandle<()>>,
    epoch: u64,
}

impl SpeechCaptureSession {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        config: &CaptureConfig,
        on_event: OnCaptureEvent,
    ) -> Self {
        Self {
            recognizer,
            silence_window: config.silence_window(),
            on_event,
            buffer: Arc::new(Mutex::new(TranscriptAssembler::default())),
            pump: None,
            epoch: 0,
        }
    }

    /// Start recognising in `locale`. Returns the epoch that tags this run's events.
    ///
    /// Fails synchronously with `CaptureUnavailable` when the platform cannot capture.
    pub fn start(&mut self, locale: &str) -> VoiceResult<u64> {
        if !self.recognizer.is_available() {
            return Err(VoiceError::CaptureUnavailable);
        }
        if self.is_active() {
            self.stop();
        }
        lock(&self.buffer).clear();

        let (tx, rx) = mpsc::unbounded_channel();
        self.recognizer
            .start(locale, tx)
            .map_err(|e| match e {
                VoiceError::Capture(_) | VoiceError::CaptureUnavailable => e,
                other => VoiceError::Capture(other.to_string()),
            })?;

        self.epoch += 1;
        let epoch = self.epoch;
        self.pump = Some(tokio::spawn(pump(
            epoch,
            rx,
            Arc::clone(&self.buffer),
            self.silence_window,
            Arc::clone(&self.on_event),
        )));
        info!(target: "agri::voice", epoch, locale, "🎤 Capture started");
        Ok(epoch)
    }

    /// Halt recognition and cancel the silence countdown. Returns whatever text was buffered.
    pub fn stop(&mut self) -> String {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            self.recognizer.stop();
            debug!(target: "agri::voice", epoch = self.epoch, "Capture stopped");
        }
        let text = lock(&self.buffer).text();
        text.trim().to_string()
    }

    pub fn is_available(&self) -> bool {
        self.recognizer.is_available()
    }

    pub fn is_active(&self) -> bool {
        self.pump.is_some()
    }

    /// Current assembled transcript.
    pub fn transcript(&self) -> String {
        lock(&self.buffer).text()
    }
}

impl Drop for SpeechCaptureSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            self.recognizer.stop();
        }
    }
}

async fn pump(
    epoch: u64,
    mut rx: mpsc::UnboundedReceiver<RecognizerEvent>,
    buffer: Arc<Mutex<TranscriptAssembler>>,
    silence_window: Duration,
    on_event: OnCaptureEvent,
) {
    let emit = |event: CaptureEvent| on_event(CaptureNotice { epoch, event });
    let mut silence = Deadline::disarmed();
    let mut engine_open = true;

    loop {
        tokio::select! {
            event = rx.recv(), if engine_open => match event {
                Some(RecognizerEvent::Segment { text, is_final }) => {
                    let assembled = {
                        let mut buf = lock(&buffer);
                        buf.apply(&text, is_final);
                        buf.text()
                    };
                    silence.arm(silence_window);
                    emit(CaptureEvent::Transcript(Transcript { text: assembled, is_final }));
                }
                Some(RecognizerEvent::NoSpeech) => {
                    debug!(target: "agri::voice", epoch, "No speech detected, still listening");
                }
                Some(RecognizerEvent::Fault(message)) => {
                    warn!(target: "agri::voice", epoch, error = %message, "Recognizer fault");
                    emit(CaptureEvent::Failed(VoiceError::Capture(message)));
                    return;
                }
                Some(RecognizerEvent::Ended) | None => {
                    engine_open = false;
                    if lock(&buffer).text().trim().is_empty() {
                        info!(target: "agri::voice", epoch, "Recognizer ended before anything was heard");
                        emit(CaptureEvent::Ended);
                        return;
                    }
                    // Buffered words still finalize when the silence window runs out.
                    debug!(target: "agri::voice", epoch, "Recognizer stream ended");
                }
            },
            _ = silence.wait() => {
                let text = lock(&buffer).text();
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                info!(target: "agri::voice", epoch, chars = text.len(), "✅ Silence window reached, utterance finalized");
                emit(CaptureEvent::Finalized(text.to_string()));
                return;
            }
        }
    }
}
