//! Scripted engines and backend shared by the integration tests.

#![allow(dead_code)]

use agri_voice::{
    QueryReply, QueryRequest, RecognizerEvent, ResultStatus, SpeechRecognizer, SpeechSynthesizer,
    SynthesisEvent, SynthesisRequest, VoiceBackend, VoiceConfig, VoiceEngines, VoiceError,
    VoiceHandle, VoiceInfo, VoiceResult, VoiceState,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let every ready task run without moving the clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn wait_for_state(handle: &VoiceHandle, want: VoiceState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == want))
        .await
        .unwrap_or_else(|_| panic!("never reached {}", want))
        .unwrap();
}

#[derive(Default)]
pub struct FakeRecognizer {
    unavailable: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<RecognizerEvent>>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeRecognizer {
    pub fn unavailable() -> Self {
        let recognizer = Self::default();
        recognizer.unavailable.store(true, Ordering::SeqCst);
        recognizer
    }

    pub fn is_listening(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    pub fn emit(&self, event: RecognizerEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn say(&self, text: &str, is_final: bool) {
        self.emit(RecognizerEvent::Segment {
            text: text.to_string(),
            is_final,
        });
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn start(&self, _locale: &str, events: mpsc::UnboundedSender<RecognizerEvent>) -> VoiceResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }
}

/// Speaks nothing; the test decides when each utterance ends.
#[derive(Default)]
pub struct FakeSynthesizer {
    pub spoken: Mutex<Vec<SynthesisRequest>>,
    events: Mutex<Option<mpsc::UnboundedSender<SynthesisEvent>>>,
    refuse: AtomicBool,
    pub cancels: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn refusing() -> Self {
        let synth = Self::default();
        synth.refuse.store(true, Ordering::SeqCst);
        synth
    }

    pub fn texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|r| r.text.clone()).collect()
    }

    pub fn emit(&self, event: SynthesisEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// End the current utterance the way a real engine does.
    pub fn finish(&self) {
        self.emit(SynthesisEvent::Ended);
    }
}

impl SpeechSynthesizer for FakeSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo::new("Veena", "en-IN"),
            VoiceInfo::new("Lekha", "hi-IN"),
        ]
    }

    fn speak(
        &self,
        request: SynthesisRequest,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> VoiceResult<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(VoiceError::Playback("audio output busy".to_string()));
        }
        self.spoken.lock().unwrap().push(request);
        let _ = events.send(SynthesisEvent::Started);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        // A cancelled engine may still report; the controller must ignore it.
        self.emit(SynthesisEvent::Ended);
        self.events.lock().unwrap().take();
    }
}

/// Replies are consumed in order; result statuses per request id, `processing` once exhausted.
#[derive(Default)]
pub struct FakeBackend {
    replies: Mutex<VecDeque<VoiceResult<QueryReply>>>,
    statuses: Mutex<HashMap<String, VecDeque<VoiceResult<ResultStatus>>>>,
    pub submitted: Mutex<Vec<QueryRequest>>,
    pub fetches: Mutex<Vec<String>>,
    fetch_delay: Duration,
}

impl FakeBackend {
    pub fn reply(self, reply: VoiceResult<QueryReply>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn status(self, request_id: &str, status: VoiceResult<ResultStatus>) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(request_id.to_string())
            .or_default()
            .push_back(status);
        self
    }

    /// Each status fetch takes this long before answering.
    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn fetches_for(&self, request_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == request_id)
            .count()
    }
}

#[async_trait]
impl VoiceBackend for FakeBackend {
    async fn submit(&self, request: &QueryRequest) -> VoiceResult<QueryReply> {
        self.submitted.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(VoiceError::Submission("no scripted reply".to_string())))
    }

    async fn fetch_result(&self, request_id: &str) -> VoiceResult<ResultStatus> {
        self.fetches.lock().unwrap().push(request_id.to_string());
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        self.statuses
            .lock()
            .unwrap()
            .get_mut(request_id)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(ResultStatus::Processing))
    }
}

pub struct Rig {
    pub handle: VoiceHandle,
    pub recognizer: Arc<FakeRecognizer>,
    pub synth: Arc<FakeSynthesizer>,
    pub backend: Arc<FakeBackend>,
}

impl Rig {
    pub fn spawn(config: VoiceConfig, recognizer: FakeRecognizer, synth: FakeSynthesizer, backend: FakeBackend) -> Self {
        init_tracing();
        let recognizer = Arc::new(recognizer);
        let synth = Arc::new(synth);
        let backend = Arc::new(backend);
        let engines = VoiceEngines {
            recognizer: recognizer.clone(),
            synthesizer: synth.clone(),
            backend: backend.clone(),
        };
        let (handle, _task) = agri_voice::VoiceInteractionStateMachine::spawn(config, engines).unwrap();
        Self {
            handle,
            recognizer,
            synth,
            backend,
        }
    }

    pub fn with_backend(backend: FakeBackend) -> Self {
        Self::spawn(
            VoiceConfig::default(),
            FakeRecognizer::default(),
            FakeSynthesizer::default(),
            backend,
        )
    }

    /// Start listening, say `text` as a final segment, and stop by hand.
    pub async fn ask(&self, text: &str) {
        self.handle.start_listening().unwrap();
        wait_for_state(&self.handle, VoiceState::Listening).await;
        self.recognizer.say(text, true);
        settle().await;
        self.handle.stop_listening().unwrap();
        settle().await;
    }
}
