//! Terminal stand-ins for the platform speech engines.

use agri_voice::{
    RecognizerEvent, SpeechRecognizer, SpeechSynthesizer, SynthesisEvent, SynthesisRequest,
    VoiceError, VoiceInfo, VoiceResult,
};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Base speaking speed at rate 1.0.
const WORDS_PER_SECOND: f32 = 3.0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Typed lines become final recognition segments while a capture run is open.
#[derive(Default)]
pub struct ConsoleRecognizer {
    events: Mutex<Option<mpsc::UnboundedSender<RecognizerEvent>>>,
}

impl ConsoleRecognizer {
    /// Returns false when nobody is listening.
    pub fn hear(&self, line: &str) -> bool {
        match lock(&self.events).as_ref() {
            Some(tx) => tx
                .send(RecognizerEvent::Segment {
                    text: line.to_string(),
                    is_final: true,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl SpeechRecognizer for ConsoleRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&self, _locale: &str, events: mpsc::UnboundedSender<RecognizerEvent>) -> VoiceResult<()> {
        *lock(&self.events) = Some(events);
        Ok(())
    }

    fn stop(&self) {
        lock(&self.events).take();
    }
}

/// Prints the answer word by word at a speaking pace.
#[derive(Default)]
pub struct ConsoleSynthesizer {
    speaking: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        vec![
            VoiceInfo::new("console-en", "en-IN"),
            VoiceInfo::new("console-hi", "hi-IN"),
        ]
    }

    fn speak(
        &self,
        request: SynthesisRequest,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> VoiceResult<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| VoiceError::Playback(format!("no runtime for console playback: {}", e)))?;
        let per_word = Duration::from_secs_f32(1.0 / (WORDS_PER_SECOND * request.rate.max(0.1)));
        let voice = request.voice.map(|v| v.name).unwrap_or_else(|| "default".to_string());

        let task = handle.spawn(async move {
            let _ = events.send(SynthesisEvent::Started);
            print!("🔊 [{}] ", voice);
            let mut offset = 0;
            for word in request.text.split_inclusive(' ') {
                let _ = events.send(SynthesisEvent::Boundary { char_index: offset });
                print!("{}", word);
                let _ = std::io::stdout().flush();
                offset += word.chars().count();
                tokio::time::sleep(per_word).await;
            }
            println!();
            let _ = events.send(SynthesisEvent::Ended);
        });

        if let Some(previous) = lock(&self.speaking).replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self) {
        if let Some(task) = lock(&self.speaking).take() {
            if !task.is_finished() {
                task.abort();
                println!(" ⏹");
            }
        }
    }
}
