//! Voice interaction state machine - the coordination layer
//!
//! One actor task owns the `VoiceSession` and is the only thing that starts or stops
//! capture, dispatch, polling and playback. Every input (user commands, capture events,
//! dispatch replies, poll outcomes, playback events) arrives on a channel and is applied
//! one at a time; anything a transition's side effects emit is queued behind it.
//!
//! ```text
//!            toggle(start)                 silence / toggle(stop)
//!   Idle ─────────────────▶ Listening ─────────────────────────▶ Processing ──ack──┐
//!    ▲                          ▲  toggle(start) from any state      │    ▲        │
//!    │ playback done            └────────────────────────────────────┤    └─poll───┘
//!    │                                                               │ final answer
//!    ├──────────────────────── Responding ◀──────────────────────────┤
//!    └──────────────────────── Error ◀───── dispatch/poll failure ───┘
//! ```

use crate::backend::VoiceBackend;
use crate::capture::{CaptureEvent, CaptureNotice, SpeechCaptureSession, SpeechRecognizer};
use crate::config::VoiceConfig;
use crate::conversation::Message;
use crate::dispatch::{DispatchResult, QueryDispatcher};
use crate::error::{VoiceError, VoiceResult};
use crate::locale::{apology, normalize_locale};
use crate::playback::{PlaybackEvent, PlaybackNotice, SpeechPlaybackController, SpeechSynthesizer};
use crate::poller::{PollHandle, PollOutcome, ResultPoller};
use crate::session::{
    GeoPoint, PendingRequest, RequestTicket, Transcript, Utterance, VoiceSession, VoiceState,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const UPDATE_CAPACITY: usize = 256;

/// Platform engines and backend the machine drives.
#[derive(Clone)]
pub struct VoiceEngines {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub backend: Arc<dyn VoiceBackend>,
}

/// Everything observers (UI, CLI, tests) may want to render.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceUpdate {
    StateChanged { from: VoiceState, to: VoiceState },
    Transcript(Transcript),
    MessageAppended(Message),
    /// Playback reached this character of the utterance being spoken.
    Caption { utterance_id: u64, char_index: usize },
    /// A failure surfaced to the user (apologies are logged separately as messages).
    Failure(VoiceError),
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: VoiceState,
    pub current_request_id: Option<String>,
    pub transcript: String,
    pub messages: Vec<Message>,
    pub capture_active: bool,
    pub playback_active: bool,
    pub poll_armed: bool,
}

#[derive(Debug)]
enum Command {
    Toggle,
    StartListening,
    StopListening,
    SetLocation(Option<GeoPoint>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

#[derive(Debug)]
enum MachineEvent {
    Capture(CaptureNotice),
    Dispatched {
        epoch: u64,
        result: VoiceResult<DispatchResult>,
    },
    Poll {
        ticket: RequestTicket,
        outcome: PollOutcome,
    },
    Playback(PlaybackNotice),
}

/// Cloneable front door to a running state machine.
#[derive(Clone)]
pub struct VoiceHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<VoiceState>,
    updates: broadcast::Sender<VoiceUpdate>,
}

impl VoiceHandle {
    /// Start listening unless already listening, in which case stop and submit.
    pub fn toggle(&self) -> VoiceResult<()> {
        self.send(Command::Toggle)
    }

    pub fn start_listening(&self) -> VoiceResult<()> {
        self.send(Command::StartListening)
    }

    pub fn stop_listening(&self) -> VoiceResult<()> {
        self.send(Command::StopListening)
    }

    /// Location attached to subsequent queries.
    pub fn set_location(&self, location: Option<GeoPoint>) -> VoiceResult<()> {
        self.send(Command::SetLocation(location))
    }

    pub async fn snapshot(&self) -> VoiceResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await
            .map_err(|e| VoiceError::ChannelSend(format!("state machine gone: {}", e)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceUpdate> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> VoiceState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<VoiceState> {
        self.state.clone()
    }

    pub fn shutdown(&self) -> VoiceResult<()> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands
            .send(command)
            .map_err(|e| VoiceError::ChannelSend(format!("state machine gone: {:?}", e.0)))
    }
}

/// The coordinator. Build with [`VoiceInteractionStateMachine::spawn`].
pub struct VoiceInteractionStateMachine {
    locale: String,
    config: VoiceConfig,
    session: VoiceSession,
    capture: SpeechCaptureSession,
    playback: SpeechPlaybackController,
    dispatcher: QueryDispatcher,
    poller: ResultPoller,
    poll: Option<PollHandle>,
    current_request: watch::Sender<Option<RequestTicket>>,
    state_tx: watch::Sender<VoiceState>,
    updates: broadcast::Sender<VoiceUpdate>,
    events_tx: mpsc::UnboundedSender<MachineEvent>,
}

impl VoiceInteractionStateMachine {
    /// Validate `config`, wire the engines, and start the actor on the current runtime.
    pub fn spawn(config: VoiceConfig, engines: VoiceEngines) -> VoiceResult<(VoiceHandle, JoinHandle<()>)> {
        config.validate()?;
        info!(target: "agri::voice", locale = %config.locale, "🎭 Initializing voice interaction state machine");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(VoiceState::Idle);
        let (current_request, _) = watch::channel(None);
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);

        let capture = {
            let tx = events_tx.clone();
            SpeechCaptureSession::new(
                engines.recognizer,
                &config.capture,
                Arc::new(move |notice| {
                    let _ = tx.send(MachineEvent::Capture(notice));
                }),
            )
        };
        let playback = {
            let tx = events_tx.clone();
            SpeechPlaybackController::new(
                engines.synthesizer,
                Arc::new(move |notice| {
                    let _ = tx.send(MachineEvent::Playback(notice));
                }),
            )
        };

        let machine = Self {
            locale: normalize_locale(&config.locale),
            dispatcher: QueryDispatcher::new(Arc::clone(&engines.backend)),
            poller: ResultPoller::new(engines.backend, config.poll.clone()),
            config,
            session: VoiceSession::new(),
            capture,
            playback,
            poll: None,
            current_request,
            state_tx,
            updates: updates.clone(),
            events_tx,
        };

        let task = tokio::spawn(machine.run(commands_rx, events_rx));
        let handle = VoiceHandle {
            commands: commands_tx,
            state: state_rx,
            updates,
        };
        Ok((handle, task))
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<MachineEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = events.recv() => self.on_event(event),
            }
        }
        self.teardown();
        info!(target: "agri::voice", "🛑 Voice interaction state machine stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Toggle => {
                if self.session.state == VoiceState::Listening {
                    self.stop_listening();
                } else {
                    self.start_listening();
                }
            }
            Command::StartListening => self.start_listening(),
            Command::StopListening => self.stop_listening(),
            Command::SetLocation(location) => self.session.location = location,
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn on_event(&mut self, event: MachineEvent) {
        match event {
            MachineEvent::Capture(notice) => self.on_capture(notice),
            MachineEvent::Dispatched { epoch, result } => self.on_dispatched(epoch, result),
            MachineEvent::Poll { ticket, outcome } => self.on_poll(ticket, outcome),
            MachineEvent::Playback(notice) => self.on_playback(notice),
        }
    }

    /// `toggle(start)` from any state: barge-in, fresh request slot, clean buffer.
    fn start_listening(&mut self) {
        if self.session.state == VoiceState::Listening {
            debug!(target: "agri::voice", "Already listening");
            return;
        }
        if !self.capture.is_available() {
            warn!(target: "agri::voice", state = %self.session.state, "Speech capture unavailable");
            self.publish(VoiceUpdate::Failure(VoiceError::CaptureUnavailable));
            return;
        }

        if self.playback.is_active() || self.session.active_utterance.is_some() {
            info!(target: "agri::voice", "⚡ Barge-in: silencing playback");
        }
        self.playback.cancel();
        self.session.active_utterance = None;

        let slot = self.session.open_request_slot();
        self.current_request.send_replace(None);
        // The old loop notices it is stale on its next tick.
        self.poll = None;
        self.session.transcript_buffer.clear();

        match self.capture.start(&self.locale) {
            Ok(epoch) => {
                debug!(target: "agri::voice", slot, epoch, "Listening");
                self.session.capture_epoch = Some(epoch);
                self.set_state(VoiceState::Listening);
            }
            Err(VoiceError::CaptureUnavailable) => {
                warn!(target: "agri::voice", "Speech capture went away mid-start");
                self.publish(VoiceUpdate::Failure(VoiceError::CaptureUnavailable));
                self.set_state(VoiceState::Idle);
            }
            Err(e) => self.fail(e),
        }
    }

    /// `toggle(stop)`: manual finalize. Stops capture first so a racing silence
    /// endpoint from the same run is discarded as stale.
    fn stop_listening(&mut self) {
        if self.session.state != VoiceState::Listening {
            debug!(target: "agri::voice", state = %self.session.state, "Stop ignored, not listening");
            return;
        }
        let text = self.capture.stop();
        self.session.capture_epoch = None;
        if text.is_empty() {
            debug!(target: "agri::voice", "Nothing heard, back to idle");
            self.session.transcript_buffer.clear();
            self.set_state(VoiceState::Idle);
        } else {
            self.submit(text);
        }
    }

    fn on_capture(&mut self, notice: CaptureNotice) {
        if self.session.state != VoiceState::Listening
            || self.session.capture_epoch != Some(notice.epoch)
        {
            debug!(target: "agri::voice", epoch = notice.epoch, "Stale capture event dropped");
            return;
        }
        match notice.event {
            CaptureEvent::Transcript(transcript) => {
                self.session.transcript_buffer = transcript.text.clone();
                self.publish(VoiceUpdate::Transcript(transcript));
            }
            CaptureEvent::Finalized(text) => {
                self.capture.stop();
                self.session.capture_epoch = None;
                self.submit(text);
            }
            CaptureEvent::Failed(error) => {
                self.capture.stop();
                self.session.capture_epoch = None;
                self.fail(error);
            }
            CaptureEvent::Ended => {
                info!(target: "agri::voice", "Recognizer gave up without hearing anything");
                self.capture.stop();
                self.session.capture_epoch = None;
                self.session.transcript_buffer.clear();
                self.set_state(VoiceState::Idle);
            }
        }
    }

    /// Log the user turn and hand it to the dispatcher.
    fn submit(&mut self, text: String) {
        self.session.transcript_buffer = text.clone();
        let message = self.session.append(Message::user(text.clone()));
        self.publish(VoiceUpdate::MessageAppended(message));
        self.set_state(VoiceState::Processing);

        let epoch = self.session.query_epoch;
        let dispatcher = self.dispatcher.clone();
        let locale = self.locale.clone();
        let geo = self.session.location;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = dispatcher.submit(&text, &locale, geo).await;
            let _ = tx.send(MachineEvent::Dispatched { epoch, result });
        });
    }

    fn on_dispatched(&mut self, epoch: u64, result: VoiceResult<DispatchResult>) {
        if epoch != self.session.query_epoch || self.session.state != VoiceState::Processing {
            debug!(target: "agri::voice", epoch, "Stale dispatch reply dropped");
            return;
        }
        match result {
            Ok(DispatchResult::Final { text }) => self.respond(text),
            Ok(DispatchResult::Ack { request_id }) => self.await_result(request_id),
            Err(error) => self.fail(error),
        }
    }

    /// `ackReceived`: remember the id and start polling for it.
    fn await_result(&mut self, request_id: String) {
        let ticket = RequestTicket::new(self.session.query_epoch, request_id.clone());
        self.session.current_request_id = Some(request_id);
        self.current_request.send_replace(Some(ticket.clone()));

        let tx = self.events_tx.clone();
        let tag = ticket.clone();
        self.poll = Some(self.poller.start_polling(
            PendingRequest::new(ticket),
            self.current_request.subscribe(),
            move |outcome| {
                let _ = tx.send(MachineEvent::Poll {
                    ticket: tag,
                    outcome,
                });
            },
        ));
    }

    fn on_poll(&mut self, ticket: RequestTicket, outcome: PollOutcome) {
        if self.session.state != VoiceState::Processing
            || ticket.slot != self.session.query_epoch
            || self.session.current_request_id.as_deref() != Some(ticket.id.as_str())
        {
            debug!(target: "agri::voice", request_id = %ticket.id, slot = ticket.slot, "Result for superseded request dropped");
            return;
        }
        self.poll = None;
        self.session.current_request_id = None;
        self.current_request.send_replace(None);

        match outcome {
            PollOutcome::Completed(text) => self.respond(text),
            PollOutcome::Failed(message) => self.fail(VoiceError::Polling(message)),
            PollOutcome::TimedOut { attempts } => self.fail(VoiceError::PollingTimeout { attempts }),
        }
    }

    /// `finalAnswer`: log it and say it.
    fn respond(&mut self, text: String) {
        let message = self.session.append(Message::assistant(text.clone()));
        self.publish(VoiceUpdate::MessageAppended(message));
        self.set_state(VoiceState::Responding);
        self.speak(text);
    }

    /// One apology, logged and spoken, then `Error` until playback ends.
    fn fail(&mut self, error: VoiceError) {
        warn!(target: "agri::voice", error = %error, state = %self.session.state, "Voice turn failed");
        let text = apology(&self.locale, error.kind()).to_string();
        self.publish(VoiceUpdate::Failure(error));
        let message = self.session.append(Message::assistant(text.clone()));
        self.publish(VoiceUpdate::MessageAppended(message));
        self.set_state(VoiceState::Error);
        self.speak(text);
    }

    fn speak(&mut self, text: String) {
        let utterance = Utterance {
            text,
            locale: self.locale.clone(),
            voice_hint: self.config.playback.voice_hint.clone(),
            rate: self.config.playback.rate,
            pitch: self.config.playback.pitch,
        };
        match self.playback.speak(&utterance) {
            Ok(id) => self.session.active_utterance = Some(id),
            Err(error) => {
                warn!(target: "agri::voice", error = %error, "Playback could not start");
                self.session.active_utterance = None;
                self.publish(VoiceUpdate::Failure(error));
                self.set_state(VoiceState::Idle);
            }
        }
    }

    fn on_playback(&mut self, notice: PlaybackNotice) {
        if self.session.active_utterance != Some(notice.utterance_id) {
            debug!(target: "agri::voice", utterance_id = notice.utterance_id, "Event for cancelled utterance dropped");
            return;
        }
        match notice.event {
            PlaybackEvent::Started => {
                debug!(target: "agri::voice", utterance_id = notice.utterance_id, "Playback started");
            }
            PlaybackEvent::Progress { char_index } => self.publish(VoiceUpdate::Caption {
                utterance_id: notice.utterance_id,
                char_index,
            }),
            PlaybackEvent::Completed => {
                self.session.active_utterance = None;
                self.finish_speaking();
            }
            PlaybackEvent::Failed(error) => {
                warn!(target: "agri::voice", error = %error, "Playback failed, not retrying");
                self.session.active_utterance = None;
                self.publish(VoiceUpdate::Failure(error));
                self.finish_speaking();
            }
        }
    }

    fn finish_speaking(&mut self) {
        if matches!(
            self.session.state,
            VoiceState::Responding | VoiceState::Error
        ) {
            self.set_state(VoiceState::Idle);
        }
    }

    fn set_state(&mut self, next: VoiceState) {
        let prev = self.session.state;
        if prev == next {
            return;
        }
        self.session.state = next;
        self.state_tx.send_replace(next);
        info!(target: "agri::voice", from = %prev, to = %next, "State transition");
        self.publish(VoiceUpdate::StateChanged { from: prev, to: next });
    }

    fn publish(&self, update: VoiceUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.session.state(),
            current_request_id: self.session.current_request_id().map(String::from),
            transcript: self.session.transcript_buffer().to_string(),
            messages: self.session.log().messages().to_vec(),
            capture_active: self.capture.is_active(),
            playback_active: self.session.active_utterance.is_some(),
            poll_armed: self.session.current_request_id.is_some()
                && self.poll.as_ref().is_some_and(|p| !p.is_finished()),
        }
    }

    fn teardown(&mut self) {
        self.capture.stop();
        self.playback.cancel();
        if let Some(poll) = self.poll.take() {
            debug!(target: "agri::voice", request_id = %poll.ticket().id, "Cancelling result poll");
            poll.cancel();
        }
        self.current_request.send_replace(None);
        self.session.active_utterance = None;
        self.session.capture_epoch = None;
        self.set_state(VoiceState::Idle);
    }
}
