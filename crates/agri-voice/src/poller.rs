//! Result polling for acknowledged queries.
//!
//! Fixed-interval loop bounded by an attempt count and/or a wall-clock budget. Two rules
//! keep concurrent queries from racing:
//! - **staleness**: once the session's current request ticket (slot + id) no longer
//!   matches, the loop stops silently, and a response that lands after supersession is
//!   dropped;
//! - **single-flight**: a tick that finds a status call still outstanding is skipped.

use crate::backend::{ResultStatus, VoiceBackend};
use crate::config::PollConfig;
use crate::error::VoiceResult;
use crate::session::{PendingRequest, RequestTicket};
use crate::timer::Deadline;
use futures::future::{BoxFuture, OptionFuture};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How a poll loop ended. Superseded loops end without any outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(String),
    Failed(String),
    TimedOut { attempts: u32 },
}

/// Handle to a running poll loop. Dropping it detaches the loop; `cancel()` stops it.
#[derive(Debug)]
pub struct PollHandle {
    ticket: RequestTicket,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn ticket(&self) -> &RequestTicket {
        &self.ticket
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Clone)]
pub struct ResultPoller {
    backend: Arc<dyn VoiceBackend>,
    config: PollConfig,
}

impl ResultPoller {
    pub fn new(backend: Arc<dyn VoiceBackend>, config: PollConfig) -> Self {
        Self { backend, config }
    }

    /// Poll `request` until it resolves, times out, or stops being `current`.
    ///
    /// `on_outcome` runs at most once; never for a superseded request.
    pub fn start_polling<F>(
        &self,
        request: PendingRequest,
        current: watch::Receiver<Option<RequestTicket>>,
        on_outcome: F,
    ) -> PollHandle
    where
        F: FnOnce(PollOutcome) + Send + 'static,
    {
        let ticket = request.ticket.clone();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.backend),
            self.config.clone(),
            request,
            current,
            on_outcome,
        ));
        PollHandle { ticket, task }
    }
}

async fn poll_loop<F>(
    backend: Arc<dyn VoiceBackend>,
    config: PollConfig,
    mut pending: PendingRequest,
    current: watch::Receiver<Option<RequestTicket>>,
    on_outcome: F,
) where
    F: FnOnce(PollOutcome) + Send + 'static,
{
    let ticket = pending.ticket.clone();
    let id = ticket.id.clone();
    let is_current = || current.borrow().as_ref() == Some(&ticket);
    let limit = config.attempt_limit();

    let period = config.interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut budget = match config.budget() {
        Some(budget) => Deadline::armed_after(budget),
        None => Deadline::disarmed(),
    };
    let mut in_flight: Option<BoxFuture<'static, VoiceResult<ResultStatus>>> = None;

    info!(target: "agri::voice", request_id = %id, "⏳ Polling for result");

    loop {
        tokio::select! {
            _ = budget.wait() => {
                if !is_current() {
                    return;
                }
                warn!(target: "agri::voice", request_id = %id, attempts = pending.attempts, "Poll budget exhausted");
                on_outcome(PollOutcome::TimedOut { attempts: pending.attempts });
                return;
            }
            _ = ticker.tick() => {
                if !is_current() {
                    debug!(target: "agri::voice", request_id = %id, "Request superseded, polling stopped");
                    return;
                }
                if in_flight.is_some() {
                    debug!(target: "agri::voice", request_id = %id, "Status call still in flight, skipping tick");
                    continue;
                }
                pending.attempts += 1;
                let backend = Arc::clone(&backend);
                let request_id = id.clone();
                in_flight = Some(Box::pin(async move { backend.fetch_result(&request_id).await }));
            }
            Some(result) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                in_flight = None;
                if !is_current() {
                    debug!(target: "agri::voice", request_id = %id, "Discarding result for superseded request");
                    return;
                }
                match result {
                    Ok(ResultStatus::Completed { speech }) => {
                        info!(
                            target: "agri::voice",
                            request_id = %id,
                            attempts = pending.attempts,
                            waited_ms = (chrono::Utc::now() - pending.submitted_at).num_milliseconds(),
                            "Result ready"
                        );
                        on_outcome(PollOutcome::Completed(speech));
                        return;
                    }
                    Ok(ResultStatus::Error { error }) => {
                        warn!(target: "agri::voice", request_id = %id, %error, "Backend reported failure");
                        on_outcome(PollOutcome::Failed(error));
                        return;
                    }
                    Ok(ResultStatus::Processing) | Ok(ResultStatus::Unknown) => {
                        debug!(target: "agri::voice", request_id = %id, attempt = pending.attempts, "Still processing");
                    }
                    Err(e) => {
                        debug!(target: "agri::voice", request_id = %id, attempt = pending.attempts, error = %e, "Transient poll failure");
                    }
                }
                if limit.is_some_and(|limit| pending.attempts >= limit) {
                    warn!(target: "agri::voice", request_id = %id, attempts = pending.attempts, "Poll attempts exhausted");
                    on_outcome(PollOutcome::TimedOut { attempts: pending.attempts });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{QueryReply, QueryRequest};
    use crate::error::VoiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Replies from a script, then `processing` forever.
    struct ScriptedStatus {
        script: Mutex<Vec<VoiceResult<ResultStatus>>>,
        delay: Duration,
        calls: AtomicU32,
        concurrent: AtomicU32,
        max_concurrent: AtomicU32,
    }

    impl ScriptedStatus {
        fn new(script: Vec<VoiceResult<ResultStatus>>, delay: Duration) -> Arc<Self> {
            let mut script = script;
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                delay,
                calls: AtomicU32::new(0),
                concurrent: AtomicU32::new(0),
                max_concurrent: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl VoiceBackend for ScriptedStatus {
        async fn submit(&self, _request: &QueryRequest) -> VoiceResult<QueryReply> {
            unreachable!("poller never submits")
        }

        async fn fetch_result(&self, _request_id: &str) -> VoiceResult<ResultStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(ResultStatus::Processing))
        }
    }

    fn r1() -> RequestTicket {
        RequestTicket::new(1, "r1")
    }

    fn config(interval_ms: u64, max_attempts: u32, budget_ms: u64) -> PollConfig {
        PollConfig {
            interval_ms,
            max_attempts,
            budget_ms,
        }
    }

    fn start(
        backend: Arc<ScriptedStatus>,
        config: PollConfig,
        current: watch::Receiver<Option<RequestTicket>>,
    ) -> (PollHandle, oneshot::Receiver<PollOutcome>, Arc<AtomicU32>) {
        let (tx, rx) = oneshot::channel();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let poller = ResultPoller::new(backend, config);
        let handle = poller.start_polling(PendingRequest::new(r1()), current, move |outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(outcome);
        });
        (handle, rx, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn completes_on_third_tick() {
        let backend = ScriptedStatus::new(
            vec![
                Ok(ResultStatus::Processing),
                Ok(ResultStatus::Processing),
                Ok(ResultStatus::Completed {
                    speech: "Tomato is ₹20 per kg".into(),
                }),
            ],
            Duration::ZERO,
        );
        let (_tx, current) = watch::channel(Some(r1()));
        let started = Instant::now();
        let (_handle, rx, _) = start(backend.clone(), config(1000, 60, 90_000), current);

        let outcome = rx.await.unwrap();
        assert_eq!(outcome, PollOutcome::Completed("Tomato is ₹20 per kg".into()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn always_processing_times_out_exactly_once() {
        let backend = ScriptedStatus::new(vec![], Duration::ZERO);
        let (_tx, current) = watch::channel(Some(r1()));
        let (handle, rx, fired) = start(backend.clone(), config(1000, 5, 0), current);

        let outcome = rx.await.unwrap();
        assert_eq!(outcome, PollOutcome::TimedOut { attempts: 5 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_budget_bounds_slow_backend() {
        let backend = ScriptedStatus::new(vec![], Duration::from_millis(2500));
        let (_tx, current) = watch::channel(Some(r1()));
        let started = Instant::now();
        let (_handle, rx, fired) = start(backend.clone(), config(1000, 0, 10_000), current);

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, PollOutcome::TimedOut { .. }));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(backend.max_concurrent.load(Ordering::SeqCst), 1);
        // calls at t=1, 4, 7 and 10 at most; skipped ticks never overlap calls
        assert!(backend.calls.load(Ordering::SeqCst) <= 4);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_are_retried() {
        let backend = ScriptedStatus::new(
            vec![
                Err(VoiceError::Polling("connection reset".into())),
                Err(VoiceError::Polling("503".into())),
                Ok(ResultStatus::Completed { speech: "ok".into() }),
            ],
            Duration::ZERO,
        );
        let (_tx, current) = watch::channel(Some(r1()));
        let (_handle, rx, _) = start(backend.clone(), config(1000, 60, 90_000), current);

        assert_eq!(rx.await.unwrap(), PollOutcome::Completed("ok".into()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_status_fails() {
        let backend = ScriptedStatus::new(
            vec![Ok(ResultStatus::Error {
                error: "no crop data".into(),
            })],
            Duration::ZERO,
        );
        let (_tx, current) = watch::channel(Some(r1()));
        let (_handle, rx, _) = start(backend, config(1000, 60, 90_000), current);
        assert_eq!(rx.await.unwrap(), PollOutcome::Failed("no crop data".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_request_never_reports() {
        let backend = ScriptedStatus::new(
            vec![
                Ok(ResultStatus::Processing),
                Ok(ResultStatus::Completed { speech: "late".into() }),
            ],
            Duration::from_millis(1500),
        );
        let (tx, current) = watch::channel(Some(r1()));
        let (handle, mut rx, fired) = start(backend.clone(), config(1000, 60, 90_000), current);

        // second call is in flight from t=3.0 to t=4.5; supersede in between
        tokio::time::sleep(Duration::from_millis(3200)).await;
        tx.send_replace(Some(RequestTicket::new(1, "r2")));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
        assert!(handle.is_finished());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reused_id_in_new_slot_is_still_superseded() {
        let backend = ScriptedStatus::new(
            vec![
                Ok(ResultStatus::Processing),
                Ok(ResultStatus::Completed { speech: "old turn".into() }),
            ],
            Duration::ZERO,
        );
        let (tx, current) = watch::channel(Some(r1()));
        let (handle, mut rx, fired) = start(backend.clone(), config(1000, 60, 90_000), current);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        // Same id handed out again for the next query.
        tx.send_replace(Some(RequestTicket::new(2, "r1")));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
        assert!(handle.is_finished());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.ticket(), &r1());
    }
}
