//! Cancellable, re-armable timer used by silence endpointing and poll budgets.
//!
//! Built on `tokio::time`, so tests running with a paused clock fast-forward it.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep_until, Instant, Sleep};

/// A deadline that can be armed, re-armed (reset) and disarmed.
///
/// `wait()` never completes while disarmed, so it can sit in a `select!` unconditionally.
pub struct Deadline {
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

impl Deadline {
    pub fn disarmed() -> Self {
        Self {
            sleep: Box::pin(sleep_until(Instant::now())),
            armed: false,
        }
    }

    pub fn armed_after(after: Duration) -> Self {
        let mut deadline = Self::disarmed();
        deadline.arm(after);
        deadline
    }

    /// (Re)start the countdown from now.
    pub fn arm(&mut self, after: Duration) {
        self.sleep.as_mut().reset(Instant::now() + after);
        self.armed = true;
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Resolve when the armed deadline passes; disarms itself on expiry.
    pub async fn wait(&mut self) {
        if !self.armed {
            pending::<()>().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}
