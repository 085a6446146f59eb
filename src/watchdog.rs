//! Stream liveness watchdog.
//!
//! After a disruptive action (a server restart, say) the PTY session can go
//! quiet without ever closing. The client's read loop touches an
//! [`ActivityProbe`] for every message and every pass-through chunk; the
//! [`Watchdog`] waits on that probe and, if nothing arrives before the
//! deadline, asks the caller to reattach the stream.
//!
//! ```text
//! Idle ── guard() ──► Armed ──► activity ──► Satisfied
//!                       │
//!                       └─► deadline ──► Expired ── reattach, re-arm ──► Armed
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::WatchdogConfig;
use crate::error::{BridgeError, Result};

/// Counter bumped on every observed stream item.
#[derive(Clone, Debug)]
pub struct ActivityProbe {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for ActivityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityProbe {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Record activity.
    #[inline]
    pub fn touch(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Number of touches so far.
    pub fn count(&self) -> u64 {
        *self.tx.borrow()
    }

    /// A receiver that only reports activity from now on.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        let mut rx = self.tx.subscribe();
        rx.mark_unchanged();
        rx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Idle,
    Armed,
    Satisfied,
    Expired,
}

/// How a guarded period ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardOutcome {
    /// Reattachments performed before activity resumed.
    pub reattached: u32,
}

/// Forces reattachment when the stream stays silent too long.
pub struct Watchdog {
    probe: ActivityProbe,
    config: WatchdogConfig,
    state: Mutex<WatchdogState>,
}

impl Watchdog {
    pub fn new(probe: ActivityProbe, config: WatchdogConfig) -> Self {
        Self {
            probe,
            config,
            state: Mutex::new(WatchdogState::Idle),
        }
    }

    pub fn state(&self) -> WatchdogState {
        *self.state.lock()
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Deadline used after `attempt` reattachments.
    pub fn deadline_for(&self, attempt: u32) -> Duration {
        self.backoff(self.config.stale_after, attempt)
    }

    fn backoff(&self, stale_after: Duration, attempt: u32) -> Duration {
        let factor = self.config.backoff_factor.max(1).saturating_pow(attempt);
        stale_after.saturating_mul(factor)
    }

    fn set_state(&self, state: WatchdogState) {
        *self.state.lock() = state;
    }

    /// Arm with the configured `stale_after` and wait for activity.
    ///
    /// See [`Watchdog::guard_with`].
    pub async fn guard<F, Fut>(&self, reattach: F) -> Result<GuardOutcome>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.guard_with(self.config.stale_after, reattach).await
    }

    /// Arm with `stale_after` for this period only and wait for activity.
    ///
    /// Each expiry calls `reattach` once with the 1-based attempt number and
    /// re-arms with a longer deadline. A failed reattachment counts as an
    /// attempt.
    ///
    /// # Errors
    ///
    /// [`BridgeError::StreamStalled`] once `max_attempts` reattachments have
    /// not brought the stream back.
    pub async fn guard_with<F, Fut>(&self, stale_after: Duration, mut reattach: F) -> Result<GuardOutcome>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut activity = self.probe.subscribe();
        let mut attempts = 0u32;
        let mut deadline = Instant::now() + stale_after;

        self.set_state(WatchdogState::Armed);
        tracing::debug!(?stale_after, "watchdog armed");

        loop {
            tokio::select! {
                changed = activity.changed() => {
                    if changed.is_err() {
                        // Unreachable while we hold the probe.
                        self.set_state(WatchdogState::Idle);
                        return Err(BridgeError::ConnectionClosed);
                    }
                    self.set_state(WatchdogState::Satisfied);
                    tracing::debug!(reattached = attempts, "stream activity observed");
                    return Ok(GuardOutcome { reattached: attempts });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.set_state(WatchdogState::Expired);

                    if attempts >= self.config.max_attempts {
                        tracing::error!(attempts, "stream unrecoverable");
                        return Err(BridgeError::StreamStalled { attempts });
                    }

                    attempts += 1;
                    tracing::warn!(attempt = attempts, "no output before deadline, reattaching");
                    if let Err(e) = reattach(attempts).await {
                        tracing::warn!(attempt = attempts, error = %e, "reattach failed");
                    }

                    deadline = Instant::now() + self.backoff(stale_after, attempts);
                    self.set_state(WatchdogState::Armed);
                }
            }
        }
    }
}
