//! Reconnection with capped exponential backoff.

use crate::config::ReconnectConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Reconnection bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    /// Attempts made since the connection was last confirmed open.
    pub attempts: u32,
    /// Attempt budget.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
}

/// How a reconnection run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Every subscription was re-established on the given attempt.
    Reconnected {
        /// 1-indexed attempt that succeeded.
        attempt: u32,
    },
    /// The attempt budget ran out.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The run was cancelled.
    Cancelled,
}

struct ActiveRun {
    id: u64,
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// Drives re-establishment of subscriptions after a disconnect.
///
/// At most one run is active at a time. A run waits
/// `delay_for_attempt(k)` before attempt `k` and can be cancelled during
/// the wait; cancellation is observed again by the resync step.
pub struct ReconnectController {
    config: ReconnectConfig,
    state: Mutex<ReconnectState>,
    run: Mutex<Option<ActiveRun>>,
    next_run_id: Mutex<u64>,
}

impl ReconnectController {
    /// Creates a controller with zero attempts.
    pub fn new(config: ReconnectConfig) -> Self {
        let state = ReconnectState {
            attempts: 0,
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
        };
        Self {
            config,
            state: Mutex::new(state),
            run: Mutex::new(None),
            next_run_id: Mutex::new(0),
        }
    }

    /// Returns a snapshot of the attempt counter.
    pub fn state(&self) -> ReconnectState {
        *self.state.lock()
    }

    /// Resets the attempt counter.
    pub fn reset(&self) {
        self.state.lock().attempts = 0;
    }

    /// Returns true if a run is in progress.
    pub fn is_running(&self) -> bool {
        match self.run.lock().as_ref() {
            Some(run) => run.handle.as_ref().map_or(true, |h| !h.is_finished()),
            None => false,
        }
    }

    /// Claims the run slot.
    ///
    /// Returns the run id and its cancellation receiver, or `None` if a run
    /// is already in progress.
    pub(crate) fn try_begin(&self) -> Option<(u64, watch::Receiver<bool>)> {
        let mut slot = self.run.lock();
        if let Some(run) = slot.as_ref() {
            let finished = run.handle.as_ref().is_some_and(|h| h.is_finished());
            if !finished {
                return None;
            }
        }
        let id = {
            let mut next = self.next_run_id.lock();
            *next += 1;
            *next
        };
        let (tx, rx) = watch::channel(false);
        *slot = Some(ActiveRun {
            id,
            cancel: tx,
            handle: None,
        });
        Some((id, rx))
    }

    /// Records the task driving run `id`.
    pub(crate) fn attach(&self, id: u64, handle: JoinHandle<()>) {
        if let Some(run) = self.run.lock().as_mut().filter(|r| r.id == id) {
            run.handle = Some(handle);
        }
    }

    /// Releases the run slot if it still belongs to run `id`.
    pub(crate) fn finish(&self, id: u64) {
        let mut slot = self.run.lock();
        if slot.as_ref().is_some_and(|r| r.id == id) {
            *slot = None;
        }
    }

    /// Cancels the active run, if any. Safe to call repeatedly.
    pub fn cancel(&self) -> bool {
        match self.run.lock().take() {
            Some(run) => {
                run.cancel.send_replace(true);
                info!(run = run.id, "reconnection cancelled");
                true
            }
            None => false,
        }
    }

    /// Runs the backoff loop until `resync` succeeds, the budget runs out,
    /// or the run is cancelled.
    ///
    /// `resync` receives the cancellation receiver so it can re-check it
    /// while holding whatever lock guards the subscription set.
    pub(crate) async fn drive<R>(&self, mut cancel: watch::Receiver<bool>, mut resync: R) -> ReconnectOutcome
    where
        R: FnMut(&watch::Receiver<bool>) -> SyncResult<()>,
    {
        loop {
            if *cancel.borrow() {
                return ReconnectOutcome::Cancelled;
            }

            let (attempt, max) = {
                let mut state = self.state.lock();
                if state.attempts >= state.max_attempts {
                    warn!(attempts = state.attempts, "reconnection attempts exhausted");
                    return ReconnectOutcome::Exhausted {
                        attempts: state.attempts,
                    };
                }
                state.attempts += 1;
                (state.attempts, state.max_attempts)
            };

            let delay = self.config.delay_for_attempt(attempt);
            info!(attempt, max, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

            if !wait_or_cancel(delay, &mut cancel).await {
                return ReconnectOutcome::Cancelled;
            }

            match resync(&cancel) {
                Ok(()) => {
                    info!(attempt, "subscriptions re-established");
                    return ReconnectOutcome::Reconnected { attempt };
                }
                Err(SyncError::Cancelled) => return ReconnectOutcome::Cancelled,
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }
    }
}

/// Sleeps for `delay`. Returns false if cancelled first.
async fn wait_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let cancelled = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = cancel.wait_for(|c| *c) => true,
    };
    !cancelled && !*cancel.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn controller(max: u32) -> ReconnectController {
        ReconnectController::new(ReconnectConfig::new(max).with_base_delay(Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts_with_doubling_delays() {
        let ctl = controller(5);
        let (_, rx) = ctl.try_begin().unwrap();
        let start = Instant::now();
        let mut calls = Vec::new();

        let outcome = ctl
            .drive(rx, |_| {
                calls.push(start.elapsed().as_secs());
                Err(SyncError::transport_retryable("refused"))
            })
            .await;

        assert_eq!(outcome, ReconnectOutcome::Exhausted { attempts: 5 });
        // Cumulative: 1, 1+2, 1+2+4, ...
        assert_eq!(calls, vec![1, 3, 7, 15, 31]);
        assert_eq!(ctl.state().attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_later_attempt() {
        let ctl = controller(5);
        let (_, rx) = ctl.try_begin().unwrap();
        let mut n = 0;
        let outcome = ctl
            .drive(rx, |_| {
                n += 1;
                if n < 3 {
                    Err(SyncError::transport_retryable("refused"))
                } else {
                    Ok(())
                }
            })
            .await;
        assert_eq!(outcome, ReconnectOutcome::Reconnected { attempt: 3 });

        ctl.reset();
        assert_eq!(ctl.state().attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_wait_skips_resync() {
        let ctl = Arc::new(controller(5));
        let (id, rx) = ctl.try_begin().unwrap();

        let c = Arc::clone(&ctl);
        let handle = tokio::spawn(async move {
            let outcome = c.drive(rx, |_| panic!("resync must not run")).await;
            c.finish(id);
            outcome
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(ctl.cancel());
        assert!(!ctl.cancel());
        assert_eq!(handle.await.unwrap(), ReconnectOutcome::Cancelled);
    }

    #[test]
    fn single_run_slot() {
        let ctl = controller(5);
        let (first, _rx) = ctl.try_begin().unwrap();
        assert!(ctl.try_begin().is_none());
        assert!(ctl.is_running());

        ctl.finish(first);
        assert!(!ctl.is_running());
        let (second, _rx) = ctl.try_begin().unwrap();
        assert_ne!(first, second);

        // A stale finish does not release a newer run.
        ctl.finish(first);
        assert!(ctl.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_immediately() {
        let ctl = controller(0);
        let (_, rx) = ctl.try_begin().unwrap();
        let outcome = ctl.drive(rx, |_| Ok(())).await;
        assert_eq!(outcome, ReconnectOutcome::Exhausted { attempts: 0 });
    }
}
