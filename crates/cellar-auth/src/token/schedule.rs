//! Proactive refresh scheduling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::RefreshPolicy;

/// Delay until the proactive refresh of a token that lives `expires_in_secs`:
/// `max(expires_in - refresh_buffer, minimum_refresh_delay)`.
pub fn refresh_delay(expires_in_secs: u64, policy: &RefreshPolicy) -> Duration {
    Duration::from_secs(expires_in_secs)
        .saturating_sub(policy.refresh_buffer)
        .max(policy.minimum_refresh_delay)
}

struct Armed {
    seq: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    next_seq: u64,
    armed: Option<Armed>,
    /// Set by [`RefreshTimer::close`]; later arms are ignored.
    closed: bool,
}

/// Cancellable one-shot timer. Arming aborts whatever was armed before, so at
/// most one callback is ever pending.
#[derive(Clone, Default)]
pub(crate) struct RefreshTimer {
    slot: Arc<Mutex<Slot>>,
}

impl RefreshTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `fire` after `delay`, replacing any pending callback.
    ///
    /// The firing task removes itself from the slot before running `fire`,
    /// so `fire` may re-arm the timer without aborting its own task. Does
    /// nothing once the timer is closed.
    pub(crate) fn arm<F>(&self, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.closed {
            return;
        }
        slot.next_seq += 1;
        let seq = slot.next_seq;

        let own_slot = Arc::clone(&self.slot);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = own_slot.lock();
                if slot.armed.as_ref().is_some_and(|a| a.seq == seq) {
                    // Dropping the JoinHandle detaches; it does not cancel.
                    slot.armed = None;
                }
            }
            fire.await;
        });

        if let Some(previous) = slot.armed.replace(Armed { seq, handle }) {
            previous.handle.abort();
        }
    }

    /// Aborts the pending callback, if any.
    pub(crate) fn cancel(&self) {
        if let Some(armed) = self.slot.lock().armed.take() {
            armed.handle.abort();
        }
    }

    /// Aborts the pending callback and refuses every later arm, including one
    /// from a callback that already fired and is still running.
    pub(crate) fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        if let Some(armed) = slot.armed.take() {
            armed.handle.abort();
        }
    }

    /// True while a callback is waiting to fire.
    pub(crate) fn is_armed(&self) -> bool {
        self.slot.lock().armed.is_some()
    }
}
