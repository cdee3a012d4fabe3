//! Cancel-and-reschedule task scheduling.
//!
//! Each `trigger` replaces whatever is still waiting out the window, so a
//! burst of triggers collapses into one run of the action. Once the window
//! has elapsed and the action has started, it is no longer cancellable:
//! later triggers schedule a fresh run instead of aborting work in flight.
//!
//! Rescheduling is bounded: a run that has been pending for
//! `MAX_WAIT_WINDOWS` windows fires at that deadline even if triggers keep
//! arriving, so a steady trigger source coalesces instead of starving.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Longest a pending run can be pushed back, in debounce windows.
pub const MAX_WAIT_WINDOWS: u32 = 4;

#[derive(Default)]
struct DebounceState {
    generation: u64,
    pending: Option<JoinHandle<()>>,
    /// Arrival of the oldest trigger the pending run will serve.
    first_trigger: Option<Instant>,
}

pub struct Debouncer {
    window: Duration,
    max_wait: Duration,
    state: Arc<Mutex<DebounceState>>,
}

fn lock(state: &Mutex<DebounceState>) -> MutexGuard<'_, DebounceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_wait: window * MAX_WAIT_WINDOWS,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run `action` once the window passes without another trigger.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = lock(&self.state);
        state.generation += 1;
        let generation = state.generation;

        let now = Instant::now();
        let first = *state.first_trigger.get_or_insert(now);
        let fire_at = (now + self.window).min(first + self.max_wait);

        if let Some(pending) = state.pending.take() {
            trace!(generation, "Rescheduling pending run");
            pending.abort();
        }

        let shared = Arc::clone(&self.state);
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            {
                let mut state = lock(&shared);
                if state.generation != generation {
                    return;
                }
                // Past this point the run belongs to nobody and cannot be aborted.
                state.pending = None;
                state.first_trigger = None;
            }
            action().await;
        }));
    }

    /// Whether a run is scheduled but has not started yet.
    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    /// Drop the scheduled run, if any. A run already started finishes.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.first_trigger = None;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
