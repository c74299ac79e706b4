//! Cancellable debounce timer, one per file key.
//!
//! The timer is an explicit scheduled task with re-arm and cancel as
//! first-class operations. Arming returns a generation token; the fired
//! task must present its token when it runs, so a fire that lost the race
//! with a cancel or re-arm is ignored instead of flushing stale state.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A single-slot, re-armable timer.
///
/// At most one scheduled task is live at a time: arming cancels any
/// previous task and bumps the generation, which is how "reset from
/// zero" semantics are implemented.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending task and arm a new one that fires after `delay`.
    ///
    /// `fire` receives the generation token of this arming and produces
    /// the future to run when the delay elapses. Returns that token.
    pub fn arm<F, Fut>(&mut self, delay: Duration, fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        let task = fire(generation);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
        generation
    }

    /// Cancel any pending task and invalidate its generation token.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Whether `generation` still names the most recent arming.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
