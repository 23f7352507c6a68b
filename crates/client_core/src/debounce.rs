use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;
use tracing::trace;

/// Single-slot debounce timer: at most one unfired timer per slot.
///
/// Scheduling aborts the unfired timer before arming the new one. When a timer
/// fires its action is spawned as its own task, so rescheduling afterwards
/// cannot abort work (a network call) that is already running.
#[derive(Debug)]
pub struct DebounceSlot {
    name: &'static str,
    timer: Option<JoinHandle<()>>,
}

impl DebounceSlot {
    pub fn new(name: &'static str) -> Self {
        Self { name, timer: None }
    }

    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel() {
            trace!(slot = self.name, "debounce: replaced unfired timer");
        }
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(action);
        }));
    }

    /// Cancels the unfired timer. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        let Some(timer) = self.timer.take() else {
            return false;
        };
        let pending = !timer.is_finished();
        timer.abort();
        pending
    }

    pub fn is_pending(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for DebounceSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
