//! Cancellable repeating timer backing client polling.
//!
//! Each timer owns one thread that ticks immediately and then once per
//! interval. Cancelling signals the thread through a channel; a tick that
//! is already running is allowed to finish; its result is discarded by the
//! caller's generation check.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use super::ClientError;

/// Handle to a running poll loop.
#[derive(Debug)]
pub struct PollTimer {
    generation: u64,
    cancel: Sender<()>,
}

/// Decrements the live-loop counter when a poll thread exits.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PollTimer {
    /// Starts a loop calling `tick` now and then every `interval` until
    /// cancelled or until `tick` returns `false`.
    pub fn spawn<F>(
        generation: u64,
        interval: Duration,
        live_loops: Arc<AtomicUsize>,
        tick: F,
    ) -> Result<Self, ClientError>
    where
        F: Fn() -> bool + Send + 'static,
    {
        let (cancel, cancelled) = mpsc::channel::<()>();

        live_loops.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(live_loops);

        thread::Builder::new()
            .name(format!("status-poll-{}", generation))
            .spawn(move || {
                let _guard = guard;
                if !tick() {
                    return;
                }
                loop {
                    match cancelled.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !tick() {
                                return;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .map_err(ClientError::Spawn)?;

        Ok(Self { generation, cancel })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stops the loop before its next tick. Never blocks.
    pub fn cancel(self) {
        let _ = self.cancel.send(());
    }
}
