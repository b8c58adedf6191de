//! Background auto-advance loop.
//!
//! [`SimulationLoop`] owns one named thread that calls [`Ticker::tick`]
//! at a fixed wall-time cadence. The thread makes no decisions of its
//! own: it skips ticks while the ticker reports paused, and everything
//! else happens inside the tick. Sleeps are `recv_timeout` waits on the
//! stop channel, so `stop()` wakes the thread immediately regardless of
//! the tick interval.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use envsim_core::SimError;

use crate::config::LoopConfig;
use crate::engine::TickSummary;

/// What the loop drives. Implemented by the engine's shared core.
pub trait Ticker: Send + Sync + 'static {
    /// Advance by the wall time elapsed since the previous tick and run
    /// whatever became due.
    fn tick(&self) -> Result<TickSummary, SimError>;

    /// Whether ticks should be skipped for now.
    fn is_paused(&self) -> bool;
}

// ── LoopReport ─────────────────────────────────────────────────────

/// Report returned by [`SimulationLoop::stop`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    /// `tick()` calls made by the loop.
    pub ticks: u64,
    /// Ticks that returned an error or panicked.
    pub tick_errors: u64,
    /// Cycles skipped because the ticker was paused.
    pub paused_cycles: u64,
    /// Whether the thread exited and was joined within the stop timeout.
    pub joined: bool,
    /// Time spent stopping, in milliseconds.
    pub stop_ms: u64,
}

#[derive(Debug, Default)]
struct LoopStats {
    ticks: AtomicU64,
    tick_errors: AtomicU64,
    paused_cycles: AtomicU64,
}

// ── SimulationLoop ─────────────────────────────────────────────────

/// Handle to a running auto-advance thread.
///
/// Dropping the handle stops the thread.
#[derive(Debug)]
pub struct SimulationLoop {
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<LoopStats>,
    config: LoopConfig,
}

impl SimulationLoop {
    /// Spawn the loop thread.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidOperation`] if the OS refuses to spawn a thread.
    pub fn start(ticker: Arc<dyn Ticker>, config: LoopConfig) -> Result<Self, SimError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let stats = Arc::new(LoopStats::default());
        let thread_stats = Arc::clone(&stats);
        let interval = config.tick_interval();

        let handle = thread::Builder::new()
            .name("envsim-loop".into())
            .spawn(move || {
                run(ticker.as_ref(), &stop_rx, &thread_stats, interval);
                // Best-effort: the handle may already have given up waiting.
                let _ = done_tx.send(());
            })
            .map_err(|e| SimError::invalid(format!("failed to spawn loop thread: {e}")))?;

        debug!(tick_interval_ms = config.tick_interval_ms, "simulation loop started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
            stats,
            config,
        })
    }

    /// Whether the thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait up to the stop timeout for it to exit.
    ///
    /// An in-flight tick always finishes. If the thread does not exit in
    /// time it is detached and `joined` is false. Calling `stop` again
    /// is harmless.
    pub fn stop(&mut self) -> LoopReport {
        let start = Instant::now();

        if let Some(tx) = self.stop_tx.take() {
            // A full channel means a signal is already pending.
            let _ = tx.try_send(());
        }

        let joined = match self.done_rx.recv_timeout(self.config.stop_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match self.handle.take() {
                Some(handle) => handle.join().is_ok(),
                None => true,
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    stop_timeout_ms = self.config.stop_timeout_ms,
                    "simulation loop did not stop in time; detaching"
                );
                self.handle.take();
                false
            }
        };

        let report = LoopReport {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            tick_errors: self.stats.tick_errors.load(Ordering::Relaxed),
            paused_cycles: self.stats.paused_cycles.load(Ordering::Relaxed),
            joined,
            stop_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            ticks = report.ticks,
            tick_errors = report.tick_errors,
            joined = report.joined,
            stop_ms = report.stop_ms,
            "simulation loop stopped"
        );
        report
    }
}

impl Drop for SimulationLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run(ticker: &dyn Ticker, stop_rx: &Receiver<()>, stats: &LoopStats, interval: Duration) {
    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        if ticker.is_paused() {
            stats.paused_cycles.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.ticks.fetch_add(1, Ordering::Relaxed);
            match panic::catch_unwind(AssertUnwindSafe(|| ticker.tick())) {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    stats.tick_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "tick failed");
                }
                Err(payload) => {
                    stats.tick_errors.fetch_add(1, Ordering::Relaxed);
                    error!(panic = panic_message(payload.as_ref()), "tick panicked");
                }
            }
        }

        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
