//! Curve Control Loop
//!
//! Drives the reconciliation engine on a fixed interval. Every tick spawns a
//! cycle on its own task; when the previous cycle is still running the
//! engine's guard turns the new one into a no-op.
//!
//! # Safety Features
//! - **Graceful degradation**: A failed or panicking cycle never stops the loop
//! - **Error counting**: Consecutive failing cycles are logged with backoff
//! - **Immediate wake**: Store mutations trigger a cycle without waiting

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use fb_core::constants::engine::MAX_CONSECUTIVE_ERRORS;
use fb_core::{CycleOutcome, Engine, SkipReason};

/// Shared state between the control loop and the IPC server
pub struct ControlState {
    engine: Arc<Engine>,
    poll_interval: Duration,
    /// Wakes the loop immediately after a curve change
    reload_notify: Notify,
    consecutive_errors: AtomicU32,
}

impl ControlState {
    pub fn new(engine: Arc<Engine>, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval,
            reload_notify: Notify::new(),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Ask the loop to run a cycle now
    pub fn signal_reload(&self) {
        self.reload_notify.notify_one();
    }

    /// Record a cycle's outcome, returning the running failure count
    fn record(&self, outcome: &CycleOutcome) -> u32 {
        let failed = match outcome {
            CycleOutcome::Completed(report) => report.aborted || report.failed > 0,
            CycleOutcome::Skipped(SkipReason::SourceUnavailable) => true,
            CycleOutcome::Skipped(_) => false,
        };

        if !failed {
            let previous = self.consecutive_errors.swap(0, Ordering::SeqCst);
            if previous > 0 {
                debug!("Control loop recovered after {} failing cycles", previous);
            }
            return 0;
        }

        let count = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 || count % MAX_CONSECUTIVE_ERRORS == 0 {
            error!("Curve cycle failing (count: {}): {:?}", count, outcome);
        }
        count
    }
}

/// Run one cycle on its own task and log what happened
fn spawn_cycle(state: Arc<ControlState>) {
    tokio::spawn(async move {
        let outcome = state.engine.run_cycle().await;
        match &outcome {
            CycleOutcome::Completed(report) if report.applied > 0 || report.failed > 0 => {
                debug!(
                    "Cycle: applied={} unchanged={} skipped={} failed={}",
                    report.applied, report.unchanged, report.skipped, report.failed
                );
            }
            CycleOutcome::Skipped(SkipReason::InProgress) => {
                warn!("Previous cycle overran the {:?} interval", state.poll_interval);
            }
            _ => {}
        }
        state.record(&outcome);
    });
}

/// Run the control loop until `shutdown` is set
pub async fn run_control_loop(state: Arc<ControlState>, shutdown: Arc<AtomicBool>) {
    info!(
        "Curve control loop starting, poll interval: {}ms",
        state.poll_interval.as_millis()
    );

    let mut ticker = tokio::time::interval(state.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = state.reload_notify.notified() => {
                debug!("Control loop woken up by curve change");
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            info!("Curve control loop shutting down");
            break;
        }

        spawn_cycle(state.clone());
    }

    info!("Curve control loop stopped");
}
