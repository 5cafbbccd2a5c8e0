//! Curve reconciliation
//!
//! One cycle reads the curve record, fetches temperatures once, maps each
//! curve's reading to a duty and writes it only when it differs from the
//! last duty successfully written to that channel. A cycle that starts while
//! another is still running is skipped, not queued.

use fb_protocol::{Curve, EngineStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::curve::interpolate;
use crate::data::CurveStore;
use crate::hw::{DeviceControl, SensorSource};

/// Why a cycle did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InProgress,
    Disabled,
    NoCurves,
    SourceUnavailable,
}

/// Per-cycle tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Curves whose duty was written
    pub applied: usize,
    /// Curves whose duty matched the last write
    pub unchanged: usize,
    /// Curves with no usable reading this cycle
    pub skipped: usize,
    /// Writes that failed; retried next cycle
    pub failed: usize,
    /// Set when the control utility disappeared mid-cycle
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Completed(CycleReport),
}

/// Clears the in-progress flag on every exit path
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Engine {
    store: Arc<CurveStore>,
    sensors: Arc<dyn SensorSource>,
    devices: Arc<dyn DeviceControl>,
    /// channel id -> last duty written successfully
    last_applied: Mutex<HashMap<String, u8>>,
    in_progress: AtomicBool,
    cycles: AtomicU64,
}

impl Engine {
    pub fn new(
        store: Arc<CurveStore>,
        sensors: Arc<dyn SensorSource>,
        devices: Arc<dyn DeviceControl>,
    ) -> Self {
        Self {
            store,
            sensors,
            devices,
            last_applied: Mutex::new(HashMap::new()),
            in_progress: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        }
    }

    fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.in_progress))
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one reconciliation cycle
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = self.try_begin() else {
            debug!("Previous cycle still running, skipping tick");
            return CycleOutcome::Skipped(SkipReason::InProgress);
        };
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let state = self.store.load();
        if !state.enabled {
            // re-enabling should re-assert every curve
            self.last_applied.lock().clear();
            trace!("Curve control disabled");
            return CycleOutcome::Skipped(SkipReason::Disabled);
        }
        if state.curves.is_empty() {
            return CycleOutcome::Skipped(SkipReason::NoCurves);
        }

        let snapshot = self.sensors.fetch_readings().await;
        if !snapshot.available {
            debug!(
                "No temperature data this cycle: {}",
                snapshot.error.as_deref().unwrap_or("source unavailable")
            );
            return CycleOutcome::Skipped(SkipReason::SourceUnavailable);
        }
        let temps = snapshot.temperature_lookup();

        let mut report = CycleReport::default();
        for curve in &state.curves {
            let Some(&temp) = temps.get(curve.sensor_id.as_str()) else {
                trace!("No reading for sensor {} ({})", curve.sensor_id, curve.sensor_name);
                report.skipped += 1;
                continue;
            };
            let Some(target) = interpolate(&curve.points, temp) else {
                report.skipped += 1;
                continue;
            };

            let previous = self.last_applied.lock().get(&curve.target_channel_id).copied();
            if previous == Some(target) {
                report.unchanged += 1;
                continue;
            }

            match self.devices.set_speed(&curve.target_channel_id, f64::from(target)).await {
                Ok(()) => {
                    self.last_applied
                        .lock()
                        .insert(curve.target_channel_id.clone(), target);
                    info!(
                        "{} ({}) -> {}% at {:.1}C",
                        curve.target_channel_id, curve.target_name, target, temp
                    );
                    report.applied += 1;
                }
                Err(e) if e.is_not_installed() => {
                    error!("Aborting cycle: {}", e);
                    report.failed += 1;
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    warn!("Failed to apply {}% to {}: {}", target, curve.target_channel_id, e);
                    report.failed += 1;
                }
            }
        }

        self.prune_cache(&state.curves);
        CycleOutcome::Completed(report)
    }

    /// Forget channels that no longer have a curve
    fn prune_cache(&self, curves: &[Curve]) {
        let targets: HashSet<&str> = curves.iter().map(|c| c.target_channel_id.as_str()).collect();
        self.last_applied
            .lock()
            .retain(|channel, _| targets.contains(channel.as_str()));
    }

    /// Drop the cached duty for a channel so the next cycle writes it again.
    /// Used after a manual speed change.
    pub fn invalidate(&self, channel_id: &str) {
        self.last_applied.lock().remove(channel_id);
    }

    pub fn last_applied(&self, channel_id: &str) -> Option<u8> {
        self.last_applied.lock().get(channel_id).copied()
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.store.load();
        EngineStatus {
            enabled: state.enabled,
            curve_count: state.curves.len(),
            last_applied: self
                .last_applied
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect::<BTreeMap<_, _>>(),
            cycles: self.cycles.load(Ordering::Relaxed),
            in_progress: self.is_running(),
        }
    }
}
