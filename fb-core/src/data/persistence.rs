//! JSON persistence for fan curves
//!
//! The whole record (`{enabled, curves}`) lives in one file and is rewritten
//! atomically on every mutation. An in-memory copy serves reads.

use fb_protocol::{Curve, CurveState};
use parking_lot::RwLock;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::validation::validate_curve;
use crate::error::{FanbridgeError, Result};

/// Durable store of curve definitions and the global enabled flag
#[derive(Debug)]
pub struct CurveStore {
    path: PathBuf,
    state: RwLock<CurveState>,
}

impl CurveStore {
    /// Open the store at `path`. A missing or unreadable record yields the
    /// disabled/empty default; nothing is written until the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = read_state(&path);
        info!(
            "Curve store at {:?}: {} curves, enabled={}",
            path,
            state.curves.len(),
            state.enabled
        );
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current record
    pub fn load(&self) -> CurveState {
        self.state.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Curve> {
        self.state.read().curves.iter().find(|c| c.id == id).cloned()
    }

    /// Insert or replace a curve and persist before returning.
    ///
    /// An empty id is replaced by a fresh UUID. The first existing curve with
    /// the same id or the same target channel is replaced in place.
    pub fn upsert(&self, mut curve: Curve) -> Result<Curve> {
        validate_curve(&curve)?;
        if curve.id.trim().is_empty() {
            curve.id = uuid::Uuid::new_v4().to_string();
        }

        let mut guard = self.state.write();
        let mut next = guard.clone();
        match next
            .curves
            .iter()
            .position(|c| c.id == curve.id || c.target_channel_id == curve.target_channel_id)
        {
            Some(index) => {
                debug!("Replacing curve at position {} with {}", index, curve.id);
                next.curves[index] = curve.clone();
            }
            None => next.curves.push(curve.clone()),
        }

        write_state(&self.path, &next)?;
        *guard = next;
        info!("Saved curve {} -> {}", curve.id, curve.target_channel_id);
        Ok(curve)
    }

    /// Remove every curve with this id, returning how many were removed
    pub fn remove(&self, id: &str) -> Result<usize> {
        let mut guard = self.state.write();
        let mut next = guard.clone();
        let before = next.curves.len();
        next.curves.retain(|c| c.id != id);
        let removed = before - next.curves.len();

        if removed > 0 {
            write_state(&self.path, &next)?;
            *guard = next;
            info!("Deleted curve {}", id);
        }
        Ok(removed)
    }

    /// Toggle automatic control and persist; returns the new value
    pub fn set_enabled(&self, enabled: bool) -> Result<bool> {
        let mut guard = self.state.write();
        let mut next = guard.clone();
        next.enabled = enabled;

        write_state(&self.path, &next)?;
        *guard = next;
        info!("Automatic curve control {}", if enabled { "enabled" } else { "disabled" });
        Ok(enabled)
    }
}

fn read_state(path: &Path) -> CurveState {
    if !path.exists() {
        debug!("No curves file found at {:?}, starting empty", path);
        return CurveState::default();
    }

    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read {:?}: {} - starting empty", path, e);
            return CurveState::default();
        }
    };

    match serde_json::from_str::<CurveState>(&contents) {
        Ok(state) => state,
        Err(e) => {
            warn!("Corrupt curves file {:?}: {} - starting empty", path, e);
            CurveState::default()
        }
    }
}

fn write_state(path: &Path, state: &CurveState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| FanbridgeError::FileWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let json = serde_json::to_string_pretty(state)?;

    // Atomic write: temp file, fsync, rename
    let temp_path = path.with_extension("json.tmp");
    let write_err = |e| FanbridgeError::FileWrite {
        path: temp_path.clone(),
        source: e,
    };

    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(json.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| FanbridgeError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!("Saved {} curves to {:?}", state.curves.len(), path);
    Ok(())
}
