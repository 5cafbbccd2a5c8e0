//! Device control seam used by the engine and the daemon

use async_trait::async_trait;
use fb_protocol::{DeviceList, FanChannel};

use crate::error::Result;

/// Discovers and drives controllable fan/pump channels
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Whether the backing utility can be invoked at all
    async fn is_installed(&self) -> bool;

    /// Enumerate devices; never fails, unavailability is reported in the list
    async fn list_devices(&self) -> DeviceList;

    async fn list_controllable_channels(&self) -> Result<Vec<FanChannel>>;

    /// Set a channel to `percent` (0-100). Out-of-range input is rejected
    /// before any command runs.
    async fn set_speed(&self, channel_id: &str, percent: f64) -> Result<()>;
}
