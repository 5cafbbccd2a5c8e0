//! Hardware interaction modules
//!
//! Sensor readings come from an HTTP hardware monitor; fan and pump channels
//! are driven through the liquidctl command line.

mod command;
mod control;
mod liquidctl;
mod sensors;
mod status;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use control::DeviceControl;
pub use liquidctl::{channel_id, parse_channel_id, parse_device_list, LiquidctlController, UtilityTimeouts};
pub use sensors::{clean_numeric, flatten, HttpSensorSource, SensorNode, SensorSnapshot, SensorSource};
pub use status::{normalize_channel_name, parse_structured, parse_text, StatusEntry, StatusReport};

#[cfg(test)]
pub use control::MockDeviceControl;
#[cfg(test)]
pub use sensors::MockSensorSource;
