//! In-process fakes for daemon tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fb_core::error::Result;
use fb_core::{CurveStore, DeviceControl, Engine, SensorSnapshot, SensorSource};
use fb_protocol::{Backend, DeviceInfo, DeviceList, FanChannel, TemperatureReading};

pub struct FakeSensors {
    snapshot: SensorSnapshot,
}

impl FakeSensors {
    pub fn with(readings: &[(&str, Option<f64>)]) -> Arc<Self> {
        let temperatures = readings
            .iter()
            .map(|(id, value)| TemperatureReading {
                id: id.to_string(),
                name: id.to_string(),
                value: *value,
                hardware_path: "Test Board".to_string(),
            })
            .collect();
        Arc::new(Self {
            snapshot: SensorSnapshot {
                fans: Vec::new(),
                temperatures,
                available: true,
                error: None,
            },
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            snapshot: SensorSnapshot::unavailable("connection refused"),
        })
    }
}

#[async_trait]
impl SensorSource for FakeSensors {
    async fn fetch_readings(&self) -> SensorSnapshot {
        self.snapshot.clone()
    }
}

/// Accepts every write and remembers it; clones share the log
#[derive(Clone, Default)]
pub struct FakeDevices {
    writes: Arc<Mutex<Vec<(String, f64)>>>,
}

impl FakeDevices {
    pub fn writes(&self) -> Vec<(String, f64)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceControl for FakeDevices {
    async fn is_installed(&self) -> bool {
        true
    }

    async fn list_devices(&self) -> DeviceList {
        DeviceList {
            available: true,
            devices: vec![DeviceInfo { index: 0, name: "Test Cooler".to_string() }],
            error: None,
        }
    }

    async fn list_controllable_channels(&self) -> Result<Vec<FanChannel>> {
        Ok(vec![FanChannel {
            id: "liquidctl:0:fan1".to_string(),
            name: "fan1".to_string(),
            rpm: 1200,
            hardware_path: "Test Cooler".to_string(),
            controllable: true,
            backend: Backend::Liquidctl,
        }])
    }

    async fn set_speed(&self, channel_id: &str, percent: f64) -> Result<()> {
        self.writes.lock().unwrap().push((channel_id.to_string(), percent));
        Ok(())
    }
}

pub fn engine_with(
    store: Arc<CurveStore>,
    sensors: Arc<dyn SensorSource>,
    devices: FakeDevices,
) -> Arc<Engine> {
    Arc::new(Engine::new(store, sensors, Arc::new(devices)))
}
