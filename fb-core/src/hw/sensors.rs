//! Hardware monitor sensor source
//!
//! Reads a LibreHardwareMonitor-style `data.json` tree over HTTP and flattens
//! it into fan and temperature readings. Fetch failures never raise: the
//! snapshot comes back with `available = false` and empty lists.

use async_trait::async_trait;
use fb_protocol::{Backend, FanChannel, TemperatureReading};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::sensors::{PATH_SEPARATOR, ROOT_LABEL};
use crate::error::{FanbridgeError, Result};

/// One fetch worth of readings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub fans: Vec<FanChannel>,
    pub temperatures: Vec<TemperatureReading>,
    pub available: bool,
    pub error: Option<String>,
}

impl SensorSnapshot {
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            fans: Vec::new(),
            temperatures: Vec::new(),
            available: false,
            error: Some(error.into()),
        }
    }

    /// Sensor id to value, numeric readings only
    pub fn temperature_lookup(&self) -> HashMap<&str, f64> {
        self.temperatures
            .iter()
            .filter_map(|t| t.value.map(|v| (t.id.as_str(), v)))
            .collect()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn fetch_readings(&self) -> SensorSnapshot;
}

/// Node of the monitor's JSON tree
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorNode {
    #[serde(rename = "Text", default)]
    pub text: String,
    #[serde(rename = "Children", default)]
    pub children: Vec<SensorNode>,
    #[serde(rename = "Type", default)]
    pub kind: Option<String>,
    #[serde(rename = "SensorId", default)]
    pub sensor_id: Option<String>,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl SensorNode {
    fn raw_value(&self) -> Option<String> {
        match self.value.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Keep digits, sign and decimal point, then parse. "1,200 RPM" -> 1200.0
pub fn clean_numeric(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn join_path(parent: &str, label: &str) -> String {
    match (parent.is_empty(), label.is_empty()) {
        (true, _) => label.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{}{}{}", parent, PATH_SEPARATOR, label),
    }
}

/// Flatten the tree into fans and temperatures. Pure: every call builds new
/// lists and the tree is not modified.
pub fn flatten(root: &SensorNode) -> (Vec<FanChannel>, Vec<TemperatureReading>) {
    let path = if root.text == ROOT_LABEL { "" } else { root.text.as_str() };
    let mut fans = Vec::new();
    let mut temps = Vec::new();
    for child in &root.children {
        let (f, t) = walk(child, path);
        fans.extend(f);
        temps.extend(t);
    }
    (fans, temps)
}

fn walk(node: &SensorNode, parent_path: &str) -> (Vec<FanChannel>, Vec<TemperatureReading>) {
    let mut fans = Vec::new();
    let mut temps = Vec::new();

    if let (Some(kind), Some(id)) = (node.kind.as_deref(), node.sensor_id.as_deref()) {
        let value = node.raw_value().as_deref().and_then(clean_numeric);
        if kind.eq_ignore_ascii_case("fan") {
            fans.push(FanChannel {
                id: id.to_string(),
                name: node.text.clone(),
                rpm: value.map(|v| v.max(0.0).round() as u32).unwrap_or(0),
                hardware_path: parent_path.to_string(),
                controllable: false,
                backend: Backend::Monitor,
            });
        } else if kind.eq_ignore_ascii_case("temperature") {
            temps.push(TemperatureReading {
                id: id.to_string(),
                name: node.text.clone(),
                value,
                hardware_path: parent_path.to_string(),
            });
        }
    }

    let path = join_path(parent_path, &node.text);
    for child in &node.children {
        let (f, t) = walk(child, &path);
        fans.extend(f);
        temps.extend(t);
    }

    (fans, temps)
}

/// HTTP-backed source
pub struct HttpSensorSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSensorSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FanbridgeError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn fetch_tree(&self) -> Result<SensorNode> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FanbridgeError::SourceUnavailable(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FanbridgeError::SourceUnavailable(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        response
            .json::<SensorNode>()
            .await
            .map_err(|e| FanbridgeError::SourceUnavailable(format!("{}: invalid JSON: {}", self.url, e)))
    }
}

#[async_trait]
impl SensorSource for HttpSensorSource {
    async fn fetch_readings(&self) -> SensorSnapshot {
        match self.fetch_tree().await {
            Ok(root) => {
                let (fans, temperatures) = flatten(&root);
                debug!(
                    "Sensor snapshot: {} fans, {} temperatures",
                    fans.len(),
                    temperatures.len()
                );
                SensorSnapshot {
                    fans,
                    temperatures,
                    available: true,
                    error: None,
                }
            }
            Err(e) => {
                warn!("{}", e);
                SensorSnapshot::unavailable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TREE: &str = r#"{
      "id": 0, "Text": "Sensor", "Children": [
        {"id": 1, "Text": "DESKTOP-1", "Children": [
          {"id": 2, "Text": "AMD Ryzen 7 5800X", "Children": [
            {"id": 3, "Text": "Temperatures", "Children": [
              {"id": 4, "Text": "Core (Tctl/Tdie)", "Children": [], "Type": "Temperature",
               "SensorId": "/amdcpu/0/temperature/2", "Value": "54.3 °C"},
              {"id": 5, "Text": "CCD1", "Children": [], "Type": "Temperature",
               "SensorId": "/amdcpu/0/temperature/3", "Value": "-"}
            ]}
          ]},
          {"id": 6, "Text": "Nuvoton NCT6798D", "Children": [
            {"id": 7, "Text": "Fans", "Children": [
              {"id": 8, "Text": "Fan #1", "Children": [], "Type": "Fan",
               "SensorId": "/lpc/nct6798d/fan/0", "Value": "1,024 RPM"},
              {"id": 9, "Text": "Fan #2", "Children": [], "Type": "Fan",
               "SensorId": "/lpc/nct6798d/fan/1", "Value": ""}
            ]},
            {"id": 10, "Text": "Controls", "Children": [
              {"id": 11, "Text": "Fan Control #1", "Children": [], "Type": "Control",
               "SensorId": "/lpc/nct6798d/control/0", "Value": "40 %"}
            ]}
          ]}
        ]}
      ]
    }"#;

    fn tree() -> SensorNode {
        serde_json::from_str(TREE).unwrap()
    }

    #[test]
    fn test_clean_numeric() {
        assert_eq!(clean_numeric("54.3 °C"), Some(54.3));
        assert_eq!(clean_numeric("1,024 RPM"), Some(1024.0));
        assert_eq!(clean_numeric("-5.5 °C"), Some(-5.5));
        assert_eq!(clean_numeric("-"), None);
        assert_eq!(clean_numeric(""), None);
        assert_eq!(clean_numeric("n/a"), None);
    }

    #[test]
    fn test_flatten_temperatures() {
        let (_, temps) = flatten(&tree());
        assert_eq!(temps.len(), 2);
        assert_eq!(temps[0].id, "/amdcpu/0/temperature/2");
        assert_eq!(temps[0].value, Some(54.3));
        assert_eq!(temps[0].hardware_path, "DESKTOP-1 / AMD Ryzen 7 5800X / Temperatures");
        assert_eq!(temps[1].value, None);
    }

    #[test]
    fn test_flatten_fans() {
        let (fans, _) = flatten(&tree());
        assert_eq!(fans.len(), 2);
        assert_eq!(fans[0].rpm, 1024);
        assert_eq!(fans[1].rpm, 0);
        assert!(fans.iter().all(|f| !f.controllable && f.backend == Backend::Monitor));
        assert_eq!(fans[0].hardware_path, "DESKTOP-1 / Nuvoton NCT6798D / Fans");
    }

    #[test]
    fn test_flatten_is_repeatable() {
        let root = tree();
        assert_eq!(flatten(&root), flatten(&root));
    }

    #[test]
    fn test_lookup_skips_unparsed() {
        let (fans, temperatures) = flatten(&tree());
        let snapshot = SensorSnapshot { fans, temperatures, available: true, error: None };
        let lookup = snapshot.temperature_lookup();
        assert_eq!(lookup.get("/amdcpu/0/temperature/2"), Some(&54.3));
        assert!(!lookup.contains_key("/amdcpu/0/temperature/3"));
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = sock.read(&mut buf).await;
                let reply = format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = sock.write_all(reply.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{}/data.json", addr)
    }

    #[tokio::test]
    async fn test_fetch_readings_over_http() {
        let url = serve_once("HTTP/1.1 200 OK", TREE).await;
        let source = HttpSensorSource::new(url, Duration::from_secs(2)).unwrap();

        let snapshot = source.fetch_readings().await;
        assert!(snapshot.available);
        assert_eq!(snapshot.temperatures.len(), 2);
        assert_eq!(snapshot.fans.len(), 2);
    }

    #[tokio::test]
    async fn test_non_success_status_is_unavailable() {
        let url = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;
        let source = HttpSensorSource::new(url, Duration::from_secs(2)).unwrap();

        let snapshot = source.fetch_readings().await;
        assert!(!snapshot.available);
        assert!(snapshot.fans.is_empty() && snapshot.temperatures.is_empty());
        assert!(snapshot.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        // bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let source =
            HttpSensorSource::new(format!("http://127.0.0.1:{}/data.json", port), Duration::from_millis(500)).unwrap();

        let snapshot = source.fetch_readings().await;
        assert!(!snapshot.available);
        assert!(snapshot.temperatures.is_empty());
    }
}
