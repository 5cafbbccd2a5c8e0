//! Parsing of `liquidctl status` output
//!
//! The JSON form is tried first. When it does not decode, the plain text
//! form is scanned line by line for `<label> <number> rpm`. Only fan and
//! pump channels are kept.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::trace;

/// One speed-bearing channel reported by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Normalized channel name, e.g. `fan1` or `pump`
    pub channel: String,
    /// Label as the utility printed it
    pub label: String,
    pub rpm: u32,
}

/// Which decoder produced the entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Structured(Vec<StatusEntry>),
    Text(Vec<StatusEntry>),
}

impl StatusReport {
    pub fn parse(output: &str) -> Self {
        match parse_structured(output) {
            Some(entries) => StatusReport::Structured(entries),
            None => StatusReport::Text(parse_text(output)),
        }
    }

    pub fn entries(&self) -> &[StatusEntry] {
        match self {
            StatusReport::Structured(e) | StatusReport::Text(e) => e,
        }
    }

    pub fn into_entries(self) -> Vec<StatusEntry> {
        match self {
            StatusReport::Structured(e) | StatusReport::Text(e) => e,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceStatus {
    #[serde(default)]
    status: Vec<StatusItem>,
}

#[derive(Debug, Deserialize)]
struct StatusItem {
    key: String,
    value: serde_json::Value,
    #[serde(default)]
    unit: String,
}

/// Decode the `--json` form: an array of devices, each with keyed readings.
/// Returns None when the text is not that shape.
pub fn parse_structured(output: &str) -> Option<Vec<StatusEntry>> {
    let devices: Vec<DeviceStatus> = serde_json::from_str(output.trim()).ok()?;

    let mut entries = Vec::new();
    for item in devices.iter().flat_map(|d| d.status.iter()) {
        if !item.unit.trim().eq_ignore_ascii_case("rpm") {
            continue;
        }
        let rpm = match &item.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let Some(rpm) = rpm {
            push_entry(&mut entries, &item.key, rpm);
        }
    }
    Some(entries)
}

fn speed_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)([a-z][a-z0-9 _-]*?)\s+(\d+(?:\.\d+)?)\s*rpm\b").ok())
        .as_ref()
}

/// Scan free-form text for `<label> <number> rpm` lines
pub fn parse_text(output: &str) -> Vec<StatusEntry> {
    let Some(re) = speed_line_regex() else {
        return Vec::new();
    };
    let mut entries = Vec::new();

    for line in output.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        let Ok(rpm) = caps[2].parse::<f64>() else {
            trace!("Skipping unparseable speed in: {}", line);
            continue;
        };
        push_entry(&mut entries, caps[1].trim(), rpm);
    }
    entries
}

fn push_entry(entries: &mut Vec<StatusEntry>, label: &str, rpm: f64) {
    let channel = normalize_channel_name(label);
    if !is_cooling_channel(&channel) {
        return;
    }
    if entries.iter().any(|e| e.channel == channel) {
        return;
    }
    entries.push(StatusEntry {
        channel,
        label: label.to_string(),
        rpm: rpm.max(0.0).round() as u32,
    });
}

/// `"Fan 1 speed"` -> `fan1`, `"Pump duty"` -> `pump`
pub fn normalize_channel_name(label: &str) -> String {
    label
        .to_lowercase()
        .split_whitespace()
        .filter(|w| *w != "speed" && *w != "duty")
        .flat_map(|w| w.chars())
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn is_cooling_channel(channel: &str) -> bool {
    channel.contains("fan") || channel.contains("pump")
}
