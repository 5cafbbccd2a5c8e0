//! Shared data and IPC protocol types for fanbridge
//!
//! The daemon and every client speak newline-delimited JSON over a Unix
//! socket. Each line is a [`RequestEnvelope`] or [`ResponseEnvelope`]; the
//! domain types (curves, channels, readings) are defined here so both sides
//! serialize them identically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum request size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Maximum response size for IPC (256KB); channel and sensor lists can be long
pub const MAX_RESPONSE_SIZE: usize = 256 * 1024;

/// Upper bound on points accepted for a single curve
pub const MAX_CURVE_POINTS: usize = 32;

const MAX_ID_LENGTH: usize = 128;

const MAX_NAME_LENGTH: usize = 256;

const FORBIDDEN_ID_CHARS: &[char] = &['\0', '\n', '\r', '`', ';', '|', '&', '>', '<', '\\', '\'', '"', '$'];

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// ============================================================================
// Domain Types
// ============================================================================

/// Which subsystem owns a fan channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Driven through the liquidctl command-line utility
    #[serde(rename = "liquidctl")]
    Liquidctl,
    /// Reported by the hardware monitor only; cannot be written
    #[serde(rename = "lhm")]
    Monitor,
}

impl Backend {
    pub fn tag(&self) -> &'static str {
        match self {
            Backend::Liquidctl => "liquidctl",
            Backend::Monitor => "lhm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureReading {
    pub id: String,
    pub name: String,
    /// None when the source value could not be parsed as a number
    pub value: Option<f64>,
    pub hardware_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FanChannel {
    /// `<backend>:<device index>:<channel>` for controllable channels
    pub id: String,
    pub name: String,
    pub rpm: u32,
    pub hardware_path: String,
    pub controllable: bool,
    pub backend: Backend,
}

/// One (temperature, duty) pair of a curve
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CurvePoint {
    #[serde(rename = "t", alias = "temperature")]
    pub temperature: f64,
    #[serde(rename = "s", alias = "duty")]
    pub duty: u8,
}

impl CurvePoint {
    pub fn new(temperature: f64, duty: u8) -> Self {
        Self { temperature, duty }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Curve {
    pub id: String,
    #[serde(rename = "targetId", alias = "targetChannelId")]
    pub target_channel_id: String,
    #[serde(default)]
    pub target_name: String,
    pub sensor_id: String,
    #[serde(default)]
    pub sensor_name: String,
    pub points: Vec<CurvePoint>,
}

/// The single persisted record: global switch plus every curve
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CurveState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub curves: Vec<Curve>,
}

/// Curve as submitted by a client; the id is optional and assigned on save
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub target_name: String,
    #[serde(default)]
    pub sensor_id: String,
    #[serde(default)]
    pub sensor_name: String,
    #[serde(default)]
    pub points: Vec<CurvePoint>,
}

impl CurveRequest {
    pub fn into_curve(self) -> Curve {
        Curve {
            id: self.id.unwrap_or_default(),
            target_channel_id: self.target_id,
            target_name: self.target_name,
            sensor_id: self.sensor_id,
            sensor_name: self.sensor_name,
            points: self.points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceList {
    pub available: bool,
    pub devices: Vec<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-only projection of the reconciliation engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub enabled: bool,
    pub curve_count: usize,
    pub last_applied: BTreeMap<String, u8>,
    pub cycles: u64,
    pub in_progress: bool,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    GetCurves,
    SaveCurve { curve: CurveRequest },
    DeleteCurve { id: String },
    SetEnabled { enabled: bool },
    ListChannels,
    ListSensors,
    ListDevices,
    SetChannelSpeed { channel_id: String, percent: f64 },
    GetEngineStatus,
}

impl Request {
    /// Validate request parameters; run by the client before sending and
    /// again by the daemon before dispatch.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::GetCurves
            | Request::ListChannels
            | Request::ListSensors
            | Request::ListDevices
            | Request::GetEngineStatus
            | Request::SetEnabled { .. } => Ok(()),

            Request::SaveCurve { curve } => validate_curve_request(curve),

            Request::DeleteCurve { id } => validate_identifier("curve id", id),

            Request::SetChannelSpeed { channel_id, percent } => {
                validate_identifier("channel id", channel_id)?;
                validate_percent(*percent)?;
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::GetCurves => "GetCurves",
            Request::SaveCurve { .. } => "SaveCurve",
            Request::DeleteCurve { .. } => "DeleteCurve",
            Request::SetEnabled { .. } => "SetEnabled",
            Request::ListChannels => "ListChannels",
            Request::ListSensors => "ListSensors",
            Request::ListDevices => "ListDevices",
            Request::SetChannelSpeed { .. } => "SetChannelSpeed",
            Request::GetEngineStatus => "GetEngineStatus",
        }
    }

    /// Requests that change the curve record and should wake the engine
    pub fn mutates_curves(&self) -> bool {
        matches!(
            self,
            Request::SaveCurve { .. } | Request::DeleteCurve { .. } | Request::SetEnabled { .. }
        )
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response payload; exactly one field is populated per request type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<CurveState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve: Option<Curve>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<FanChannel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<TemperatureReading>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<DeviceList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineStatus>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn curve_state(s: CurveState) -> Self { Self { state: Some(s), ..Self::default() } }
    pub fn saved_curve(c: Curve) -> Self { Self { curve: Some(c), ..Self::default() } }
    pub fn removed_count(n: usize) -> Self { Self { removed: Some(n), ..Self::default() } }
    pub fn enabled_flag(e: bool) -> Self { Self { enabled: Some(e), ..Self::default() } }
    pub fn channel_list(c: Vec<FanChannel>) -> Self { Self { channels: Some(c), ..Self::default() } }
    pub fn sensor_list(s: Vec<TemperatureReading>) -> Self { Self { sensors: Some(s), ..Self::default() } }
    pub fn device_list(d: DeviceList) -> Self { Self { devices: Some(d), ..Self::default() } }
    pub fn engine_status(e: EngineStatus) -> Self { Self { engine: Some(e), ..Self::default() } }
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

// ============================================================================
// Validation
// ============================================================================

pub fn validate_identifier(what: &str, id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} cannot be empty", what));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(format!("{} too long: {} > {} chars", what, id.len(), MAX_ID_LENGTH));
    }
    if let Some(c) = id.chars().find(|c| FORBIDDEN_ID_CHARS.contains(c) || c.is_control()) {
        return Err(format!("{} contains forbidden character: {:?}", what, c));
    }
    Ok(())
}

pub fn validate_percent(percent: f64) -> Result<(), String> {
    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(format!("Percent must be 0-100 (got {})", percent));
    }
    Ok(())
}

pub fn validate_curve_request(curve: &CurveRequest) -> Result<(), String> {
    if let Some(id) = &curve.id {
        if !id.is_empty() {
            validate_identifier("curve id", id)?;
        }
    }
    validate_identifier("targetId", &curve.target_id)?;
    validate_identifier("sensorId", &curve.sensor_id)?;

    if curve.target_name.len() > MAX_NAME_LENGTH || curve.sensor_name.len() > MAX_NAME_LENGTH {
        return Err("Display name too long".into());
    }
    if curve.points.is_empty() {
        return Err("Curve needs at least one point".into());
    }
    if curve.points.len() > MAX_CURVE_POINTS {
        return Err(format!("Too many points (maximum {})", MAX_CURVE_POINTS));
    }
    for p in &curve.points {
        if !p.temperature.is_finite() {
            return Err("Point temperature must be a finite number".into());
        }
        if p.duty > 100 {
            return Err(format!("Point duty {} out of range (0-100)", p.duty));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CurveRequest {
        CurveRequest {
            id: None,
            target_id: "liquidctl:0:fan1".into(),
            target_name: "Kraken fan1".into(),
            sensor_id: "/amdcpu/0/temperature/2".into(),
            sensor_name: "CPU Package".into(),
            points: vec![CurvePoint::new(30.0, 30), CurvePoint::new(80.0, 100)],
        }
    }

    #[test]
    fn test_request_envelope_shape() {
        let env = RequestEnvelope::with_id(Request::SetEnabled { enabled: true }, 7);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["cmd"], "SetEnabled");
        assert_eq!(json["data"]["enabled"], true);

        let ping = serde_json::to_string(&RequestEnvelope::with_id(Request::Ping, 1)).unwrap();
        let back: RequestEnvelope = serde_json::from_str(&ping).unwrap();
        assert!(matches!(back.request, Request::Ping));
    }

    #[test]
    fn test_curve_point_wire_names() {
        let p: CurvePoint = serde_json::from_str(r#"{"t":45.5,"s":50}"#).unwrap();
        assert_eq!(p, CurvePoint::new(45.5, 50));
        let p: CurvePoint = serde_json::from_str(r#"{"temperature":60,"duty":70}"#).unwrap();
        assert_eq!(p, CurvePoint::new(60.0, 70));
        assert_eq!(serde_json::to_string(&p).unwrap(), r#"{"t":60.0,"s":70}"#);
    }

    #[test]
    fn test_curve_uses_target_id_on_the_wire() {
        let curve = sample_request().into_curve();
        let json = serde_json::to_value(&curve).unwrap();
        assert_eq!(json["targetId"], "liquidctl:0:fan1");
        assert_eq!(json["sensorName"], "CPU Package");
    }

    #[test]
    fn test_validate_set_speed() {
        let ok = Request::SetChannelSpeed { channel_id: "liquidctl:0:pump".into(), percent: 55.0 };
        assert!(ok.validate().is_ok());

        let high = Request::SetChannelSpeed { channel_id: "liquidctl:0:pump".into(), percent: 150.0 };
        assert!(high.validate().is_err());

        let nan = Request::SetChannelSpeed { channel_id: "liquidctl:0:pump".into(), percent: f64::NAN };
        assert!(nan.validate().is_err());

        let inject = Request::SetChannelSpeed { channel_id: "liquidctl:0:fan;rm".into(), percent: 10.0 };
        assert!(inject.validate().is_err());
    }

    #[test]
    fn test_validate_curve_request() {
        assert!(validate_curve_request(&sample_request()).is_ok());

        let mut missing_sensor = sample_request();
        missing_sensor.sensor_id.clear();
        assert!(validate_curve_request(&missing_sensor).is_err());

        let mut no_points = sample_request();
        no_points.points.clear();
        assert!(validate_curve_request(&no_points).is_err());

        let mut bad_duty = sample_request();
        bad_duty.points.push(CurvePoint::new(90.0, 120));
        assert!(validate_curve_request(&bad_duty).is_err());
    }

    #[test]
    fn test_missing_fields_deserialize_then_fail_validation() {
        let req: CurveRequest = serde_json::from_str(r#"{"targetId":"liquidctl:0:fan"}"#).unwrap();
        assert!(req.sensor_id.is_empty());
        assert!(validate_curve_request(&req).is_err());
    }

    #[test]
    fn test_error_response_shape() {
        let env = ResponseEnvelope::new(3, Response::error("boom"));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "boom");
    }
}
