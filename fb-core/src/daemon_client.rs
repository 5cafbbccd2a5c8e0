//! Daemon Client
//!
//! Talks to `fanbridged` over its Unix socket. One JSON request per line,
//! one JSON response per line, matched by request id.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fb_protocol::{
    CurveRequest, CurveState, Curve, DeviceList, EngineStatus, FanChannel, Request,
    RequestEnvelope, Response, ResponseData, ResponseEnvelope, TemperatureReading,
    MAX_MESSAGE_SIZE, MAX_RESPONSE_SIZE,
};
use tracing::debug;

use crate::constants::ipc::{CHANNEL_SCAN_TIMEOUT, REQUEST_TIMEOUT, SET_SPEED_TIMEOUT};
use crate::error::{FanbridgeError, Result};

/// Typical GetCurves / ListSensors replies fit in this
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Connection to the daemon
pub struct DaemonClient {
    socket_path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path).map_err(|e| {
            FanbridgeError::DaemonConnection(format!(
                "Failed to connect to daemon at {}: {}",
                socket_path.display(),
                e
            ))
        })?;

        let timeout = Some(REQUEST_TIMEOUT);
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        let reader_stream = stream.try_clone()?;

        Ok(Self {
            socket_path,
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and wait for its response. A send failure triggers one
    /// reconnect and resend.
    pub fn request(&mut self, req: Request) -> Result<Response> {
        self.request_with_retry(req, true)
    }

    fn request_with_retry(&mut self, req: Request, allow_retry: bool) -> Result<Response> {
        req.validate()
            .map_err(|e| FanbridgeError::DaemonResponse(format!("Request validation failed: {}", e)))?;

        let request_id = fb_protocol::generate_request_id();
        let envelope = RequestEnvelope::with_id(req.clone(), request_id);

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(FanbridgeError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        if let Err(e) = self.writer.write_all(&json) {
            if allow_retry {
                debug!("Send failed ({}), reconnecting", e);
                *self = Self::connect(&self.socket_path)?;
                return self.request_with_retry(req, false);
            }
            return Err(FanbridgeError::DaemonConnection(format!("Failed to send request: {}", e)));
        }

        self.reader.get_ref().set_read_timeout(Some(response_timeout(&req)))?;

        let mut response_buf: Vec<u8> = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        // one byte past the limit so an oversized reply is detectable
        let limit = (MAX_RESPONSE_SIZE + 1) as u64;
        (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut response_buf)
            .map_err(|e| FanbridgeError::DaemonConnection(format!("Failed to read response: {}", e)))?;

        if response_buf.is_empty() {
            return Err(FanbridgeError::DaemonConnection(
                "Daemon closed connection".to_string(),
            ));
        }
        if response_buf.len() > MAX_RESPONSE_SIZE {
            return Err(FanbridgeError::MessageTooLarge {
                size: response_buf.len(),
                max_size: MAX_RESPONSE_SIZE,
            });
        }
        if response_buf.last() == Some(&b'\n') {
            response_buf.pop();
        }

        let response: ResponseEnvelope = serde_json::from_slice(&response_buf)?;
        if response.id != request_id {
            return Err(FanbridgeError::DaemonResponse(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        verify_response_type(&req, &response.response)?;
        Ok(response.response)
    }

    /// Send a request and unwrap the ok payload
    fn call(&mut self, req: Request) -> Result<ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { message } => Err(FanbridgeError::DaemonResponse(message)),
        }
    }

    pub fn ping(&mut self) -> Result<String> {
        self.call(Request::Ping)?.value.ok_or_else(unexpected)
    }

    pub fn version(&mut self) -> Result<String> {
        self.call(Request::Version)?.value.ok_or_else(unexpected)
    }

    pub fn get_curves(&mut self) -> Result<CurveState> {
        self.call(Request::GetCurves)?.state.ok_or_else(unexpected)
    }

    pub fn save_curve(&mut self, curve: CurveRequest) -> Result<Curve> {
        self.call(Request::SaveCurve { curve })?.curve.ok_or_else(unexpected)
    }

    pub fn delete_curve(&mut self, id: &str) -> Result<usize> {
        self.call(Request::DeleteCurve { id: id.to_string() })?
            .removed
            .ok_or_else(unexpected)
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<bool> {
        self.call(Request::SetEnabled { enabled })?
            .enabled
            .ok_or_else(unexpected)
    }

    pub fn list_channels(&mut self) -> Result<Vec<FanChannel>> {
        self.call(Request::ListChannels)?.channels.ok_or_else(unexpected)
    }

    pub fn list_sensors(&mut self) -> Result<Vec<TemperatureReading>> {
        self.call(Request::ListSensors)?.sensors.ok_or_else(unexpected)
    }

    pub fn list_devices(&mut self) -> Result<DeviceList> {
        self.call(Request::ListDevices)?.devices.ok_or_else(unexpected)
    }

    pub fn set_channel_speed(&mut self, channel_id: &str, percent: f64) -> Result<()> {
        self.call(Request::SetChannelSpeed {
            channel_id: channel_id.to_string(),
            percent,
        })
        .map(|_| ())
    }

    pub fn engine_status(&mut self) -> Result<EngineStatus> {
        self.call(Request::GetEngineStatus)?.engine.ok_or_else(unexpected)
    }
}

/// How long to wait for the reply. Requests that run liquidctl in the
/// daemon wait out its command timeouts.
fn response_timeout(req: &Request) -> Duration {
    match req {
        Request::SetChannelSpeed { .. } => SET_SPEED_TIMEOUT,
        Request::ListChannels | Request::ListDevices => CHANNEL_SCAN_TIMEOUT,
        _ => REQUEST_TIMEOUT,
    }
}

fn unexpected() -> FanbridgeError {
    FanbridgeError::DaemonResponse("Unexpected response type".to_string())
}

/// Check that an ok response carries the field its request implies
fn verify_response_type(req: &Request, resp: &Response) -> Result<()> {
    let data = match resp {
        Response::Error { .. } => return Ok(()),
        Response::Ok(data) => data,
    };

    let valid = match req {
        Request::Ping | Request::Version => data.value.is_some(),
        Request::GetCurves => data.state.is_some(),
        Request::SaveCurve { .. } => data.curve.is_some(),
        Request::DeleteCurve { .. } => data.removed.is_some(),
        Request::SetEnabled { .. } => data.enabled.is_some(),
        Request::ListChannels => data.channels.is_some(),
        Request::ListSensors => data.sensors.is_some(),
        Request::ListDevices => data.devices.is_some(),
        Request::GetEngineStatus => data.engine.is_some(),
        Request::SetChannelSpeed { .. } => true,
    };

    if !valid {
        return Err(FanbridgeError::DaemonResponse(format!(
            "Response type mismatch for request {}",
            req.type_name()
        )));
    }
    Ok(())
}

/// Whether a daemon socket exists at `path`
pub fn is_daemon_available(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}
