//! Unix Socket Server
//!
//! Serves curve management and device queries to local clients.
//!
//! # Security Features
//! - **Socket permissions**: Group-accessible mode with symlink attack prevention
//! - **Peer credentials**: Audit logging of UID/GID/PID for every write
//! - **Connection limits**: Maximum concurrent connections enforced
//! - **Timeouts**: Read/write timeouts prevent resource exhaustion
//! - **Message limits**: Maximum message size prevents memory exhaustion
//! - **Input validation**: All parameters validated before any side effect

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use fb_core::{CurveStore, DeviceControl, FanbridgeError, SensorSource};
use fb_protocol::{Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope};

use crate::control_loop::ControlState;

// ============================================================================
// Security Constants
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 32;

/// Maximum request size in bytes
const MAX_MESSAGE_SIZE: usize = fb_protocol::MAX_MESSAGE_SIZE;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner and group read/write
const SOCKET_MODE: u32 = 0o660;

/// Global connection counter
static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Everything a request handler can reach
pub struct Services {
    pub store: Arc<CurveStore>,
    pub sensors: Arc<dyn SensorSource>,
    pub devices: Arc<dyn DeviceControl>,
    pub control: Arc<ControlState>,
}

/// Run a store mutation on the blocking pool; saves fsync and rename
async fn store_write<T, F>(store: &Arc<CurveStore>, op: F) -> fb_core::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&CurveStore) -> fb_core::Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| FanbridgeError::Io(std::io::Error::other(format!("store task failed: {}", e))))?
}

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Bind the socket, refusing to replace anything but a stale socket file
pub fn bind_socket(socket_path: &Path) -> std::io::Result<UnixListener> {
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Socket path is a symlink - refusing for security",
            ));
        }
        std::fs::remove_file(socket_path)?;
        debug!("Removed existing socket file");
    }

    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    Ok(listener)
}

/// Accept connections until Ctrl-C
pub async fn run_server(socket_path: &Path, services: Arc<Services>) -> std::io::Result<()> {
    let listener = bind_socket(socket_path)?;

    info!("Listening on {} (mode {:o})", socket_path.display(), SOCKET_MODE);
    info!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let services = services.clone();
                        tokio::spawn(async move {
                            handle_client(stream, services).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped");
    Ok(())
}

/// Client credentials from Unix socket peer
#[derive(Debug, Clone, Copy)]
pub(crate) struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: i32,
}

async fn handle_client(stream: UnixStream, services: Arc<Services>) {
    let Some(cred) = get_peer_credentials(&stream) else {
        error!("Failed to get peer credentials, rejecting connection");
        return;
    };

    debug!(
        "Connection from uid={}, gid={}, pid={}",
        cred.uid, cred.gid, cred.pid
    );

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    cred.uid,
                    cred.pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("Non-UTF8 request from uid={}: {}", cred.uid, e);
                        let envelope =
                            ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &envelope).await;
                        break;
                    }
                };

                let envelope = process_request(line_str, &cred, &services).await;
                if send_response(&mut writer, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!(
                        "Message too large (>{} bytes) from uid={}, pid={}",
                        MAX_MESSAGE_SIZE, cred.uid, cred.pid
                    );
                    let envelope = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &envelope).await;
                } else {
                    error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                break;
            }
        }
    }
}

/// Send response with timeout
async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let response_json = serde_json::to_string(envelope).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Get peer credentials (uid, gid, pid) from Unix socket
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    #[cfg(target_os = "linux")]
    {
        // SAFETY: ucred is a plain C struct with no pointers; all-zero is valid.
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: fd is a live socket owned by `stream`, and cred/len describe
        // a correctly sized ucred buffer.
        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };

        if result == 0 {
            return Some(PeerCredentials {
                uid: cred.uid,
                gid: cred.gid,
                pid: cred.pid,
            });
        }
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "macos"
    ))]
    {
        let mut uid: libc::uid_t = 0;
        let mut gid: libc::gid_t = 0;

        // SAFETY: fd is a live socket and uid/gid are valid out-pointers.
        let result = unsafe { libc::getpeereid(fd, &mut uid, &mut gid) };

        if result == 0 {
            return Some(PeerCredentials { uid, gid, pid: 0 });
        }
    }

    None
}

/// Process a single request and return the response envelope
pub(crate) async fn process_request(
    line: &str,
    cred: &PeerCredentials,
    services: &Services,
) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", cred.uid, e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!("Request validation failed from uid={}: {}", cred.uid, e);
        return ResponseEnvelope::new(request_id, Response::error(sanitize_validation_error(&e)));
    }

    let request_type = request.type_name();
    let wake_engine = request.mutates_curves();
    debug!(
        "Processing {} (id={}) from uid={}, pid={}",
        request_type, request_id, cred.uid, cred.pid
    );

    let response = match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::GetCurves => Response::Ok(ResponseData::curve_state(services.store.load())),

        Request::SaveCurve { curve } => {
            info!(
                "AUDIT: SaveCurve target={} sensor={} points={} by uid={}, pid={}",
                curve.target_id,
                curve.sensor_id,
                curve.points.len(),
                cred.uid,
                cred.pid
            );
            let curve = curve.into_curve();
            match store_write(&services.store, move |store| store.upsert(curve)).await {
                Ok(saved) => Response::Ok(ResponseData::saved_curve(saved)),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::DeleteCurve { id } => {
            info!("AUDIT: DeleteCurve id={} by uid={}, pid={}", id, cred.uid, cred.pid);
            match store_write(&services.store, move |store| store.remove(&id)).await {
                Ok(removed) => Response::Ok(ResponseData::removed_count(removed)),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::SetEnabled { enabled } => {
            info!("AUDIT: SetEnabled enabled={} by uid={}, pid={}", enabled, cred.uid, cred.pid);
            match store_write(&services.store, move |store| store.set_enabled(enabled)).await {
                Ok(enabled) => Response::Ok(ResponseData::enabled_flag(enabled)),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::ListChannels => match services.devices.list_controllable_channels().await {
            Ok(channels) => Response::Ok(ResponseData::channel_list(channels)),
            Err(e) => Response::error(e.to_string()),
        },

        Request::ListSensors => {
            let snapshot = services.sensors.fetch_readings().await;
            if snapshot.available {
                Response::Ok(ResponseData::sensor_list(snapshot.temperatures))
            } else {
                Response::error(format!(
                    "Sensor source unavailable: {}",
                    snapshot.error.unwrap_or_default()
                ))
            }
        }

        Request::ListDevices => Response::Ok(ResponseData::device_list(services.devices.list_devices().await)),

        Request::SetChannelSpeed { channel_id, percent } => {
            info!(
                "AUDIT: SetChannelSpeed channel={} percent={} by uid={}, pid={}",
                channel_id, percent, cred.uid, cred.pid
            );
            match services.devices.set_speed(&channel_id, percent).await {
                Ok(()) => {
                    // a curve on this channel takes over again next cycle
                    services.control.engine().invalidate(&channel_id);
                    Response::ok()
                }
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::GetEngineStatus => {
            Response::Ok(ResponseData::engine_status(services.control.engine().status()))
        }
    };

    match &response {
        Response::Error { message } => {
            warn!(
                "Request {} (id={}) failed for uid={}: {}",
                request_type, request_id, cred.uid, message
            );
        }
        Response::Ok(_) if wake_engine => services.control.signal_reload(),
        Response::Ok(_) => {}
    }

    ResponseEnvelope::new(request_id, response)
}

/// Map validation failures onto a fixed set of messages
fn sanitize_validation_error(error: &str) -> String {
    if error.contains("too long") || error.contains("Too many") {
        return "Parameter exceeds maximum length".to_string();
    }
    if error.contains("forbidden") {
        return "Invalid parameter format".to_string();
    }
    if error.contains("out of range") || error.contains("0-100") {
        return "Parameter out of valid range".to_string();
    }
    if error.contains("empty") || error.contains("at least one") {
        return "Missing required parameter".to_string();
    }

    "Invalid request parameter".to_string()
}
