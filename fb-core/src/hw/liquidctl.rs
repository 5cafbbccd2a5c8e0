//! liquidctl device controller
//!
//! Talks to AIO coolers and fan hubs through the `liquidctl` command line.
//!
//! # Commands
//!
//! - `--version` installation probe
//! - `list` device enumeration (free text)
//! - `--device N status --json`, falling back to `--device N status`
//! - `--device N set <channel> speed <pct>`
//!
//! Channel ids are `liquidctl:<device index>:<channel>`.

use async_trait::async_trait;
use fb_protocol::{Backend, DeviceInfo, DeviceList, FanChannel};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::command::{CommandOutput, CommandRunner, SystemCommandRunner};
use super::control::DeviceControl;
use super::status::StatusReport;
use crate::constants::{duty, utility};
use crate::data::validate_percent;
use crate::error::{FanbridgeError, Result};

/// Per-command time limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtilityTimeouts {
    pub probe: Duration,
    pub query: Duration,
    pub set: Duration,
}

impl Default for UtilityTimeouts {
    fn default() -> Self {
        Self {
            probe: utility::PROBE_TIMEOUT,
            query: utility::QUERY_TIMEOUT,
            set: utility::SET_TIMEOUT,
        }
    }
}

pub struct LiquidctlController<R: CommandRunner = SystemCommandRunner> {
    runner: R,
    binary: String,
    timeouts: UtilityTimeouts,
}

impl LiquidctlController<SystemCommandRunner> {
    pub fn new(binary: impl Into<String>, timeouts: UtilityTimeouts) -> Self {
        Self::with_runner(SystemCommandRunner, binary, timeouts)
    }
}

impl<R: CommandRunner> LiquidctlController<R> {
    pub fn with_runner(runner: R, binary: impl Into<String>, timeouts: UtilityTimeouts) -> Self {
        Self {
            runner,
            binary: binary.into(),
            timeouts,
        }
    }

    async fn run(&self, args: &[String], limit: Duration) -> Result<CommandOutput> {
        self.runner.run(&self.binary, args, limit).await
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    /// Enumerate devices, propagating utility errors
    pub async fn try_list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let args = vec!["list".to_string()];
        let out = self.run(&args, self.timeouts.query).await?;
        if !out.success {
            return Err(FanbridgeError::command_failed(self.command_line(&args), out.diagnostic()));
        }
        Ok(parse_device_list(&out.stdout))
    }

    /// Status for one device: JSON first, then plain text
    pub async fn device_status(&self, index: u32) -> Result<StatusReport> {
        let json_args = args(&["--device", &index.to_string(), "status", "--json"]);
        let out = self.run(&json_args, self.timeouts.query).await?;
        if out.success {
            return Ok(StatusReport::parse(&out.stdout));
        }
        debug!(
            "JSON status failed for device {} ({}), retrying as text",
            index,
            out.diagnostic()
        );

        let text_args = args(&["--device", &index.to_string(), "status"]);
        let out = self.run(&text_args, self.timeouts.query).await?;
        if !out.success {
            return Err(FanbridgeError::command_failed(
                self.command_line(&text_args),
                out.diagnostic(),
            ));
        }
        Ok(StatusReport::parse(&out.stdout))
    }

    async fn run_set(&self, index: u32, channel: &str, percent: u8) -> Result<()> {
        let set_args = args(&[
            "--device",
            &index.to_string(),
            "set",
            channel,
            "speed",
            &percent.to_string(),
        ]);
        let out = self.run(&set_args, self.timeouts.set).await?;
        if out.success {
            Ok(())
        } else {
            Err(FanbridgeError::command_failed(self.command_line(&set_args), out.diagnostic()))
        }
    }
}

#[async_trait]
impl<R: CommandRunner> DeviceControl for LiquidctlController<R> {
    async fn is_installed(&self) -> bool {
        let args = vec!["--version".to_string()];
        match self.run(&args, self.timeouts.probe).await {
            Ok(out) if out.success => {
                trace!("{} reports {}", self.binary, out.stdout.trim());
                true
            }
            Ok(out) => {
                debug!("{} --version failed: {}", self.binary, out.diagnostic());
                false
            }
            Err(e) => {
                debug!("{} not usable: {}", self.binary, e);
                false
            }
        }
    }

    async fn list_devices(&self) -> DeviceList {
        match self.try_list_devices().await {
            Ok(devices) => DeviceList {
                available: true,
                devices,
                error: None,
            },
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                DeviceList {
                    available: false,
                    devices: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn list_controllable_channels(&self) -> Result<Vec<FanChannel>> {
        let devices = self.try_list_devices().await?;
        let mut channels = Vec::new();

        for device in devices {
            let report = match self.device_status(device.index).await {
                Ok(r) => r,
                Err(e) if e.is_not_installed() => return Err(e),
                Err(e) => {
                    warn!("Status query failed for device {} ({}): {}", device.index, device.name, e);
                    continue;
                }
            };

            for entry in report.into_entries() {
                channels.push(FanChannel {
                    id: channel_id(device.index, &entry.channel),
                    name: format!("{} {}", device.name, entry.label),
                    rpm: entry.rpm,
                    hardware_path: device.name.clone(),
                    controllable: true,
                    backend: Backend::Liquidctl,
                });
            }
        }

        debug!("Discovered {} controllable channels", channels.len());
        Ok(channels)
    }

    async fn set_speed(&self, channel_id: &str, percent: f64) -> Result<()> {
        let percent = validate_percent(percent)?;
        let (index, channel) = parse_channel_id(channel_id)?;
        let pct = percent.round().clamp(f64::from(duty::MIN), f64::from(duty::MAX)) as u8;

        match self.run_set(index, &channel, pct).await {
            Ok(()) => {
                info!("Set {} to {}%", channel_id, pct);
                Ok(())
            }
            Err(e) if e.is_not_installed() => Err(e),
            Err(e) if channel != utility::GENERIC_FAN_CHANNEL => {
                warn!(
                    "Setting {} failed ({}), retrying as channel '{}'",
                    channel_id,
                    e,
                    utility::GENERIC_FAN_CHANNEL
                );
                self.run_set(index, utility::GENERIC_FAN_CHANNEL, pct).await?;
                info!("Set {} to {}% via '{}'", channel_id, pct, utility::GENERIC_FAN_CHANNEL);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

pub fn channel_id(device_index: u32, channel: &str) -> String {
    format!("{}:{}:{}", Backend::Liquidctl.tag(), device_index, channel)
}

fn channel_id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^liquidctl:(\d+):([a-z0-9_]+)$").ok())
        .as_ref()
}

/// Split `liquidctl:<index>:<channel>` into its parts
pub fn parse_channel_id(id: &str) -> Result<(u32, String)> {
    let caps = channel_id_regex()
        .and_then(|re| re.captures(id))
        .ok_or_else(|| FanbridgeError::InvalidChannelId(id.to_string()))?;
    let index = caps[1]
        .parse::<u32>()
        .map_err(|_| FanbridgeError::InvalidChannelId(id.to_string()))?;
    Ok((index, caps[2].to_string()))
}

fn device_line_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "Device #0: NZXT Kraken X" / "Device 1 - Corsair Commander"
            r"(?i)^\s*device\s*#?\s*(?P<index>\d+)\s*[:\-]\s*(?P<name>.+?)\s*$",
            // "NZXT Smart Device V2 [2]"
            r"^\s*(?P<name>.+?)\s*\[(?P<index>\d+)\]\s*$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Parse `liquidctl list` output. Unmatched lines are ignored; the result is
/// ordered by index and may have gaps.
pub fn parse_device_list(output: &str) -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = Vec::new();

    for line in output.lines() {
        let parsed = device_line_patterns().iter().find_map(|re| {
            let caps = re.captures(line)?;
            let index = caps.name("index")?.as_str().parse::<u32>().ok()?;
            let name = caps.name("name")?.as_str().trim().to_string();
            Some(DeviceInfo { index, name })
        });

        match parsed {
            Some(d) if !devices.iter().any(|e| e.index == d.index) => devices.push(d),
            Some(_) => {}
            None => trace!("Ignoring list line: {}", line),
        }
    }

    devices.sort_by_key(|d| d.index);
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::command::MockCommandRunner;
    use mockall::predicate::*;
    use mockall::Sequence;

    const LIST_OUTPUT: &str = "\
Device #0: NZXT Kraken X (X53, X63 or X73)
Device #2: Corsair Commander Pro
";

    fn controller(runner: MockCommandRunner) -> LiquidctlController<MockCommandRunner> {
        LiquidctlController::with_runner(runner, "liquidctl", UtilityTimeouts::default())
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        args(parts)
    }

    #[test]
    fn test_parse_device_list_both_shapes() {
        let out = "\
Device #3: Corsair Commander Pro
garbage line
NZXT Smart Device V2 [1]
Device 0 - NZXT Kraken X
";
        let devices = parse_device_list(out);
        let indexes: Vec<_> = devices.iter().map(|d| d.index).collect();
        assert_eq!(indexes, vec![0, 1, 3]);
        assert_eq!(devices[1].name, "NZXT Smart Device V2");
        assert_eq!(devices[2].name, "Corsair Commander Pro");
    }

    #[test]
    fn test_parse_device_list_empty() {
        assert!(parse_device_list("").is_empty());
        assert!(parse_device_list("No devices found\n").is_empty());
    }

    #[test]
    fn test_parse_channel_id() {
        assert_eq!(parse_channel_id("liquidctl:2:fan1").unwrap(), (2, "fan1".to_string()));
        assert!(parse_channel_id("liquidctl:x:fan1").is_err());
        assert!(parse_channel_id("lhm:0:fan1").is_err());
        assert!(parse_channel_id("liquidctl:0:Fan 1").is_err());
        assert!(parse_channel_id("liquidctl:0:fan1;reboot").is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_percent_never_runs_command() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(0);
        let ctl = controller(runner);

        for pct in [-1.0, 100.5, 250.0, f64::NAN] {
            let err = ctl.set_speed("liquidctl:0:fan", pct).await.unwrap_err();
            assert!(matches!(err, FanbridgeError::InvalidPercent { .. }));
        }
    }

    #[tokio::test]
    async fn test_malformed_channel_never_runs_command() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(0);
        let ctl = controller(runner);

        let err = ctl.set_speed("fan1", 50.0).await.unwrap_err();
        assert!(matches!(err, FanbridgeError::InvalidChannelId(_)));
    }

    #[tokio::test]
    async fn test_set_speed_rounds_percent() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["--device", "1", "set", "pump", "speed", "43"]).as_slice())
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));
        let ctl = controller(runner);

        ctl.set_speed("liquidctl:1:pump", 42.6).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_speed_retries_with_generic_fan() {
        let mut seq = Sequence::new();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["--device", "0", "set", "fan1", "speed", "60"]).as_slice())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CommandOutput::failed(1, "unknown channel fan1")));
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["--device", "0", "set", "fan", "speed", "60"]).as_slice())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(CommandOutput::ok("")));
        let ctl = controller(runner);

        ctl.set_speed("liquidctl:0:fan1", 60.0).await.unwrap();
    }

    #[tokio::test]
    async fn test_generic_fan_is_not_retried() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::failed(1, "device busy")));
        let ctl = controller(runner);

        let err = ctl.set_speed("liquidctl:0:fan", 30.0).await.unwrap_err();
        match err {
            FanbridgeError::CommandFailed { command, diagnostic } => {
                assert_eq!(command, "liquidctl --device 0 set fan speed 30");
                assert_eq!(diagnostic, "device busy");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_failure() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|_, _, _| Err(FanbridgeError::Timeout("set".into())));
        let ctl = controller(runner);

        let err = ctl.set_speed("liquidctl:0:pump", 70.0).await.unwrap_err();
        assert!(matches!(err, FanbridgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_not_installed() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _| Err(FanbridgeError::UtilityNotInstalled("liquidctl".into())));
        let ctl = controller(runner);

        assert!(!ctl.is_installed().await);
        let list = ctl.list_devices().await;
        assert!(!list.available);
        assert!(list.error.unwrap().contains("not installed"));
        assert!(ctl.list_controllable_channels().await.unwrap_err().is_not_installed());
        assert!(ctl.set_speed("liquidctl:0:pump", 50.0).await.unwrap_err().is_not_installed());
    }

    #[tokio::test]
    async fn test_is_installed_probe() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq("liquidctl"), eq(argv(&["--version"])), eq(utility::PROBE_TIMEOUT))
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::ok("liquidctl v1.13.0")));
        let ctl = controller(runner);

        assert!(ctl.is_installed().await);
    }

    #[tokio::test]
    async fn test_channels_from_json_and_text_fallback() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["list"]).as_slice())
            .returning(|_, _, _| Ok(CommandOutput::ok(LIST_OUTPUT)));
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["--device", "0", "status", "--json"]).as_slice())
            .returning(|_, _, _| {
                Ok(CommandOutput::ok(
                    r#"[{"description":"Kraken","status":[{"key":"Pump speed","value":2730,"unit":"rpm"}]}]"#,
                ))
            });
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["--device", "2", "status", "--json"]).as_slice())
            .returning(|_, _, _| Ok(CommandOutput::failed(2, "unrecognized option --json")));
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["--device", "2", "status"]).as_slice())
            .returning(|_, _, _| Ok(CommandOutput::ok("Corsair Commander Pro\n├── Fan 1 speed   880 rpm\n")));
        let ctl = controller(runner);

        let channels = ctl.list_controllable_channels().await.unwrap();
        let ids: Vec<_> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["liquidctl:0:pump", "liquidctl:2:fan1"]);
        assert_eq!(channels[1].rpm, 880);
        assert_eq!(channels[1].hardware_path, "Corsair Commander Pro");
        assert!(channels.iter().all(|c| c.controllable && c.backend == Backend::Liquidctl));
    }

    #[tokio::test]
    async fn test_failing_device_is_skipped() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["list"]).as_slice())
            .returning(|_, _, _| Ok(CommandOutput::ok(LIST_OUTPUT)));
        runner
            .expect_run()
            .withf(|_, a, _| a.first().map(String::as_str) == Some("--device") && a[1] == "0")
            .returning(|_, _, _| Ok(CommandOutput::failed(1, "hidraw busy")));
        runner
            .expect_run()
            .withf(|_, a, _| a == argv(&["--device", "2", "status", "--json"]).as_slice())
            .returning(|_, _, _| {
                Ok(CommandOutput::ok(
                    r#"[{"description":"Commander","status":[{"key":"Fan 3 speed","value":640,"unit":"rpm"}]}]"#,
                ))
            });
        let ctl = controller(runner);

        let channels = ctl.list_controllable_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, "liquidctl:2:fan3");
    }
}
