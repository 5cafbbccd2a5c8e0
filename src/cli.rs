/*
 * This file is part of fanbridge.
 *
 * Copyright (C) 2026 fanbridge contributors
 *
 * fanbridge is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * fanbridge is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with fanbridge. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface
//!
//! Every command is one or two requests to `fanbridged`.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use fb_core::{is_daemon_available, DaemonClient};
use fb_protocol::{Curve, CurvePoint, CurveRequest, DeviceList, FanChannel, TemperatureReading};

#[derive(Parser, Debug)]
#[command(name = "fanbridge")]
#[command(version)]
#[command(about = "fanbridge - temperature curves for liquidctl fans and pumps")]
#[command(long_about = "fanbridge - temperature curves for liquidctl fans and pumps

Talks to the fanbridged daemon, which reads temperatures from a hardware
monitor and drives liquidctl channels along user-defined curves.

EXAMPLES:
    fanbridge status                     Show engine status
    fanbridge channels                   List controllable channels
    fanbridge sensors                    List temperature sensors
    fanbridge curves add --target liquidctl:0:fan1 --sensor /amdcpu/0/temperature/2 \\
        --point 30:30 --point 45:50 --point 65:80 --point 80:100
    fanbridge curves enable              Turn automatic control on
    fanbridge set liquidctl:0:pump 60    Set a channel once

ENVIRONMENT VARIABLES:
    FANBRIDGE_LOG=debug    Client log level")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Daemon socket path
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Print raw JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show engine status
    Status,

    /// Curve management
    #[command(subcommand, about = "List, add and remove fan curves")]
    Curves(CurveCommands),

    /// List controllable fan and pump channels
    Channels,

    /// List temperature sensors
    Sensors,

    /// List liquidctl devices
    Devices,

    /// Set a channel's duty once
    Set {
        /// Channel id, e.g. liquidctl:0:fan1
        channel: String,
        /// Duty percentage (0-100)
        percent: f64,
    },

    /// Check that the daemon answers
    Ping,
}

#[derive(Subcommand, Debug)]
pub enum CurveCommands {
    /// List all curves
    List,
    /// Show one curve
    Show {
        /// Curve id
        id: String,
    },
    /// Add a curve, replacing any curve on the same channel
    Add {
        /// Target channel id
        #[arg(long)]
        target: String,
        /// Display name of the target
        #[arg(long, default_value = "")]
        target_name: String,
        /// Sensor id
        #[arg(long)]
        sensor: String,
        /// Display name of the sensor
        #[arg(long, default_value = "")]
        sensor_name: String,
        /// Curve point as TEMP:DUTY; repeat for each point
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<CurvePoint>,
        /// Replace the curve with this id
        #[arg(long)]
        id: Option<String>,
    },
    /// Delete a curve
    Delete {
        /// Curve id
        id: String,
    },
    /// Turn automatic control on
    Enable,
    /// Turn automatic control off
    Disable,
}

/// `"45:50"` -> 45°C at 50%
pub fn parse_point(raw: &str) -> std::result::Result<CurvePoint, String> {
    let (temp, duty) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected TEMP:DUTY, got '{}'", raw))?;
    let temperature: f64 = temp
        .trim()
        .parse()
        .map_err(|_| format!("invalid temperature '{}'", temp))?;
    if !temperature.is_finite() {
        return Err(format!("invalid temperature '{}'", temp));
    }
    let duty: u8 = duty
        .trim()
        .parse()
        .map_err(|_| format!("invalid duty '{}'", duty))?;
    if duty > 100 {
        return Err(format!("duty {} out of range (0-100)", duty));
    }
    Ok(CurvePoint::new(temperature, duty))
}

// ============================================================================
// CLI Execution
// ============================================================================

pub fn run_cli(cli: &Cli) -> Result<()> {
    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(fb_core::constants::paths::default_socket_path);
    if !is_daemon_available(&socket) {
        return Err(anyhow!(
            "fanbridged is not running (no socket at {})",
            socket.display()
        ));
    }
    debug!("Connecting to {}", socket.display());
    let mut client = DaemonClient::connect(&socket)
        .with_context(|| format!("is fanbridged running? (socket {})", socket.display()))?;

    match &cli.command {
        Commands::Status => cmd_status(&mut client, cli.json),
        Commands::Curves(sub) => cmd_curves(&mut client, sub, cli.json),
        Commands::Channels => {
            let channels = client.list_channels()?;
            emit(cli.json, &channels, print_channels)
        }
        Commands::Sensors => {
            let sensors = client.list_sensors()?;
            emit(cli.json, &sensors, print_sensors)
        }
        Commands::Devices => {
            let devices = client.list_devices()?;
            emit(cli.json, &devices, print_devices)
        }
        Commands::Set { channel, percent } => {
            client.set_channel_speed(channel, *percent)?;
            println!("{} set to {}%", channel, percent);
            Ok(())
        }
        Commands::Ping => {
            let reply = client.ping()?;
            let version = client.version()?;
            println!("{} (fanbridged v{})", reply, version);
            Ok(())
        }
    }
}

fn emit<T: Serialize + ?Sized>(json: bool, value: &T, text: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

// ============================================================================
// Status Command
// ============================================================================

fn cmd_status(client: &mut DaemonClient, json: bool) -> Result<()> {
    let status = client.engine_status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("fanbridge Status");
    println!("================");
    println!();
    println!("Daemon:  v{}", client.version()?);
    println!("Control: {}", if status.enabled { "enabled" } else { "disabled" });
    println!("Curves:  {}", status.curve_count);
    println!("Cycles:  {}{}", status.cycles, if status.in_progress { " (running)" } else { "" });
    if !status.last_applied.is_empty() {
        println!();
        println!("Last applied:");
        for (channel, duty) in &status.last_applied {
            println!("  {:<28} {:>3}%", channel, duty);
        }
    }
    Ok(())
}

// ============================================================================
// Curve Commands
// ============================================================================

fn cmd_curves(client: &mut DaemonClient, cmd: &CurveCommands, json: bool) -> Result<()> {
    match cmd {
        CurveCommands::List => {
            let state = client.get_curves()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
                return Ok(());
            }
            println!(
                "Fan Curves ({}, control {}):",
                state.curves.len(),
                if state.enabled { "enabled" } else { "disabled" }
            );
            for curve in &state.curves {
                println!(
                    "  [{}] {} <- {} ({} points)",
                    curve.id,
                    label(&curve.target_name, &curve.target_channel_id),
                    label(&curve.sensor_name, &curve.sensor_id),
                    curve.points.len()
                );
            }
        }
        CurveCommands::Show { id } => {
            let state = client.get_curves()?;
            let curve = state
                .curves
                .into_iter()
                .find(|c| c.id == *id)
                .ok_or_else(|| anyhow!("Curve not found: {}", id))?;
            emit(json, &curve, print_curve)?;
        }
        CurveCommands::Add {
            target,
            target_name,
            sensor,
            sensor_name,
            points,
            id,
        } => {
            let saved = client.save_curve(CurveRequest {
                id: id.clone(),
                target_id: target.clone(),
                target_name: target_name.clone(),
                sensor_id: sensor.clone(),
                sensor_name: sensor_name.clone(),
                points: points.clone(),
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&saved)?);
            } else {
                println!("Saved curve {} for {}", saved.id, saved.target_channel_id);
            }
        }
        CurveCommands::Delete { id } => {
            let removed = client.delete_curve(id)?;
            if removed == 0 {
                return Err(anyhow!("Curve not found: {}", id));
            }
            println!("Deleted curve: {}", id);
        }
        CurveCommands::Enable => {
            client.set_enabled(true)?;
            println!("Automatic curve control enabled");
        }
        CurveCommands::Disable => {
            client.set_enabled(false)?;
            println!("Automatic curve control disabled");
        }
    }
    Ok(())
}

fn label<'a>(name: &'a str, id: &'a str) -> &'a str {
    if name.is_empty() {
        id
    } else {
        name
    }
}

fn print_curve(curve: &Curve) {
    println!("Curve: {}", curve.id);
    println!("  Target: {} ({})", label(&curve.target_name, &curve.target_channel_id), curve.target_channel_id);
    println!("  Sensor: {} ({})", label(&curve.sensor_name, &curve.sensor_id), curve.sensor_id);
    println!("Points:");
    for point in fb_core::normalize_points(&curve.points) {
        println!("  {:>5.1}°C -> {:>3}%", point.temperature, point.duty);
    }
}

// ============================================================================
// Hardware Listings
// ============================================================================

fn print_channels(channels: &Vec<FanChannel>) {
    println!("Channels ({}):", channels.len());
    for ch in channels {
        println!("  {:<28} {:>5} rpm  {}", ch.id, ch.rpm, ch.hardware_path);
    }
}

fn print_sensors(sensors: &Vec<TemperatureReading>) {
    println!("Temperature sensors ({}):", sensors.len());
    for t in sensors {
        let value = t
            .value
            .map(|v| format!("{:.1}°C", v))
            .unwrap_or_else(|| "--".to_string());
        println!("  {:<36} {:>8}  {} / {}", t.id, value, t.hardware_path, t.name);
    }
}

fn print_devices(list: &DeviceList) {
    if !list.available {
        println!(
            "liquidctl unavailable: {}",
            list.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }
    println!("Devices ({}):", list.devices.len());
    for d in &list.devices {
        println!("  #{} {}", d.index, d.name);
    }
}
