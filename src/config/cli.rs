//! Command-line argument parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::core::{
    error::ServiceError,
    types::{DeviceSettings, WolMode},
};

#[derive(Parser, Debug, Clone)]
#[clap(name = "serial-device-config", version, author)]
#[clap(about = "Read, update and verify the configuration of a serial-attached device")]
pub struct CliArgs {
    /// Serial port the device is attached to
    #[clap(short, long, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Baud rate
    #[clap(short, long, default_value = "115200")]
    pub baud: u32,

    /// Upper bound for a single serial write, in milliseconds
    #[clap(long, default_value = "2000")]
    pub write_timeout_ms: u64,

    /// Bound each post-restart verification read to this many milliseconds
    /// (by default those reads wait for a complete frame or end of stream)
    #[clap(long)]
    pub verify_read_timeout_ms: Option<u64>,

    #[clap(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// List serial ports on this machine
    Ports,

    /// Read the device configuration
    Get,

    /// Change configuration fields, reboot the device and verify
    Set(SetArgs),

    /// Ask the device to scan for WiFi networks
    Scan,

    /// Show the firmware version published in a manifest file
    Manifest {
        #[clap(default_value = "firmware/manifest.json")]
        path: PathBuf,
    },
}

/// Field overrides for `set`; unspecified fields keep the device's value
#[derive(Args, Debug, Clone, Default)]
pub struct SetArgs {
    /// WiFi network SSID
    #[clap(long)]
    pub ssid: Option<String>,

    /// WiFi network password
    #[clap(long)]
    pub password: Option<String>,

    /// Cloud application key
    #[clap(long)]
    pub app_key: Option<String>,

    /// Cloud application secret
    #[clap(long)]
    pub app_secret: Option<String>,

    /// Cloud device identifier
    #[clap(long)]
    pub device_id: Option<String>,

    /// Hardware address of the machine to wake (AA:BB:CC:DD:EE:FF)
    #[clap(long)]
    pub pc_mac: Option<String>,

    /// Wake-on-LAN mode: cloud, local or both
    #[clap(long)]
    pub wol_mode: Option<WolMode>,

    /// Status LED on or off
    #[clap(long)]
    pub enable_led: Option<bool>,

    /// Buzzer on or off
    #[clap(long)]
    pub enable_buzzer: Option<bool>,
}

impl SetArgs {
    /// Build the proposed settings from the device's current ones
    ///
    /// Text fields are trimmed the same way a form submission would be.
    pub fn apply_to(&self, current: &DeviceSettings) -> Result<DeviceSettings, ServiceError> {
        let mut proposed = current.clone();

        let text_fields = [
            (&self.ssid, &mut proposed.ssid),
            (&self.password, &mut proposed.password),
            (&self.app_key, &mut proposed.app_key),
            (&self.app_secret, &mut proposed.app_secret),
            (&self.device_id, &mut proposed.device_id),
            (&self.pc_mac, &mut proposed.pc_mac),
        ];
        for (value, field) in text_fields {
            if let Some(value) = value {
                *field = value.trim().to_string();
            }
        }

        if let Some(mode) = self.wol_mode {
            proposed.wol_mode = mode;
        }
        if let Some(enabled) = self.enable_led {
            proposed.enable_led = enabled;
        }
        if let Some(enabled) = self.enable_buzzer {
            proposed.enable_buzzer = enabled;
        }

        if self.pc_mac.is_some() {
            validate_mac(&proposed.pc_mac).map_err(ServiceError::InvalidInput)?;
        }

        Ok(proposed)
    }
}

/// Accept an empty value or six hex octets separated by `:` or `-`
pub fn validate_mac(mac: &str) -> Result<(), String> {
    if mac.is_empty() {
        return Ok(());
    }

    let octets: Vec<&str> = mac.split([':', '-']).collect();
    if octets.len() != 6 {
        return Err(format!("MAC address must have 6 octets, got {}", octets.len()));
    }
    for octet in octets {
        let bytes = hex::decode(octet).map_err(|e| format!("Invalid MAC octet '{octet}': {e}"))?;
        if bytes.len() != 1 {
            return Err(format!("Invalid MAC octet '{octet}'"));
        }
    }
    Ok(())
}
