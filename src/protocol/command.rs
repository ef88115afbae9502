//! Line commands understood by the device firmware

use crate::core::types::DeviceSettings;

/// Token the device prints once a WiFi scan has started
pub const SCAN_ACK: &str = "SCANNING";

/// Commands sent from host to device, one per line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the current configuration as a JSON object
    GetConfig,

    /// Start a WiFi scan; answered with [`SCAN_ACK`] and then a JSON array
    ScanWifi,

    /// Reboot so a staged configuration takes effect
    Restart,

    /// Stage a complete configuration object
    ///
    /// Always the whole object: the firmware replaces its configuration
    /// wholesale and does not understand partial updates.
    WriteConfig(DeviceSettings),
}

impl Command {
    /// Encode as a newline terminated line
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = match self {
            Command::GetConfig => b"GET_CONFIG".to_vec(),
            Command::ScanWifi => b"SCAN_WIFI".to_vec(),
            Command::Restart => b"RESTART".to_vec(),
            Command::WriteConfig(settings) => serde_json::to_vec(settings)?,
        };
        line.push(b'\n');
        Ok(line)
    }

    /// Short name for logs; never includes configuration values
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetConfig => "GET_CONFIG",
            Command::ScanWifi => "SCAN_WIFI",
            Command::Restart => "RESTART",
            Command::WriteConfig(_) => "WRITE_CONFIG",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
