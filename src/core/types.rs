//! Domain types for device configuration

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wake-on-LAN trigger mode supported by the device firmware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WolMode {
    /// Wake only from the cloud integration
    Cloud,
    /// Wake only from the local button
    Local,
    #[default]
    Both,
}

impl std::str::FromStr for WolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(WolMode::Cloud),
            "local" => Ok(WolMode::Local),
            "both" => Ok(WolMode::Both),
            other => Err(format!(
                "unknown WoL mode '{other}', expected cloud, local or both"
            )),
        }
    }
}

/// Editable device settings
///
/// This is the object written to the device. Missing fields in a device
/// response fall back to empty strings, `false` and [`WolMode::Both`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    /// WiFi network SSID
    pub ssid: String,
    /// WiFi network password
    pub password: String,
    /// Cloud application key
    pub app_key: String,
    /// Cloud application secret
    pub app_secret: String,
    /// Cloud device identifier
    pub device_id: String,
    /// Hardware address of the machine to wake
    pub pc_mac: String,
    pub wol_mode: WolMode,
    pub enable_led: bool,
    pub enable_buzzer: bool,
}

/// Configuration as reported by the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    #[serde(flatten)]
    pub settings: DeviceSettings,
    /// Firmware version, reported by the device and never written back
    #[serde(
        rename = "firmwareVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub firmware_version: Option<String>,
}

impl DeviceConfiguration {
    /// Firmware version for display, `"N/A"` when the device did not report one
    pub fn firmware_label(&self) -> &str {
        self.firmware_version.as_deref().unwrap_or("N/A")
    }
}

/// Fields of a proposed configuration that differ from the baseline
///
/// Keys are the wire (camelCase) field names, values are the proposed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDiff(Map<String, Value>);

impl ConfigDiff {
    /// Compute the diff of `proposed` against `baseline`
    pub fn between(
        baseline: &DeviceSettings,
        proposed: &DeviceSettings,
    ) -> Result<Self, serde_json::Error> {
        let before = to_object(baseline)?;
        let after = to_object(proposed)?;

        let changed = after
            .into_iter()
            .filter(|(key, value)| before.get(key) != Some(value))
            .collect();

        Ok(Self(changed))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Names of the changed fields
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Keys of `sent` whose value differs in `reported`
///
/// Fields only the device reports (like the firmware version) are ignored.
pub fn mismatched_fields(
    sent: &DeviceSettings,
    reported: &DeviceConfiguration,
) -> Result<Vec<String>, serde_json::Error> {
    let sent = to_object(sent)?;
    let reported = to_object(reported)?;

    Ok(sent
        .into_iter()
        .filter(|(key, value)| reported.get(key) != Some(value))
        .map(|(key, _)| key)
        .collect())
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Represents a network discovered by the device's WiFi scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WifiNetwork {
    /// Network SSID
    pub ssid: String,
    /// Signal strength in dBm
    pub rssi: i32,
    /// Whether the network requires a password
    #[serde(default)]
    pub secure: bool,
}

/// Sort networks by signal strength, strongest first
///
/// The sort is stable, so networks with equal strength keep device order.
pub fn sort_by_signal(networks: &mut [WifiNetwork]) {
    networks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
}

/// Sub-operation a busy session is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    FetchConfig,
    ApplyConfig,
    ScanWifi,
}

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Busy(Operation),
}

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Requested by the caller
    User,
    /// The device was physically removed
    DeviceRemoved,
    /// A transport failure left the port in an unknown state
    TransportFault,
    /// The device never answered with a configuration
    NoResponse,
}

/// Result of a write-then-verify cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Written, rebooted and read back identical
    Applied,
    /// Nothing differed from the baseline, the device was not touched
    NoChange,
    /// Read back after reboot, but these fields differ from what was sent
    Mismatch { fields: Vec<String> },
    /// The device never reported a valid configuration after reboot
    VerifyFailed,
}

/// Session identifier used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
