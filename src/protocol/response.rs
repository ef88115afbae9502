//! Response envelopes printed by the command-line front end

use serde::Serialize;

use crate::core::types::{ApplyOutcome, ConfigDiff, DeviceConfiguration, WifiNetwork};
use crate::transport::PortInfo;

/// Response for the `get` command
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigResponse {
    pub status: String,
    pub config: DeviceConfiguration,
}

/// Response for the `set` command
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApplyResponse {
    pub status: String,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
    /// Fields that differed from the device before the write
    pub changed: Vec<String>,
}

/// Response for the `scan` command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScanResultsResponse {
    pub status: String,
    pub networks: Vec<WifiNetwork>,
}

/// Response for the `ports` command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PortsResponse {
    pub status: String,
    pub ports: Vec<PortInfo>,
}

/// Response for the `manifest` command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ManifestResponse {
    pub status: String,
    pub version: String,
}

/// Response printed when a command fails
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

impl ConfigResponse {
    pub fn ok(config: DeviceConfiguration) -> Self {
        Self {
            status: "ok".to_string(),
            config,
        }
    }
}

impl ApplyResponse {
    pub fn new(outcome: ApplyOutcome, diff: &ConfigDiff) -> Self {
        let status = match outcome {
            ApplyOutcome::Applied | ApplyOutcome::NoChange => "ok",
            ApplyOutcome::Mismatch { .. } | ApplyOutcome::VerifyFailed => "error",
        };
        Self {
            status: status.to_string(),
            outcome,
            changed: diff.fields().map(str::to_string).collect(),
        }
    }
}

impl ScanResultsResponse {
    pub fn ok(networks: Vec<WifiNetwork>) -> Self {
        Self {
            status: "ok".to_string(),
            networks,
        }
    }
}

impl PortsResponse {
    pub fn ok(ports: Vec<PortInfo>) -> Self {
        Self {
            status: "ok".to_string(),
            ports,
        }
    }
}

impl ManifestResponse {
    pub fn ok(version: String) -> Self {
        Self {
            status: "ok".to_string(),
            version,
        }
    }
}

impl ErrorResponse {
    pub fn new(error: impl std::fmt::Display) -> Self {
        Self {
            status: "error".to_string(),
            error: error.to_string(),
        }
    }
}
