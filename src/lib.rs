//! Serial Device Config
//!
//! Reads, updates and verifies the configuration of a device attached over a
//! serial line, and asks it to scan for WiFi networks. The device speaks a
//! line protocol (`GET_CONFIG`, `SCAN_WIFI`, `RESTART`) and answers with JSON
//! embedded in its log output.

pub mod config;
pub mod core;
pub mod protocol;
pub mod transport;

pub use core::{
    error::{ProtocolError, ServiceError, TransportError},
    session::DeviceSession,
    types::{ApplyOutcome, DeviceConfiguration, DeviceSettings, WifiNetwork, WolMode},
};
