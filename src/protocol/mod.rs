//! Protocol message definitions

pub mod command;
pub mod notification;
pub mod response;

pub use {
    command::{Command, SCAN_ACK},
    notification::{DisconnectedParams, SessionEvent, StateChangedParams},
    response::{
        ApplyResponse, ConfigResponse, ErrorResponse, ManifestResponse, PortsResponse,
        ScanResultsResponse,
    },
};
