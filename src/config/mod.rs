//! Configuration module

pub mod cli;
pub mod manifest;
pub mod settings;

pub use cli::{CliArgs, CliCommand, SetArgs};
pub use manifest::FirmwareManifest;
pub use settings::{ProtocolSettings, SerialSettings, Settings};
