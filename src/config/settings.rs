//! Runtime settings

use std::time::Duration;

use crate::config::CliArgs;
use crate::core::{
    fetcher::{ReadWindow, RetryPolicy},
    scanner::ScanPolicy,
};

/// Baud rate the device firmware talks at
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub write_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            write_timeout: Duration::from_millis(2000),
        }
    }
}

/// Timing and retry constants of the command/response cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolSettings {
    /// Reading the configuration on connect and refresh
    pub fetch: RetryPolicy,
    /// Reading the configuration back after a restart
    pub verify: RetryPolicy,
    /// Wait after `RESTART` before talking to the device again
    pub settle_delay: Duration,
    pub scan: ScanPolicy,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            fetch: RetryPolicy {
                max_attempts: 10,
                backoff: Duration::from_millis(300),
                window: ReadWindow::Bounded(Duration::from_millis(1000)),
            },
            verify: RetryPolicy {
                max_attempts: 10,
                backoff: Duration::from_millis(500),
                window: ReadWindow::UntilFrame,
            },
            settle_delay: Duration::from_millis(5000),
            scan: ScanPolicy {
                ack_attempts: 20,
                ack_interval: Duration::from_millis(500),
                data_timeout: Duration::from_millis(5000),
            },
        }
    }
}

/// Runtime configuration settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub serial: SerialSettings,
    pub protocol: ProtocolSettings,
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        let mut protocol = ProtocolSettings::default();
        if let Some(ms) = args.verify_read_timeout_ms {
            protocol.verify.window = ReadWindow::Bounded(Duration::from_millis(ms));
        }

        Settings {
            serial: SerialSettings {
                port: args.port,
                baud_rate: args.baud,
                write_timeout: Duration::from_millis(args.write_timeout_ms),
            },
            protocol,
        }
    }
}
