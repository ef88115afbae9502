//! Error types for the serial device configuration tool

use std::time::Duration;

use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for protocol cycles (fetch, apply, scan)
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type for session operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by a serial transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Write failed: {0}")]
    Write(std::io::Error),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Read stream is already locked by another reader")]
    ReaderLocked,

    #[error("Transport closed")]
    Closed,

    #[error("Device disconnected")]
    Disconnected,
}

impl TransportError {
    /// Whether a fetch attempt that hit this error may be retried
    ///
    /// Plain I/O hiccups are transient; a closed or vanished port and
    /// reader contention are not going to heal by trying again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Write(_) | TransportError::WriteTimeout(_) | TransportError::Io(_)
        )
    }
}

/// Errors raised by the command/response cycles
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("No complete frame within {0:?}")]
    ReadTimeout(Duration),

    #[error("Frame could not be parsed: {0}")]
    Parse(String),

    #[error("Read stream closed before a complete frame arrived")]
    StreamClosed,

    #[error("Gave up after {attempts} attempts: {last}")]
    RetryBudgetExhausted {
        attempts: u32,
        #[source]
        last: Box<ProtocolError>,
    },

    #[error("Device did not acknowledge the scan after {attempts} attempts")]
    ScanNotStarted { attempts: u32 },

    #[error("Scan acknowledged but no valid network list arrived: {0}")]
    ScanDataInvalid(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Whether the failure is local to one attempt and may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            ProtocolError::ReadTimeout(_)
            | ProtocolError::Parse(_)
            | ProtocolError::StreamClosed => true,
            ProtocolError::Transport(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the port itself failed and is left in an unknown state
    ///
    /// Reader contention is a local bookkeeping problem, not a port fault.
    pub fn is_transport_fault(&self) -> bool {
        match self {
            ProtocolError::Transport(TransportError::ReaderLocked) => false,
            ProtocolError::Transport(_) => true,
            ProtocolError::RetryBudgetExhausted { last, .. } => last.is_transport_fault(),
            _ => false,
        }
    }
}

/// Errors related to session operations
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not connected to a device")]
    NotConnected,

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Operation already in progress")]
    OperationInProgress,

    #[error("Device state unknown, fetch the configuration before writing")]
    BaselineUnknown,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Firmware manifest error: {0}")]
    Manifest(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<TransportError> for ServiceError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Disconnected => ServiceError::Disconnected,
            other => ServiceError::Protocol(ProtocolError::Transport(other)),
        }
    }
}
