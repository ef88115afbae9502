//! Serial transport layer

#[cfg(test)]
pub mod mock_transport;
pub mod serial_port;
pub mod serial_transport;

use tokio::sync::watch;

pub use serial_port::{PortInfo, SerialPortTransport, list_ports};
pub use serial_transport::{LinkState, ReadChunk, ReadHandle, ReadLock, SerialTransport};

#[cfg(test)]
pub use mock_transport::MockSerialTransport;

/// Resolve once the watched value satisfies `done`, or its sender is gone
pub async fn watch_until<T>(mut rx: watch::Receiver<T>, done: impl Fn(&T) -> bool) {
    while !done(&*rx.borrow_and_update()) {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
