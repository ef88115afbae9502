//! Serial port transport backed by tokio-serial

use std::{
    io::ErrorKind,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info, warn};

use crate::{
    config::SerialSettings,
    core::error::{TransportError, TransportResult},
    transport::{LinkState, ReadChunk, ReadHandle, SerialTransport, watch_until},
};

const READ_BUFFER_SIZE: usize = 1024;

/// How often the port list is polled to notice an unplugged device
const PORT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// No reader holds the stream
const NO_READER: u64 = 0;

/// Serial port connected to the device
pub struct SerialPortTransport {
    port_name: String,
    write_timeout: Duration,
    reader: Mutex<Option<ReadHalf<SerialStream>>>,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    held_reader: AtomicU64,
    next_handle: AtomicU64,
    link_tx: Arc<watch::Sender<LinkState>>,
    closed_tx: watch::Sender<bool>,
    port_watcher: JoinHandle<()>,
}

impl SerialPortTransport {
    /// Open the port (8N1) and start watching for removal
    pub fn open(settings: &SerialSettings) -> TransportResult<Self> {
        let builder = tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One);

        let stream = SerialStream::open(&builder).map_err(|e| TransportError::Open {
            port: settings.port.clone(),
            reason: e.to_string(),
        })?;
        info!(
            "Opened serial port {} at {} baud",
            settings.port, settings.baud_rate
        );

        let (reader, writer) = tokio::io::split(stream);
        let (link_tx, _) = watch::channel(LinkState::Up);
        let link_tx = Arc::new(link_tx);
        let (closed_tx, _) = watch::channel(false);

        let port_watcher = tokio::spawn(watch_port(
            settings.port.clone(),
            link_tx.clone(),
            closed_tx.subscribe(),
        ));

        Ok(Self {
            port_name: settings.port.clone(),
            write_timeout: settings.write_timeout,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            held_reader: AtomicU64::new(NO_READER),
            next_handle: AtomicU64::new(NO_READER + 1),
            link_tx,
            closed_tx,
            port_watcher,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Flag the link as gone if the error means the device vanished
    fn note_io_error(&self, error: &std::io::Error) {
        if matches!(
            error.kind(),
            ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::ConnectionAborted
        ) {
            warn!("Serial port {} reported {}, link down", self.port_name, error);
            self.link_tx.send_replace(LinkState::Down);
        }
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.port_watcher.abort();
    }
}

impl SerialTransport for SerialPortTransport {
    async fn write(&self, bytes: &[u8]) -> TransportResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        let result = tokio::time::timeout(self.write_timeout, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.note_io_error(&e);
                Err(TransportError::Write(e))
            }
            Err(_) => Err(TransportError::WriteTimeout(self.write_timeout)),
        }
    }

    fn open_read_stream(&self) -> TransportResult<ReadHandle> {
        if *self.closed_tx.borrow() {
            return Err(TransportError::Closed);
        }

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.held_reader
            .compare_exchange(NO_READER, id, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TransportError::ReaderLocked)?;

        Ok(ReadHandle::new(id))
    }

    async fn read(&self, handle: &ReadHandle) -> TransportResult<ReadChunk> {
        if self.held_reader.load(Ordering::Acquire) != handle.id() {
            return Err(TransportError::ReaderLocked);
        }

        let closed = self.closed_tx.subscribe();
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Ok(ReadChunk::Closed);
        };

        let mut buf = [0u8; READ_BUFFER_SIZE];
        tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => Ok(ReadChunk::Closed),
                Ok(n) => Ok(ReadChunk::Data(buf[..n].to_vec())),
                Err(e) => {
                    self.note_io_error(&e);
                    Err(TransportError::Io(e))
                }
            },
            _ = watch_until(closed, |closed| *closed) => Ok(ReadChunk::Closed),
        }
    }

    fn release_read_stream(&self, handle: ReadHandle) {
        let _ = self.held_reader.compare_exchange(
            handle.id(),
            NO_READER,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    async fn close(&self) {
        if self.closed_tx.send_replace(true) {
            return;
        }
        self.port_watcher.abort();

        // In-flight reads observe the closed flag and drop their lock first
        self.reader.lock().await.take();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        debug!("Closed serial port {}", self.port_name);
    }

    fn link_events(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }
}

/// Poll the system port list until our port disappears or the transport closes
async fn watch_port(
    port_name: String,
    link_tx: Arc<watch::Sender<LinkState>>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(PORT_POLL_INTERVAL) => {}
            _ = closed.changed() => return,
        }

        let name = port_name.clone();
        let present = tokio::task::spawn_blocking(move || {
            serialport::available_ports()
                .map(|ports| ports.iter().any(|p| p.port_name == name))
        })
        .await;

        match present {
            Ok(Ok(false)) => {
                warn!("Serial port {} disappeared", port_name);
                link_tx.send_replace(LinkState::Down);
                return;
            }
            Ok(Ok(true)) => {}
            Ok(Err(e)) => debug!("Port enumeration failed: {}", e),
            Err(e) => debug!("Port enumeration task failed: {}", e),
        }
    }
}

/// A serial port visible on this machine
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PortInfo {
    pub port_name: String,
    pub description: String,
    /// USB vendor/product id as `vvvv:pppp`, for USB ports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb_id: Option<String>,
}

impl From<&serialport::SerialPortInfo> for PortInfo {
    fn from(info: &serialport::SerialPortInfo) -> Self {
        use serialport::SerialPortType;

        let (description, usb_id) = match &info.port_type {
            SerialPortType::UsbPort(usb) => (
                format!(
                    "{} - {}",
                    usb.manufacturer.as_deref().unwrap_or("Unknown Manufacturer"),
                    usb.product.as_deref().unwrap_or("USB Serial Device")
                ),
                Some(format!("{:04x}:{:04x}", usb.vid, usb.pid)),
            ),
            SerialPortType::PciPort => ("PCI Serial Port".to_string(), None),
            SerialPortType::BluetoothPort => ("Bluetooth Serial Port".to_string(), None),
            SerialPortType::Unknown => ("Serial Port".to_string(), None),
        };

        Self {
            port_name: info.port_name.clone(),
            description,
            usb_id,
        }
    }
}

/// List serial ports, USB ports first
pub fn list_ports() -> TransportResult<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|e| TransportError::Open {
        port: "*".to_string(),
        reason: e.to_string(),
    })?;

    let mut infos: Vec<PortInfo> = ports.iter().map(PortInfo::from).collect();
    infos.sort_by_key(|p| (p.usb_id.is_none(), p.port_name.clone()));
    Ok(infos)
}
