//! Serial transport trait definition

use tokio::sync::watch;
use trait_variant::make;

use crate::core::error::{TransportError, TransportResult};

/// Physical link state, reported out of band by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// Token proving ownership of the exclusive read side
///
/// Only transports in this crate can create one, and it must be handed back through [`SerialTransport::release_read_stream`].
#[derive(Debug, PartialEq, Eq)]
pub struct ReadHandle {
    id: u64,
}

impl ReadHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// One result of reading from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadChunk {
    Data(Vec<u8>),
    Closed,
}

/// Abstraction over a byte-oriented serial connection to the device
///
/// Implemented by the real serial port and by a simulated device in tests.
/// The read side is exclusive: a second `open_read_stream` while a handle is
/// outstanding must fail with [`TransportError::ReaderLocked`] instead of
/// waiting.
#[make(Send)]
pub trait SerialTransport: Send + Sync + 'static {
    /// Write raw bytes to the device
    async fn write(&self, bytes: &[u8]) -> TransportResult<()>;

    /// Acquire the exclusive reader
    fn open_read_stream(&self) -> TransportResult<ReadHandle>;

    /// Wait for the next chunk of bytes
    async fn read(&self, handle: &ReadHandle) -> TransportResult<ReadChunk>;

    /// Give the reader back
    fn release_read_stream(&self, handle: ReadHandle);

    /// Close the connection. Calling it more than once is harmless.
    async fn close(&self);

    /// Subscribe to physical link changes
    ///
    /// The value moves from [`LinkState::Up`] to [`LinkState::Down`] at most
    /// once per connection.
    fn link_events(&self) -> watch::Receiver<LinkState>;
}

/// Scoped ownership of the read side
///
/// Dropping the lock releases the reader, so every exit path of a cycle
/// (including the cycle future itself being dropped) hands it back.
pub struct ReadLock<'a, T: SerialTransport> {
    transport: &'a T,
    handle: Option<ReadHandle>,
}

impl<'a, T: SerialTransport> ReadLock<'a, T> {
    pub fn acquire(transport: &'a T) -> TransportResult<Self> {
        let handle = transport.open_read_stream()?;
        Ok(Self {
            transport,
            handle: Some(handle),
        })
    }

    pub async fn read(&self) -> TransportResult<ReadChunk> {
        let handle = self.handle.as_ref().ok_or(TransportError::Closed)?;
        self.transport.read(handle).await
    }
}

impl<T: SerialTransport> Drop for ReadLock<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.transport.release_read_stream(handle);
        }
    }
}
