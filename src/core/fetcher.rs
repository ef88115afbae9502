//! Configuration fetch cycle with bounded retries

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    core::{
        error::{ProtocolError, ProtocolResult},
        frame::{FrameExtractor, JsonObjectFrame},
        types::DeviceConfiguration,
    },
    protocol::Command,
    transport::{ReadChunk, ReadLock, SerialTransport},
};

/// How long a single attempt keeps reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadWindow {
    /// Keep accumulating, tolerating malformed frames, until one parses or
    /// the window elapses
    Bounded(Duration),
    /// Read until the completion signal shows up or the stream closes, then
    /// parse exactly once
    UntilFrame,
}

/// Attempt budget for a command/response cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one
    pub backoff: Duration,
    pub window: ReadWindow,
}

/// Sends `GET_CONFIG` and waits for the configuration object
pub struct ConfigFetcher<'a, T: SerialTransport> {
    transport: &'a T,
    policy: RetryPolicy,
}

impl<'a, T: SerialTransport> ConfigFetcher<'a, T> {
    pub fn new(transport: &'a T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Fetch the configuration, retrying transient failures
    ///
    /// Fails with [`ProtocolError::RetryBudgetExhausted`] once every attempt
    /// failed, or immediately on a failure retrying cannot fix.
    pub async fn fetch(&self) -> ProtocolResult<DeviceConfiguration> {
        let command = Command::GetConfig.encode()?;
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(&command).await {
                Ok(config) => {
                    debug!(
                        "Configuration received on attempt {}/{} (firmware {})",
                        attempt,
                        self.policy.max_attempts,
                        config.firmware_label()
                    );
                    return Ok(config);
                }
                Err(e) if e.is_retryable() => {
                    debug!(
                        "Fetch attempt {}/{} failed: {}",
                        attempt, self.policy.max_attempts, e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        warn!(
            "No valid configuration after {} attempts",
            self.policy.max_attempts
        );
        Err(ProtocolError::RetryBudgetExhausted {
            attempts: self.policy.max_attempts,
            last: Box::new(last_error.unwrap_or(ProtocolError::StreamClosed)),
        })
    }

    async fn attempt(&self, command: &[u8]) -> ProtocolResult<DeviceConfiguration> {
        self.transport.write(command).await?;

        let lock = ReadLock::acquire(self.transport)?;
        let mut extractor = FrameExtractor::new(JsonObjectFrame);

        match self.policy.window {
            ReadWindow::Bounded(window) => read_bounded(&lock, &mut extractor, window).await,
            ReadWindow::UntilFrame => read_until_frame(&lock, &mut extractor).await,
        }
    }
}

async fn read_bounded<T: SerialTransport>(
    lock: &ReadLock<'_, T>,
    extractor: &mut FrameExtractor<JsonObjectFrame>,
    window: Duration,
) -> ProtocolResult<DeviceConfiguration> {
    let deadline = Instant::now() + window;
    let mut parse_error = None;

    loop {
        let chunk = match tokio::time::timeout_at(deadline, lock.read()).await {
            Ok(chunk) => chunk?,
            Err(_) => return Err(parse_error.unwrap_or(ProtocolError::ReadTimeout(window))),
        };

        match chunk {
            ReadChunk::Data(bytes) => {
                extractor.push(&bytes);
            }
            ReadChunk::Closed => return Err(parse_error.unwrap_or(ProtocolError::StreamClosed)),
        }

        match extractor.try_extract() {
            Some(Ok(config)) => return Ok(config),
            Some(Err(e)) => parse_error = Some(e),
            None => {}
        }
    }
}

async fn read_until_frame<T: SerialTransport>(
    lock: &ReadLock<'_, T>,
    extractor: &mut FrameExtractor<JsonObjectFrame>,
) -> ProtocolResult<DeviceConfiguration> {
    while !extractor.is_complete() {
        match lock.read().await? {
            ReadChunk::Data(bytes) => {
                extractor.push(&bytes);
            }
            ReadChunk::Closed => return Err(ProtocolError::StreamClosed),
        }
    }

    extractor
        .try_extract()
        .unwrap_or(Err(ProtocolError::StreamClosed))
}
