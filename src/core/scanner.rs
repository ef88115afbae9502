//! WiFi scan cycle
//!
//! The device answers `SCAN_WIFI` with a `SCANNING` acknowledgement, runs the
//! scan, and then prints the visible networks as a JSON array. The reader is
//! held for the whole cycle so nothing else can steal the payload.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    core::{
        error::{ProtocolError, ProtocolResult},
        frame::{FrameExtractor, JsonArrayFrame},
        types::{WifiNetwork, sort_by_signal},
    },
    protocol::{Command, SCAN_ACK},
    transport::{ReadChunk, ReadLock, SerialTransport},
};

/// Timing of the scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    /// How many times `SCAN_WIFI` is sent before giving up on the acknowledgement
    pub ack_attempts: u32,
    /// Pause after each trigger, also the read bound for its acknowledgement
    pub ack_interval: Duration,
    /// How long to wait for the network list once the scan is acknowledged
    pub data_timeout: Duration,
}

/// One WiFi scan on the device
pub struct ScanCycle<'a, T: SerialTransport> {
    transport: &'a T,
    policy: ScanPolicy,
}

impl<'a, T: SerialTransport> ScanCycle<'a, T> {
    pub fn new(transport: &'a T, policy: ScanPolicy) -> Self {
        Self { transport, policy }
    }

    /// Trigger a scan and return the networks, strongest signal first
    pub async fn scan(&self) -> ProtocolResult<Vec<WifiNetwork>> {
        let lock = ReadLock::acquire(self.transport)?;
        let mut extractor = FrameExtractor::new(JsonArrayFrame);

        self.await_ack(&lock, &mut extractor).await?;
        let mut networks = self.read_networks(&lock, &mut extractor).await?;

        sort_by_signal(&mut networks);
        info!("Scan found {} networks", networks.len());
        Ok(networks)
    }

    /// Phase 1: trigger until the device acknowledges
    ///
    /// Whatever followed the token in the acknowledging chunk is left in the
    /// extractor as the start of the payload.
    async fn await_ack(
        &self,
        lock: &ReadLock<'_, T>,
        extractor: &mut FrameExtractor<JsonArrayFrame>,
    ) -> ProtocolResult<()> {
        let command = Command::ScanWifi.encode()?;

        for attempt in 1..=self.policy.ack_attempts {
            match self.transport.write(&command).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    debug!("Scan trigger {} not sent: {}", attempt, e);
                    tokio::time::sleep(self.policy.ack_interval).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(self.policy.ack_interval).await;

            let chunk = match tokio::time::timeout(self.policy.ack_interval, lock.read()).await {
                Ok(chunk) => chunk?,
                Err(_) => {
                    debug!("No scan acknowledgement on attempt {}", attempt);
                    continue;
                }
            };

            match chunk {
                ReadChunk::Data(bytes) => {
                    let text = extractor.push(&bytes);
                    if let Some(pos) = text.find(SCAN_ACK) {
                        debug!("Scan acknowledged on attempt {}", attempt);
                        extractor.restart_with(&text[pos + SCAN_ACK.len()..]);
                        return Ok(());
                    }
                    extractor.restart_with("");
                }
                ReadChunk::Closed => {
                    debug!("Stream closed before the scan was acknowledged");
                    return Err(ProtocolError::ScanNotStarted { attempts: attempt });
                }
            }
        }

        Err(ProtocolError::ScanNotStarted {
            attempts: self.policy.ack_attempts,
        })
    }

    /// Phase 2: collect the network list
    async fn read_networks(
        &self,
        lock: &ReadLock<'_, T>,
        extractor: &mut FrameExtractor<JsonArrayFrame>,
    ) -> ProtocolResult<Vec<WifiNetwork>> {
        let deadline = Instant::now() + self.policy.data_timeout;

        while !extractor.is_complete() {
            match tokio::time::timeout_at(deadline, lock.read()).await {
                Ok(chunk) => match chunk? {
                    ReadChunk::Data(bytes) => {
                        extractor.push(&bytes);
                    }
                    ReadChunk::Closed => {
                        return Err(ProtocolError::ScanDataInvalid(
                            "stream closed before the network list completed".to_string(),
                        ));
                    }
                },
                Err(_) => {
                    return Err(ProtocolError::ScanDataInvalid(format!(
                        "no network list within {:?}",
                        self.policy.data_timeout
                    )));
                }
            }
        }

        match extractor.try_extract() {
            Some(Ok(networks)) => Ok(networks),
            Some(Err(e)) => Err(ProtocolError::ScanDataInvalid(e.to_string())),
            None => Err(ProtocolError::ScanDataInvalid(
                "network list incomplete".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolSettings;
    use crate::core::error::TransportError;
    use crate::transport::MockSerialTransport;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn network(ssid: &str, rssi: i32) -> WifiNetwork {
        WifiNetwork {
            ssid: ssid.to_string(),
            rssi,
            secure: true,
        }
    }

    fn policy() -> ScanPolicy {
        ProtocolSettings::default().scan
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_sorts_by_signal() {
        let mock = MockSerialTransport::new(json!({}));
        mock.set_scan_results(&[
            network("far", -80),
            network("near", -40),
            network("middle", -60),
        ]);

        let networks = assert_ok!(ScanCycle::new(&mock, policy()).scan().await);

        let order: Vec<i32> = networks.iter().map(|n| n.rssi).collect();
        assert_eq!(order, vec![-40, -60, -80]);
        assert_eq!(networks[0].ssid, "near");
        assert_eq!(mock.count_command("SCAN_WIFI"), 1);
        assert_eq!(mock.lock_counts(), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_retries_until_acknowledged() {
        let mock = MockSerialTransport::new(json!({}));
        mock.set_scan_ack_after(Some(3));
        mock.set_scan_results(&[network("only", -55)]);

        let networks = assert_ok!(ScanCycle::new(&mock, policy()).scan().await);

        assert_eq!(networks, vec![network("only", -55)]);
        assert_eq!(mock.count_command("SCAN_WIFI"), 3);
        // One read lock for the whole cycle
        assert_eq!(mock.lock_counts(), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_not_started() {
        let mock = MockSerialTransport::new(json!({}));
        mock.set_scan_ack_after(None);

        let started = Instant::now();
        let result = ScanCycle::new(&mock, policy()).scan().await;

        assert!(matches!(
            result,
            Err(ProtocolError::ScanNotStarted { attempts: 20 })
        ));
        assert_eq!(mock.count_command("SCAN_WIFI"), 20);
        assert_eq!(mock.lock_counts(), (1, 1));
        assert!(started.elapsed() >= Duration::from_millis(20 * 1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_closed_before_ack_is_not_started() {
        let mock = MockSerialTransport::new(json!({}));
        mock.set_scan_ack_after(None);

        let cycle = ScanCycle::new(&mock, policy());
        let (result, _) = tokio::join!(cycle.scan(), async {
            tokio::time::sleep(Duration::from_millis(700)).await;
            mock.close().await;
        });

        assert!(matches!(
            result,
            Err(ProtocolError::ScanNotStarted { attempts: 1 })
        ));
        assert_eq!(mock.count_command("SCAN_WIFI"), 1);
        assert_eq!(mock.lock_counts(), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_in_acknowledging_chunk() {
        let mock = MockSerialTransport::new(json!({}));
        mock.set_scan_ack_after(None);
        mock.emit(b"SCANNING\r\n[{\"ssid\":\"a\",\"rssi\":-70,\"secure\":false},");
        mock.emit(b"{\"ssid\":\"b\",\"rssi\":-30,\"secure\":true}]\r\n");

        let networks = assert_ok!(ScanCycle::new(&mock, policy()).scan().await);

        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].ssid, "b");
        assert!(!networks[1].secure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_lines_before_ack_are_ignored() {
        let mock = MockSerialTransport::new(json!({}));
        mock.emit(b"I (10) wifi: mode sta [ok]\r\n");
        mock.set_scan_ack_after(Some(2));
        mock.set_scan_results(&[network("x", -20)]);

        let networks = assert_ok!(ScanCycle::new(&mock, policy()).scan().await);
        assert_eq!(networks, vec![network("x", -20)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload() {
        let mock = MockSerialTransport::new(json!({}));
        mock.set_scan_payload(vec![b"[{\"ssid\":\"a\",\"rssi\":\"strong\"}]\r\n".to_vec()]);

        let result = ScanCycle::new(&mock, policy()).scan().await;
        assert!(matches!(result, Err(ProtocolError::ScanDataInvalid(_))));
        assert!(!mock.reader_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_never_completes() {
        let mock = MockSerialTransport::new(json!({}));
        mock.set_scan_payload(vec![b"[{\"ssid\":\"a\",".to_vec()]);

        let started = Instant::now();
        let result = ScanCycle::new(&mock, policy()).scan().await;

        assert!(matches!(result, Err(ProtocolError::ScanDataInvalid(_))));
        assert!(started.elapsed() >= Duration::from_millis(500 + 5000));
        assert_eq!(mock.lock_counts(), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_fails_fast_while_reader_taken() {
        let mock = MockSerialTransport::new(json!({}));
        let _held = ReadLock::acquire(&mock).unwrap();

        let result = ScanCycle::new(&mock, policy()).scan().await;
        assert!(matches!(
            result,
            Err(ProtocolError::Transport(TransportError::ReaderLocked))
        ));
        assert_eq!(mock.count_command("SCAN_WIFI"), 0);
    }
}
