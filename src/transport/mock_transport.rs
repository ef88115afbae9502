//! Simulated device for testing

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use serde_json::{Map, Value};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

use crate::core::error::{TransportError, TransportResult};
use crate::core::types::WifiNetwork;
use crate::transport::{LinkState, ReadChunk, ReadHandle, SerialTransport, watch_until};

/// Boot chatter the simulated firmware prints after a restart
const BOOT_NOISE: &[u8] = b"ets Jun  8 2016 00:22:57\r\nrst:0x1 (POWERON_RESET)\xff\xfe\r\n";

/// Internal state of the simulated device
#[derive(Debug)]
struct MockState {
    device_config: Map<String, Value>,
    pending_config: Option<Map<String, Value>>,
    partial_line: String,
    commands: Vec<String>,
    write_calls: usize,
    failing_writes: usize,
    config_replies: VecDeque<Vec<Vec<u8>>>,
    silent: bool,
    restart_override: Option<(String, Value)>,
    restarts: usize,
    scan_ack_after: Option<u32>,
    scan_triggers: u32,
    scan_payload: Vec<Vec<u8>>,
    next_handle: u64,
    held_reader: Option<u64>,
    acquisitions: usize,
    releases: usize,
    close_calls: usize,
}

/// Simulated device behind a serial transport
///
/// Understands the same line commands as the firmware: `GET_CONFIG` answers
/// with the stored configuration wrapped in log chatter, a JSON line stages a
/// new configuration, `RESTART` commits it and `SCAN_WIFI` acknowledges with
/// `SCANNING` followed by the scan payload.
#[derive(Clone)]
pub struct MockSerialTransport {
    state: Arc<Mutex<MockState>>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    link_tx: Arc<watch::Sender<LinkState>>,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl MockSerialTransport {
    /// Create a simulated device holding `config` (a JSON object)
    pub fn new(config: Value) -> Self {
        let device_config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (link_tx, _) = watch::channel(LinkState::Up);
        let (closed_tx, _) = watch::channel(false);

        Self {
            state: Arc::new(Mutex::new(MockState {
                device_config,
                pending_config: None,
                partial_line: String::new(),
                commands: Vec::new(),
                write_calls: 0,
                failing_writes: 0,
                config_replies: VecDeque::new(),
                silent: false,
                restart_override: None,
                restarts: 0,
                scan_ack_after: Some(1),
                scan_triggers: 0,
                scan_payload: Vec::new(),
                next_handle: 1,
                held_reader: None,
                acquisitions: 0,
                releases: 0,
                close_calls: 0,
            })),
            inbound_tx,
            inbound_rx: Arc::new(AsyncMutex::new(inbound_rx)),
            link_tx: Arc::new(link_tx),
            closed_tx: Arc::new(closed_tx),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Never answer `GET_CONFIG`
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Answer the next `GET_CONFIG` with these raw chunks instead of the config
    pub fn push_config_reply(&self, chunks: Vec<Vec<u8>>) {
        self.state().config_replies.push_back(chunks);
    }

    /// Fail the next `count` writes with an I/O error
    pub fn fail_next_writes(&self, count: usize) {
        self.state().failing_writes = count;
    }

    /// After the next restart, report `field` as `value` regardless of what was sent
    pub fn override_on_restart(&self, field: &str, value: Value) {
        self.state().restart_override = Some((field.to_string(), value));
    }

    /// Acknowledge the scan on the `n`th trigger, or never with `None`
    pub fn set_scan_ack_after(&self, n: Option<u32>) {
        self.state().scan_ack_after = n;
    }

    /// Raw chunks emitted after the scan acknowledgement
    pub fn set_scan_payload(&self, chunks: Vec<Vec<u8>>) {
        self.state().scan_payload = chunks;
    }

    /// Convenience for a well formed scan payload
    pub fn set_scan_results(&self, networks: &[WifiNetwork]) {
        let json = serde_json::to_string(networks).unwrap_or_default();
        self.set_scan_payload(vec![
            b"I (5120) wifi: scan done\r\n".to_vec(),
            json.into_bytes(),
            b"\r\n".to_vec(),
        ]);
    }

    /// Emit bytes as if the device printed them spontaneously
    pub fn emit(&self, bytes: &[u8]) {
        let _ = self.inbound_tx.send(bytes.to_vec());
    }

    /// Pull the cable
    pub fn simulate_unplug(&self) {
        self.link_tx.send_replace(LinkState::Down);
    }

    /// Configuration currently committed on the device
    pub fn device_config(&self) -> Map<String, Value> {
        self.state().device_config.clone()
    }

    /// Command lines received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Number of `write` calls, including failed ones
    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    pub fn count_command(&self, command: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    pub fn restarts(&self) -> usize {
        self.state().restarts
    }

    /// (acquisitions, releases) of the read lock
    pub fn lock_counts(&self) -> (usize, usize) {
        let state = self.state();
        (state.acquisitions, state.releases)
    }

    pub fn reader_held(&self) -> bool {
        self.state().held_reader.is_some()
    }

    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    fn handle_line(&self, state: &mut MockState, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        state.commands.push(line.to_string());

        match line {
            "GET_CONFIG" => {
                if let Some(chunks) = state.config_replies.pop_front() {
                    for chunk in chunks {
                        self.emit(&chunk);
                    }
                } else if !state.silent {
                    let mut json = Value::Object(state.device_config.clone())
                        .to_string()
                        .into_bytes();
                    json.extend_from_slice(b"\r\n");
                    let (head, tail) = json.split_at(json.len() / 2);
                    self.emit(b"I (1042) config: dumping configuration\r\n");
                    self.emit(head);
                    self.emit(tail);
                }
            }
            "SCAN_WIFI" => {
                state.scan_triggers += 1;
                if state.scan_ack_after == Some(state.scan_triggers) {
                    self.emit(b"SCANNING\r\n");
                    for chunk in &state.scan_payload {
                        self.emit(chunk);
                    }
                }
            }
            "RESTART" => {
                if let Some(pending) = state.pending_config.take() {
                    state.device_config.extend(pending);
                }
                if let Some((field, value)) = state.restart_override.take() {
                    state.device_config.insert(field, value);
                }
                state.restarts += 1;
                self.emit(BOOT_NOISE);
            }
            _ if line.starts_with('{') => {
                if let Ok(Value::Object(map)) = serde_json::from_str(line) {
                    state.pending_config = Some(map);
                }
            }
            _ => {}
        }
    }
}

impl SerialTransport for MockSerialTransport {
    async fn write(&self, bytes: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut state = self.state();
        state.write_calls += 1;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(TransportError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }

        state.partial_line.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = state.partial_line.find('\n') {
            let line: String = state.partial_line.drain(..=pos).collect();
            self.handle_line(&mut state, &line);
        }
        Ok(())
    }

    fn open_read_stream(&self) -> TransportResult<ReadHandle> {
        let mut state = self.state();
        if state.held_reader.is_some() {
            return Err(TransportError::ReaderLocked);
        }
        let id = state.next_handle;
        state.next_handle += 1;
        state.held_reader = Some(id);
        state.acquisitions += 1;
        Ok(ReadHandle::new(id))
    }

    async fn read(&self, handle: &ReadHandle) -> TransportResult<ReadChunk> {
        if self.state().held_reader != Some(handle.id()) {
            return Err(TransportError::ReaderLocked);
        }

        let closed = self.closed_tx.subscribe();
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            chunk = inbound.recv() => Ok(chunk.map_or(ReadChunk::Closed, ReadChunk::Data)),
            _ = watch_until(closed, |closed| *closed) => Ok(ReadChunk::Closed),
        }
    }

    fn release_read_stream(&self, handle: ReadHandle) {
        let mut state = self.state();
        if state.held_reader == Some(handle.id()) {
            state.held_reader = None;
            state.releases += 1;
        }
    }

    async fn close(&self) {
        self.state().close_calls += 1;
        self.closed_tx.send_replace(true);
    }

    fn link_events(&self) -> watch::Receiver<LinkState> {
        self.link_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReadLock;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_answers_get_config() {
        let mock = MockSerialTransport::new(json!({"ssid": "HomeNet"}));
        mock.write(b"GET_CONFIG\n").await.unwrap();

        let lock = ReadLock::acquire(&mock).unwrap();
        let mut text = String::new();
        while !text.contains('}') {
            match lock.read().await.unwrap() {
                ReadChunk::Data(bytes) => text.push_str(&String::from_utf8_lossy(&bytes)),
                ReadChunk::Closed => break,
            }
        }
        assert!(text.contains(r#""ssid":"HomeNet""#));
        assert_eq!(mock.commands(), vec!["GET_CONFIG".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_reader_is_exclusive() {
        let mock = MockSerialTransport::new(json!({}));
        let first = ReadLock::acquire(&mock).unwrap();
        assert!(matches!(
            ReadLock::acquire(&mock),
            Err(TransportError::ReaderLocked)
        ));
        drop(first);

        assert!(ReadLock::acquire(&mock).is_ok());
        assert_eq!(mock.lock_counts(), (2, 2));
        assert!(!mock.reader_held());
    }

    #[tokio::test]
    async fn test_mock_commits_config_on_restart() {
        let mock = MockSerialTransport::new(json!({"ssid": "old", "firmwareVersion": "1.0"}));
        mock.write(b"{\"ssid\":\"new\"}\n").await.unwrap();
        assert_eq!(mock.device_config()["ssid"], "old");

        mock.write(b"RESTART\n").await.unwrap();
        assert_eq!(mock.device_config()["ssid"], "new");
        assert_eq!(mock.device_config()["firmwareVersion"], "1.0");
        assert_eq!(mock.restarts(), 1);
    }

    #[tokio::test]
    async fn test_mock_write_failure_and_close() {
        let mock = MockSerialTransport::new(json!({}));
        mock.fail_next_writes(1);
        assert!(mock.write(b"GET_CONFIG\n").await.is_err());
        assert!(mock.write(b"GET_CONFIG\n").await.is_ok());

        mock.close().await;
        assert!(mock.is_closed());
        assert!(matches!(
            mock.write(b"GET_CONFIG\n").await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_mock_unplug_notifies_once() {
        let mock = MockSerialTransport::new(json!({}));
        let mut events = mock.link_events();
        assert_eq!(*events.borrow(), LinkState::Up);

        mock.simulate_unplug();
        events.changed().await.unwrap();
        assert_eq!(*events.borrow_and_update(), LinkState::Down);
    }
}
