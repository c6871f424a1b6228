//! Client facade owning the socket, queue, snapshot, and scheduler
//!
//! Construct one `Adam5000Client` per controller and share it by reference.
//! While polling is active, writes and single reads are queued for the
//! worker to execute between polls; while it is stopped, they run
//! synchronously on the caller's task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::warn;

use crate::command::{AdamCommand, CommandBuilder, SlotPattern};
use crate::constants::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_TCP_PORT, DEFAULT_UNIT};
use crate::error::{AdamError, Result};
use crate::param::ParamTable;
use crate::poller::{full_poll, run_queued, PollingEngine, SensorUpdate};
use crate::snapshot::RegisterSnapshot;
use crate::transport::{AdamTransport, TcpTransport, TransportConfig, TransportStats};
use crate::types::{ChannelAddress, ChannelValue, ConnectionState, PollingState};

/// Controller connection and polling settings
///
/// Every field has a serde default matching `Default`, so a YAML config may
/// name only the fields it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Adam5000Config {
    pub host: String,
    pub port: u16,
    /// Modbus unit identifier of the controller
    pub unit: u8,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Adam5000Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            unit: DEFAULT_UNIT,
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl Adam5000Config {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

/// Diagnostic snapshot of a client
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub connection_state: ConnectionState,
    pub polling_state: PollingState,
    /// Commands waiting in the queue
    pub queue_depth: usize,
    /// Completed poll ticks
    pub ticks: u64,
    /// Most recent failure, if any
    pub last_error: Option<String>,
    /// When the snapshot was last refreshed
    pub last_update: DateTime<Utc>,
}

/// Async client for one ADAM-5000TCP controller
pub struct Adam5000Client {
    config: Adam5000Config,
    transport: Arc<Mutex<Box<dyn AdamTransport>>>,
    snapshot: Arc<RwLock<RegisterSnapshot>>,
    queue: Arc<Mutex<VecDeque<AdamCommand>>>,
    params: Arc<RwLock<ParamTable>>,
    last_error: Arc<RwLock<Option<String>>>,
    builder: CommandBuilder,
    engine: PollingEngine,
}

impl Adam5000Client {
    pub fn new(config: Adam5000Config) -> Result<Self> {
        let transport = TcpTransport::new(config.transport_config())?;
        Ok(Self::from_transport(Box::new(transport), config))
    }

    /// Assemble a client around an existing transport
    pub(crate) fn from_transport(
        transport: Box<dyn AdamTransport>,
        config: Adam5000Config,
    ) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let snapshot = Arc::new(RwLock::new(RegisterSnapshot::empty()));
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let params = Arc::new(RwLock::new(ParamTable::default()));
        let last_error = Arc::new(RwLock::new(None));
        let builder = CommandBuilder::new(config.unit);

        let engine = PollingEngine::new(
            transport.clone(),
            snapshot.clone(),
            queue.clone(),
            params.clone(),
            last_error.clone(),
            builder,
            config.poll_interval,
        );

        Self {
            config,
            transport,
            snapshot,
            queue,
            params,
            last_error,
            builder,
            engine,
        }
    }

    pub fn config(&self) -> &Adam5000Config {
        &self.config
    }

    /// Open the controller connection; logs the cause on failure
    pub async fn connect(&self) -> bool {
        match self.transport.lock().await.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Connect failed: {e}");
                *self.last_error.write().await = Some(e.to_string());
                false
            }
        }
    }

    /// Close the connection, stopping the scheduler first so the socket is
    /// never torn down under an in-flight tick
    pub async fn disconnect(&self) -> bool {
        self.engine.stop().await;
        match self.transport.lock().await.disconnect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Disconnect failed: {e}");
                *self.last_error.write().await = Some(e.to_string());
                false
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    /// Start or stop background polling
    ///
    /// Starting requires a live connection and returns `false` without one.
    /// Starting while already polling is a logged no-op returning `true`.
    /// Stopping always succeeds, even after the transport dropped the
    /// connection on its own.
    pub async fn set_reading_state(&self, enable: bool) -> bool {
        if enable {
            if !self.is_connected().await {
                warn!("Cannot start polling while disconnected");
                return false;
            }
            self.engine.start().await;
            true
        } else {
            self.engine.stop().await;
            true
        }
    }

    /// Write one channel
    ///
    /// Queued while polling is active, executed synchronously otherwise.
    /// On the synchronous path transport errors are logged and swallowed
    /// (the write is fire-and-forget), but calling while disconnected and
    /// not polling is reported as `NotConnected`.
    pub async fn set_value(&self, address: ChannelAddress, value: ChannelValue) -> Result<()> {
        let command = self.builder.write_channel(address, value)?;
        self.dispatch(command).await
    }

    /// Write a whole slot in one multi-register command, same dispatch
    /// policy as `set_value`
    pub async fn set_slot_pattern(&self, slot: u8, pattern: &SlotPattern) -> Result<()> {
        let command = self.builder.slot_pattern(slot, pattern)?;
        self.dispatch(command).await
    }

    /// Read one channel from the cache
    ///
    /// While polling is stopped this forces one synchronous full poll first
    /// so the cache is fresh; failures of that poll are returned. While
    /// polling is active the cache is read as-is and may be up to one
    /// interval stale.
    pub async fn get_value(&self, address: ChannelAddress) -> Result<ChannelValue> {
        if self.engine.state() == PollingState::Stopped {
            full_poll(&self.transport, &self.snapshot, self.builder).await?;
        }
        Ok(self.snapshot.read().await.value(address))
    }

    /// Whether queued commands are still waiting for the worker
    pub async fn is_busy(&self) -> bool {
        !self.queue.lock().await.is_empty()
    }

    /// Suspend polling I/O without stopping the worker task
    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn resume(&self) {
        self.engine.resume();
    }

    /// Change the polling interval, clamped to the 100 ms floor
    pub fn set_poll_interval(&self, interval: Duration) -> Duration {
        self.engine.set_interval(interval)
    }

    /// Replace the parameter table used to build sensor updates
    pub async fn set_param_table(&self, table: ParamTable) {
        *self.params.write().await = table;
    }

    /// Per-tick sensor update stream
    pub fn subscribe(&self) -> broadcast::Receiver<SensorUpdate> {
        self.engine.subscribe()
    }

    pub async fn status(&self) -> ClientStatus {
        let connection_state = if self.is_connected().await {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        ClientStatus {
            connection_state,
            polling_state: self.engine.state(),
            queue_depth: self.queue.lock().await.len(),
            ticks: self.engine.ticks(),
            last_error: self.last_error.read().await.clone(),
            last_update: self.snapshot.read().await.taken_at(),
        }
    }

    pub async fn transport_stats(&self) -> TransportStats {
        self.transport.lock().await.stats()
    }

    /// Queue the command for the worker, or run it on the caller's task
    /// when no worker is alive
    async fn dispatch(&self, command: AdamCommand) -> Result<()> {
        if self.engine.state() != PollingState::Stopped {
            self.queue.lock().await.push_back(command);
            return Ok(());
        }

        match run_queued(&self.transport, &self.snapshot, &command).await {
            Ok(()) => Ok(()),
            Err(AdamError::NotConnected) => Err(AdamError::NotConnected),
            Err(e) => {
                warn!("Synchronous command failed: {e}");
                *self.last_error.write().await = Some(e.to_string());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockState, MockTransport};
    use crate::types::SlotType;
    use std::sync::Mutex as StdMutex;
    use tokio::time::sleep;
    use tracing_test::traced_test;

    fn addr(slot_type: SlotType, slot: u8, channel: u8) -> ChannelAddress {
        ChannelAddress::new(slot_type, slot, channel).unwrap()
    }

    fn mock_client() -> (Adam5000Client, Arc<StdMutex<MockState>>) {
        let mock = MockTransport::new();
        let state = mock.handle();
        let config = Adam5000Config {
            poll_interval: Duration::from_millis(100),
            ..Default::default()
        };
        (Adam5000Client::from_transport(Box::new(mock), config), state)
    }

    #[tokio::test]
    async fn test_set_value_runs_synchronously_when_stopped() {
        let (client, state) = mock_client();
        assert!(client.connect().await);

        let target = addr(SlotType::Analog, 0, 3);
        client
            .set_value(target, ChannelValue::Analog(1500))
            .await
            .unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.executed.len(), 1);
        assert_eq!(state.analog[3], 1500);
    }

    #[tokio::test]
    async fn test_set_value_enqueues_while_polling() {
        let (client, state) = mock_client();
        assert!(client.connect().await);

        // Paused polling still counts as active, so the command must wait
        // in the queue rather than run on the caller's task
        client.pause();
        assert!(client.set_reading_state(true).await);

        let target = addr(SlotType::Digital, 1, 2);
        client
            .set_value(target, ChannelValue::Digital(true))
            .await
            .unwrap();

        assert!(client.is_busy().await);
        assert!(state.lock().unwrap().executed.is_empty());

        client.resume();
        sleep(Duration::from_millis(150)).await;
        assert!(client.set_reading_state(false).await);

        assert!(!client.is_busy().await);
        let state = state.lock().unwrap();
        assert_eq!((state.digital[1] >> 2) & 1, 1);
    }

    #[tokio::test]
    async fn test_get_value_forces_one_sync_poll_when_stopped() {
        let (client, state) = mock_client();
        assert!(client.connect().await);
        state.lock().unwrap().analog[5] = 321;

        let value = client.get_value(addr(SlotType::Analog, 0, 5)).await.unwrap();
        assert_eq!(value, ChannelValue::Analog(321));
        // Exactly one full poll: analog block read plus digital block read
        assert_eq!(state.lock().unwrap().executed.len(), 2);

        client.get_value(addr(SlotType::Analog, 0, 5)).await.unwrap();
        assert_eq!(state.lock().unwrap().executed.len(), 4);
    }

    #[tokio::test]
    async fn test_get_value_reads_cache_only_while_polling() {
        let (client, state) = mock_client();
        assert!(client.connect().await);

        client.pause();
        assert!(client.set_reading_state(true).await);
        state.lock().unwrap().analog[0] = 777;

        // Paused worker has not polled, and the cache read must not
        // trigger any I/O of its own
        let value = client.get_value(addr(SlotType::Analog, 0, 0)).await.unwrap();
        assert_eq!(value, ChannelValue::Analog(0));
        assert!(state.lock().unwrap().executed.is_empty());

        assert!(client.set_reading_state(false).await);
    }

    #[tokio::test]
    async fn test_set_value_disconnected_and_stopped_errors() {
        let (client, _state) = mock_client();

        let err = client
            .set_value(addr(SlotType::Analog, 0, 0), ChannelValue::Analog(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdamError::NotConnected));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_sync_write_io_error_is_logged_not_returned() {
        let (client, state) = mock_client();
        assert!(client.connect().await);
        {
            let mut s = state.lock().unwrap();
            s.fail_queue.push_back(AdamError::timeout("scripted"));
        }

        client
            .set_value(addr(SlotType::Analog, 0, 0), ChannelValue::Analog(1))
            .await
            .unwrap();

        assert!(logs_contain("Synchronous command failed"));
        let status = client.status().await;
        assert!(status.last_error.unwrap().contains("scripted"));
    }

    #[tokio::test]
    async fn test_connect_failure_returns_false() {
        let (client, state) = mock_client();
        state
            .lock()
            .unwrap()
            .fail_queue
            .push_back(AdamError::connection("scripted refusal"));

        assert!(!client.connect().await);
        let status = client.status().await;
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert!(status.last_error.unwrap().contains("scripted refusal"));
    }

    #[tokio::test]
    async fn test_set_reading_state_contract() {
        let (client, _state) = mock_client();

        // No connection yet
        assert!(!client.set_reading_state(true).await);

        assert!(client.connect().await);
        assert!(client.set_reading_state(true).await);
        // Already polling is a no-op, not a failure
        assert!(client.set_reading_state(true).await);
        assert!(client.set_reading_state(false).await);
        // Stopping when already stopped is fine too
        assert!(client.set_reading_state(false).await);
    }

    #[tokio::test]
    async fn test_disconnect_stops_polling_first() {
        let (client, _state) = mock_client();
        assert!(client.connect().await);
        assert!(client.set_reading_state(true).await);
        sleep(Duration::from_millis(120)).await;

        assert!(client.disconnect().await);

        let status = client.status().await;
        assert_eq!(status.polling_state, PollingState::Stopped);
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
        assert!(status.ticks >= 1);
    }

    #[tokio::test]
    async fn test_slot_pattern_sync_dispatch() {
        let (client, state) = mock_client();
        assert!(client.connect().await);

        let pattern = SlotPattern::Digital(vec![true; 16]);
        client.set_slot_pattern(1, &pattern).await.unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.executed.len(), 1);
        assert_eq!(state.executed[0].frame()[7], 0x0F);
    }

    #[tokio::test]
    async fn test_status_reflects_queue_and_stats() {
        let (client, _state) = mock_client();
        assert!(client.connect().await);

        client
            .set_value(addr(SlotType::Analog, 2, 0), ChannelValue::Analog(10))
            .await
            .unwrap();

        let status = client.status().await;
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.ticks, 0);
        assert!(status.last_error.is_none());

        let stats = client.transport_stats().await;
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
    }
}
