//! Background polling scheduler
//!
//! One worker task owns the poll cadence. Each tick it either drains a
//! single queued command or refreshes the whole register snapshot, then
//! broadcasts a sensor update built from the parameter table. Pausing skips
//! ticks entirely, so neither I/O nor events nor the tick counter advance
//! until resume.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::codec::FrameCodec;
use crate::command::{AdamCommand, CommandBuilder};
use crate::constants::MIN_POLL_INTERVAL_MS;
use crate::error::Result;
use crate::param::ParamTable;
use crate::snapshot::RegisterSnapshot;
use crate::transport::AdamTransport;
use crate::types::{ChannelValue, CommandKind, PollingState, SlotType};

/// Buffered events per subscriber before the oldest are dropped
const EVENT_CAPACITY: usize = 64;

/// One tick's worth of scaled sensor readings
#[derive(Debug, Clone)]
pub struct SensorUpdate {
    /// Completed tick count at emission, starting at 1
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    /// Engineering values keyed by parameter name
    pub values: HashMap<String, f64>,
}

/// Scheduler driving the poll loop over a shared transport
pub struct PollingEngine {
    transport: Arc<Mutex<Box<dyn AdamTransport>>>,
    snapshot: Arc<RwLock<RegisterSnapshot>>,
    queue: Arc<Mutex<VecDeque<AdamCommand>>>,
    params: Arc<RwLock<ParamTable>>,
    last_error: Arc<RwLock<Option<String>>>,
    builder: CommandBuilder,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    interval_ms: Arc<AtomicU64>,
    ticks: Arc<AtomicU64>,
    event_tx: broadcast::Sender<SensorUpdate>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollingEngine {
    pub fn new(
        transport: Arc<Mutex<Box<dyn AdamTransport>>>,
        snapshot: Arc<RwLock<RegisterSnapshot>>,
        queue: Arc<Mutex<VecDeque<AdamCommand>>>,
        params: Arc<RwLock<ParamTable>>,
        last_error: Arc<RwLock<Option<String>>>,
        builder: CommandBuilder,
        interval: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            snapshot,
            queue,
            params,
            last_error,
            builder,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            interval_ms: Arc::new(AtomicU64::new(clamp_interval_ms(interval))),
            ticks: Arc::new(AtomicU64::new(0)),
            event_tx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the polling task; a no-op if it is already running
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Polling task already running");
            return;
        }

        let transport = self.transport.clone();
        let snapshot = self.snapshot.clone();
        let queue = self.queue.clone();
        let params = self.params.clone();
        let last_error = self.last_error.clone();
        let builder = self.builder;
        let running = self.running.clone();
        let paused = self.paused.clone();
        let interval_ms = self.interval_ms.clone();
        let ticks = self.ticks.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if !paused.load(Ordering::SeqCst) {
                    // One queued command takes the place of the full poll
                    // for this tick
                    let queued = queue.lock().await.pop_front();
                    let outcome = match &queued {
                        Some(command) => run_queued(&transport, &snapshot, command).await,
                        None => full_poll(&transport, &snapshot, builder).await,
                    };
                    if let Err(e) = outcome {
                        warn!("Poll tick failed: {e}");
                        *last_error.write().await = Some(e.to_string());
                    }

                    let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                    let update = {
                        let snap = snapshot.read().await;
                        let table = params.read().await;
                        build_update(&snap, &table, tick)
                    };
                    let _ = event_tx.send(update);
                }

                sleep(Duration::from_millis(interval_ms.load(Ordering::SeqCst))).await;
            }
        });

        *self.handle.lock().await = Some(handle);
        info!(
            "Polling started (interval {} ms)",
            self.interval_ms.load(Ordering::SeqCst)
        );
    }

    /// Stop the polling task, waiting for an in-flight tick to finish
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        info!(
            "Polling stopped after {} ticks",
            self.ticks.load(Ordering::SeqCst)
        );
    }

    /// Suspend polling without tearing down the task
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Polling paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Polling resumed");
        }
    }

    pub fn state(&self) -> PollingState {
        if !self.running.load(Ordering::SeqCst) {
            PollingState::Stopped
        } else if self.paused.load(Ordering::SeqCst) {
            PollingState::Paused
        } else {
            PollingState::Running
        }
    }

    /// Change the tick interval, effective from the next sleep
    ///
    /// Returns the applied interval, clamped to the 100 ms floor.
    pub fn set_interval(&self, interval: Duration) -> Duration {
        let applied = clamp_interval_ms(interval);
        if u128::from(applied) != interval.as_millis() {
            warn!("Poll interval clamped to {applied} ms");
        }
        self.interval_ms.store(applied, Ordering::SeqCst);
        Duration::from_millis(applied)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    /// Completed (non-paused) ticks since construction
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SensorUpdate> {
        self.event_tx.subscribe()
    }
}

fn clamp_interval_ms(interval: Duration) -> u64 {
    (interval.as_millis() as u64).max(MIN_POLL_INTERVAL_MS)
}

/// Read one full register block and decode it to words
async fn read_block(
    transport: &Mutex<Box<dyn AdamTransport>>,
    builder: CommandBuilder,
    slot_type: SlotType,
) -> Result<Vec<u16>> {
    let command = builder.read_all(slot_type);
    let response = transport.lock().await.execute(&command).await?;
    FrameCodec::decode_registers(slot_type, &response)
}

/// Refresh the snapshot from both register blocks
///
/// Each half is applied independently, so a failed analog read leaves the
/// previous analog words in place while a successful digital read still
/// lands. Returns the first failure, if any.
pub(crate) async fn full_poll(
    transport: &Mutex<Box<dyn AdamTransport>>,
    snapshot: &RwLock<RegisterSnapshot>,
    builder: CommandBuilder,
) -> Result<()> {
    let analog = read_block(transport, builder, SlotType::Analog).await;
    let digital = read_block(transport, builder, SlotType::Digital).await;

    let mut guard = snapshot.write().await;
    let mut next = guard.clone();
    let mut failure = None;

    match analog {
        Ok(words) => next = next.with_analog(&words),
        Err(e) => {
            warn!("Analog block read failed: {e}");
            failure = Some(e);
        }
    }
    match digital {
        Ok(words) => next = next.with_digital(&words),
        Err(e) => {
            warn!("Digital block read failed: {e}");
            failure.get_or_insert(e);
        }
    }
    *guard = next;
    drop(guard);

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Execute one queued command
///
/// A single-channel read folds its result back into the snapshot so the
/// cache reflects the answer that displaced this tick's full poll. Write
/// acknowledgements carry nothing worth keeping and are dropped.
pub(crate) async fn run_queued(
    transport: &Mutex<Box<dyn AdamTransport>>,
    snapshot: &RwLock<RegisterSnapshot>,
    command: &AdamCommand,
) -> Result<()> {
    let response = transport.lock().await.execute(command).await?;

    match (command.kind(), command.address()) {
        (CommandKind::Read, Some(address)) => {
            let words = FrameCodec::decode_registers(address.slot_type(), &response)?;
            if let Some(&word) = words.first() {
                let value = match address.slot_type() {
                    SlotType::Analog => ChannelValue::Analog(word),
                    SlotType::Digital => ChannelValue::Digital(word & 1 == 1),
                };
                let mut guard = snapshot.write().await;
                let next = guard.with_value(address, value);
                *guard = next;
                debug!("Queued read {address} -> {value}");
            }
            Ok(())
        }
        _ => {
            debug!("Command acknowledged: {command}");
            Ok(())
        }
    }
}

/// Scale the cached raw words into named engineering values
fn build_update(snapshot: &RegisterSnapshot, params: &ParamTable, tick: u64) -> SensorUpdate {
    let mut values = HashMap::with_capacity(params.len());
    for param in params.iter() {
        if let Ok(address) = param.address() {
            values.insert(
                param.name.clone(),
                param.engineering_value(snapshot.raw(address) as f64),
            );
        }
    }
    SensorUpdate {
        tick,
        timestamp: Utc::now(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdamError;
    use crate::param::Param;
    use crate::transport::mock::{MockState, MockTransport};
    use crate::types::ChannelAddress;
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    fn addr(slot_type: SlotType, slot: u8, channel: u8) -> ChannelAddress {
        ChannelAddress::new(slot_type, slot, channel).unwrap()
    }

    fn connected_mock() -> (MockTransport, Arc<StdMutex<MockState>>) {
        let mock = MockTransport::new();
        let state = mock.handle();
        state.lock().unwrap().connected = true;
        (mock, state)
    }

    struct Fixture {
        engine: PollingEngine,
        state: Arc<StdMutex<MockState>>,
        snapshot: Arc<RwLock<RegisterSnapshot>>,
        queue: Arc<Mutex<VecDeque<AdamCommand>>>,
        params: Arc<RwLock<ParamTable>>,
    }

    fn fixture() -> Fixture {
        let (mock, state) = connected_mock();
        let transport: Arc<Mutex<Box<dyn AdamTransport>>> =
            Arc::new(Mutex::new(Box::new(mock)));
        let snapshot = Arc::new(RwLock::new(RegisterSnapshot::empty()));
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let params = Arc::new(RwLock::new(ParamTable::default()));
        let last_error = Arc::new(RwLock::new(None));

        let engine = PollingEngine::new(
            transport,
            snapshot.clone(),
            queue.clone(),
            params.clone(),
            last_error,
            CommandBuilder::new(1),
            Duration::from_millis(100),
        );
        Fixture {
            engine,
            state,
            snapshot,
            queue,
            params,
        }
    }

    #[tokio::test]
    async fn test_full_poll_refreshes_both_halves() {
        let (mock, state) = connected_mock();
        {
            let mut s = state.lock().unwrap();
            s.analog[13] = 777;
            s.digital[5] = 0b0011;
        }
        let transport: Mutex<Box<dyn AdamTransport>> = Mutex::new(Box::new(mock));
        let snapshot = RwLock::new(RegisterSnapshot::empty());

        full_poll(&transport, &snapshot, CommandBuilder::new(1))
            .await
            .unwrap();

        let snap = snapshot.read().await;
        assert_eq!(snap.raw(addr(SlotType::Analog, 1, 5)), 777);
        assert_eq!(
            snap.value(addr(SlotType::Digital, 5, 0)),
            ChannelValue::Digital(true)
        );
        assert_eq!(
            snap.value(addr(SlotType::Digital, 5, 2)),
            ChannelValue::Digital(false)
        );
        assert_eq!(state.lock().unwrap().executed.len(), 2);
    }

    #[tokio::test]
    async fn test_full_poll_keeps_half_on_failure() {
        let (mock, state) = connected_mock();
        {
            let mut s = state.lock().unwrap();
            s.analog[0] = 111;
            s.digital[0] = 1;
        }
        let transport: Mutex<Box<dyn AdamTransport>> = Mutex::new(Box::new(mock));
        let snapshot = RwLock::new(RegisterSnapshot::empty());
        let builder = CommandBuilder::new(1);

        full_poll(&transport, &snapshot, builder).await.unwrap();

        // Analog read fails next time; digital still lands
        {
            let mut s = state.lock().unwrap();
            s.analog[0] = 222;
            s.digital[0] = 0;
            s.fail_queue.push_back(AdamError::timeout("scripted"));
        }
        let err = full_poll(&transport, &snapshot, builder).await.unwrap_err();
        assert!(matches!(err, AdamError::Timeout(_)));

        let snap = snapshot.read().await;
        assert_eq!(snap.raw(addr(SlotType::Analog, 0, 0)), 111);
        assert_eq!(
            snap.value(addr(SlotType::Digital, 0, 0)),
            ChannelValue::Digital(false)
        );
    }

    #[tokio::test]
    async fn test_queued_read_patches_snapshot() {
        let (mock, _state) = connected_mock();
        mock.set_analog(20, 4242);
        let transport: Mutex<Box<dyn AdamTransport>> = Mutex::new(Box::new(mock));
        let snapshot = RwLock::new(RegisterSnapshot::empty());

        let target = addr(SlotType::Analog, 2, 4);
        let command = CommandBuilder::new(1).read_channel(target);
        run_queued(&transport, &snapshot, &command).await.unwrap();

        let snap = snapshot.read().await;
        assert_eq!(snap.raw(target), 4242);
        assert_eq!(snap.raw(addr(SlotType::Analog, 2, 5)), 0);
    }

    #[tokio::test]
    async fn test_queued_write_leaves_snapshot_alone() {
        let (mock, state) = connected_mock();
        let transport: Mutex<Box<dyn AdamTransport>> = Mutex::new(Box::new(mock));
        let snapshot = RwLock::new(RegisterSnapshot::empty());

        let target = addr(SlotType::Analog, 0, 1);
        let command = CommandBuilder::new(1)
            .write_channel(target, ChannelValue::Analog(999))
            .unwrap();
        run_queued(&transport, &snapshot, &command).await.unwrap();

        assert_eq!(snapshot.read().await.raw(target), 0);
        assert_eq!(state.lock().unwrap().analog[1], 999);
    }

    #[tokio::test]
    async fn test_scheduler_polls_and_counts_ticks() {
        let f = fixture();
        f.state.lock().unwrap().analog[0] = 55;

        f.engine.start().await;
        assert_eq!(f.engine.state(), PollingState::Running);
        sleep(Duration::from_millis(250)).await;
        f.engine.stop().await;

        assert!(f.engine.ticks() >= 2);
        assert_eq!(f.engine.state(), PollingState::Stopped);
        assert_eq!(
            f.snapshot.read().await.raw(addr(SlotType::Analog, 0, 0)),
            55
        );
        // Two block reads per full-poll tick
        assert!(f.state.lock().unwrap().executed.len() >= 4);

        // The engine can be started again after a stop
        let before = f.engine.ticks();
        f.engine.start().await;
        sleep(Duration::from_millis(150)).await;
        f.engine.stop().await;
        assert!(f.engine.ticks() > before);
    }

    #[tokio::test]
    async fn test_pause_skips_ticks_entirely() {
        let f = fixture();

        f.engine.pause();
        f.engine.start().await;
        sleep(Duration::from_millis(250)).await;

        assert_eq!(f.engine.ticks(), 0);
        assert_eq!(f.engine.state(), PollingState::Paused);
        assert!(f.state.lock().unwrap().executed.is_empty());

        f.engine.resume();
        sleep(Duration::from_millis(150)).await;
        f.engine.stop().await;

        assert!(f.engine.ticks() >= 1);
    }

    #[tokio::test]
    async fn test_queued_command_takes_the_next_tick() {
        let f = fixture();

        f.engine.pause();
        f.engine.start().await;

        let target = addr(SlotType::Digital, 4, 6);
        let write = CommandBuilder::new(1)
            .write_channel(target, ChannelValue::Digital(true))
            .unwrap();
        f.queue.lock().await.push_back(write);

        f.engine.resume();
        sleep(Duration::from_millis(150)).await;
        f.engine.stop().await;

        let state = f.state.lock().unwrap();
        assert_eq!(state.executed[0].kind(), CommandKind::Write);
        assert_eq!((state.digital[4] >> 6) & 1, 1);
        drop(state);
        assert!(f.queue.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_waits_out_the_inflight_command() {
        let f = fixture();
        f.state.lock().unwrap().delay = Duration::from_millis(300);

        let write = CommandBuilder::new(1)
            .write_channel(addr(SlotType::Analog, 1, 2), ChannelValue::Analog(321))
            .unwrap();
        f.queue.lock().await.push_back(write);
        f.engine.start().await;

        // Wait until the worker is holding the command open on the wire
        while f.state.lock().unwrap().stats.requests_sent == 0 {
            sleep(Duration::from_millis(5)).await;
        }

        let stopping = Instant::now();
        f.engine.stop().await;

        // The stop had to sit out the scripted round-trip time
        assert!(stopping.elapsed() >= Duration::from_millis(200));
        let state = f.state.lock().unwrap();
        assert_eq!(state.stats.responses_received, 1);
        assert_eq!(state.executed.len(), 1);
        assert_eq!(state.analog[10], 321);
        drop(state);
        assert_eq!(f.engine.ticks(), 1);
        assert_eq!(f.engine.state(), PollingState::Stopped);
    }

    #[tokio::test]
    async fn test_set_interval_clamps_to_floor() {
        let f = fixture();

        let applied = f.engine.set_interval(Duration::from_millis(10));
        assert_eq!(applied, Duration::from_millis(MIN_POLL_INTERVAL_MS));

        let applied = f.engine.set_interval(Duration::from_millis(500));
        assert_eq!(applied, Duration::from_millis(500));
        assert_eq!(f.engine.interval(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_events_carry_scaled_parameter_values() {
        let f = fixture();
        f.state.lock().unwrap().analog[0] = 500;
        *f.params.write().await = ParamTable::new(vec![Param {
            name: "boiler_temp".to_string(),
            slot_type: SlotType::Analog,
            slot: 0,
            channel: 0,
            value_range: 100.0,
            offset: 0.0,
            digital_max: 1000.0,
            unit: "degC".to_string(),
        }])
        .unwrap();

        let mut rx = f.engine.subscribe();
        f.engine.start().await;
        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        f.engine.stop().await;

        assert_eq!(update.tick, 1);
        assert!((update.values["boiler_temp"] - 50.0).abs() < 1e-9);
    }
}
