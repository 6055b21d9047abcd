//! Message listener
//!
//! A [`PumpSource`] delivers payloads from outside the process (the MAME
//! output protocol on Windows). The pump only pushes onto a bounded channel
//! and never blocks; a consumer thread decodes each payload and hands the
//! resulting [`Packet`] to the caller's handler.
//!
//! ```text
//! pump thread --try_send--> [bounded channel] --> consumer thread --> handler
//!                                                       |
//!                                                 timeout watchdog
//! ```
//!
//! Start and stop are idempotent. On platforms without a pump source,
//! [`MessageListener::start`] reports [`ListenerStatus::Unavailable`].

pub mod mame;
pub mod packet;
#[cfg(windows)]
pub mod win32;

pub use mame::{output_key, MameProtocol, GAME_NAME_KEY, MAME_START_KEY, MAME_STOP_KEY};
pub use packet::{decode, decode_json, decode_text, MalformedPacket, Packet, RawPayload};

use crate::config::ListenerConfig;
use crate::error::{PlynkError, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long the consumer sleeps between wakeups when no deadline is pending
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Outcome of a start/stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ListenerStatus {
    Started,
    AlreadyRunning,
    /// No pump source exists on this platform
    Unavailable,
    Stopped,
}

/// Counters shared between the pump, the consumer and the listener
#[derive(Debug, Default)]
pub struct ListenerCounters {
    received: AtomicU64,
    decoded: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of [`ListenerCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStats {
    pub received: u64,
    pub decoded: u64,
    pub malformed: u64,
    /// Payloads lost because the channel was full
    pub dropped: u64,
}

impl ListenerCounters {
    pub fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Non-blocking handle a pump pushes payloads through
#[derive(Debug, Clone)]
pub struct PacketSink {
    tx: Sender<RawPayload>,
    counters: Arc<ListenerCounters>,
}

impl PacketSink {
    /// Queue a payload; returns `false` when it was dropped
    pub fn push(&self, payload: impl Into<RawPayload>) -> bool {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(payload.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Message queue full, payload dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// An external message source
pub trait PumpSource: Send {
    fn name(&self) -> &str;

    /// Whether this source can run on the current platform
    fn is_available(&self) -> bool;

    /// Begin delivering payloads into `sink`
    fn start(&mut self, sink: PacketSink) -> Result<()>;

    /// Stop delivering; must be safe when not started
    fn stop(&mut self);
}

/// Placeholder source for platforms without a message pump
#[derive(Debug, Default)]
pub struct UnavailablePump;

impl PumpSource for UnavailablePump {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn start(&mut self, _sink: PacketSink) -> Result<()> {
        Err(PlynkError::State(
            "no message pump on this platform".to_string(),
        ))
    }

    fn stop(&mut self) {}
}

/// In-process source fed through a [`ManualPumpHandle`]
///
/// Used by tests and by embedders that receive messages some other way.
#[derive(Debug, Default)]
pub struct ManualPump {
    sink: Arc<Mutex<Option<PacketSink>>>,
}

/// Feeds a [`ManualPump`] from any thread
#[derive(Debug, Clone)]
pub struct ManualPumpHandle {
    sink: Arc<Mutex<Option<PacketSink>>>,
}

impl ManualPump {
    pub fn new() -> (Self, ManualPumpHandle) {
        let sink = Arc::new(Mutex::new(None));
        (
            Self { sink: sink.clone() },
            ManualPumpHandle { sink },
        )
    }
}

impl PumpSource for ManualPump {
    fn name(&self) -> &str {
        "manual"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn start(&mut self, sink: PacketSink) -> Result<()> {
        let mut slot = self
            .sink
            .lock()
            .map_err(|_| PlynkError::State("manual pump lock poisoned".to_string()))?;
        *slot = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.sink.lock() {
            slot.take();
        }
    }
}

impl ManualPumpHandle {
    /// Push a payload; `false` when the pump is stopped or the queue is full
    pub fn push(&self, payload: impl Into<RawPayload>) -> bool {
        match self.sink.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|sink| sink.push(payload)),
            Err(_) => false,
        }
    }
}

/// The platform's native pump source
pub fn default_pump() -> Box<dyn PumpSource> {
    #[cfg(windows)]
    {
        Box::new(win32::MamePump::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(UnavailablePump)
    }
}

/// Called with each decoded packet on the consumer thread
pub type PacketHandler = Box<dyn FnMut(Packet) + Send>;

/// Called once when no value packet arrived within the configured timeout
pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

struct ActiveListener {
    stop_tx: Option<Sender<()>>,
    consumer: Option<JoinHandle<()>>,
}

/// Receives packets from a [`PumpSource`] and forwards them to a handler
pub struct MessageListener {
    config: ListenerConfig,
    source: Mutex<Box<dyn PumpSource>>,
    active: Mutex<Option<ActiveListener>>,
    on_timeout: Mutex<Option<TimeoutCallback>>,
    counters: Arc<ListenerCounters>,
}

impl MessageListener {
    pub fn new(config: ListenerConfig, source: Box<dyn PumpSource>) -> Self {
        Self {
            config,
            source: Mutex::new(source),
            active: Mutex::new(None),
            on_timeout: Mutex::new(None),
            counters: Arc::new(ListenerCounters::default()),
        }
    }

    /// Listener over the platform's native pump
    pub fn native(config: ListenerConfig) -> Self {
        Self::new(config, default_pump())
    }

    /// Register the callback fired when value packets stop arriving
    ///
    /// Only used when `timeout_enabled` is set. Takes effect on the next start.
    pub fn set_timeout_callback(&self, callback: TimeoutCallback) {
        if let Ok(mut slot) = self.on_timeout.lock() {
            *slot = Some(callback);
        }
    }

    pub fn stats(&self) -> ListenerStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Start listening, forwarding decoded packets to `handler`
    pub fn start(&self, handler: PacketHandler) -> Result<ListenerStatus> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| PlynkError::State("listener lock poisoned".to_string()))?;
        if active.is_some() {
            return Ok(ListenerStatus::AlreadyRunning);
        }

        let mut source = self
            .source
            .lock()
            .map_err(|_| PlynkError::State("listener source lock poisoned".to_string()))?;
        if !source.is_available() {
            tracing::info!("Message pump '{}' is unavailable on this platform", source.name());
            return Ok(ListenerStatus::Unavailable);
        }

        let (raw_tx, raw_rx) = bounded(self.config.channel_capacity.max(1));
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let consumer = Consumer {
            handler,
            counters: self.counters.clone(),
            timeout: self.config.timeout(),
            on_timeout: self.on_timeout.lock().ok().and_then(|c| c.clone()),
        };
        let handle = std::thread::Builder::new()
            .name("plynk-messages".to_string())
            .spawn(move || consumer.run(raw_rx, stop_rx))?;

        let sink = PacketSink {
            tx: raw_tx,
            counters: self.counters.clone(),
        };
        if let Err(e) = source.start(sink) {
            drop(stop_tx);
            if handle.join().is_err() {
                tracing::error!("Message consumer thread panicked");
            }
            return Err(e.with_context(format!("Starting message pump '{}'", source.name())));
        }

        tracing::info!("Message listener started on '{}'", source.name());
        *active = Some(ActiveListener {
            stop_tx: Some(stop_tx),
            consumer: Some(handle),
        });
        Ok(ListenerStatus::Started)
    }

    /// Stop listening; a no-op when not running
    pub fn stop(&self) -> Result<ListenerStatus> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| PlynkError::State("listener lock poisoned".to_string()))?;
        let Some(mut running) = active.take() else {
            return Ok(ListenerStatus::Stopped);
        };

        if let Ok(mut source) = self.source.lock() {
            source.stop();
        }
        running.stop_tx.take();
        if let Some(handle) = running.consumer.take() {
            if handle.join().is_err() {
                tracing::error!("Message consumer thread panicked");
            }
        }
        tracing::info!("Message listener stopped");
        Ok(ListenerStatus::Stopped)
    }
}

impl Drop for MessageListener {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct Consumer {
    handler: PacketHandler,
    counters: Arc<ListenerCounters>,
    timeout: Option<Duration>,
    on_timeout: Option<TimeoutCallback>,
}

impl Consumer {
    fn run(mut self, raw_rx: Receiver<RawPayload>, stop_rx: Receiver<()>) {
        let mut last_value = Instant::now();
        let mut timed_out = false;

        loop {
            let wait = match self.timeout {
                Some(limit) if !timed_out => limit.saturating_sub(last_value.elapsed()),
                _ => IDLE_WAIT,
            };

            select! {
                recv(stop_rx) -> _ => break,
                recv(raw_rx) -> payload => match payload {
                    Ok(payload) => {
                        if self.handle(payload) {
                            last_value = Instant::now();
                            timed_out = false;
                        }
                    }
                    Err(_) => break,
                },
                default(wait) => {}
            }

            if let Some(limit) = self.timeout {
                if !timed_out && last_value.elapsed() >= limit {
                    timed_out = true;
                    tracing::warn!("No value packet for {:?}, treating source as disconnected", limit);
                    if let Some(callback) = &self.on_timeout {
                        callback();
                    }
                }
            }
        }
        tracing::debug!("Message consumer exiting");
    }

    /// Decode and forward one payload; `true` for a value packet
    fn handle(&mut self, payload: RawPayload) -> bool {
        match packet::decode(&payload) {
            Ok(packet) => {
                self.counters.decoded.fetch_add(1, Ordering::Relaxed);
                let is_value = packet.is_value();
                (self.handler)(packet);
                is_value
            }
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping malformed message packet: {}", e);
                false
            }
        }
    }
}
