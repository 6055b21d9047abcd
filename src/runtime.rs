//! Engine facade
//!
//! [`Runtime`] wires the acquisition side (polling scheduler, message
//! listener) through the [`OutputNormalizer`] into the [`DispatchEngine`],
//! and exposes the public operations. Every operation returns an
//! [`OperationResult`]; failures are reported, never raised.
//!
//! Everything observable is also published on the telemetry channel
//! ([`Runtime::telemetry`]): per-tick statistics, per-dispatch records,
//! listener and session lifecycle. Ticks and dispatch records are shed once
//! `event_capacity` events are queued; lifecycle events are always queued.

use crate::backend::{
    list_processes, NativeConnector, PollEvent, PollingScheduler, ProcessConnector, SessionEnd,
};
use crate::config::profiles::{GameProfile, JsonProfileStore, ProfileStore};
use crate::config::AppConfig;
use crate::dispatch::{DeviceRegistry, DispatchEngine};
use crate::error::{PlynkError, Result, ResultExt};
use crate::listener::{
    default_pump, ListenerStats, ListenerStatus, MessageListener, Packet, PumpSource, GAME_NAME_KEY,
};
use crate::normalizer::{NormalizerUpdate, OutputNormalizer};
use crate::transform::ValueTransformer;
use crate::types::{
    DispatchRecord, MemoryAddressSpec, NormalizedOutput, OperationResult, OutputMapping,
    PollingStats, ReadResult,
};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Events published on the telemetry channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum TelemetryEvent {
    #[serde(rename_all = "camelCase")]
    PollingStarted { session: u64, process: String, pid: u32 },
    #[serde(rename_all = "camelCase")]
    PollTick {
        session: u64,
        stats: PollingStats,
        results: Vec<ReadResult>,
    },
    #[serde(rename_all = "camelCase")]
    PollingEnded { session: u64, reason: String },
    Dispatch { records: Vec<DispatchRecord> },
    LabelChanged { key: String, label: String },
    GameName { name: String },
    Listener { status: ListenerStatus },
    /// No value packet arrived within the listener timeout
    SourceDisconnected,
}

/// What `start_game` brought up
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub game: String,
    pub polling_session: Option<u64>,
    pub listener: Option<ListenerStatus>,
}

/// State shared by the polling forwarder and the listener consumer
struct Pipeline {
    normalizer: Mutex<OutputNormalizer>,
    dispatcher: Arc<DispatchEngine>,
    telemetry: Sender<TelemetryEvent>,
    capacity: usize,
}

impl Pipeline {
    fn publish(&self, event: TelemetryEvent) {
        let sheddable = matches!(
            event,
            TelemetryEvent::PollTick { .. } | TelemetryEvent::Dispatch { .. }
        );
        if sheddable && self.telemetry.len() >= self.capacity {
            tracing::debug!("Telemetry queue full, event dropped");
            return;
        }
        if self.telemetry.send(event).is_err() {
            tracing::debug!("Telemetry queue closed");
        }
    }

    fn dispatch(&self, outputs: Vec<NormalizedOutput>) {
        let records: Vec<DispatchRecord> = outputs
            .iter()
            .flat_map(|output| self.dispatcher.dispatch(output))
            .collect();
        if !records.is_empty() {
            self.publish(TelemetryEvent::Dispatch { records });
        }
    }

    fn on_results(&self, results: &[ReadResult]) {
        let outputs = match self.normalizer.lock() {
            Ok(mut normalizer) => results
                .iter()
                .filter_map(|r| normalizer.from_read_result(r))
                .collect(),
            Err(_) => return,
        };
        self.dispatch(outputs);
    }

    fn on_packet(&self, packet: Packet) {
        let update = match self.normalizer.lock() {
            Ok(mut normalizer) => normalizer.apply_packet(packet),
            Err(_) => return,
        };
        match update {
            NormalizerUpdate::LabelChanged { key, label } => {
                if key == GAME_NAME_KEY {
                    tracing::info!("Game: {}", label);
                    self.publish(TelemetryEvent::GameName { name: label });
                } else {
                    self.publish(TelemetryEvent::LabelChanged { key, label });
                }
            }
            NormalizerUpdate::Output(output) => self.dispatch(vec![output]),
        }
    }

    fn on_poll_event(&self, event: PollEvent) {
        match event {
            PollEvent::Started {
                session,
                process,
                pid,
            } => self.publish(TelemetryEvent::PollingStarted {
                session,
                process,
                pid,
            }),
            PollEvent::Tick {
                session,
                results,
                stats,
            } => {
                self.on_results(&results);
                self.publish(TelemetryEvent::PollTick {
                    session,
                    stats,
                    results,
                });
            }
            PollEvent::Ended { session, reason } => {
                let reason = match reason {
                    SessionEnd::Stopped => "stopped".to_string(),
                    SessionEnd::ProcessLost(e) => e,
                };
                self.publish(TelemetryEvent::PollingEnded { session, reason });
            }
        }
    }
}

struct Forwarder {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// The assembled engine
pub struct Runtime {
    config: AppConfig,
    profiles: Arc<dyn ProfileStore>,
    connector: Arc<dyn ProcessConnector>,
    scheduler: Arc<PollingScheduler>,
    listener: MessageListener,
    pipeline: Arc<Pipeline>,
    telemetry_rx: Receiver<TelemetryEvent>,
    forwarder: Forwarder,
    game: Mutex<Option<GameProfile>>,
}

impl Runtime {
    /// Assemble a runtime from its collaborators
    pub fn new(
        config: AppConfig,
        profiles: Arc<dyn ProfileStore>,
        connector: Arc<dyn ProcessConnector>,
        registry: DeviceRegistry,
        pump: Box<dyn PumpSource>,
    ) -> Result<Self> {
        let transformer = Arc::new(ValueTransformer::new(config.transform.options()));
        let scheduler = Arc::new(PollingScheduler::new(config.polling.clone(), transformer));
        let dispatcher = Arc::new(DispatchEngine::new(
            config.dispatch.clone(),
            registry,
            profiles.clone(),
        ));

        let (telemetry_tx, telemetry_rx) = unbounded();
        let pipeline = Arc::new(Pipeline {
            normalizer: Mutex::new(OutputNormalizer::new()),
            dispatcher,
            telemetry: telemetry_tx,
            capacity: config.polling.event_capacity.max(1),
        });

        let listener = MessageListener::new(config.listener.clone(), pump);
        let on_timeout = pipeline.clone();
        listener.set_timeout_callback(Arc::new(move || {
            on_timeout.publish(TelemetryEvent::SourceDisconnected);
        }));

        let forwarder = {
            let (stop_tx, stop_rx) = bounded::<()>(0);
            let events = scheduler.events();
            let pipeline = pipeline.clone();
            let handle = std::thread::Builder::new()
                .name("plynk-forwarder".to_string())
                .spawn(move || loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(events) -> event => match event {
                            Ok(event) => pipeline.on_poll_event(event),
                            Err(_) => break,
                        },
                    }
                })?;
            Forwarder {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }
        };

        Ok(Self {
            config,
            profiles,
            connector,
            scheduler,
            listener,
            pipeline,
            telemetry_rx,
            forwarder,
            game: Mutex::new(None),
        })
    }

    /// Runtime over real processes, JSON profiles and the configured devices
    pub fn native(config: AppConfig) -> Result<Self> {
        let root = config
            .profiles
            .root()
            .ok_or_else(|| PlynkError::Config("no profile directory available".to_string()))?;
        let profiles: Arc<dyn ProfileStore> = Arc::new(JsonProfileStore::new(root));
        let devices = profiles.list_devices().context("Loading device list")?;
        let registry = DeviceRegistry::from_devices(&devices, &config.dispatch);
        Self::new(
            config,
            profiles,
            Arc::new(NativeConnector),
            registry,
            default_pump(),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn profiles(&self) -> Arc<dyn ProfileStore> {
        self.profiles.clone()
    }

    pub fn dispatcher(&self) -> Arc<DispatchEngine> {
        self.pipeline.dispatcher.clone()
    }

    /// Receiver for telemetry events (cloneable)
    pub fn telemetry(&self) -> Receiver<TelemetryEvent> {
        self.telemetry_rx.clone()
    }

    /// Running processes as `(name, pid)`, for picking a target
    pub fn processes(&self) -> Vec<(String, u32)> {
        list_processes()
    }

    /// Read `addresses` once from `process_name`
    pub fn read_once(
        &self,
        process_name: &str,
        addresses: Vec<MemoryAddressSpec>,
    ) -> OperationResult<Vec<ReadResult>> {
        let result = self
            .connector
            .open(process_name)
            .and_then(|process| self.scheduler.read_once(process, addresses))
            .with_context(|| format!("Reading from {}", process_name));
        report("read_once", result)
    }

    /// Start polling, replacing any running session
    pub fn start_polling(
        &self,
        interval_ms: Option<u64>,
        process_name: &str,
        addresses: Vec<MemoryAddressSpec>,
    ) -> OperationResult<u64> {
        let result = (|| {
            if interval_ms == Some(0) {
                return Err(PlynkError::Config("interval_ms must be > 0".to_string()));
            }
            let process = self
                .connector
                .open(process_name)
                .context(format!("Attaching to {}", process_name))?;
            self.scheduler
                .start(process, addresses, interval_ms.map(Duration::from_millis))
        })();
        report("start_polling", result)
    }

    pub fn stop_polling(&self) -> OperationResult<bool> {
        report("stop_polling", self.scheduler.stop())
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn polling_stats(&self) -> Option<PollingStats> {
        self.scheduler.stats()
    }

    pub fn start_message_listening(&self) -> OperationResult<ListenerStatus> {
        let pipeline = self.pipeline.clone();
        let result = self
            .listener
            .start(Box::new(move |packet| pipeline.on_packet(packet)));
        if let Ok(status) = &result {
            self.pipeline
                .publish(TelemetryEvent::Listener { status: *status });
        }
        report("start_message_listening", result)
    }

    pub fn stop_message_listening(&self) -> OperationResult<ListenerStatus> {
        let result = self.listener.stop();
        if let Ok(status) = &result {
            self.pipeline
                .publish(TelemetryEvent::Listener { status: *status });
        }
        report("stop_message_listening", result)
    }

    pub fn listener_stats(&self) -> ListenerStats {
        self.listener.stats()
    }

    /// Send a synthetic output through one row, bypassing change detection
    pub fn dispatch_test(
        &self,
        output: &NormalizedOutput,
        mapping: &OutputMapping,
    ) -> OperationResult<DispatchRecord> {
        let record = self.pipeline.dispatcher.dispatch_test(output, mapping);
        self.pipeline.publish(TelemetryEvent::Dispatch {
            records: vec![record.clone()],
        });
        OperationResult {
            success: record.success,
            error: record.error.clone(),
            data: Some(record),
        }
    }

    /// Make `name` the active game profile
    pub fn load_game_profile(&self, name: &str) -> OperationResult<GameProfile> {
        let result = self
            .profiles
            .load_game_profile(name)
            .with_context(|| format!("Loading game profile '{}'", name))
            .and_then(|profile| {
                self.pipeline.dispatcher.set_mappings(profile.outputs.clone());
                if let Ok(mut normalizer) = self.pipeline.normalizer.lock() {
                    normalizer.clear();
                }
                let mut game = self
                    .game
                    .lock()
                    .map_err(|_| PlynkError::State("game lock poisoned".to_string()))?;
                *game = Some(profile.clone());
                tracing::info!("Game profile '{}' loaded", profile.name);
                Ok(profile)
            });
        report("load_game_profile", result)
    }

    pub fn active_game(&self) -> Option<GameProfile> {
        self.game.lock().ok().and_then(|g| g.clone())
    }

    /// Load a game profile and start its sources
    ///
    /// The memory source polls the profile's memory file; the message source
    /// starts the listener. The interval is taken from `interval_ms`, then
    /// the memory profile, then the configuration.
    pub fn start_game(&self, name: &str, interval_ms: Option<u64>) -> OperationResult<GameSession> {
        let loaded = self.load_game_profile(name);
        let Some(game) = loaded.data else {
            return OperationResult::err(loaded.error.unwrap_or_default());
        };

        let mut session = GameSession {
            game: game.name.clone(),
            ..GameSession::default()
        };

        if let Some(memory_file) = &game.memory_file {
            let memory = match self
                .profiles
                .load_memory_profile(memory_file)
                .with_context(|| format!("Loading memory profile '{}'", memory_file))
            {
                Ok(memory) => memory,
                Err(e) => return report("start_game", Err(e)),
            };
            let started = self.start_polling(
                interval_ms.or(memory.poll_interval_ms),
                &memory.process,
                memory.outputs,
            );
            match started.data {
                Some(id) => session.polling_session = Some(id),
                None => return OperationResult::err(started.error.unwrap_or_default()),
            }
        }

        if game.message_file.is_some() {
            let started = self.start_message_listening();
            match started.data {
                Some(status) => session.listener = Some(status),
                None => return OperationResult::err(started.error.unwrap_or_default()),
            }
        }

        if session.polling_session.is_none() && session.listener.is_none() {
            tracing::warn!("Game profile '{}' names no memory or message source", name);
        }
        OperationResult::ok(session)
    }

    /// Latest value of every output seen so far
    pub fn outputs(&self) -> Vec<NormalizedOutput> {
        self.pipeline
            .normalizer
            .lock()
            .map(|n| n.snapshot())
            .unwrap_or_default()
    }

    /// Stop polling and listening
    pub fn shutdown(&self) {
        let _ = self.scheduler.stop();
        let _ = self.listener.stop();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
        self.forwarder.stop_tx.take();
        if let Some(handle) = self.forwarder.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Telemetry forwarder panicked");
            }
        }
    }
}

fn report<T, E: std::fmt::Display>(operation: &str, result: std::result::Result<T, E>) -> OperationResult<T> {
    if let Err(e) = &result {
        tracing::warn!("{} failed: {}", operation, e);
    }
    result.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockConnector, MockProcess};
    use crate::config::profiles::InMemoryProfileStore;
    use crate::listener::ManualPump;
    use crate::types::{OutputValue, ValueType};

    fn runtime(connector: MockConnector) -> Runtime {
        let (pump, _handle) = ManualPump::new();
        Runtime::new(
            AppConfig::default(),
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(connector),
            DeviceRegistry::new(),
            Box::new(pump),
        )
        .unwrap()
    }

    #[test]
    fn test_read_once_reports_missing_process() {
        let runtime = runtime(MockConnector::new());
        let result = runtime.read_once("nope.exe", vec![]);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Process not found"));
    }

    #[test]
    fn test_read_once() {
        let process = MockProcess::new("game.exe", 10).with_module("game.exe", 0x40_0000);
        process.write_i32(0x40_1000, 42);
        let runtime = runtime(MockConnector::new().with_process(process));

        let result = runtime.read_once(
            "game.exe",
            vec![MemoryAddressSpec::module_offset("speed", "game.exe", "0x1000", ValueType::Int32)],
        );
        let results = result.data.unwrap();
        assert_eq!(results[0].final_value, Some(OutputValue::Integer(42)));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let process = MockProcess::new("game.exe", 10);
        let runtime = runtime(MockConnector::new().with_process(process));
        let result = runtime.start_polling(Some(0), "game.exe", vec![]);
        assert!(!result.success);
        assert!(!runtime.is_polling());
    }

    #[test]
    fn test_unknown_game_profile() {
        let runtime = runtime(MockConnector::new());
        let result = runtime.load_game_profile("missing");
        assert!(!result.success);
        assert!(runtime.active_game().is_none());
    }
}
