//! Polling Session Implementation
//!
//! This module contains the per-tick read logic ([`PollSession`]) and the
//! scheduler that drives it from background threads ([`PollingScheduler`]).
//! Results and statistics are published through crossbeam channels.
//!
//! # Threads
//!
//! A running session has two threads:
//!
//! - **Timer**: fires every interval (widened by the adaptive throttle). If
//!   the previous tick is still in flight the tick is skipped and counted.
//! - **Reader**: owns the process handle and runs ticks. It is the only
//!   thread that touches the handle, and drops it only after its last tick.
//!
//! # Per-tick behaviour
//!
//! - Addresses are read in priority order; one bad address never aborts the
//!   tick for the others.
//! - Addresses that failed with a permanent error are not read again until
//!   the address set is replaced, but their error is reported every tick.
//! - Unchanged bytes at an unchanged address reuse the previous result
//!   unless caching is disabled for that address.
//! - Losing the process ends the session and is reported once.
//!
//! # Events
//!
//! `Tick` events are dropped once `event_capacity` events are queued.
//! `Started` and `Ended` are always delivered.

use crate::backend::address::AddressResolver;
use crate::backend::metrics::{AdaptiveThrottle, PollingMetrics, TickGate};
use crate::backend::process_trait::ProcessMemory;
use crate::backend::read_manager::{PlannedRead, ReadManager, ValueCache};
use crate::backend::reader::{decode, TypedMemoryReader};
use crate::config::PollingConfig;
use crate::error::{MemoryError, PlynkError, Result};
use crate::transform::ValueTransformer;
use crate::types::{MemoryAddressSpec, PollingStats, ReadResult};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TryRecvError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Messages published by the scheduler
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A session attached to a process
    Started { session: u64, process: String, pid: u32 },
    /// One tick's results with the statistics after it
    Tick {
        session: u64,
        results: Vec<ReadResult>,
        stats: PollingStats,
    },
    /// A session ended
    Ended { session: u64, reason: SessionEnd },
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// `stop()` was called or the session was replaced
    Stopped,
    /// The target process went away
    ProcessLost(String),
}

/// Outcome of one tick
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    /// One result per address, in priority order
    pub results: Vec<ReadResult>,
    /// Failed results this tick
    pub error_count: u64,
    pub last_error: Option<String>,
    /// Set when the process handle is no longer usable
    pub fatal: Option<MemoryError>,
}

/// Per-session read state: resolver, caches and the failed-address set
pub struct PollSession {
    process: Box<dyn ProcessMemory>,
    addresses: Vec<MemoryAddressSpec>,
    resolver: AddressResolver,
    reader: TypedMemoryReader,
    read_manager: ReadManager,
    values: ValueCache,
    transformer: Arc<ValueTransformer>,
    failed: HashMap<String, String>,
}

impl PollSession {
    pub fn new(
        process: Box<dyn ProcessMemory>,
        addresses: Vec<MemoryAddressSpec>,
        config: &PollingConfig,
        transformer: Arc<ValueTransformer>,
    ) -> Self {
        let mut session = Self {
            process,
            addresses: Vec::new(),
            resolver: AddressResolver::new(config.module_cache_ttl()),
            reader: TypedMemoryReader,
            read_manager: ReadManager::new(config.batch_gap_bytes),
            values: ValueCache::new(),
            transformer,
            failed: HashMap::new(),
        };
        session.set_addresses(addresses);
        session
    }

    pub fn process(&self) -> &dyn ProcessMemory {
        self.process.as_ref()
    }

    pub fn addresses(&self) -> &[MemoryAddressSpec] {
        &self.addresses
    }

    /// Replace the address set, clearing failed marks and cached values
    pub fn set_addresses(&mut self, mut addresses: Vec<MemoryAddressSpec>) {
        // Stable sort keeps profile order within a priority
        addresses.sort_by_key(|a| a.priority);
        self.addresses = addresses;
        self.failed.clear();
        self.values.clear();
    }

    /// Labels currently marked as permanently failed
    pub fn failed_labels(&self) -> impl Iterator<Item = &str> {
        self.failed.keys().map(String::as_str)
    }

    /// Read every address once
    pub fn tick(&mut self) -> TickOutcome {
        self.resolver.begin_tick();

        let mut slots: Vec<Option<ReadResult>> = vec![None; self.addresses.len()];
        let mut planned = Vec::new();
        let mut newly_failed = Vec::new();
        let mut outcome = TickOutcome::default();

        for (index, spec) in self.addresses.iter().enumerate() {
            if let Some(error) = self.failed.get(&spec.label) {
                slots[index] = Some(ReadResult::failed(&spec.label, error.clone()));
                continue;
            }
            match self.resolver.resolve(spec, self.process.as_ref()) {
                Ok(resolved) => planned.push(PlannedRead {
                    index,
                    address: resolved.address,
                    size: spec.size_bytes(),
                    group: spec.batch_group.clone(),
                }),
                Err(e) if e.is_fatal() => {
                    outcome.fatal = Some(e);
                    return outcome;
                }
                Err(e) => slots[index] = Some(record_failure(spec, e, &mut newly_failed)),
            }
        }

        for region in self.read_manager.plan_reads(&planned) {
            let batch = if region.is_batched() {
                match self
                    .reader
                    .read_bytes(self.process.as_ref(), region.address, region.size)
                {
                    Ok(data) => Some(data),
                    Err(e) if e.is_fatal() => {
                        outcome.fatal = Some(e);
                        return outcome;
                    }
                    Err(e) => {
                        tracing::debug!(
                            "Batched read at 0x{:X} failed ({}), reading members individually",
                            region.address,
                            e
                        );
                        None
                    }
                }
            } else {
                None
            };

            for &pos in &region.members {
                let read = &planned[pos];
                let bytes = match &batch {
                    Some(data) => ReadManager::extract(&region, data, read.address, read.size)
                        .map(<[u8]>::to_vec)
                        .ok_or(MemoryError::MemoryAccessViolation {
                            address: read.address,
                            size: read.size,
                        }),
                    None => self
                        .reader
                        .read_bytes(self.process.as_ref(), read.address, read.size),
                };

                let result = match bytes {
                    Ok(bytes) => self.finish(read.index, read.address, &bytes),
                    Err(e) if e.is_fatal() => {
                        outcome.fatal = Some(e);
                        return outcome;
                    }
                    Err(e) => record_failure(&self.addresses[read.index], e, &mut newly_failed),
                };
                slots[read.index] = Some(result);
            }
        }

        self.failed.extend(newly_failed);
        outcome.results = slots.into_iter().flatten().collect();
        for result in outcome.results.iter().filter(|r| !r.success) {
            outcome.error_count += 1;
            outcome.last_error = result.error.clone();
        }

        // Reads against a process that exited can fail with other errors
        // first; treat a fully failed tick on a dead process as process loss
        let all_failed = !outcome.results.is_empty() && outcome.error_count as usize == outcome.results.len();
        if all_failed && !self.process.is_alive() {
            outcome.fatal = Some(MemoryError::ProcessNotFound(self.process.name().to_string()));
        }

        outcome
    }

    /// Decode and transform one value, reusing the cached result when possible
    fn finish(&mut self, index: usize, address: u64, bytes: &[u8]) -> ReadResult {
        let spec = &self.addresses[index];

        if !spec.disable_caching {
            if let Some((raw, value)) = self.values.lookup(&spec.label, address, bytes) {
                return ReadResult::ok(&spec.label, raw, value);
            }
        }

        let Some(decoded) = decode(bytes, spec.value_type) else {
            let e = MemoryError::MemoryAccessViolation {
                address,
                size: bytes.len(),
            };
            return ReadResult::failed(&spec.label, e.to_string());
        };

        let (raw, value) = if spec.fast_mode {
            (decoded.clone(), decoded)
        } else {
            let t = self.transformer.transform(&decoded, spec);
            (t.raw, t.value)
        };

        if !spec.disable_caching {
            self.values.store(&spec.label, address, bytes, &raw, &value);
        }
        ReadResult::ok(&spec.label, raw, value)
    }
}

/// Build a failed result, remembering permanent failures
fn record_failure(
    spec: &MemoryAddressSpec,
    error: MemoryError,
    newly_failed: &mut Vec<(String, String)>,
) -> ReadResult {
    let message = error.to_string();
    if error.is_permanent() {
        tracing::warn!("{}: {} (not retried until the address set changes)", spec.label, message);
        newly_failed.push((spec.label.clone(), message.clone()));
    } else {
        tracing::debug!("{}: {}", spec.label, message);
    }
    ReadResult::failed(&spec.label, message)
}

/// Single-shot read of every address, without a scheduler
pub fn read_once(
    process: Box<dyn ProcessMemory>,
    addresses: Vec<MemoryAddressSpec>,
    config: &PollingConfig,
    transformer: Arc<ValueTransformer>,
) -> std::result::Result<Vec<ReadResult>, MemoryError> {
    let mut session = PollSession::new(process, addresses, config, transformer);
    let outcome = session.tick();
    match outcome.fatal {
        Some(e) => Err(e),
        None => Ok(outcome.results),
    }
}

enum SessionCommand {
    UpdateAddresses(Vec<MemoryAddressSpec>),
}

struct ActiveSession {
    id: u64,
    stop_tx: Option<Sender<()>>,
    commands: Sender<SessionCommand>,
    timer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    metrics: Arc<Mutex<PollingMetrics>>,
    finished: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl ActiveSession {
    /// Signal both threads and wait for the in-flight tick to finish
    fn shutdown(&mut self) {
        self.stop_tx.take();
        for handle in [self.timer.take(), self.reader.take()].into_iter().flatten() {
            if handle.join().is_err() {
                tracing::error!("Polling thread for session {} panicked", self.id);
            }
        }
    }
}

/// Drives one polling session at a time on background threads
pub struct PollingScheduler {
    config: PollingConfig,
    transformer: Arc<ValueTransformer>,
    events: EventQueue,
    events_rx: Receiver<PollEvent>,
    session: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl PollingScheduler {
    pub fn new(config: PollingConfig, transformer: Arc<ValueTransformer>) -> Self {
        let (events_tx, events_rx) = unbounded();
        let events = EventQueue {
            tx: events_tx,
            capacity: config.event_capacity.max(1),
        };
        Self {
            config,
            transformer,
            events,
            events_rx,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn transformer(&self) -> Arc<ValueTransformer> {
        self.transformer.clone()
    }

    /// Receiver for scheduler events (cloneable)
    pub fn events(&self) -> Receiver<PollEvent> {
        self.events_rx.clone()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<ActiveSession>>> {
        self.session
            .lock()
            .map_err(|_| PlynkError::State("polling session lock poisoned".to_string()))
    }

    /// Start polling `process`, replacing any running session
    ///
    /// Returns the new session id.
    pub fn start(
        &self,
        process: Box<dyn ProcessMemory>,
        addresses: Vec<MemoryAddressSpec>,
        interval: Option<Duration>,
    ) -> Result<u64> {
        let mut guard = self.lock()?;
        if let Some(mut previous) = guard.take() {
            previous.shutdown();
            if !previous.ended.swap(true, Ordering::SeqCst) {
                tracing::info!("Replacing polling session {}", previous.id);
                self.publish(PollEvent::Ended {
                    session: previous.id,
                    reason: SessionEnd::Stopped,
                });
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let interval = interval.unwrap_or_else(|| self.config.interval()).max(Duration::from_millis(1));
        let (name, pid) = (process.name().to_string(), process.pid());

        let session = PollSession::new(process, addresses, &self.config, self.transformer.clone());
        let metrics = Arc::new(Mutex::new(PollingMetrics::new()));
        let finished = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(TickGate::new());
        let delay_us = Arc::new(AtomicU64::new(interval.as_micros() as u64));

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (tick_tx, tick_rx) = bounded::<()>(1);
        let (cmd_tx, cmd_rx) = bounded::<SessionCommand>(16);

        let reader = {
            let ctx = ReaderContext {
                id,
                session,
                throttle: AdaptiveThrottle::new(
                    interval,
                    self.config.adaptive,
                    self.config.max_backoff_factor,
                    self.config.fast_tick_threshold,
                ),
                metrics: metrics.clone(),
                gate: gate.clone(),
                delay_us: delay_us.clone(),
                finished: finished.clone(),
                ended: ended.clone(),
                events: self.events.clone(),
            };
            let stop_rx = stop_rx.clone();
            std::thread::Builder::new()
                .name(format!("plynk-poll-{}", id))
                .spawn(move || ctx.run(tick_rx, cmd_rx, stop_rx))?
        };

        let timer = {
            let metrics = metrics.clone();
            std::thread::Builder::new()
                .name(format!("plynk-timer-{}", id))
                .spawn(move || run_timer(tick_tx, stop_rx, gate, delay_us, metrics))?
        };

        tracing::info!(
            "Polling session {} started for {} (pid {}) every {:?}",
            id,
            name,
            pid,
            interval
        );
        self.publish(PollEvent::Started {
            session: id,
            process: name,
            pid,
        });

        *guard = Some(ActiveSession {
            id,
            stop_tx: Some(stop_tx),
            commands: cmd_tx,
            timer: Some(timer),
            reader: Some(reader),
            metrics,
            finished,
            ended,
        });
        Ok(id)
    }

    /// Stop the running session
    ///
    /// Waits for an in-flight tick to complete. Returns `false` when no
    /// session was running.
    pub fn stop(&self) -> Result<bool> {
        let mut guard = self.lock()?;
        // The finished session stays in place so its statistics remain readable
        let Some(session) = guard.as_mut() else {
            return Ok(false);
        };
        session.shutdown();
        let was_running = !session.ended.swap(true, Ordering::SeqCst);
        if was_running {
            tracing::info!("Polling session {} stopped", session.id);
            self.publish(PollEvent::Ended {
                session: session.id,
                reason: SessionEnd::Stopped,
            });
        }
        Ok(was_running)
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .map(|g| g.as_ref().is_some_and(|s| !s.finished.load(Ordering::SeqCst)))
            .unwrap_or(false)
    }

    /// Id of the current session, if one is running
    pub fn session_id(&self) -> Option<u64> {
        self.lock().ok().and_then(|g| {
            g.as_ref()
                .filter(|s| !s.finished.load(Ordering::SeqCst))
                .map(|s| s.id)
        })
    }

    /// Replace the running session's address set
    pub fn update_addresses(&self, addresses: Vec<MemoryAddressSpec>) -> Result<()> {
        let guard = self.lock()?;
        let session = guard
            .as_ref()
            .filter(|s| !s.finished.load(Ordering::SeqCst))
            .ok_or_else(|| PlynkError::State("polling is not running".to_string()))?;
        session
            .commands
            .send(SessionCommand::UpdateAddresses(addresses))
            .map_err(|e| PlynkError::Channel(format!("Failed to update addresses: {}", e)))
    }

    /// Statistics of the current (or last finished) session
    pub fn stats(&self) -> Option<PollingStats> {
        let guard = self.lock().ok()?;
        let session = guard.as_ref()?;
        let metrics = session.metrics.lock().ok()?;
        Some(metrics.snapshot())
    }

    /// Single-shot read through the scheduler's configuration and transformer
    pub fn read_once(
        &self,
        process: Box<dyn ProcessMemory>,
        addresses: Vec<MemoryAddressSpec>,
    ) -> std::result::Result<Vec<ReadResult>, MemoryError> {
        read_once(process, addresses, &self.config, self.transformer.clone())
    }

    fn publish(&self, event: PollEvent) {
        self.events.publish(event);
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.session.lock() {
            if let Some(mut session) = guard.take() {
                session.shutdown();
            }
        }
    }
}

/// Event sender that sheds ticks under backpressure but never lifecycle events
#[derive(Clone)]
struct EventQueue {
    tx: Sender<PollEvent>,
    capacity: usize,
}

impl EventQueue {
    fn publish(&self, event: PollEvent) {
        if matches!(event, PollEvent::Tick { .. }) && self.tx.len() >= self.capacity {
            tracing::debug!("Polling event queue full, tick dropped");
            return;
        }
        // The scheduler holds a receiver, so this only fails during teardown
        if self.tx.send(event).is_err() {
            tracing::debug!("Polling event queue closed");
        }
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    matches!(stop_rx.try_recv(), Err(TryRecvError::Disconnected))
}

fn run_timer(
    tick_tx: Sender<()>,
    stop_rx: Receiver<()>,
    gate: Arc<TickGate>,
    delay_us: Arc<AtomicU64>,
    metrics: Arc<Mutex<PollingMetrics>>,
) {
    loop {
        if gate.try_acquire() {
            if tick_tx.send(()).is_err() {
                // Reader has exited
                gate.release();
                break;
            }
        } else if let Ok(mut m) = metrics.lock() {
            m.record_skip();
        }

        let delay = Duration::from_micros(delay_us.load(Ordering::Relaxed));
        select! {
            recv(stop_rx) -> _ => break,
            default(delay) => {}
        }
    }
}

struct ReaderContext {
    id: u64,
    session: PollSession,
    throttle: AdaptiveThrottle,
    metrics: Arc<Mutex<PollingMetrics>>,
    gate: Arc<TickGate>,
    delay_us: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    events: EventQueue,
}

impl ReaderContext {
    fn run(
        mut self,
        tick_rx: Receiver<()>,
        cmd_rx: Receiver<SessionCommand>,
        stop_rx: Receiver<()>,
    ) {
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(SessionCommand::UpdateAddresses(addresses)) => {
                        tracing::info!("Session {}: {} addresses", self.id, addresses.len());
                        self.session.set_addresses(addresses);
                    }
                    Err(_) => break,
                },
                recv(tick_rx) -> tick => {
                    if tick.is_err() || stop_requested(&stop_rx) {
                        self.gate.release();
                        break;
                    }
                    let keep_going = self.run_tick();
                    self.gate.release();
                    if !keep_going {
                        break;
                    }
                }
            }
        }
        self.finished.store(true, Ordering::SeqCst);
        tracing::debug!("Session {} reader exiting", self.id);
    }

    /// Run one tick; `false` when the session must end
    fn run_tick(&mut self) -> bool {
        let started = Instant::now();
        let mut outcome = self.session.tick();
        let elapsed = started.elapsed();

        let next = self.throttle.next_delay(elapsed);
        self.delay_us
            .store(next.as_micros().max(1) as u64, Ordering::Relaxed);

        let stats = match self.metrics.lock() {
            Ok(mut m) => {
                m.record_tick(elapsed, outcome.error_count, outcome.last_error.clone());
                m.snapshot()
            }
            Err(_) => PollingStats::default(),
        };

        if let Some(fatal) = outcome.fatal.take() {
            self.finished.store(true, Ordering::SeqCst);
            if !self.ended.swap(true, Ordering::SeqCst) {
                tracing::error!("Session {} ended: {}", self.id, fatal);
                self.events.publish(PollEvent::Ended {
                    session: self.id,
                    reason: SessionEnd::ProcessLost(fatal.to_string()),
                });
            }
            return false;
        }

        self.events.publish(PollEvent::Tick {
            session: self.id,
            results: outcome.results,
            stats,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_process::MockProcess;
    use crate::types::{OutputValue, Priority, ValueType};

    fn config() -> PollingConfig {
        PollingConfig {
            interval_ms: 5,
            adaptive: false,
            ..PollingConfig::default()
        }
    }

    fn session(process: &MockProcess, addresses: Vec<MemoryAddressSpec>) -> PollSession {
        PollSession::new(
            Box::new(process.clone()),
            addresses,
            &config(),
            Arc::new(ValueTransformer::default()),
        )
    }

    fn game() -> MockProcess {
        MockProcess::new("game.exe", 7).with_module("game.exe", 0x40_0000)
    }

    #[test]
    fn test_results_follow_priority() {
        let process = game();
        process.write_i32(0x1000, 1);
        process.write_i32(0x2000, 2);

        let mut low = MemoryAddressSpec::absolute("low", "0x1000", ValueType::Int32);
        low.priority = Priority::Low;
        let mut high = MemoryAddressSpec::absolute("high", "0x2000", ValueType::Int32);
        high.priority = Priority::High;

        let outcome = session(&process, vec![low, high]).tick();
        let labels: Vec<_> = outcome.results.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["high", "low"]);
    }

    #[test]
    fn test_bad_address_does_not_abort_tick() {
        let process = game();
        process.write_i32(0x40_1000, 42);

        let outcome = session(
            &process,
            vec![
                MemoryAddressSpec::absolute("unmapped", "0xDEAD0000", ValueType::Int32),
                MemoryAddressSpec::module_offset("speed", "game.exe", "0x1000", ValueType::Int32),
            ],
        )
        .tick();

        assert_eq!(outcome.error_count, 1);
        assert!(outcome.fatal.is_none());
        assert_eq!(outcome.results[1].final_value, Some(OutputValue::Integer(42)));
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let process = game();
        let mut session = session(
            &process,
            vec![MemoryAddressSpec::module_offset("x", "missing.dll", "0x10", ValueType::UInt8)],
        );

        let first = session.tick();
        let second = session.tick();

        assert_eq!(process.module_lookup_count(), 1);
        assert_eq!(first.results[0].error, second.results[0].error);
        assert_eq!(second.error_count, 1);
        assert_eq!(session.failed_labels().count(), 1);

        // Replacing the address set clears the mark
        process.set_module("missing.dll", 0x5000);
        process.write_u8(0x5010, 9);
        session.set_addresses(vec![MemoryAddressSpec::module_offset(
            "x",
            "missing.dll",
            "0x10",
            ValueType::UInt8,
        )]);
        assert!(session.tick().results[0].success);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let process = game();
        let mut session = session(
            &process,
            vec![MemoryAddressSpec::absolute("late", "0x3000", ValueType::Int32)],
        );

        assert!(!session.tick().results[0].success);
        process.write_i32(0x3000, 5);
        assert_eq!(
            session.tick().results[0].final_value,
            Some(OutputValue::Integer(5))
        );
    }

    #[test]
    fn test_fast_mode_skips_transform() {
        let process = game();
        process.write_i32(0x1000, 4);
        let mut spec = MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32).with_script("value * 2");
        spec.fast_mode = true;

        let outcome = session(&process, vec![spec]).tick();
        assert_eq!(outcome.results[0].final_value, Some(OutputValue::Integer(4)));
    }

    #[test]
    fn test_changed_bytes_bypass_cache() {
        let process = game();
        process.write_i32(0x1000, 4);
        let spec = MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32).with_script("value * 2");
        let mut session = session(&process, vec![spec]);

        assert_eq!(session.tick().results[0].final_value, Some(OutputValue::Integer(8)));
        assert_eq!(session.tick().results[0].final_value, Some(OutputValue::Integer(8)));
        process.write_i32(0x1000, 5);
        assert_eq!(session.tick().results[0].final_value, Some(OutputValue::Integer(10)));
    }

    #[test]
    fn test_batch_group_uses_one_read() {
        let process = game();
        let mut block = Vec::new();
        block.extend_from_slice(&11i32.to_ne_bytes());
        block.extend_from_slice(&22i32.to_ne_bytes());
        process.write_bytes(0x1000, &block);

        let mut a = MemoryAddressSpec::absolute("a", "0x1000", ValueType::Int32);
        let mut b = MemoryAddressSpec::absolute("b", "0x1004", ValueType::Int32);
        a.batch_group = Some("hud".into());
        b.batch_group = Some("hud".into());

        let mut session = session(&process, vec![a, b]);
        process.reset_counters();
        let outcome = session.tick();

        assert_eq!(process.read_count(), 1);
        assert_eq!(outcome.results[0].final_value, Some(OutputValue::Integer(11)));
        assert_eq!(outcome.results[1].final_value, Some(OutputValue::Integer(22)));
    }

    #[test]
    fn test_failed_batch_falls_back_to_single_reads() {
        let process = game();
        // Separate regions, so the merged read spans unmapped bytes
        process.write_i32(0x1000, 1);
        process.write_i32(0x1010, 2);

        let mut a = MemoryAddressSpec::absolute("a", "0x1000", ValueType::Int32);
        let mut b = MemoryAddressSpec::absolute("b", "0x1010", ValueType::Int32);
        a.batch_group = Some("g".into());
        b.batch_group = Some("g".into());

        let outcome = session(&process, vec![a, b]).tick();
        assert!(outcome.results.iter().all(|r| r.success));
    }

    #[test]
    fn test_dead_process_is_fatal() {
        let process = game();
        process.write_i32(0x1000, 1);
        let mut session = session(
            &process,
            vec![MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)],
        );
        process.set_alive(false);

        assert!(matches!(
            session.tick().fatal,
            Some(MemoryError::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_read_once() {
        let process = game();
        process.write_i32(0x40_1000, 42);
        let results = read_once(
            Box::new(process),
            vec![MemoryAddressSpec::absolute("speed", "game.exe+0x1000", ValueType::Int32)],
            &config(),
            Arc::new(ValueTransformer::default()),
        )
        .unwrap();
        assert_eq!(results[0].raw_value, Some(OutputValue::Integer(42)));
    }

    #[test]
    fn test_scheduler_lifecycle() {
        let process = game();
        process.write_i32(0x1000, 3);
        let scheduler = PollingScheduler::new(config(), Arc::new(ValueTransformer::default()));
        let events = scheduler.events();

        let id = scheduler
            .start(
                Box::new(process.clone()),
                vec![MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)],
                None,
            )
            .unwrap();
        assert!(scheduler.is_running());

        std::thread::sleep(Duration::from_millis(60));
        assert!(scheduler.stop().unwrap());
        assert!(!scheduler.is_running());
        assert!(!scheduler.stop().unwrap());

        let received: Vec<_> = events.try_iter().collect();
        assert!(matches!(received.first(), Some(PollEvent::Started { session, .. }) if *session == id));
        assert!(received.iter().any(|e| matches!(e, PollEvent::Tick { .. })));
        assert!(matches!(
            received.last(),
            Some(PollEvent::Ended { reason: SessionEnd::Stopped, .. })
        ));
    }

    #[test]
    fn test_process_loss_reported_once() {
        let process = game();
        process.write_i32(0x1000, 3);
        let scheduler = PollingScheduler::new(config(), Arc::new(ValueTransformer::default()));
        let events = scheduler.events();
        scheduler
            .start(
                Box::new(process.clone()),
                vec![MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)],
                None,
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        process.set_alive(false);
        std::thread::sleep(Duration::from_millis(60));

        assert!(!scheduler.is_running());
        assert!(!scheduler.stop().unwrap());

        let ended: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, PollEvent::Ended { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
        assert!(matches!(
            &ended[0],
            PollEvent::Ended { reason: SessionEnd::ProcessLost(_), .. }
        ));
    }

    #[test]
    fn test_process_loss_survives_full_event_queue() {
        let process = game();
        process.write_i32(0x1000, 5);
        let scheduler = PollingScheduler::new(
            PollingConfig {
                interval_ms: 2,
                event_capacity: 8,
                ..config()
            },
            Arc::new(ValueTransformer::default()),
        );
        let events = scheduler.events();
        scheduler
            .start(
                Box::new(process.clone()),
                vec![MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)],
                None,
            )
            .unwrap();

        // Nobody drains while ticks pile up
        std::thread::sleep(Duration::from_millis(80));
        process.set_alive(false);
        let deadline = Instant::now() + Duration::from_secs(2);
        while scheduler.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!scheduler.is_running());

        let drained: Vec<_> = events.try_iter().collect();
        let ticks = drained
            .iter()
            .filter(|e| matches!(e, PollEvent::Tick { .. }))
            .count();
        let ended: Vec<_> = drained
            .iter()
            .filter(|e| matches!(e, PollEvent::Ended { .. }))
            .collect();
        assert!(ticks <= 8);
        assert_eq!(ended.len(), 1);
        assert!(matches!(
            ended[0],
            PollEvent::Ended { reason: SessionEnd::ProcessLost(_), .. }
        ));
    }

    #[test]
    fn test_slow_ticks_are_skipped_not_overlapped() {
        let process = game();
        process.write_i32(0x1000, 3);
        process.set_read_latency(Duration::from_millis(25));
        let scheduler = PollingScheduler::new(config(), Arc::new(ValueTransformer::default()));
        scheduler
            .start(
                Box::new(process.clone()),
                vec![MemoryAddressSpec::absolute("x", "0x1000", ValueType::Int32)],
                None,
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(150));
        scheduler.stop().unwrap();

        let stats = scheduler.stats().unwrap_or_default();
        assert!(stats.skipped_polls > 0);
        assert!(stats.total_polls >= 1);
    }
}
