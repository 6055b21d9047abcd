//! Mock construction helpers

use mockall::mock;
use plynk_rs::backend::{MockConnector, MockProcess};
use plynk_rs::config::profiles::InMemoryProfileStore;
use plynk_rs::config::AppConfig;
use plynk_rs::dispatch::{DeviceRegistry, DeviceSink, SinkCommand};
use plynk_rs::error::DispatchError;
use plynk_rs::listener::{ManualPump, ManualPumpHandle};
use plynk_rs::types::DeviceType;
use plynk_rs::Runtime;
use std::sync::{Arc, Mutex};

pub const GAME_BASE: u64 = 0x40_0000;

mock! {
    pub Sink {}

    impl DeviceSink for Sink {
        fn id(&self) -> &str;
        fn device_type(&self) -> DeviceType;
        fn write(&mut self, command: &SinkCommand) -> Result<(), DispatchError>;
    }
}

/// Mock sink with identity expectations set
pub fn mock_sink(id: &str, device_type: DeviceType) -> MockSink {
    let mut sink = MockSink::new();
    sink.expect_id().return_const(id.to_string());
    sink.expect_device_type().return_const(device_type);
    sink
}

/// Sink that records every command it is given
pub struct RecordingSink {
    id: String,
    device_type: DeviceType,
    pub commands: Arc<Mutex<Vec<SinkCommand>>>,
}

impl RecordingSink {
    pub fn new(id: &str, device_type: DeviceType) -> Self {
        Self {
            id: id.to_string(),
            device_type,
            commands: Arc::default(),
        }
    }
}

impl DeviceSink for RecordingSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn write(&mut self, command: &SinkCommand) -> Result<(), DispatchError> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.clone());
        }
        Ok(())
    }
}

/// `game.exe` with its module mapped at [`GAME_BASE`]
pub fn game_process() -> MockProcess {
    MockProcess::new("game.exe", 4242).with_module("game.exe", GAME_BASE)
}

/// Fast-polling configuration for tests
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.polling.interval_ms = 5;
    config.polling.adaptive = false;
    config.listener.timeout_enabled = false;
    config
}

/// Runtime over mocks; the returned handle feeds the message listener
pub fn test_runtime(
    config: AppConfig,
    process: Option<MockProcess>,
    profiles: InMemoryProfileStore,
    registry: DeviceRegistry,
) -> (Runtime, ManualPumpHandle) {
    let connector = match process {
        Some(p) => MockConnector::new().with_process(p),
        None => MockConnector::new(),
    };
    let (pump, handle) = ManualPump::new();
    let runtime = Runtime::new(
        config,
        Arc::new(profiles),
        Arc::new(connector),
        registry,
        Box::new(pump),
    )
    .expect("runtime should start");
    (runtime, handle)
}
