//! Integration tests for output dispatch
//!
//! Routing rows to sinks, change detection, and the real serial and
//! PacDrive sinks behind the engine.

mod common;

use common::mock_helpers::{mock_sink, RecordingSink};
use mockall::predicate::eq;
use plynk_rs::config::profiles::{InMemoryProfileStore, WledProfile};
use plynk_rs::config::DispatchConfig;
use plynk_rs::dispatch::sinks::{HidReportWriter, PacDriveSink, SerialSink};
use plynk_rs::dispatch::{DeviceRegistry, DispatchEngine, EffectCommand, SinkCommand};
use plynk_rs::error::DispatchError;
use plynk_rs::types::{
    ChannelRef, DeviceType, NormalizedOutput, OutputMapping, OutputSource, OutputValue, WledRule,
};
use std::sync::{Arc, Mutex};

fn output(key: &str, label: &str, value: OutputValue) -> NormalizedOutput {
    NormalizedOutput::new(key, label, value, OutputSource::Message)
}

fn engine(registry: DeviceRegistry, profiles: InMemoryProfileStore) -> DispatchEngine {
    DispatchEngine::new(DispatchConfig::default(), registry, Arc::new(profiles))
}

#[test]
fn test_serial_row_passes_value_through() {
    let mut sink = mock_sink("arduino", DeviceType::Serial);
    sink.expect_write()
        .with(eq(SinkCommand::Channel {
            channel: ChannelRef::Profile("RPM".into()),
            value: OutputValue::Float(88.5),
        }))
        .times(1)
        .returning(|_| Ok(()));
    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(sink));

    let engine = engine(registry, InMemoryProfileStore::new());
    engine.set_mappings(vec![OutputMapping::new("rpm").routed_to(
        DeviceType::Serial,
        "arduino",
        ChannelRef::Profile("RPM".into()),
    )]);

    let records = engine.dispatch(&output("rpm", "rpm", OutputValue::Float(88.5)));
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].last_value, OutputValue::Float(88.5));
}

#[test]
fn test_rows_match_by_label_and_fan_out() {
    let lamp = RecordingSink::new("pd1", DeviceType::PacDrive);
    let lamp_commands = lamp.commands.clone();
    let serial = RecordingSink::new("arduino", DeviceType::Serial);
    let serial_commands = serial.commands.clone();
    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(lamp));
    registry.register(Box::new(serial));

    let engine = engine(registry, InMemoryProfileStore::new());
    engine.set_mappings(vec![
        OutputMapping::new("Start Lamp").routed_to(DeviceType::PacDrive, "pd1", ChannelRef::Index(3)),
        OutputMapping::new("id_7").routed_to(DeviceType::Serial, "arduino", ChannelRef::Index(7)),
        OutputMapping::new("other").routed_to(DeviceType::Serial, "arduino", ChannelRef::Index(8)),
    ]);

    let records = engine.dispatch(&output("id_7", "Start Lamp", OutputValue::Integer(5)));
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.success));

    // PacDrive rows see the value as a switch
    assert_eq!(
        lamp_commands.lock().unwrap()[0],
        SinkCommand::Channel {
            channel: ChannelRef::Index(2),
            value: OutputValue::Integer(1),
        }
    );
    assert_eq!(
        serial_commands.lock().unwrap()[0],
        SinkCommand::Channel {
            channel: ChannelRef::Index(7),
            value: OutputValue::Integer(5),
        }
    );
}

#[test]
fn test_only_changed_values_are_sent() {
    let sink = RecordingSink::new("arduino", DeviceType::Serial);
    let commands = sink.commands.clone();
    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(sink));

    let engine = engine(registry, InMemoryProfileStore::new());
    let rows = vec![OutputMapping::new("gear").routed_to(
        DeviceType::Serial,
        "arduino",
        ChannelRef::Index(1),
    )];
    engine.set_mappings(rows.clone());

    for value in [3, 3, 3, 4, 4] {
        engine.dispatch(&output("gear", "gear", OutputValue::Integer(value)));
    }
    assert_eq!(commands.lock().unwrap().len(), 2);

    // Reloading the table forgets what was sent
    engine.set_mappings(rows);
    engine.dispatch(&output("gear", "gear", OutputValue::Integer(4)));
    assert_eq!(commands.lock().unwrap().len(), 3);
}

#[test]
fn test_wled_range_rule_applies_effect() {
    let sink = RecordingSink::new("strip", DeviceType::Wled);
    let commands = sink.commands.clone();
    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(sink));

    let mut rule = WledRule::range(50.0, 100.0, vec![2]);
    rule.effect = 9;
    rule.color = [255, 0, 0];
    rule.brightness = 200;
    let profiles = InMemoryProfileStore::new().with_wled_profile(WledProfile {
        id: "tach".into(),
        device_ip: "10.0.0.9".into(),
        rules: vec![rule],
    });

    let engine = engine(registry, profiles);
    engine.set_mappings(vec![OutputMapping::new("rpm").routed_to(
        DeviceType::Wled,
        "strip",
        ChannelRef::Profile("tach".into()),
    )]);

    // Outside every rule: recorded as handled, nothing sent
    let records = engine.dispatch(&output("rpm", "rpm", OutputValue::Integer(10)));
    assert!(records[0].success);
    assert!(commands.lock().unwrap().is_empty());

    let records = engine.dispatch(&output("rpm", "rpm", OutputValue::Integer(75)));
    assert!(records[0].success);
    assert_eq!(
        commands.lock().unwrap()[0],
        SinkCommand::Wled {
            ip: "10.0.0.9".into(),
            command: EffectCommand::Apply {
                segments: vec![2],
                effect: 9,
                color: [255, 0, 0],
                brightness: 200,
                flash: false,
            },
        }
    );
}

#[test]
fn test_sink_error_is_recorded() {
    let mut sink = mock_sink("arduino", DeviceType::Serial);
    sink.expect_write()
        .returning(|_| Err(DispatchError::Io("port gone".into())));
    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(sink));

    let engine = engine(registry, InMemoryProfileStore::new());
    engine.set_mappings(vec![OutputMapping::new("gear").routed_to(
        DeviceType::Serial,
        "arduino",
        ChannelRef::Index(1),
    )]);

    let records = engine.dispatch(&output("gear", "gear", OutputValue::Integer(1)));
    assert!(!records[0].success);
    assert!(records[0].error.as_deref().unwrap().contains("port gone"));
}

#[test]
fn test_device_type_mismatch_is_not_found() {
    let sink = RecordingSink::new("pd1", DeviceType::PacDrive);
    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(sink));

    let engine = engine(registry, InMemoryProfileStore::new());
    engine.set_mappings(vec![OutputMapping::new("gear").routed_to(
        DeviceType::Serial,
        "pd1",
        ChannelRef::Index(1),
    )]);

    let records = engine.dispatch(&output("gear", "gear", OutputValue::Integer(1)));
    assert!(!records[0].success);
}

#[test]
fn test_serial_sink_writes_lines() {
    let dir = tempfile::tempdir().unwrap();
    let port = dir.path().join("ttyACM0");
    std::fs::write(&port, b"").unwrap();

    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(SerialSink::open("arduino", &port)));
    let engine = engine(registry, InMemoryProfileStore::new());
    engine.set_mappings(vec![OutputMapping::new("speed").routed_to(
        DeviceType::Serial,
        "arduino",
        ChannelRef::Index(4),
    )]);

    engine.dispatch(&output("speed", "speed", OutputValue::Integer(120)));
    engine.dispatch(&output("speed", "speed", OutputValue::Text("HI".into())));

    assert_eq!(std::fs::read_to_string(&port).unwrap(), "4=120\n4=HI\n");
}

#[derive(Clone, Default)]
struct CapturedReports(Arc<Mutex<Vec<Vec<u8>>>>);

impl HidReportWriter for CapturedReports {
    fn write_report(&mut self, report: &[u8]) -> Result<(), DispatchError> {
        self.0.lock().unwrap().push(report.to_vec());
        Ok(())
    }
}

#[test]
fn test_pacdrive_sink_sends_full_state() {
    let reports = CapturedReports::default();
    let mut registry = DeviceRegistry::new();
    registry.register(Box::new(PacDriveSink::new("pd1", Box::new(reports.clone()))));
    let engine = engine(registry, InMemoryProfileStore::new());
    engine.set_mappings(vec![
        OutputMapping::new("start").routed_to(DeviceType::PacDrive, "pd1", ChannelRef::Index(1)),
        OutputMapping::new("coin").routed_to(DeviceType::PacDrive, "pd1", ChannelRef::Index(10)),
    ]);

    engine.dispatch(&output("start", "start", OutputValue::Integer(1)));
    engine.dispatch(&output("coin", "coin", OutputValue::Integer(1)));
    engine.dispatch(&output("start", "start", OutputValue::Integer(0)));

    let reports = reports.0.lock().unwrap();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0], vec![0x00, 0xDD, 0x00, 0x00, 0x01]);
    assert_eq!(reports[1], vec![0x00, 0xDD, 0x00, 0x02, 0x01]);
    assert_eq!(reports[2], vec![0x00, 0xDD, 0x00, 0x02, 0x00]);
}
