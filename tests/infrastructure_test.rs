//! Configuration and profile storage on disk

mod common;

use common::builders::{memory_profile, AddressBuilder, GameBuilder};
use plynk_rs::config::profiles::{DeviceConfig, DeviceKind, JsonProfileStore, ProfileStore};
use plynk_rs::config::AppConfig;
use plynk_rs::dispatch::DeviceRegistry;
use plynk_rs::types::{BitwiseOp, ChannelRef, DeviceType, TriggerType, ValueType};

#[test]
fn test_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = AppConfig::default();
    config.polling.interval_ms = 16;
    config.dispatch.send_only_changed = false;
    config.listener.timeout_enabled = true;
    config.save(&path).unwrap();

    let loaded = AppConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_missing_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = AppConfig::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(loaded, AppConfig::default());
}

#[test]
fn test_partial_config_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    std::fs::write(&path, "[dispatch]\nforce_update_interval = 99999\n").unwrap();
    let loaded = AppConfig::load(&path).unwrap();
    assert_eq!(loaded.dispatch.force_update_interval, 2000);
    assert_eq!(loaded.polling, AppConfig::default().polling);

    std::fs::write(&path, "[polling]\ninterval_ms = 0\n").unwrap();
    assert!(AppConfig::load(&path).is_err());

    std::fs::write(&path, "not = [valid").unwrap();
    assert!(AppConfig::load(&path).is_err());
}

#[test]
fn test_profiles_in_legacy_layout() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for kind in ["game", "memory", "wled"] {
        std::fs::create_dir_all(root.join(kind)).unwrap();
    }

    std::fs::write(
        root.join("game/outrun.json"),
        r#"{
            "memoryFile": "outrun_mem",
            "outputs": [
                { "outputKey": "Start Lamp", "deviceType": "PacDrive",
                  "targetDeviceId": "pd1", "channelOrProfileRef": 1 },
                { "outputKey": "rpm", "deviceType": "WLED",
                  "targetDeviceId": "strip", "channelOrProfileRef": "tach", "active": false }
            ]
        }"#,
    )
    .unwrap();
    std::fs::write(
        root.join("memory/outrun_mem.json"),
        r#"{
            "process": "outrun.exe",
            "addresses": [
                { "label": "lamps", "type": "UInt8", "moduleName": "outrun.exe", "offset": "1F00",
                  "isBitfield": true, "bitmask": "0x0F", "bitwiseOp": "AND" }
            ]
        }"#,
    )
    .unwrap();
    std::fs::write(
        root.join("wled/tach.json"),
        r#"{
            "deviceIP": "10.0.0.9",
            "rules": [ { "triggerType": "range", "minValue": 50, "maxValue": 100, "segments": [2] } ]
        }"#,
    )
    .unwrap();

    let store = JsonProfileStore::new(root);

    let game = store.load_game_profile("outrun").unwrap();
    assert_eq!(game.name, "outrun");
    assert_eq!(game.memory_file.as_deref(), Some("outrun_mem"));
    assert_eq!(game.outputs[0].device_type, DeviceType::PacDrive);
    assert_eq!(game.outputs[0].channel, Some(ChannelRef::Index(1)));
    assert_eq!(game.outputs[1].channel, Some(ChannelRef::Profile("tach".into())));
    assert!(!game.outputs[1].active);

    let memory = store.load_memory_profile("outrun_mem").unwrap();
    assert_eq!(memory.process, "outrun.exe");
    assert_eq!(memory.outputs[0].value_type, ValueType::UInt8);
    assert_eq!(memory.outputs[0].bitwise_op, Some(BitwiseOp::And));

    let wled = store.load_wled_profile("tach").unwrap();
    assert_eq!(wled.id, "tach");
    assert_eq!(wled.device_ip, "10.0.0.9");
    assert_eq!(wled.rules[0].trigger_type, TriggerType::Range);
    assert_eq!(wled.rules[0].brightness, 128);
}

#[test]
fn test_written_profiles_load_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProfileStore::new(dir.path());

    let memory = memory_profile(vec![AddressBuilder::new("speed").format("{0} mph").build()]);
    let game = GameBuilder::new("daytona")
        .memory("daytona_mem")
        .row("speed", DeviceType::Serial, "arduino", ChannelRef::Index(2))
        .build();
    store.write("memory", "daytona_mem", &memory).unwrap();
    store.write("game", "daytona", &game).unwrap();

    assert_eq!(store.load_memory_profile("daytona_mem").unwrap(), memory);
    assert_eq!(store.load_game_profile("daytona.json").unwrap(), game);
}

#[test]
fn test_profile_names_stay_inside_root() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProfileStore::new(dir.path());

    assert!(store.load_game_profile("../secrets").is_err());
    assert!(store.load_game_profile("nested/game").is_err());
    assert!(store.load_game_profile("missing").is_err());
}

#[test]
fn test_device_registry_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProfileStore::new(dir.path());
    assert!(store.list_devices().unwrap().is_empty());

    let port = dir.path().join("ttyUSB0");
    store
        .write_devices(&[
            DeviceConfig::new("pd1", DeviceKind::PacDrive { index: 0 }),
            DeviceConfig::new(
                "arduino",
                DeviceKind::Serial {
                    port: port.display().to_string(),
                },
            ),
            DeviceConfig::new("strip", DeviceKind::Wled),
        ])
        .unwrap();

    let devices = store.list_devices().unwrap();
    assert_eq!(devices.len(), 3);

    let registry = DeviceRegistry::from_devices(&devices, &AppConfig::default().dispatch);
    assert_eq!(registry.len(), 3);
    assert!(registry.get("pd1", DeviceType::PacDrive).is_ok());
    assert!(registry.get("arduino", DeviceType::Serial).is_ok());
    assert!(registry.get("strip", DeviceType::Wled).is_ok());
    assert!(registry.get("strip", DeviceType::Serial).is_err());
}
