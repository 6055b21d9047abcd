//! Profile store
//!
//! Profiles are JSON documents authored by an external editor. The engine
//! only reads them:
//!
//! - `memory/<name>.json` - [`MemoryProfile`]: target process and address list
//! - `game/<name>.json` - [`GameProfile`]: sources and dispatch table
//! - `wled/<id>.json` - [`WledProfile`]: controller address and lighting rules
//! - `devices.json` - [`DeviceConfig`] list backing the device registry

use crate::error::{PlynkError, Result};
use crate::types::{MemoryAddressSpec, OutputMapping, WledRule};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Device list filename inside the profile root
pub const DEVICES_FILE: &str = "devices.json";

/// Addresses to read from one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryProfile {
    /// Executable name of the target process
    pub process: String,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, alias = "addresses")]
    pub outputs: Vec<MemoryAddressSpec>,
}

/// A game's sources and dispatch table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProfile {
    #[serde(default)]
    pub name: String,
    /// Memory profile to poll, if any
    #[serde(default)]
    pub memory_file: Option<String>,
    /// Message source profile name, if the game emits outputs over the message pump
    #[serde(default)]
    pub message_file: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputMapping>,
}

/// Rule set for one WLED controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WledProfile {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "deviceIP")]
    pub device_ip: String,
    #[serde(default)]
    pub rules: Vec<WledRule>,
}

/// Type-specific device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceKind {
    /// Ultimarc PacDrive; `index` picks among several attached boards
    PacDrive {
        #[serde(default)]
        index: usize,
    },
    /// Line-oriented serial device, opened by path (`/dev/ttyACM0`, `\\.\COM3`)
    Serial { port: String },
    /// WLED controller; the address comes from the WLED profile
    #[serde(rename = "WLED", alias = "Wled")]
    Wled,
}

/// One entry of the device registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(flatten)]
    pub kind: DeviceKind,
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>, kind: DeviceKind) -> Self {
        Self { id: id.into(), kind }
    }
}

/// Read access to profiles by name
pub trait ProfileStore: Send + Sync {
    fn load_memory_profile(&self, name: &str) -> Result<MemoryProfile>;

    fn load_game_profile(&self, name: &str) -> Result<GameProfile>;

    fn load_wled_profile(&self, id: &str) -> Result<WledProfile>;

    fn list_devices(&self) -> Result<Vec<DeviceConfig>>;
}

/// Profiles stored as JSON files under a root directory
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    root: PathBuf,
}

impl JsonProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn profile_path(&self, kind: &str, name: &str) -> Result<PathBuf> {
        let file = if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{}.json", name)
        };
        // Names are plain file names; reject anything that would leave the root
        if file.contains(['/', '\\']) || file.starts_with('.') {
            return Err(PlynkError::Profile(format!("Invalid profile name: {}", name)));
        }
        Ok(self.root.join(kind).join(file))
    }

    fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlynkError::Profile(format!("Failed to read profile {:?}: {}", path, e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PlynkError::Profile(format!("Failed to parse profile {:?}: {}", path, e))
        })
    }

    /// Write a profile as pretty JSON (used by tools and tests)
    pub fn write<T: Serialize>(&self, kind: &str, name: &str, profile: &T) -> Result<PathBuf> {
        let path = self.profile_path(kind, name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(profile)?)?;
        Ok(path)
    }

    pub fn write_devices(&self, devices: &[DeviceConfig]) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(
            self.root.join(DEVICES_FILE),
            serde_json::to_string_pretty(devices)?,
        )?;
        Ok(())
    }
}

impl ProfileStore for JsonProfileStore {
    fn load_memory_profile(&self, name: &str) -> Result<MemoryProfile> {
        Self::read(&self.profile_path("memory", name)?)
    }

    fn load_game_profile(&self, name: &str) -> Result<GameProfile> {
        let mut profile: GameProfile = Self::read(&self.profile_path("game", name)?)?;
        if profile.name.is_empty() {
            profile.name = name.trim_end_matches(".json").to_string();
        }
        Ok(profile)
    }

    fn load_wled_profile(&self, id: &str) -> Result<WledProfile> {
        let mut profile: WledProfile = Self::read(&self.profile_path("wled", id)?)?;
        if profile.id.is_empty() {
            profile.id = id.trim_end_matches(".json").to_string();
        }
        Ok(profile)
    }

    fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        let path = self.root.join(DEVICES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Self::read(&path)
    }
}

/// Profiles held in memory
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    memory: RwLock<HashMap<String, MemoryProfile>>,
    games: RwLock<HashMap<String, GameProfile>>,
    wled: RwLock<HashMap<String, WledProfile>>,
    devices: RwLock<Vec<DeviceConfig>>,
}

fn poisoned<T>(_: T) -> PlynkError {
    PlynkError::Profile("profile store lock poisoned".to_string())
}

fn lookup<T: Clone>(map: &RwLock<HashMap<String, T>>, kind: &str, name: &str) -> Result<T> {
    map.read()
        .map_err(poisoned)?
        .get(name)
        .cloned()
        .ok_or_else(|| PlynkError::Profile(format!("{} profile not found: {}", kind, name)))
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_profile(self, name: impl Into<String>, profile: MemoryProfile) -> Self {
        if let Ok(mut map) = self.memory.write() {
            map.insert(name.into(), profile);
        }
        self
    }

    pub fn with_game_profile(self, name: impl Into<String>, profile: GameProfile) -> Self {
        if let Ok(mut map) = self.games.write() {
            map.insert(name.into(), profile);
        }
        self
    }

    pub fn with_wled_profile(self, profile: WledProfile) -> Self {
        if let Ok(mut map) = self.wled.write() {
            map.insert(profile.id.clone(), profile);
        }
        self
    }

    pub fn with_device(self, device: DeviceConfig) -> Self {
        if let Ok(mut devices) = self.devices.write() {
            devices.push(device);
        }
        self
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn load_memory_profile(&self, name: &str) -> Result<MemoryProfile> {
        lookup(&self.memory, "Memory", name)
    }

    fn load_game_profile(&self, name: &str) -> Result<GameProfile> {
        lookup(&self.games, "Game", name)
    }

    fn load_wled_profile(&self, id: &str) -> Result<WledProfile> {
        lookup(&self.wled, "WLED", id)
    }

    fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        Ok(self.devices.read().map_err(poisoned)?.clone())
    }
}
