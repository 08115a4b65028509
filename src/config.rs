//! Configuration.
//!
//! Two layers: [`Settings`], the host-side JSON file the daemon loads
//! (ports, strip length, data directory, identity overrides), and the
//! small persisted state the node itself reads and writes through the
//! storage seam — `/config.json` (group and last selected preset) and
//! `/phase.json` (device phase).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::store::Storage;

/// Path of the persisted node state.
pub const CONFIG_PATH: &str = "/config.json";

/// Path of the persisted device phase.
pub const PHASE_PATH: &str = "/phase.json";

/// Errors related to configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseJson {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn default_num_leds() -> usize {
    90
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./lume-data")
}

/// Node-level configuration (identity and initial grouping).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Fixed node id as 16 hex digits. Derived from the hardware
    /// address when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable device name carried in announcements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// Initial group, used only until a persisted group exists.
    #[serde(default)]
    pub group: String,
}

/// Bus configuration (`bus.*`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_bus_port")]
    pub port: u16,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
}

fn default_bus_port() -> u16 {
    crate::bus::DEFAULT_PORT
}

fn default_bind_addr() -> String {
    "0.0.0.0".into()
}

fn default_broadcast_addr() -> String {
    "255.255.255.255".into()
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            port: default_bus_port(),
            bind_addr: default_bind_addr(),
            broadcast_addr: default_broadcast_addr(),
        }
    }
}

/// Root settings document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub bus: BusSettings,

    /// Number of pixels on the local strip.
    #[serde(default = "default_num_leds")]
    pub num_leds: usize,

    /// Directory standing in for the device's data partition.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node: NodeSettings::default(),
            bus: BusSettings::default(),
            num_leds: default_num_leds(),
            data_dir: default_data_dir(),
        }
    }
}

impl Settings {
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::ParseJson {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Node state persisted at [`CONFIG_PATH`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default)]
    pub group: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_preset: Option<String>,
}

impl DeviceState {
    /// Load the persisted state; absent or corrupt files fall back to
    /// defaults.
    pub fn load(storage: &dyn Storage) -> Self {
        match storage.read(CONFIG_PATH) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "corrupt device state, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, storage: &dyn Storage) {
        match serde_json::to_vec(self) {
            Ok(bytes) => {
                if let Err(e) = storage.write(CONFIG_PATH, &bytes) {
                    warn!(error = %e, "failed to persist device state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize device state"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PhaseState {
    phase: f32,
}

/// Load the persisted device phase, defaulting to 0.
pub fn load_phase(storage: &dyn Storage) -> f32 {
    storage
        .read(PHASE_PATH)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<PhaseState>(&bytes).ok())
        .map(|state| state.phase.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

/// Persist the device phase.
pub fn save_phase(storage: &dyn Storage, phase: f32) {
    match serde_json::to_vec(&PhaseState { phase }) {
        Ok(bytes) => {
            if let Err(e) = storage.write(PHASE_PATH, &bytes) {
                warn!(error = %e, "failed to persist phase");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize phase"),
    }
}
