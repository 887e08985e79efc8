//! Configuration module for the touch rig
//!
//! This module handles rig configuration including:
//! - Sensor controller link settings (USB ids, exchange timeout, page size)
//! - Motion controller link settings (serial port, machine envelope, timeouts)
//! - Session settings (touch height, lift distance, probe finger offset)
//! - Per-test parameter blocks and pass/fail thresholds (see [`settings`])
//!
//! # App Data Location
//!
//! The default configuration and result files live in the platform data
//! directory under `dev.hxyulin.touch-rig`:
//! - **Linux**: `~/.local/share/dev.hxyulin.touch-rig/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.touch-rig/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.touch-rig\`
//!
//! # Example
//!
//! ```ignore
//! use touch_rig::config::RigConfig;
//!
//! let mut config = RigConfig::load_or_default(RigConfig::default_path()?);
//! config.session.z_start = 42.5;
//! config.save("rig.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{RigError, Result};
use crate::types::Point;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.touch-rig";

/// Default configuration filename
pub const CONFIG_FILE: &str = "rig.toml";

/// Directory (under the app data dir) where run results are written
pub const RESULTS_DIR: &str = "results";

/// Vendor id of the maXTouch USB bridge
pub const DEFAULT_SENSOR_VID: u16 = 0x03EB;

/// Product id of the maXTouch USB bridge
pub const DEFAULT_SENSOR_PID: u16 = 0x6123;

/// HID report id used for object protocol frames
pub const DEFAULT_SENSOR_REPORT_ID: u8 = 0x06;

/// Default timeout for one sensor exchange in milliseconds
pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 2000;

/// Diagnostic page size in bytes
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// Page seek attempts before giving up on a diagnostic read
pub const DEFAULT_PAGE_SEEK_ATTEMPTS: u32 = 32;

/// Fisnar F4300N serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default motion arrival timeout in milliseconds
pub const DEFAULT_MOVE_TIMEOUT_MS: u64 = 15_000;

/// Default home arrival timeout in milliseconds
pub const DEFAULT_HOME_TIMEOUT_MS: u64 = 12_000;

/// Lift between the touch height and the hover height, in millimeters
pub const DEFAULT_Z_LIFT: f64 = 30.0;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        RigError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            RigError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the directory run results are written to, creating it if needed
pub fn results_dir() -> Result<PathBuf> {
    let dir = ensure_app_data_dir()?.join(RESULTS_DIR);
    std::fs::create_dir_all(&dir)
        .map_err(|e| RigError::Config(format!("Failed to create results directory: {}", e)))?;
    Ok(dir)
}

// ==================== Sensor ====================

/// Node counts of the sensor grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub x: u16,
    pub y: u16,
}

impl NodeCounts {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// Sensor controller link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// USB vendor id of the controller bridge
    pub vendor_id: u16,

    /// USB product id of the controller bridge
    pub product_id: u16,

    /// HID report id prepended to every outbound frame
    pub report_id: u8,

    /// Timeout for reading one response frame
    pub exchange_timeout_ms: u64,

    /// Diagnostic page size in bytes
    pub page_size: usize,

    /// Page up/down commands tried before a diagnostic read fails
    pub max_page_seek_attempts: u32,

    /// Physically wired nodes; replaces the controller's reported matrix
    /// size for neighborhood clamping when set
    pub node_counts: Option<NodeCounts>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_SENSOR_VID,
            product_id: DEFAULT_SENSOR_PID,
            report_id: DEFAULT_SENSOR_REPORT_ID,
            exchange_timeout_ms: DEFAULT_EXCHANGE_TIMEOUT_MS,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_seek_attempts: DEFAULT_PAGE_SEEK_ATTEMPTS,
            node_counts: None,
        }
    }
}

impl SensorConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

// ==================== Motion ====================

/// Absolute travel limits of the machine, in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineLimits {
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl Default for MachineLimits {
    /// Fisnar F4300N envelope
    fn default() -> Self {
        Self {
            max_x: 300.0,
            max_y: 300.0,
            max_z: 100.0,
        }
    }
}

/// Motion controller link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Serial port name; the first available port is used when empty
    pub port: String,

    /// Serial baud rate
    pub baud_rate: u32,

    /// Timeout for one line read from the controller
    pub line_timeout_ms: u64,

    /// Machine travel envelope
    pub limits: MachineLimits,

    /// Each axis must be strictly within this distance of the goal
    pub arrival_tolerance_mm: f64,

    /// Arrival timeout for moves
    pub move_timeout_ms: u64,

    /// Arrival timeout for homing
    pub home_timeout_ms: u64,

    /// How long a relative move waits for a valid starting position
    pub position_read_timeout_ms: u64,

    /// Sleep between position polls while waiting for arrival
    pub poll_interval_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            line_timeout_ms: 1000,
            limits: MachineLimits::default(),
            arrival_tolerance_mm: 1.0,
            move_timeout_ms: DEFAULT_MOVE_TIMEOUT_MS,
            home_timeout_ms: DEFAULT_HOME_TIMEOUT_MS,
            position_read_timeout_ms: 10_000,
            poll_interval_ms: 10,
        }
    }
}

impl MotionConfig {
    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    pub fn home_timeout(&self) -> Duration {
        Duration::from_millis(self.home_timeout_ms)
    }

    pub fn position_read_timeout(&self) -> Duration {
        Duration::from_millis(self.position_read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ==================== Session ====================

/// Per-session probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Z height at which the probe finger touches the screen
    pub z_start: f64,

    /// Distance the finger lifts off the screen between touches
    pub z_lift: f64,

    /// Offset of the finger from the probe's zero point, applied to geometry
    pub finger_offset: Point,

    /// Probe speed while calibrating (mm/s)
    pub calibration_speed: f64,

    /// Empty queue polls tolerated per calibration corner
    pub calibration_attempts: u32,

    /// Probe speed left set after a run (mm/s)
    pub idle_speed: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            z_start: 50.0,
            z_lift: DEFAULT_Z_LIFT,
            finger_offset: Point::default(),
            calibration_speed: 250.0,
            calibration_attempts: 12,
            idle_speed: 50.0,
        }
    }
}

impl SessionConfig {
    /// Height the finger hovers at between touches
    pub fn hover_z(&self) -> f64 {
        self.z_start - self.z_lift
    }
}

// ==================== Rig Config ====================

/// Complete rig configuration, stored as TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigConfig {
    #[serde(default)]
    pub sensor: SensorConfig,

    #[serde(default)]
    pub motion: MotionConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub accuracy: AccuracySettings,

    #[serde(default)]
    pub jitter: JitterSettings,

    #[serde(default)]
    pub linearity: LinearitySettings,

    #[serde(default)]
    pub snr: SnrSettings,
}

impl RigConfig {
    /// Location of the default configuration file
    pub fn default_path() -> Result<PathBuf> {
        Ok(ensure_app_data_dir()?.join(CONFIG_FILE))
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RigError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            RigError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load rig config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RigError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| RigError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            RigError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values the rig cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sensor.page_size == 0 || self.sensor.page_size % 2 != 0 {
            return Err(RigError::Config(format!(
                "page_size must be a positive even number, got {}",
                self.sensor.page_size
            )));
        }
        if self.sensor.page_size > 3 * crate::sensor::DIAGNOSTIC_CHUNK - 2 {
            return Err(RigError::Config(format!(
                "page_size {} does not fit in three diagnostic reads",
                self.sensor.page_size
            )));
        }
        if self.session.z_lift < 0.0 {
            return Err(RigError::Config("z_lift must not be negative".to_string()));
        }
        if self.motion.arrival_tolerance_mm <= 0.0 {
            return Err(RigError::Config(
                "arrival_tolerance_mm must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
