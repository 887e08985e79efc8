//! Per-test parameter blocks
//!
//! Each test kind carries its repetition count, touch timing, probe speed and
//! the pass/fail thresholds used when results are summarized.
//!
//! # Main Types
//!
//! - [`AccuracySettings`] - Touch count and timing for accuracy points
//! - [`JitterSettings`] - Hold duration and touch count for jitter points
//! - [`LinearitySettings`] - Path velocity and outlier ceiling for line traces
//! - [`SnrSettings`] - Sample counts and neighborhood size for SNR points
//! - [`Thresholds`] - Core/edge pass limits

use crate::types::TestCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default probe speed for touch tests (mm/s)
pub const DEFAULT_TEST_SPEED: f64 = 200.0;

/// Core and edge pass/fail limits for one test kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub core: f64,
    pub edge: f64,
}

impl Thresholds {
    pub const fn new(core: f64, edge: f64) -> Self {
        Self { core, edge }
    }

    pub fn for_category(&self, category: TestCategory) -> f64 {
        match category {
            TestCategory::Core => self.core,
            TestCategory::Edge => self.edge,
        }
    }
}

/// Size of the node grid read around an SNR point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Neighborhood {
    /// 3x3 nodes
    #[default]
    Coarse,
    /// 5x5 nodes
    Fine,
}

impl Neighborhood {
    pub fn radius(&self) -> u16 {
        match self {
            Neighborhood::Coarse => 1,
            Neighborhood::Fine => 2,
        }
    }

    pub fn node_count(&self) -> usize {
        let side = 2 * self.radius() as usize + 1;
        side * side
    }
}

// ==================== Accuracy ====================

/// Accuracy test parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracySettings {
    /// Full passes over the accuracy point sets
    pub iterations: u32,

    /// Touches per point
    pub touches: u32,

    /// How long the finger stays down per touch
    pub touch_duration_ms: u64,

    /// Pause between consecutive touches at one point
    pub between_touches_ms: u64,

    /// Finger diameter, recorded with the results
    pub probe_size_mm: f64,

    /// Probe speed (mm/s)
    pub speed: f64,

    /// Largest error that still passes (mm)
    pub thresholds: Thresholds,
}

impl Default for AccuracySettings {
    fn default() -> Self {
        Self {
            iterations: 1,
            touches: 3,
            touch_duration_ms: 500,
            between_touches_ms: 500,
            probe_size_mm: 7.0,
            speed: DEFAULT_TEST_SPEED,
            thresholds: Thresholds::new(1.0, 1.5),
        }
    }
}

impl AccuracySettings {
    pub fn touch_duration(&self) -> Duration {
        Duration::from_millis(self.touch_duration_ms)
    }

    pub fn between_touches(&self) -> Duration {
        Duration::from_millis(self.between_touches_ms)
    }
}

// ==================== Jitter ====================

/// Jitter test parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterSettings {
    pub iterations: u32,

    /// Touches per point
    pub touches: u32,

    /// How long each touch is held while sampling continuously
    pub hold_duration_ms: u64,

    pub between_touches_ms: u64,

    pub probe_size_mm: f64,

    pub speed: f64,

    /// Largest spread on either axis that still passes (mm)
    pub thresholds: Thresholds,
}

impl Default for JitterSettings {
    fn default() -> Self {
        Self {
            iterations: 1,
            touches: 2,
            hold_duration_ms: 500,
            between_touches_ms: 250,
            probe_size_mm: 7.0,
            speed: DEFAULT_TEST_SPEED,
            thresholds: Thresholds::new(0.5, 0.75),
        }
    }
}

impl JitterSettings {
    pub fn hold_duration(&self) -> Duration {
        Duration::from_millis(self.hold_duration_ms)
    }

    pub fn between_touches(&self) -> Duration {
        Duration::from_millis(self.between_touches_ms)
    }
}

// ==================== Linearity ====================

/// Linearity test parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearitySettings {
    pub iterations: u32,

    /// Probe speed while tracing a line (mm/s)
    pub path_velocity: f64,

    /// Probe speed while approaching a line's start (mm/s)
    pub approach_speed: f64,

    /// Pause between lines
    pub between_lines_ms: u64,

    pub probe_size_mm: f64,

    /// Distances above this are discarded as outliers (mm)
    pub outlier_ceiling_mm: f64,

    /// Largest deviation that still passes (mm)
    pub thresholds: Thresholds,
}

impl Default for LinearitySettings {
    fn default() -> Self {
        Self {
            iterations: 1,
            path_velocity: 10.0,
            approach_speed: DEFAULT_TEST_SPEED,
            between_lines_ms: 250,
            probe_size_mm: 7.0,
            outlier_ceiling_mm: 50.0,
            thresholds: Thresholds::new(1.0, 1.5),
        }
    }
}

impl LinearitySettings {
    pub fn between_lines(&self) -> Duration {
        Duration::from_millis(self.between_lines_ms)
    }
}

// ==================== SNR ====================

/// Signal-to-noise test parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnrSettings {
    pub iterations: u32,

    /// Diagnostic reads with the finger lifted
    pub noise_samples: u32,

    /// Diagnostic reads with the finger down
    pub signal_samples: u32,

    /// Sleep between diagnostic read passes
    pub between_samples_ms: u64,

    pub probe_size_mm: f64,

    pub speed: f64,

    /// Default neighborhood read around each point
    pub neighborhood: Neighborhood,

    /// Smallest best-node SNR that still passes
    pub thresholds: Thresholds,
}

impl Default for SnrSettings {
    fn default() -> Self {
        Self {
            iterations: 1,
            noise_samples: 16,
            signal_samples: 16,
            between_samples_ms: 10,
            probe_size_mm: 7.0,
            speed: DEFAULT_TEST_SPEED,
            neighborhood: Neighborhood::Coarse,
            thresholds: Thresholds::new(20.0, 15.0),
        }
    }
}

impl SnrSettings {
    pub fn between_samples(&self) -> Duration {
        Duration::from_millis(self.between_samples_ms)
    }
}
