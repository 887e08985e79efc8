//! Probe motion control
//!
//! The probe is a three-axis dispensing robot driven over a serial line.
//! [`MotionDriver`] is the interface the rest of the rig uses; [`Fisnar`]
//! implements it for the Fisnar F4300N command set.
//!
//! Every move blocks until the probe is observed within tolerance of its
//! goal. There is no push notification from the hardware, so arrival is
//! detected by polling the position report.

pub mod fisnar;
pub mod port;
#[cfg(feature = "mock-rig")]
pub mod simulator;

pub use fisnar::Fisnar;
pub use port::{available_ports, LinePort, PortInfo, SerialLinePort};
#[cfg(feature = "mock-rig")]
pub use simulator::{FisnarHandle, SimulatedFisnar};

use crate::config::MachineLimits;
use crate::error::Result;
use crate::types::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection and activity state of a motion controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionState {
    /// The transport failed; nothing sent since then is trusted
    Disconnected,
    Idle,
    /// Only observable from inside the arrival polling loop
    Moving,
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionState::Disconnected => write!(f, "disconnected"),
            MotionState::Idle => write!(f, "idle"),
            MotionState::Moving => write!(f, "moving"),
        }
    }
}

/// How a target is interpreted and traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveMode {
    /// Target is a displacement from the current position
    pub relative: bool,
    /// Straight-line interpolated path rather than point-to-point
    pub continuous: bool,
}

impl MoveMode {
    pub const LINEAR: MoveMode = MoveMode {
        relative: false,
        continuous: true,
    };
    pub const LINEAR_RELATIVE: MoveMode = MoveMode {
        relative: true,
        continuous: true,
    };
    pub const POINT_TO_POINT: MoveMode = MoveMode {
        relative: false,
        continuous: false,
    };
    pub const POINT_TO_POINT_RELATIVE: MoveMode = MoveMode {
        relative: true,
        continuous: false,
    };
}

impl Default for MoveMode {
    fn default() -> Self {
        MoveMode::LINEAR
    }
}

/// Probe motion interface
///
/// Implementations must be `Send` so the trace sampler can drive a move on
/// its own thread while the sensor is polled on another.
#[cfg_attr(test, mockall::automock)]
pub trait MotionDriver: Send {
    /// Current connection and activity state
    fn state(&self) -> MotionState;

    /// Travel envelope targets are clamped to
    fn limits(&self) -> MachineLimits;

    /// Move to `target` and wait for arrival
    ///
    /// Returns `Ok(false)` when the command could not be sent. Arrival
    /// timeouts and an unreadable starting position for relative moves are
    /// errors.
    fn move_to(&mut self, target: Position, mode: MoveMode) -> Result<bool>;

    /// Move to the machine origin and wait for arrival
    fn home(&mut self) -> Result<bool>;

    /// Set the point-to-point speed in mm/s; does not wait
    fn set_speed(&mut self, mm_per_sec: f64) -> Result<()>;

    /// Query the position report
    ///
    /// Returns [`Position::UNKNOWN`] when the report is absent or malformed.
    fn current_position(&mut self) -> Result<Position>;

    /// Poll until every axis is within tolerance of `goal`
    ///
    /// Goals outside the machine envelope count as arrived without polling.
    fn await_arrival(&mut self, goal: Position, timeout: Duration) -> Result<bool>;
}

/// Whether `goal` lies inside the envelope on every axis
pub fn within_envelope(goal: Position, limits: MachineLimits) -> bool {
    (0.0..=limits.max_x).contains(&goal.x)
        && (0.0..=limits.max_y).contains(&goal.y)
        && (0.0..=limits.max_z).contains(&goal.z)
}

/// Whether every axis of `position` is strictly within `tolerance` of `goal`
pub fn has_arrived(position: Position, goal: Position, tolerance: f64) -> bool {
    (position.x - goal.x).abs() < tolerance
        && (position.y - goal.y).abs() < tolerance
        && (position.z - goal.z).abs() < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope() {
        let limits = MachineLimits::default();
        assert!(within_envelope(Position::new(0.0, 300.0, 100.0), limits));
        assert!(!within_envelope(Position::new(-0.1, 10.0, 10.0), limits));
        assert!(!within_envelope(Position::new(10.0, 10.0, 100.5), limits));
    }

    #[test]
    fn test_arrival_is_strict() {
        let goal = Position::new(10.0, 10.0, 10.0);
        assert!(has_arrived(Position::new(10.9, 9.1, 10.0), goal, 1.0));
        assert!(!has_arrived(Position::new(11.0, 10.0, 10.0), goal, 1.0));
        assert!(!has_arrived(Position::UNKNOWN, Position::new(0.0, 0.0, 0.0), 1.0));
    }
}
