//! Core data types for the touch rig
//!
//! This module contains the value types shared between the sensor, motion,
//! calibration and measurement layers.
//!
//! # Main Types
//!
//! - [`Point`] - A 2D coordinate in millimeters (probe-space or screen-space)
//! - [`Position`] - A 3-axis probe position as reported by the motion controller
//! - [`Line`] - A directed segment with its length derived on construction
//! - [`NodeAddress`] / [`PageLocation`] - Where a sensor node's delta lives
//! - [`ScreenPoint`] / [`TouchSample`] - Decoded touch reports in raw screen units
//! - [`CalibrationResult`] - The axis mapping between probe and screen frames
//!
//! # Coordinate Frames
//!
//! Points coming from the geometry provider are already in millimeters and
//! offset into probe space. Touch reports arrive in raw controller units and
//! are converted to screen-space millimeters by the calibration layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==================== Points and Lines ====================

/// A 2D coordinate in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// A probe position on all three machine axes, in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Reported when the controller's position answer is absent or malformed
    pub const UNKNOWN: Position = Position {
        x: -1.0,
        y: -1.0,
        z: -1.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// A position over a probe-space point at height `z`
    pub const fn at(point: Point, z: f64) -> Self {
        Self {
            x: point.x,
            y: point.y,
            z,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Self::UNKNOWN
    }

    pub fn xy(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

#[derive(Deserialize)]
struct LineEndpoints {
    start: Point,
    end: Point,
}

impl From<LineEndpoints> for Line {
    fn from(ends: LineEndpoints) -> Self {
        Line::new(ends.start, ends.end)
    }
}

/// A directed segment between two points
///
/// The length is computed once on construction and stays consistent with
/// the endpoints because they cannot be mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "LineEndpoints")]
pub struct Line {
    start: Point,
    end: Point,
    length: f64,
}

impl Line {
    pub fn new(start: Point, end: Point) -> Self {
        Self {
            start,
            end,
            length: start.distance_to(&end),
        }
    }

    pub fn start(&self) -> Point {
        self.start
    }

    pub fn end(&self) -> Point {
        self.end
    }

    pub fn length(&self) -> f64 {
        self.length
    }
}

// ==================== Sensor Addressing ====================

/// A sensor grid coordinate (X node, Y node)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub x: u16,
    pub y: u16,
}

impl NodeAddress {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{}Y{}", self.x, self.y)
    }
}

/// Where a node's two raw bytes live in diagnostic memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageLocation {
    pub page: u8,
    /// Byte offset within the page
    pub offset: usize,
}

/// One diagnostic reading, decoded from two bytes of two's complement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeDelta(pub i16);

impl NodeDelta {
    pub fn value(&self) -> i16 {
        self.0
    }
}

// ==================== Touch Reports ====================

/// A coordinate in raw controller units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: u16,
    pub y: u16,
}

impl ScreenPoint {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// The controller reports (0, 0) when a coordinate did not change
    pub fn is_unchanged_marker(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

/// Event code carried in the low nibble of a touch status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TouchEvent {
    #[default]
    NoEvent,
    Move,
    Unsup,
    Sup,
    Down,
    Up,
    UnsupSup,
    UnsupUp,
    DownSup,
    DownUp,
    /// Codes the controller documents as reserved
    Reserved(u8),
}

impl TouchEvent {
    /// Decode the event from a touch status byte
    pub fn from_status(status: u8) -> Self {
        match status & 0x0F {
            0 => TouchEvent::NoEvent,
            1 => TouchEvent::Move,
            2 => TouchEvent::Unsup,
            3 => TouchEvent::Sup,
            4 => TouchEvent::Down,
            5 => TouchEvent::Up,
            6 => TouchEvent::UnsupSup,
            7 => TouchEvent::UnsupUp,
            8 => TouchEvent::DownSup,
            9 => TouchEvent::DownUp,
            other => TouchEvent::Reserved(other),
        }
    }

    /// The 4-bit code as sent on the wire
    pub fn code(&self) -> u8 {
        match self {
            TouchEvent::NoEvent => 0,
            TouchEvent::Move => 1,
            TouchEvent::Unsup => 2,
            TouchEvent::Sup => 3,
            TouchEvent::Down => 4,
            TouchEvent::Up => 5,
            TouchEvent::UnsupSup => 6,
            TouchEvent::UnsupUp => 7,
            TouchEvent::DownSup => 8,
            TouchEvent::DownUp => 9,
            TouchEvent::Reserved(code) => *code & 0x0F,
        }
    }
}

/// One decoded touch report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchSample {
    pub position: ScreenPoint,
    pub event: TouchEvent,
}

/// One point gathered while the probe was moving, in screen-space millimeters
pub type TraceSample = Point;

// ==================== Calibration ====================

/// How the probe's axes relate to the sensor's axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Active-area corner (probe space) that the screen reports as its origin
    pub origin_corner: Point,
    /// Screen X runs along probe Y
    pub axes_swapped: bool,
    /// Screen X grows in the direction probe coordinates shrink
    pub x_flip: bool,
    /// Screen Y grows in the direction probe coordinates shrink
    pub y_flip: bool,
}

// ==================== Test Selection ====================

/// The kinds of test the orchestrator can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Accuracy,
    Jitter,
    Linearity,
    Snr,
}

impl TestKind {
    pub const ALL: [TestKind; 4] = [
        TestKind::Accuracy,
        TestKind::Jitter,
        TestKind::Linearity,
        TestKind::Snr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TestKind::Accuracy => "accuracy",
            TestKind::Jitter => "jitter",
            TestKind::Linearity => "linearity",
            TestKind::Snr => "snr",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accuracy" => Ok(TestKind::Accuracy),
            "jitter" => Ok(TestKind::Jitter),
            "linearity" => Ok(TestKind::Linearity),
            "snr" | "signal-to-noise" => Ok(TestKind::Snr),
            other => Err(format!("unknown test kind '{}'", other)),
        }
    }
}

/// Interior vs. boundary point/line sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestCategory {
    Core,
    Edge,
}

impl TestCategory {
    pub const ALL: [TestCategory; 2] = [TestCategory::Core, TestCategory::Edge];
}
