//! Test geometry
//!
//! The geometry of a part under test: its active area, the points and lines
//! each test touches, and the two reference lines that locate the sensor's
//! node grid. Everything here is in probe-space millimeters with the probe
//! finger offset already applied; nothing downstream converts units again.

use crate::config::NodeCounts;
use crate::error::{Result, RigError};
use crate::types::{Line, NodeAddress, Point, TestCategory, TestKind};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Two values closer than this are "the same" when locating the nodal grid
const NODAL_ALIGNMENT_MM: f64 = 2.0;

/// Rounding slack when checking that corners form an axis-aligned rectangle
const CORNER_SLACK_MM: f64 = 1e-4;

/// Source of points and lines to probe
///
/// Coordinates are probe-space millimeters with the finger offset applied.
pub trait GeometryProvider {
    /// Points for a point-based test kind; empty for linearity
    fn points(&self, kind: TestKind, category: TestCategory) -> &[Point];

    /// Lines traced by the linearity test
    fn lines(&self, category: TestCategory) -> &[Line];

    fn active_area(&self) -> &ActiveArea;

    /// Record the corner the sensor reports as its origin
    fn set_origin(&mut self, origin: Point);

    /// Reference lines of the node grid, when the part defines them
    fn nodal_axes(&self) -> Option<&NodalAxes>;
}

// ==================== Active Area ====================

#[derive(Deserialize)]
struct ActiveAreaCorners {
    corners: Vec<Point>,
    #[serde(default)]
    origin: Option<Point>,
}

impl TryFrom<ActiveAreaCorners> for ActiveArea {
    type Error = RigError;

    fn try_from(raw: ActiveAreaCorners) -> Result<Self> {
        let mut area = ActiveArea::new(raw.corners)?;
        area.origin = raw.origin;
        Ok(area)
    }
}

/// The rectangular region the rig may touch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ActiveAreaCorners")]
pub struct ActiveArea {
    corners: Vec<Point>,
    origin: Option<Point>,
}

impl ActiveArea {
    /// Build from the four corners of an axis-aligned rectangle
    pub fn new(corners: Vec<Point>) -> Result<Self> {
        if corners.len() != 4 {
            return Err(RigError::Geometry(format!(
                "active area needs 4 corners, got {}",
                corners.len()
            )));
        }
        let area = Self {
            corners,
            origin: None,
        };
        let (min, max) = area.bounds();
        if max.x - min.x <= CORNER_SLACK_MM || max.y - min.y <= CORNER_SLACK_MM {
            return Err(RigError::Geometry("active area has no extent".into()));
        }
        let on_edge = |v: f64, lo: f64, hi: f64| {
            (v - lo).abs() < CORNER_SLACK_MM || (v - hi).abs() < CORNER_SLACK_MM
        };
        if !area
            .corners
            .iter()
            .all(|c| on_edge(c.x, min.x, max.x) && on_edge(c.y, min.y, max.y))
        {
            return Err(RigError::Geometry(
                "active area corners are not an axis-aligned rectangle".into(),
            ));
        }
        Ok(area)
    }

    /// Rectangle spanning `min` to `max`
    pub fn from_bounds(min: Point, max: Point) -> Result<Self> {
        Self::new(vec![
            min,
            Point::new(max.x, min.y),
            max,
            Point::new(min.x, max.y),
        ])
    }

    pub fn corners(&self) -> &[Point] {
        &self.corners
    }

    /// Lowest and highest corner coordinates
    pub fn bounds(&self) -> (Point, Point) {
        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in &self.corners {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        (min, max)
    }

    /// Extent along probe X
    pub fn width(&self) -> f64 {
        let (min, max) = self.bounds();
        max.x - min.x
    }

    /// Extent along probe Y
    pub fn height(&self) -> f64 {
        let (min, max) = self.bounds();
        max.y - min.y
    }

    /// The corner nearest the probe's home position
    pub fn closest_corner_to_origin(&self) -> Point {
        let home = Point::default();
        self.corners
            .iter()
            .copied()
            .min_by(|a, b| a.distance_to(&home).total_cmp(&b.distance_to(&home)))
            .unwrap_or(home)
    }

    /// Corner the sensor reports as (0, 0), once calibrated
    pub fn origin(&self) -> Option<Point> {
        self.origin
    }

    pub fn set_origin(&mut self, origin: Point) {
        self.origin = Some(origin);
    }

    fn shifted(&self, offset: Point) -> Self {
        Self {
            corners: self.corners.iter().map(|c| shift(*c, offset)).collect(),
            origin: self.origin.map(|o| shift(o, offset)),
        }
    }
}

fn shift(p: Point, offset: Point) -> Point {
    Point::new(p.x + offset.x, p.y + offset.y)
}

fn shift_line(line: &Line, offset: Point) -> Line {
    Line::new(shift(line.start(), offset), shift(line.end(), offset))
}

// ==================== Nodal Axes ====================

#[derive(Deserialize)]
struct NodalLines {
    x_line: Line,
    y_line: Line,
}

impl TryFrom<NodalLines> for NodalAxes {
    type Error = RigError;

    fn try_from(lines: NodalLines) -> Result<Self> {
        NodalAxes::new(lines.x_line, lines.y_line)
    }
}

/// Two lines along the first X and Y node rows, meeting at node (0, 0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NodalLines")]
pub struct NodalAxes {
    x_line: Line,
    y_line: Line,
    #[serde(skip)]
    origin: Point,
    #[serde(skip)]
    x_direction: Point,
}

impl NodalAxes {
    /// The lines must share exactly one endpoint, the nodal origin
    pub fn new(x_line: Line, y_line: Line) -> Result<Self> {
        let same = |a: Point, b: Point| a.distance_to(&b) < CORNER_SLACK_MM;
        let origin = [x_line.start(), x_line.end()]
            .into_iter()
            .find(|&xp| same(xp, y_line.start()) || same(xp, y_line.end()))
            .ok_or_else(|| RigError::Geometry("nodal lines do not share an endpoint".into()))?;
        let x_direction = if same(x_line.start(), origin) {
            x_line.end()
        } else {
            x_line.start()
        };
        Ok(Self {
            x_line,
            y_line,
            origin,
            x_direction,
        })
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    fn shifted(&self, offset: Point) -> Self {
        Self {
            x_line: shift_line(&self.x_line, offset),
            y_line: shift_line(&self.y_line, offset),
            origin: shift(self.origin, offset),
            x_direction: shift(self.x_direction, offset),
        }
    }

    /// Node nearest a probe-space point
    ///
    /// The node pitch is each reference line's length over its node count
    /// minus one.
    pub fn node_address_for(&self, point: Point, nodes: NodeCounts) -> Result<NodeAddress> {
        if nodes.x < 2 || nodes.y < 2 {
            return Err(RigError::Geometry(format!(
                "a {}x{} node grid has no pitch",
                nodes.x, nodes.y
            )));
        }
        let close = |a: f64, b: f64| (a - b).abs() < NODAL_ALIGNMENT_MM;
        let (o, px) = (self.origin, self.x_direction);

        let (x_dist, y_dist) = if close(o.y, px.y) && !close(o.x, px.x) {
            ((o.x - point.x).abs(), (o.y - point.y).abs())
        } else if close(o.x, px.x) && !close(o.y, px.y) {
            ((o.y - point.y).abs(), (o.x - point.x).abs())
        } else {
            return Err(RigError::Geometry(
                "nodal X line runs along neither probe axis".into(),
            ));
        };

        let x_pitch = self.x_line.length() / f64::from(nodes.x - 1);
        let y_pitch = self.y_line.length() / f64::from(nodes.y - 1);
        Ok(NodeAddress::new(
            (x_dist / x_pitch).round() as u16,
            (y_dist / y_pitch).round() as u16,
        ))
    }
}

// ==================== Static Geometry ====================

/// Core and edge sets of one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySet<T> {
    pub core: Vec<T>,
    pub edge: Vec<T>,
}

impl<T> Default for CategorySet<T> {
    fn default() -> Self {
        Self {
            core: Vec::new(),
            edge: Vec::new(),
        }
    }
}

impl<T> CategorySet<T> {
    pub fn get(&self, category: TestCategory) -> &[T] {
        match category {
            TestCategory::Core => &self.core,
            TestCategory::Edge => &self.edge,
        }
    }

    pub fn push(&mut self, category: TestCategory, item: T) {
        match category {
            TestCategory::Core => self.core.push(item),
            TestCategory::Edge => self.edge.push(item),
        }
    }

    /// Edge entries first, then core
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.edge.iter().chain(&self.core)
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.edge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Geometry read from a JSON file
///
/// ```json
/// {
///   "active_area": { "corners": [{"x": 20, "y": 20}, ...] },
///   "accuracy": { "core": [{"x": 50, "y": 50}], "edge": [] },
///   "linearity": { "core": [{"start": {"x": 30, "y": 40}, "end": {"x": 90, "y": 40}}] },
///   "nodal_axes": { "x_line": {...}, "y_line": {...} }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticGeometry {
    pub active_area: ActiveArea,
    #[serde(default)]
    pub accuracy: CategorySet<Point>,
    #[serde(default)]
    pub jitter: CategorySet<Point>,
    #[serde(default)]
    pub snr: CategorySet<Point>,
    #[serde(default)]
    pub linearity: CategorySet<Line>,
    #[serde(default)]
    pub nodal_axes: Option<NodalAxes>,
}

impl StaticGeometry {
    /// Geometry with only an active area
    pub fn new(active_area: ActiveArea) -> Self {
        Self {
            active_area,
            accuracy: CategorySet::default(),
            jitter: CategorySet::default(),
            snr: CategorySet::default(),
            linearity: CategorySet::default(),
            nodal_axes: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RigError::Geometry(format!("Invalid geometry: {}", e)))
    }

    /// Load a geometry file and apply the probe finger offset
    pub fn load(path: impl AsRef<Path>, finger_offset: Point) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RigError::Io(e).with_context(format!("Failed to read geometry {}", path.display()))
        })?;
        let geometry = Self::from_json(&text)?.with_finger_offset(finger_offset);
        tracing::info!(
            "Loaded geometry {}: {} accuracy, {} jitter, {} SNR points, {} lines",
            path.display(),
            geometry.accuracy.len(),
            geometry.jitter.len(),
            geometry.snr.len(),
            geometry.linearity.len()
        );
        Ok(geometry)
    }

    /// Shift every coordinate by the finger's offset from the probe zero
    pub fn with_finger_offset(self, offset: Point) -> Self {
        let shift_points = |set: CategorySet<Point>| CategorySet {
            core: set.core.into_iter().map(|p| shift(p, offset)).collect(),
            edge: set.edge.into_iter().map(|p| shift(p, offset)).collect(),
        };
        Self {
            active_area: self.active_area.shifted(offset),
            accuracy: shift_points(self.accuracy),
            jitter: shift_points(self.jitter),
            snr: shift_points(self.snr),
            linearity: CategorySet {
                core: self.linearity.core.iter().map(|l| shift_line(l, offset)).collect(),
                edge: self.linearity.edge.iter().map(|l| shift_line(l, offset)).collect(),
            },
            nodal_axes: self.nodal_axes.map(|axes| axes.shifted(offset)),
        }
    }
}

impl GeometryProvider for StaticGeometry {
    fn points(&self, kind: TestKind, category: TestCategory) -> &[Point] {
        match kind {
            TestKind::Accuracy => self.accuracy.get(category),
            TestKind::Jitter => self.jitter.get(category),
            TestKind::Snr => self.snr.get(category),
            TestKind::Linearity => &[],
        }
    }

    fn lines(&self, category: TestCategory) -> &[Line] {
        self.linearity.get(category)
    }

    fn active_area(&self) -> &ActiveArea {
        &self.active_area
    }

    fn set_origin(&mut self, origin: Point) {
        self.active_area.set_origin(origin);
    }

    fn nodal_axes(&self) -> Option<&NodalAxes> {
        self.nodal_axes.as_ref()
    }
}
