//! Probe-to-screen calibration
//!
//! The probe and the sensor each have their own coordinate frame, and the
//! two can be rotated by 90 degrees, mirrored, or both. Calibration touches
//! near each active-area corner once, reads where the sensor saw each touch,
//! and works out which probe corner is the screen origin and how the axes
//! map onto each other.
//!
//! The result is a [`CoordinateTransform`] used by every test afterwards:
//! probe points go through [`CoordinateTransform::robot_to_screen`] and touch
//! reports through [`CoordinateTransform::screen_to_mm`], so both sides of
//! every comparison end up in screen-space millimeters.

use crate::config::SessionConfig;
use crate::error::{Result, ResultExt, RigError};
use crate::geometry::{ActiveArea, GeometryProvider};
use crate::measurement::round_to_hundredths;
use crate::motion::{MotionDriver, MoveMode};
use crate::sensor::TouchSensor;
use crate::types::{CalibrationResult, Point, Position, ScreenPoint};
use serde::{Deserialize, Serialize};

/// Fraction of the area's width/height each corner touch is inset by
const CORNER_INSET: f64 = 0.25;

/// Corners within this distance of the upper bound are inset downwards
const UPPER_EDGE_SLACK_MM: f64 = 1.0;

/// Slack when comparing screen points for the origin corner
const ORIGIN_SLACK_UNITS: f64 = 50.0;

/// Two corner touches within this many screen units share an axis
const SCREEN_AXIS_TOLERANCE: f64 = 100.0;

/// Two probe corners within this many millimeters share an axis
const PROBE_AXIS_TOLERANCE_MM: f64 = 5.0;

// ==================== Transform ====================

/// Screen unit to millimeter conversion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenScale {
    /// Controller coordinate range along screen X and Y
    pub range: (u16, u16),
    /// Physical extent of screen X and Y in millimeters
    pub extent_mm: (f64, f64),
}

impl ScreenScale {
    /// Scale for an area, whose width runs along screen Y when swapped
    pub fn new(range: (u16, u16), area: &ActiveArea, axes_swapped: bool) -> Self {
        let extent_mm = if axes_swapped {
            (area.height(), area.width())
        } else {
            (area.width(), area.height())
        };
        Self { range, extent_mm }
    }

    pub fn to_mm(&self, point: ScreenPoint) -> Point {
        Point::new(
            round_to_hundredths(f64::from(point.x) / f64::from(self.range.0) * self.extent_mm.0),
            round_to_hundredths(f64::from(point.y) / f64::from(self.range.1) * self.extent_mm.1),
        )
    }
}

/// Calibrated mapping between probe space and screen space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateTransform {
    pub calibration: CalibrationResult,
    pub scale: ScreenScale,
}

impl CoordinateTransform {
    pub fn new(calibration: CalibrationResult, scale: ScreenScale) -> Self {
        Self { calibration, scale }
    }

    /// Probe-space millimeters to screen-space millimeters
    pub fn robot_to_screen(&self, point: Point) -> Point {
        let c = &self.calibration;
        let o = c.origin_corner;
        let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
        let (along_x, along_y) = if c.axes_swapped {
            (point.y - o.y, point.x - o.x)
        } else {
            (point.x - o.x, point.y - o.y)
        };
        Point::new(sign(c.x_flip) * along_x, sign(c.y_flip) * along_y)
    }

    /// Raw controller units to screen-space millimeters
    pub fn screen_to_mm(&self, point: ScreenPoint) -> Point {
        self.scale.to_mm(point)
    }
}

// ==================== Axis Identification ====================

/// Corner touches sorted into origin and positive-axis corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerRoles {
    pub origin: Point,
    pub positive_x: Point,
    pub positive_y: Point,
}

/// Pick the origin and positive-axis corners from `(probe corner, screen
/// point)` pairs
pub fn identify_corners(touches: &[(Point, ScreenPoint)]) -> Result<CornerRoles> {
    let screen = |s: ScreenPoint| Point::new(f64::from(s.x), f64::from(s.y));

    let mut origin: Option<(Point, Point)> = None;
    let mut lowest = Point::new(9999.0, 9999.0);
    for &(corner, touch) in touches {
        let pt = screen(touch);
        if pt.x - ORIGIN_SLACK_UNITS < lowest.x && pt.y - ORIGIN_SLACK_UNITS < lowest.y {
            lowest = pt;
            origin = Some((corner, pt));
        }
    }
    let (origin_corner, origin_screen) =
        origin.ok_or_else(|| RigError::InvalidAxes("no corner touch reads as the origin".into()))?;

    let near = |a: f64, b: f64| (a - b).abs() < SCREEN_AXIS_TOLERANCE;
    let mut positive_x = Vec::new();
    let mut positive_y = Vec::new();
    for &(corner, touch) in touches {
        let pt = screen(touch);
        if near(pt.y, origin_screen.y) && !near(pt.x, origin_screen.x) {
            positive_x.push(corner);
        }
        if near(pt.x, origin_screen.x) && !near(pt.y, origin_screen.y) {
            positive_y.push(corner);
        }
    }

    match (positive_x.as_slice(), positive_y.as_slice()) {
        ([x], [y]) if x != y => Ok(CornerRoles {
            origin: origin_corner,
            positive_x: *x,
            positive_y: *y,
        }),
        (xs, ys) => Err(RigError::InvalidAxes(format!(
            "{} corners read as positive X and {} as positive Y, expected one distinct corner each",
            xs.len(),
            ys.len()
        ))),
    }
}

/// Work out swap and flip flags from the three identified probe corners
pub fn figure_axes(roles: &CornerRoles) -> Result<CalibrationResult> {
    let near = |a: f64, b: f64| (a - b).abs() < PROBE_AXIS_TOLERANCE_MM;
    let CornerRoles {
        origin: o,
        positive_x: px,
        positive_y: py,
    } = *roles;

    let (axes_swapped, x_flip, y_flip) = if near(px.y, o.y) && near(py.x, o.x) {
        (false, px.x < o.x, py.y < o.y)
    } else if near(px.x, o.x) && near(py.y, o.y) {
        (true, px.y < o.y, py.x < o.x)
    } else {
        return Err(RigError::InvalidAxes(format!(
            "positive corners {} and {} do not lie on probe axes through {}",
            px, py, o
        )));
    };

    Ok(CalibrationResult {
        origin_corner: o,
        axes_swapped,
        x_flip,
        y_flip,
    })
}

/// Point inset from `corner` towards the middle of the area
fn inset_corner(corner: Point, area: &ActiveArea) -> Point {
    let (_, max) = area.bounds();
    let dx = CORNER_INSET * area.width();
    let dy = CORNER_INSET * area.height();
    Point::new(
        if (max.x - corner.x).abs() < UPPER_EDGE_SLACK_MM {
            corner.x - dx
        } else {
            corner.x + dx
        },
        if (max.y - corner.y).abs() < UPPER_EDGE_SLACK_MM {
            corner.y - dy
        } else {
            corner.y + dy
        },
    )
}

// ==================== Engine ====================

/// Runs the corner-touch calibration sequence
pub struct CalibrationEngine<'a> {
    motion: &'a mut dyn MotionDriver,
    sensor: &'a mut dyn TouchSensor,
    session: &'a SessionConfig,
}

impl<'a> CalibrationEngine<'a> {
    pub fn new(
        motion: &'a mut dyn MotionDriver,
        sensor: &'a mut dyn TouchSensor,
        session: &'a SessionConfig,
    ) -> Self {
        Self {
            motion,
            sensor,
            session,
        }
    }

    fn move_or_fail(&mut self, target: Position) -> Result<()> {
        if self.motion.move_to(target, MoveMode::LINEAR)? {
            Ok(())
        } else {
            Err(RigError::Transport(format!(
                "move to {} could not be sent",
                target
            )))
        }
    }

    /// Touch near `corner` and report where the sensor saw it
    fn touch_corner(&mut self, corner: Point, area: &ActiveArea) -> Result<ScreenPoint> {
        let target = inset_corner(corner, area);
        let hover = Position::at(target, self.session.hover_z());
        let press = Position::at(target, self.session.z_start);

        self.sensor.drain_queue()?;
        self.move_or_fail(hover)?;
        self.move_or_fail(press)?;
        self.move_or_fail(hover)?;
        self.move_or_fail(press)?;
        let touch = self
            .sensor
            .await_single_touch(self.session.calibration_attempts);
        self.move_or_fail(hover)?;

        let touch = touch?;
        tracing::debug!(
            "Corner {} touched at {}, sensor saw ({}, {})",
            corner,
            target,
            touch.x,
            touch.y
        );
        Ok(touch)
    }

    /// Calibrate against `geometry`'s active area
    ///
    /// Records the origin corner on the geometry and homes the probe.
    pub fn calibrate(&mut self, geometry: &mut dyn GeometryProvider) -> Result<CoordinateTransform> {
        let area = geometry.active_area().clone();
        tracing::info!(
            "Calibrating on a {:.1} x {:.1} mm active area",
            area.width(),
            area.height()
        );

        self.motion.set_speed(self.session.calibration_speed)?;
        let range = self.sensor.touch_range().context("Reading touch range")?;

        let mut touches = Vec::with_capacity(area.corners().len());
        for &corner in area.corners() {
            let touch = self
                .touch_corner(corner, &area)
                .with_context(|| format!("Calibration touch near {}", corner))?;
            touches.push((corner, touch));
        }

        let roles = identify_corners(&touches)?;
        let calibration = figure_axes(&roles)?;
        tracing::info!(
            "Screen origin at probe {}, swapped: {}, x flip: {}, y flip: {}",
            calibration.origin_corner,
            calibration.axes_swapped,
            calibration.x_flip,
            calibration.y_flip
        );

        geometry.set_origin(calibration.origin_corner);
        if !self.motion.home()? {
            return Err(RigError::Transport("home after calibration could not be sent".into()));
        }

        Ok(CoordinateTransform::new(
            calibration,
            ScreenScale::new(range, &area, calibration.axes_swapped),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area() -> ActiveArea {
        ActiveArea::from_bounds(Point::new(20.0, 20.0), Point::new(120.0, 80.0)).unwrap()
    }

    fn corners() -> [Point; 4] {
        [
            Point::new(20.0, 20.0),
            Point::new(120.0, 20.0),
            Point::new(120.0, 80.0),
            Point::new(20.0, 80.0),
        ]
    }

    #[test]
    fn test_inset_points_inward() {
        let area = area();
        assert_eq!(inset_corner(Point::new(20.0, 20.0), &area), Point::new(45.0, 35.0));
        assert_eq!(inset_corner(Point::new(120.0, 80.0), &area), Point::new(95.0, 65.0));
    }

    #[test]
    fn test_identity_axes() {
        let [a, b, c, d] = corners();
        let touches = [
            (a, ScreenPoint::new(250, 250)),
            (b, ScreenPoint::new(750, 250)),
            (c, ScreenPoint::new(750, 750)),
            (d, ScreenPoint::new(250, 750)),
        ];
        let roles = identify_corners(&touches).unwrap();
        assert_eq!(roles.origin, a);
        assert_eq!(roles.positive_x, b);
        assert_eq!(roles.positive_y, d);

        let result = figure_axes(&roles).unwrap();
        assert!(!result.axes_swapped && !result.x_flip && !result.y_flip);
    }

    #[test]
    fn test_swapped_and_flipped_axes() {
        // Screen X runs along probe Y, screen Y against probe X
        let [a, b, c, d] = corners();
        let touches = [
            (b, ScreenPoint::new(250, 250)),
            (c, ScreenPoint::new(750, 250)),
            (d, ScreenPoint::new(750, 750)),
            (a, ScreenPoint::new(250, 750)),
        ];
        let result = figure_axes(&identify_corners(&touches).unwrap()).unwrap();
        assert_eq!(result.origin_corner, b);
        assert!(result.axes_swapped);
        assert!(!result.x_flip);
        assert!(result.y_flip);
    }

    #[test]
    fn test_duplicate_axis_corner_rejected() {
        let [a, b, c, d] = corners();
        let touches = [
            (a, ScreenPoint::new(250, 250)),
            (b, ScreenPoint::new(750, 250)),
            (c, ScreenPoint::new(760, 260)),
            (d, ScreenPoint::new(250, 750)),
        ];
        assert!(matches!(
            identify_corners(&touches),
            Err(RigError::InvalidAxes(_))
        ));
    }

    #[test]
    fn test_diagonal_axes_rejected() {
        let roles = CornerRoles {
            origin: Point::new(0.0, 0.0),
            positive_x: Point::new(100.0, 60.0),
            positive_y: Point::new(0.0, 60.0),
        };
        assert!(matches!(figure_axes(&roles), Err(RigError::InvalidAxes(_))));
    }

    #[test]
    fn test_robot_to_screen() {
        let scale = ScreenScale::new((1000, 600), &area(), false);
        let identity = CoordinateTransform::new(
            CalibrationResult {
                origin_corner: Point::new(20.0, 20.0),
                axes_swapped: false,
                x_flip: false,
                y_flip: false,
            },
            scale,
        );
        assert_eq!(identity.robot_to_screen(Point::new(70.0, 50.0)), Point::new(50.0, 30.0));

        let swapped = CoordinateTransform::new(
            CalibrationResult {
                origin_corner: Point::new(120.0, 20.0),
                axes_swapped: true,
                x_flip: false,
                y_flip: true,
            },
            scale,
        );
        assert_eq!(swapped.robot_to_screen(Point::new(70.0, 50.0)), Point::new(30.0, 50.0));
    }

    #[test]
    fn test_screen_scale() {
        let scale = ScreenScale::new((1000, 600), &area(), false);
        assert_eq!(scale.to_mm(ScreenPoint::new(500, 300)), Point::new(50.0, 30.0));

        let swapped = ScreenScale::new((4095, 4095), &area(), true);
        assert_eq!(swapped.extent_mm, (60.0, 100.0));
        assert_eq!(swapped.to_mm(ScreenPoint::new(4095, 1)), Point::new(60.0, 0.02));
    }
}
