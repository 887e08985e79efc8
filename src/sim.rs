//! Simulated rig
//!
//! Couples a [`SimulatedFisnar`] to a [`SimulatedMaxTouch`]: whenever the
//! virtual probe dips to touch height, the sensor simulator queues a touch
//! at the screen coordinate the probe position maps to and raises the delta
//! of the node under it. The real [`Fisnar`] and [`MaxTouch`] drivers run on
//! top, so everything above the transports behaves as it would on hardware.
//!
//! ```ignore
//! let rig = SimulatedRig::builder(area).swap_axes(true).build()?;
//! let mut orchestrator = rig.into_orchestrator(Box::new(geometry), config);
//! orchestrator.calibrate()?;
//! ```

use crate::config::{NodeCounts, RigConfig};
use crate::error::Result;
use crate::geometry::{ActiveArea, GeometryProvider};
use crate::motion::{Fisnar, FisnarHandle, MotionDriver, SimulatedFisnar};
use crate::orchestrator::TestOrchestrator;
use crate::sensor::{MaxTouch, SimulatedMaxTouch, SimulatorHandle, TouchSensor};
use crate::types::{NodeAddress, Point, Position, ScreenPoint, TouchEvent};

/// Probe heights within this distance of the touch height count as pressed
const PRESS_SLACK_MM: f64 = 0.5;

/// How probe-space millimeters land on the simulated screen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenMapping {
    /// Probe-space corner the screen reports as (0, 0)
    pub origin: Point,
    /// Screen X runs along probe Y
    pub swap_axes: bool,
    pub flip_x: bool,
    pub flip_y: bool,
    pub units_per_mm: f64,
    /// Coordinate range along screen X and Y
    pub range: (u16, u16),
}

impl ScreenMapping {
    /// Mapping whose origin is the corner of `area` the flags imply
    pub fn for_area(
        area: &ActiveArea,
        swap_axes: bool,
        flip_x: bool,
        flip_y: bool,
        units_per_mm: f64,
    ) -> Self {
        let (min, max) = area.bounds();
        let pick = |flip: bool, lo: f64, hi: f64| if flip { hi } else { lo };
        let (origin, extent) = if swap_axes {
            (
                Point::new(pick(flip_y, min.x, max.x), pick(flip_x, min.y, max.y)),
                (area.height(), area.width()),
            )
        } else {
            (
                Point::new(pick(flip_x, min.x, max.x), pick(flip_y, min.y, max.y)),
                (area.width(), area.height()),
            )
        };
        let units = |mm: f64| (mm * units_per_mm).round().clamp(1.0, f64::from(u16::MAX)) as u16;
        Self {
            origin,
            swap_axes,
            flip_x,
            flip_y,
            units_per_mm,
            range: (units(extent.0), units(extent.1)),
        }
    }

    /// Screen coordinate of a probe-space point, kept inside the range
    ///
    /// Never reports (0, 0), which the controller reserves for "unchanged".
    pub fn to_screen(&self, point: Point) -> ScreenPoint {
        let dx = point.x - self.origin.x;
        let dy = point.y - self.origin.y;
        let (mut sx, mut sy) = if self.swap_axes { (dy, dx) } else { (dx, dy) };
        if self.flip_x {
            sx = -sx;
        }
        if self.flip_y {
            sy = -sy;
        }
        let clamp = |mm: f64, range: u16| {
            (mm * self.units_per_mm)
                .round()
                .clamp(1.0, f64::from(range.max(1))) as u16
        };
        ScreenPoint::new(clamp(sx, self.range.0), clamp(sy, self.range.1))
    }

    /// Node nearest a screen coordinate
    pub fn to_node(&self, point: ScreenPoint, matrix: NodeCounts) -> NodeAddress {
        let axis = |s: u16, range: u16, nodes: u16| {
            let last = f64::from(nodes.saturating_sub(1));
            (f64::from(s) / f64::from(range.max(1)) * last).round() as u16
        };
        NodeAddress::new(
            axis(point.x, self.range.0, matrix.x),
            axis(point.y, self.range.1, matrix.y),
        )
    }
}

/// Tracks the probe and reports touches to the sensor simulator
struct Finger {
    touch: SimulatorHandle,
    mapping: ScreenMapping,
    matrix: NodeCounts,
    touch_z: f64,
    signal: i16,
    down_at: Option<ScreenPoint>,
}

impl Finger {
    fn observe(&mut self, position: Position) {
        let pressed = position.z >= self.touch_z - PRESS_SLACK_MM;
        match (self.down_at, pressed) {
            (None, true) => {
                let at = self.mapping.to_screen(position.xy());
                self.touch.push_touch(TouchEvent::Down, at);
                self.rest_on(at);
            }
            (Some(previous), true) => {
                let at = self.mapping.to_screen(position.xy());
                if at != previous {
                    self.touch.push_touch(TouchEvent::Move, at);
                    self.rest_on(at);
                }
            }
            (Some(previous), false) => {
                self.touch.push_touch(TouchEvent::Up, previous);
                self.touch.set_hold(None);
                self.touch.set_press(None);
                self.down_at = None;
            }
            (None, false) => {}
        }
    }

    fn rest_on(&mut self, at: ScreenPoint) {
        self.touch.set_hold(Some(at));
        self.touch
            .set_press(Some((self.mapping.to_node(at, self.matrix), self.signal)));
        self.down_at = Some(at);
    }
}

/// Builder for [`SimulatedRig`]
pub struct SimulatedRigBuilder {
    area: ActiveArea,
    swap_axes: bool,
    flip_x: bool,
    flip_y: bool,
    units_per_mm: f64,
    matrix: NodeCounts,
    signal: i16,
    noise: i16,
    seconds_per_poll: f64,
    config: RigConfig,
}

impl SimulatedRigBuilder {
    pub fn swap_axes(mut self, swap: bool) -> Self {
        self.swap_axes = swap;
        self
    }

    pub fn flip(mut self, flip_x: bool, flip_y: bool) -> Self {
        self.flip_x = flip_x;
        self.flip_y = flip_y;
        self
    }

    /// Screen resolution
    pub fn units_per_mm(mut self, units: f64) -> Self {
        self.units_per_mm = units;
        self
    }

    pub fn matrix(mut self, matrix: NodeCounts) -> Self {
        self.matrix = matrix;
        self
    }

    /// Delta raised at the node under the finger
    pub fn signal(mut self, signal: i16) -> Self {
        self.signal = signal;
        self
    }

    /// Amplitude of the delta noise on every node
    pub fn noise(mut self, amplitude: i16) -> Self {
        self.noise = amplitude;
        self
    }

    /// Simulated travel time per position query
    pub fn seconds_per_poll(mut self, seconds: f64) -> Self {
        self.seconds_per_poll = seconds;
        self
    }

    pub fn config(mut self, config: RigConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<SimulatedRig> {
        let mapping = ScreenMapping::for_area(
            &self.area,
            self.swap_axes,
            self.flip_x,
            self.flip_y,
            self.units_per_mm,
        );

        let port = SimulatedFisnar::new(self.config.motion.limits);
        let fisnar = port.handle();
        fisnar.set_seconds_per_poll(self.seconds_per_poll);

        let link = SimulatedMaxTouch::new(self.matrix, mapping.range);
        let touch = link.handle();
        touch.set_noise(self.noise);

        let mut finger = Finger {
            touch: touch.clone(),
            mapping,
            matrix: self.matrix,
            touch_z: self.config.session.z_start,
            signal: self.signal,
            down_at: None,
        };
        fisnar.set_observer(move |position| finger.observe(position));

        let sensor = MaxTouch::open(link, &self.config.sensor)?;
        let motion = Fisnar::new(port, &self.config.motion);
        tracing::info!(
            "Simulated rig: {}x{} nodes, range {:?}, origin {}",
            self.matrix.x,
            self.matrix.y,
            mapping.range,
            mapping.origin
        );

        Ok(SimulatedRig {
            motion,
            sensor,
            fisnar,
            touch,
            mapping,
            config: self.config,
        })
    }
}

/// A probe and a sensor that see each other
pub struct SimulatedRig {
    pub motion: Fisnar<SimulatedFisnar>,
    pub sensor: MaxTouch<SimulatedMaxTouch>,
    pub fisnar: FisnarHandle,
    pub touch: SimulatorHandle,
    pub mapping: ScreenMapping,
    pub config: RigConfig,
}

impl SimulatedRig {
    pub fn builder(area: ActiveArea) -> SimulatedRigBuilder {
        SimulatedRigBuilder {
            area,
            swap_axes: false,
            flip_x: false,
            flip_y: false,
            units_per_mm: 10.0,
            matrix: NodeCounts::new(32, 20),
            signal: 400,
            noise: 4,
            seconds_per_poll: 0.05,
            config: RigConfig::default(),
        }
    }

    pub fn into_parts(self) -> (Box<dyn MotionDriver>, Box<dyn TouchSensor>) {
        (Box::new(self.motion), Box::new(self.sensor))
    }

    /// An orchestrator over this rig, using the rig's configuration
    pub fn into_orchestrator(self, geometry: Box<dyn GeometryProvider>) -> TestOrchestrator {
        let config = self.config.clone();
        let (motion, sensor) = self.into_parts();
        TestOrchestrator::new(motion, sensor, geometry, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area() -> ActiveArea {
        ActiveArea::from_bounds(Point::new(20.0, 20.0), Point::new(120.0, 80.0)).unwrap()
    }

    #[test]
    fn test_identity_mapping() {
        let m = ScreenMapping::for_area(&area(), false, false, false, 10.0);
        assert_eq!(m.origin, Point::new(20.0, 20.0));
        assert_eq!(m.range, (1000, 600));
        assert_eq!(m.to_screen(Point::new(70.0, 50.0)), ScreenPoint::new(500, 300));
        assert_eq!(m.to_screen(Point::new(20.0, 20.0)), ScreenPoint::new(1, 1));
    }

    #[test]
    fn test_swapped_flipped_mapping() {
        let m = ScreenMapping::for_area(&area(), true, false, true, 10.0);
        assert_eq!(m.origin, Point::new(120.0, 20.0));
        assert_eq!(m.range, (600, 1000));
        // screen X along probe Y, screen Y against probe X
        assert_eq!(m.to_screen(Point::new(100.0, 50.0)), ScreenPoint::new(300, 200));
    }

    #[test]
    fn test_node_under_screen_point() {
        let m = ScreenMapping::for_area(&area(), false, false, false, 10.0);
        let node = m.to_node(ScreenPoint::new(500, 300), NodeCounts::new(11, 7));
        assert_eq!(node, NodeAddress::new(5, 3));
    }

    #[test]
    fn test_pressing_queues_touches() {
        let rig = SimulatedRig::builder(area()).build().unwrap();
        let mut finger = Finger {
            touch: rig.touch.clone(),
            mapping: rig.mapping,
            matrix: NodeCounts::new(32, 20),
            touch_z: 50.0,
            signal: 400,
            down_at: None,
        };
        let queued = rig.touch.pending_messages();
        finger.observe(Position::new(70.0, 50.0, 20.0));
        finger.observe(Position::new(70.0, 50.0, 50.0));
        finger.observe(Position::new(71.0, 50.0, 50.0));
        finger.observe(Position::new(71.0, 50.0, 20.0));
        assert_eq!(rig.touch.pending_messages(), queued + 3);
    }
}
