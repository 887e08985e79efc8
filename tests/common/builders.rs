//! Test data builders for configurations and part geometry

use touch_rig::config::RigConfig;
use touch_rig::geometry::{ActiveArea, NodalAxes, StaticGeometry};
use touch_rig::types::{Line, Point, TestCategory};

/// Bounds of the panel every integration test probes
pub const PANEL_MIN: Point = Point::new(20.0, 20.0);
pub const PANEL_MAX: Point = Point::new(180.0, 120.0);

pub fn panel_area() -> ActiveArea {
    ActiveArea::from_bounds(PANEL_MIN, PANEL_MAX).unwrap()
}

/// Builder for rig configurations with every wait shortened
pub struct ConfigBuilder {
    config: RigConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = RigConfig::default();
        config.motion.poll_interval_ms = 0;
        config.motion.move_timeout_ms = 5_000;
        config.motion.home_timeout_ms = 5_000;
        config.motion.position_read_timeout_ms = 100;

        config.accuracy.touches = 2;
        config.accuracy.touch_duration_ms = 0;
        config.accuracy.between_touches_ms = 0;

        config.jitter.touches = 2;
        config.jitter.hold_duration_ms = 20;
        config.jitter.between_touches_ms = 0;

        config.linearity.between_lines_ms = 0;

        config.snr.noise_samples = 8;
        config.snr.signal_samples = 8;
        config.snr.between_samples_ms = 0;
        Self { config }
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.config.accuracy.iterations = iterations;
        self.config.jitter.iterations = iterations;
        self.config.linearity.iterations = iterations;
        self.config.snr.iterations = iterations;
        self
    }

    pub fn move_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.motion.move_timeout_ms = timeout;
        self.config.motion.home_timeout_ms = timeout;
        self
    }

    pub fn build(self) -> RigConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for part geometry on the test panel
pub struct GeometryBuilder {
    geometry: StaticGeometry,
}

impl GeometryBuilder {
    pub fn new() -> Self {
        Self {
            geometry: StaticGeometry::new(panel_area()),
        }
    }

    pub fn accuracy(mut self, category: TestCategory, point: Point) -> Self {
        self.geometry.accuracy.push(category, point);
        self
    }

    pub fn jitter(mut self, category: TestCategory, point: Point) -> Self {
        self.geometry.jitter.push(category, point);
        self
    }

    pub fn snr(mut self, category: TestCategory, point: Point) -> Self {
        self.geometry.snr.push(category, point);
        self
    }

    pub fn line(mut self, category: TestCategory, start: Point, end: Point) -> Self {
        self.geometry.linearity.push(category, Line::new(start, end));
        self
    }

    /// Node rows along the panel's lower and left edges
    pub fn panel_nodal_axes(mut self) -> Self {
        let x_line = Line::new(PANEL_MIN, Point::new(PANEL_MAX.x, PANEL_MIN.y));
        let y_line = Line::new(PANEL_MIN, Point::new(PANEL_MIN.x, PANEL_MAX.y));
        self.geometry.nodal_axes = Some(NodalAxes::new(x_line, y_line).unwrap());
        self
    }

    pub fn build(self) -> StaticGeometry {
        self.geometry
    }
}

impl Default for GeometryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One point of every kind at the panel core, plus a horizontal and a
/// vertical line
pub fn full_panel_geometry() -> StaticGeometry {
    let core = Point::new(101.0, 72.0);
    GeometryBuilder::new()
        .accuracy(TestCategory::Core, core)
        .accuracy(TestCategory::Edge, Point::new(30.0, 30.0))
        .jitter(TestCategory::Core, core)
        .snr(TestCategory::Core, core)
        .line(TestCategory::Core, Point::new(40.0, 50.0), Point::new(160.0, 50.0))
        .line(TestCategory::Edge, Point::new(30.0, 30.0), Point::new(30.0, 110.0))
        .panel_nodal_axes()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use touch_rig::geometry::GeometryProvider;
    use touch_rig::types::TestKind;

    #[test]
    fn test_geometry_builder() {
        let geometry = full_panel_geometry();
        assert_eq!(geometry.points(TestKind::Accuracy, TestCategory::Edge).len(), 1);
        assert_eq!(geometry.lines(TestCategory::Core).len(), 1);
        assert!(geometry.nodal_axes().is_some());
    }
}
