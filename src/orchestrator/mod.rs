//! Test orchestration
//!
//! [`TestOrchestrator`] owns the rig for a session: the motion driver, the
//! sensor, the part geometry and the calibration. It runs the requested test
//! kinds in order, repeating each the configured number of times, and
//! accumulates results per part.
//!
//! # Run Contract
//!
//! - Tests are refused with [`RigError::NotOriented`] before any hardware I/O
//!   until the session is calibrated.
//! - A `home()` that fails or cannot be sent before the first kind aborts the
//!   run; it doubles as the connectivity check.
//! - Errors that only concern one point mark that iteration failed and the
//!   run continues. Errors for which [`RigError::is_fatal_to_run`] holds stop
//!   the run; results gathered so far are kept, marked aborted.
//! - The probe goes home after every kind and is left at the idle speed.

pub mod results;

pub use results::{
    Iteration, IterationOutcome, JsonReportSink, LogProgress, PartResults, ProgressEvent,
    ProgressSink, ReportSink, RunResults,
};

use crate::calibration::{CalibrationEngine, CoordinateTransform};
use crate::config::{Neighborhood, RigConfig};
use crate::error::{Result, ResultExt, RigError};
use crate::geometry::{CategorySet, GeometryProvider};
use crate::measurement::{
    self, AccuracyMeasurement, Evaluated, JitterMeasurement, LinearityMeasurement, SnrMeasurement,
};
use crate::motion::{MotionDriver, MoveMode};
use crate::sensor::TouchSensor;
use crate::trace_sampler::TraceSampler;
use crate::types::{Line, Point, Position, TestCategory, TestKind};
use chrono::Local;
use std::time::Instant;

/// Edge points are probed before core points
const POINT_ORDER: [TestCategory; 2] = [TestCategory::Edge, TestCategory::Core];

/// Core sets are probed before edge sets
const SET_ORDER: [TestCategory; 2] = [TestCategory::Core, TestCategory::Edge];

type IterationRunner<M> = fn(&mut TestOrchestrator, &mut CategorySet<Evaluated<M>>) -> Result<()>;

/// Drives calibration and test runs against one rig
pub struct TestOrchestrator {
    motion: Box<dyn MotionDriver>,
    sensor: Box<dyn TouchSensor>,
    geometry: Box<dyn GeometryProvider>,
    config: RigConfig,
    transform: Option<CoordinateTransform>,
    sampler: TraceSampler,
    progress: Box<dyn ProgressSink>,
    results: RunResults,
}

impl TestOrchestrator {
    pub fn new(
        motion: Box<dyn MotionDriver>,
        sensor: Box<dyn TouchSensor>,
        geometry: Box<dyn GeometryProvider>,
        config: RigConfig,
    ) -> Self {
        let results = RunResults {
            sensor_model: sensor.model().to_string(),
            ..Default::default()
        };
        Self {
            motion,
            sensor,
            geometry,
            config,
            transform: None,
            sampler: TraceSampler::default(),
            progress: Box::new(LogProgress),
            results,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_trace_sampler(mut self, sampler: TraceSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// SNR neighborhood used by subsequent runs
    pub fn set_neighborhood(&mut self, neighborhood: Neighborhood) {
        self.config.snr.neighborhood = neighborhood;
    }

    /// The calibrated transform, for callers that display coordinates
    pub fn transform(&self) -> Option<&CoordinateTransform> {
        self.transform.as_ref()
    }

    pub fn is_calibrated(&self) -> bool {
        self.transform.is_some()
    }

    pub fn results(&self) -> &RunResults {
        &self.results
    }

    pub fn take_results(&mut self) -> RunResults {
        let fresh = RunResults {
            sensor_model: self.results.sensor_model.clone(),
            calibration: self.transform,
            ..Default::default()
        };
        std::mem::replace(&mut self.results, fresh)
    }

    /// Reset the sensor controller and check its handshake
    pub fn reset_sensor(&mut self) -> Result<bool> {
        self.sensor.reset()
    }

    /// Calibrate once per session
    pub fn calibrate(&mut self) -> Result<CoordinateTransform> {
        if self.transform.is_some() {
            return Err(RigError::AlreadyCalibrated);
        }
        let transform = CalibrationEngine::new(
            self.motion.as_mut(),
            self.sensor.as_mut(),
            &self.config.session,
        )
        .calibrate(self.geometry.as_mut())?;
        self.transform = Some(transform);
        self.results.calibration = Some(transform);
        Ok(transform)
    }

    /// Adopt a transform from an earlier session on the same fixture
    pub fn restore_calibration(&mut self, transform: CoordinateTransform) -> Result<()> {
        if self.transform.is_some() {
            return Err(RigError::AlreadyCalibrated);
        }
        self.geometry.set_origin(transform.calibration.origin_corner);
        self.transform = Some(transform);
        self.results.calibration = Some(transform);
        tracing::info!(
            "Calibration restored, origin at {}",
            transform.calibration.origin_corner
        );
        Ok(())
    }

    fn require_transform(&self) -> Result<CoordinateTransform> {
        self.transform.ok_or_else(|| {
            RigError::NotOriented("calibrate the rig before running tests".into())
        })
    }

    /// Run `kinds` in order for `part`
    ///
    /// Results, partial ones included, are stored under `part` whatever the
    /// outcome.
    pub fn run_tests(&mut self, part: &str, kinds: &[TestKind]) -> Result<()> {
        self.require_transform()?;

        match self.motion.home() {
            Ok(true) => {}
            Ok(false) => {
                return Err(RigError::Transport("home command could not be sent".into())
                    .with_context("Connectivity check"))
            }
            Err(e) => return Err(e.with_context("Connectivity check")),
        }

        let mut part_results = PartResults::new(part);
        let outcome = self.run_kinds(part, kinds, &mut part_results);
        if let Err(e) = &outcome {
            tracing::error!("Run for {} aborted: {}", part, e);
            part_results.aborted = Some(e.to_string());
        }
        part_results.finished = Some(Local::now());
        self.results.parts.insert(part.to_string(), part_results);
        self.progress.report(ProgressEvent::RunFinished {
            part,
            aborted: outcome.is_err(),
        });
        outcome
    }

    fn run_kinds(
        &mut self,
        part: &str,
        kinds: &[TestKind],
        out: &mut PartResults,
    ) -> Result<()> {
        for &kind in kinds {
            match kind {
                TestKind::Accuracy => self.run_iterations(
                    part,
                    kind,
                    self.config.accuracy.iterations,
                    self.config.accuracy.speed,
                    Self::accuracy_iteration,
                    &mut out.accuracy,
                )?,
                TestKind::Jitter => self.run_iterations(
                    part,
                    kind,
                    self.config.jitter.iterations,
                    self.config.jitter.speed,
                    Self::jitter_iteration,
                    &mut out.jitter,
                )?,
                TestKind::Linearity => self.run_iterations(
                    part,
                    kind,
                    self.config.linearity.iterations,
                    self.config.linearity.approach_speed,
                    Self::linearity_iteration,
                    &mut out.linearity,
                )?,
                TestKind::Snr => self.run_iterations(
                    part,
                    kind,
                    self.config.snr.iterations,
                    self.config.snr.speed,
                    Self::snr_iteration,
                    &mut out.snr,
                )?,
            }
            self.progress.report(ProgressEvent::KindFinished { part, kind });

            match self.motion.home() {
                Ok(true) => {}
                Ok(false) => {
                    return Err(RigError::Transport("home command could not be sent".into()))
                }
                Err(e) if e.is_fatal_to_run() => return Err(e),
                Err(e) => tracing::warn!("Homing after {} test failed: {}", kind, e),
            }
        }
        self.motion.set_speed(self.config.session.idle_speed)
    }

    fn run_iterations<M>(
        &mut self,
        part: &str,
        kind: TestKind,
        iterations: u32,
        speed: f64,
        run: IterationRunner<M>,
        out: &mut Vec<Iteration<M>>,
    ) -> Result<()> {
        self.progress.report(ProgressEvent::KindStarted {
            part,
            kind,
            iterations,
        });
        self.motion.set_speed(speed)?;

        for index in 1..=iterations {
            let started = Local::now();
            let mut results = CategorySet::default();
            let result = self
                .sensor
                .drain_queue()
                .and_then(|()| run(self, &mut results))
                .with_context(|| format!("{} iteration {}", kind, index));

            let (outcome, fatal) = match result {
                Ok(()) => (IterationOutcome::Completed, None),
                Err(e) if e.is_fatal_to_run() => (
                    IterationOutcome::Failed {
                        error: e.to_string(),
                    },
                    Some(e),
                ),
                Err(e) => (
                    IterationOutcome::Failed {
                        error: e.to_string(),
                    },
                    None,
                ),
            };
            self.progress.report(ProgressEvent::IterationFinished {
                part,
                kind,
                index,
                iterations,
                outcome: &outcome,
            });
            out.push(Iteration {
                index,
                started,
                outcome,
                results,
            });
            if let Some(e) = fatal {
                return Err(e);
            }
        }
        Ok(())
    }

    /// Move and treat an unsent command as a lost link
    fn move_probe(&mut self, target: Position, mode: MoveMode) -> Result<()> {
        if self.motion.move_to(target, mode)? {
            Ok(())
        } else {
            Err(RigError::Transport(format!(
                "move to {} could not be sent",
                target
            )))
        }
    }

    fn hover(&self, point: Point) -> Position {
        Position::at(point, self.config.session.hover_z())
    }

    fn press(&self, point: Point) -> Position {
        Position::at(point, self.config.session.z_start)
    }

    // ==================== Accuracy ====================

    /// Touch `point` `touches` times and measure where each touch landed
    pub fn run_accuracy(&mut self, point: Point, touches: u32) -> Result<AccuracyMeasurement> {
        let transform = self.require_transform()?;
        let settings = self.config.accuracy.clone();

        self.move_probe(self.hover(point), MoveMode::POINT_TO_POINT)?;
        let mut samples = Vec::with_capacity(touches as usize);
        for touch in 0..touches {
            if touch > 0 {
                std::thread::sleep(settings.between_touches());
            }
            self.move_probe(self.press(point), MoveMode::POINT_TO_POINT)?;
            std::thread::sleep(settings.touch_duration());
            self.move_probe(self.hover(point), MoveMode::LINEAR)?;

            let touched = self.sensor.await_touch_coordinate()?;
            samples.push(transform.screen_to_mm(touched));
        }
        Ok(measurement::accuracy(transform.robot_to_screen(point), &samples))
    }

    fn accuracy_iteration(
        &mut self,
        set: &mut CategorySet<Evaluated<AccuracyMeasurement>>,
    ) -> Result<()> {
        for category in POINT_ORDER {
            let threshold = self.config.accuracy.thresholds.for_category(category);
            let points = self.geometry.points(TestKind::Accuracy, category).to_vec();
            for point in points {
                let m = self
                    .run_accuracy(point, self.config.accuracy.touches)
                    .with_context(|| format!("Accuracy point {}", point))?;
                set.push(category, Evaluated::new(m, threshold));
                self.sensor.drain_queue()?;
            }
        }
        Ok(())
    }

    // ==================== Jitter ====================

    /// Hold touches at `point`, sampling continuously while held
    pub fn run_jitter(&mut self, point: Point, touches: u32) -> Result<JitterMeasurement> {
        let transform = self.require_transform()?;
        let hold = self.config.jitter.hold_duration();

        self.move_probe(self.hover(point), MoveMode::LINEAR)?;
        let mut samples = Vec::new();
        for _ in 0..touches {
            self.sensor.drain_queue()?;
            self.move_probe(self.hover(point), MoveMode::LINEAR)?;
            self.move_probe(self.press(point), MoveMode::LINEAR)?;

            let start = Instant::now();
            while start.elapsed() < hold {
                for touch in self.sensor.read_all_points()? {
                    samples.push(transform.screen_to_mm(touch.position));
                }
            }
            self.move_probe(self.hover(point), MoveMode::LINEAR)?;
        }
        Ok(measurement::jitter(transform.robot_to_screen(point), &samples))
    }

    fn jitter_iteration(
        &mut self,
        set: &mut CategorySet<Evaluated<JitterMeasurement>>,
    ) -> Result<()> {
        for category in POINT_ORDER {
            let threshold = self.config.jitter.thresholds.for_category(category);
            let points = self.geometry.points(TestKind::Jitter, category).to_vec();
            for point in points {
                let m = self
                    .run_jitter(point, self.config.jitter.touches)
                    .with_context(|| format!("Jitter point {}", point))?;
                set.push(category, Evaluated::new(m, threshold));
                std::thread::sleep(self.config.jitter.between_touches());
            }
        }
        Ok(())
    }

    // ==================== Linearity ====================

    /// Trace `line` with the finger down and measure each sample's deviation
    pub fn run_linearity(&mut self, line: Line) -> Result<LinearityMeasurement> {
        let transform = self.require_transform()?;
        let settings = self.config.linearity.clone();
        let (start, end) = (line.start(), line.end());

        self.motion.set_speed(settings.approach_speed)?;
        self.move_probe(self.hover(start), MoveMode::POINT_TO_POINT)?;
        self.sensor.drain_queue()?;
        self.move_probe(self.press(start), MoveMode::POINT_TO_POINT)?;
        self.motion.set_speed(settings.path_velocity)?;

        let (from, to) = (self.press(start), self.press(end));
        let samples = self.sampler.trace(
            self.motion.as_mut(),
            self.sensor.as_mut(),
            &transform,
            from,
            to,
            MoveMode::LINEAR,
        )?;
        self.move_probe(self.hover(end), MoveMode::LINEAR)?;

        let screen_line = Line::new(transform.robot_to_screen(start), transform.robot_to_screen(end));
        Ok(measurement::linearity(
            screen_line,
            &samples,
            settings.outlier_ceiling_mm,
        ))
    }

    fn linearity_iteration(
        &mut self,
        set: &mut CategorySet<Evaluated<LinearityMeasurement>>,
    ) -> Result<()> {
        for category in SET_ORDER {
            let threshold = self.config.linearity.thresholds.for_category(category);
            let lines = self.geometry.lines(category).to_vec();
            for line in lines {
                let m = self
                    .run_linearity(line)
                    .with_context(|| format!("Line {} -> {}", line.start(), line.end()))?;
                set.push(category, Evaluated::new(m, threshold));
                std::thread::sleep(self.config.linearity.between_lines());
            }
        }
        Ok(())
    }

    // ==================== SNR ====================

    /// Read the node neighborhood under `point` idle and then touched
    pub fn run_snr(&mut self, point: Point) -> Result<SnrMeasurement> {
        let transform = self.require_transform()?;
        let settings = self.config.snr.clone();

        let center = {
            let axes = self.geometry.nodal_axes().ok_or_else(|| {
                RigError::Geometry("part geometry has no nodal axes".into())
            })?;
            axes.node_address_for(point, self.sensor.node_bounds())?
        };
        tracing::debug!("SNR point {} over node {}", point, center);

        self.move_probe(self.hover(point), MoveMode::POINT_TO_POINT)?;
        let idle = self.sensor.read_neighborhood(
            center,
            settings.neighborhood,
            settings.noise_samples,
            settings.between_samples(),
        )?;

        self.move_probe(self.press(point), MoveMode::LINEAR)?;
        let touching = self.sensor.read_neighborhood(
            center,
            settings.neighborhood,
            settings.signal_samples,
            settings.between_samples(),
        );
        self.move_probe(self.hover(point), MoveMode::LINEAR)?;

        Ok(measurement::snr(
            transform.robot_to_screen(point),
            center,
            &idle,
            &touching?,
        ))
    }

    fn snr_iteration(
        &mut self,
        set: &mut CategorySet<Evaluated<SnrMeasurement>>,
    ) -> Result<()> {
        for category in SET_ORDER {
            let threshold = self.config.snr.thresholds.for_category(category);
            let points = self.geometry.points(TestKind::Snr, category).to_vec();
            for point in points {
                let m = self
                    .run_snr(point)
                    .with_context(|| format!("SNR point {}", point))?;
                set.push(category, Evaluated::new(m, threshold));
            }
        }
        Ok(())
    }
}
