//! Sampling the sensor while the probe moves
//!
//! A traced move runs on two threads: the mover issues one motion command
//! and waits for arrival, the sampler drains the touch queue over and over
//! until the mover finishes. The only state they share is the
//! motion-in-progress flag, which lives inside [`TraceSampler::trace`] and
//! never escapes it.
//!
//! Each thread reports a tagged result through a channel. An attempt is
//! accepted only when the move arrived and the sampler finished cleanly;
//! anything else is retried, and errors that invalidate the whole run are
//! returned at once.

use crate::calibration::CoordinateTransform;
use crate::error::{Result, RigError};
use crate::motion::{MotionDriver, MoveMode};
use crate::sensor::TouchSensor;
use crate::types::{Position, TraceSample};
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicBool, Ordering};

/// Attempts before a trace is given up on
pub const DEFAULT_TRACE_ATTEMPTS: u32 = 10;

/// Outcome of one thread of a traced move
#[derive(Debug)]
enum TaskReport {
    Mover(Result<bool>),
    Sampler(Result<Vec<TraceSample>>),
}

/// Clears the motion flag when the mover finishes, even by unwinding
struct MotionFlag<'a>(&'a AtomicBool);

impl Drop for MotionFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs traced moves with bounded retries
#[derive(Debug, Clone)]
pub struct TraceSampler {
    max_attempts: u32,
}

impl Default for TraceSampler {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_ATTEMPTS)
    }
}

impl TraceSampler {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Move from `from` to `to`, sampling touches in screen millimeters
    ///
    /// The probe must already be at `from`. A retried attempt returns the
    /// probe to `from` without sampling and drains the queue first.
    pub fn trace(
        &self,
        motion: &mut dyn MotionDriver,
        sensor: &mut dyn TouchSensor,
        transform: &CoordinateTransform,
        from: Position,
        to: Position,
        mode: MoveMode,
    ) -> Result<Vec<TraceSample>> {
        let mut last = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                self.rewind(motion, sensor, from, mode)?;
            }

            let (mover, sampler) = run_attempt(motion, sensor, transform, to, mode);
            match (mover, sampler) {
                (Ok(true), Ok(samples)) => {
                    tracing::debug!(
                        "Traced {} -> {} with {} samples (attempt {})",
                        from,
                        to,
                        samples.len(),
                        attempt
                    );
                    return Ok(samples);
                }
                (Err(e), _) | (_, Err(e)) if e.is_fatal_to_run() => return Err(e),
                (Ok(false), _) => last = "move command could not be sent".to_string(),
                (Err(e), _) | (_, Err(e)) => last = e.to_string(),
            }
            tracing::warn!(
                "Traced move attempt {}/{} failed: {}",
                attempt,
                self.max_attempts,
                last
            );
        }

        Err(RigError::TraceSampling {
            attempts: self.max_attempts,
            last,
        })
    }

    fn rewind(
        &self,
        motion: &mut dyn MotionDriver,
        sensor: &mut dyn TouchSensor,
        from: Position,
        mode: MoveMode,
    ) -> Result<()> {
        match motion.move_to(from, mode) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Could not return to {} before retrying", from),
            Err(e) if e.is_fatal_to_run() => return Err(e),
            Err(e) => tracing::warn!("Return to {} before retrying failed: {}", from, e),
        }
        sensor.drain_queue()
    }
}

/// One mover/sampler pair; the flag is set before either thread starts
fn run_attempt(
    motion: &mut dyn MotionDriver,
    sensor: &mut dyn TouchSensor,
    transform: &CoordinateTransform,
    to: Position,
    mode: MoveMode,
) -> (Result<bool>, Result<Vec<TraceSample>>) {
    let moving = AtomicBool::new(true);
    let (tx, rx) = bounded::<TaskReport>(2);

    std::thread::scope(|s| {
        let mover_tx = tx.clone();
        let moving = &moving;
        s.spawn(move || {
            let flag = MotionFlag(moving);
            let result = motion.move_to(to, mode);
            drop(flag);
            send_report(&mover_tx, TaskReport::Mover(result));
        });
        s.spawn(move || {
            let result = sample_while_moving(sensor, transform, moving);
            send_report(&tx, TaskReport::Sampler(result));
        });
    });

    let mut mover = Err(RigError::Transport("mover thread reported nothing".into()));
    let mut sampler = Err(RigError::Transport("sampler thread reported nothing".into()));
    for report in rx.try_iter() {
        match report {
            TaskReport::Mover(result) => mover = result,
            TaskReport::Sampler(result) => sampler = result,
        }
    }
    (mover, sampler)
}

fn send_report(tx: &Sender<TaskReport>, report: TaskReport) {
    if let Err(e) = tx.send(report) {
        tracing::error!("Trace report dropped: {:?}", e.into_inner());
    }
}

fn sample_while_moving(
    sensor: &mut dyn TouchSensor,
    transform: &CoordinateTransform,
    moving: &AtomicBool,
) -> Result<Vec<TraceSample>> {
    let mut samples = Vec::new();
    while moving.load(Ordering::Acquire) {
        for touch in sensor.read_all_points()? {
            samples.push(transform.screen_to_mm(touch.position));
        }
    }
    Ok(samples)
}
