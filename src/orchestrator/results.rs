//! Run results, progress reporting and report output
//!
//! # Main Types
//!
//! - [`RunResults`] - Everything measured in a session, keyed by part name
//! - [`PartResults`] - Per-kind iterations for one part
//! - [`ProgressSink`] - Receives progress events while tests run
//! - [`ReportSink`] - Receives the finished results ([`JsonReportSink`])

use crate::calibration::CoordinateTransform;
use crate::error::{Result, ResultExt, RigError};
use crate::geometry::CategorySet;
use crate::measurement::{
    AccuracyMeasurement, Evaluated, JitterMeasurement, LinearityMeasurement, SnrMeasurement,
};
use crate::types::TestKind;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ==================== Results ====================

/// How one iteration ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IterationOutcome {
    Completed,
    /// A point or line failed; results gathered before it are kept
    Failed { error: String },
}

/// One pass over a kind's point or line sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration<M> {
    /// 1-based
    pub index: u32,
    pub started: DateTime<Local>,
    pub outcome: IterationOutcome,
    pub results: CategorySet<Evaluated<M>>,
}

impl<M> Iteration<M> {
    pub fn passed(&self) -> bool {
        self.outcome == IterationOutcome::Completed
            && self
                .results
                .iter()
                .all(|r| r.verdict == crate::measurement::Verdict::Pass)
    }
}

/// Results for one part under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartResults {
    pub part: String,
    pub started: DateTime<Local>,
    pub finished: Option<DateTime<Local>>,
    pub accuracy: Vec<Iteration<AccuracyMeasurement>>,
    pub jitter: Vec<Iteration<JitterMeasurement>>,
    pub linearity: Vec<Iteration<LinearityMeasurement>>,
    pub snr: Vec<Iteration<SnrMeasurement>>,
    /// Why the run stopped early
    pub aborted: Option<String>,
}

impl PartResults {
    pub fn new(part: impl Into<String>) -> Self {
        Self {
            part: part.into(),
            started: Local::now(),
            finished: None,
            accuracy: Vec::new(),
            jitter: Vec::new(),
            linearity: Vec::new(),
            snr: Vec::new(),
            aborted: None,
        }
    }

    /// Number of iterations recorded for `kind`
    pub fn iterations(&self, kind: TestKind) -> usize {
        match kind {
            TestKind::Accuracy => self.accuracy.len(),
            TestKind::Jitter => self.jitter.len(),
            TestKind::Linearity => self.linearity.len(),
            TestKind::Snr => self.snr.len(),
        }
    }

    /// Whether every recorded iteration of `kind` completed and passed
    pub fn kind_passed(&self, kind: TestKind) -> bool {
        match kind {
            TestKind::Accuracy => self.accuracy.iter().all(Iteration::passed),
            TestKind::Jitter => self.jitter.iter().all(Iteration::passed),
            TestKind::Linearity => self.linearity.iter().all(Iteration::passed),
            TestKind::Snr => self.snr.iter().all(Iteration::passed),
        }
    }

    /// Whether the run finished and every iteration passed
    pub fn passed(&self) -> bool {
        self.aborted.is_none() && TestKind::ALL.iter().all(|k| self.kind_passed(*k))
    }
}

/// Everything measured in one session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunResults {
    pub sensor_model: String,
    pub calibration: Option<CoordinateTransform>,
    pub parts: BTreeMap<String, PartResults>,
}

impl RunResults {
    pub fn part(&self, name: &str) -> Option<&PartResults> {
        self.parts.get(name)
    }
}

// ==================== Progress ====================

/// Progress notifications emitted while tests run
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    KindStarted {
        part: &'a str,
        kind: TestKind,
        iterations: u32,
    },
    IterationFinished {
        part: &'a str,
        kind: TestKind,
        index: u32,
        iterations: u32,
        outcome: &'a IterationOutcome,
    },
    KindFinished {
        part: &'a str,
        kind: TestKind,
    },
    RunFinished {
        part: &'a str,
        aborted: bool,
    },
}

pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent<'_>);
}

/// Logs progress through `tracing`
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::KindStarted {
                part,
                kind,
                iterations,
            } => tracing::info!("{}: {} test, {} iteration(s)", part, kind, iterations),
            ProgressEvent::IterationFinished {
                part,
                kind,
                index,
                iterations,
                outcome,
            } => match outcome {
                IterationOutcome::Completed => {
                    tracing::info!("{}: {} test {}/{} completed", part, kind, index, iterations)
                }
                IterationOutcome::Failed { error } => tracing::warn!(
                    "{}: {} test {}/{} failed: {}",
                    part,
                    kind,
                    index,
                    iterations,
                    error
                ),
            },
            ProgressEvent::KindFinished { part, kind } => {
                tracing::info!("{}: {} test finished", part, kind)
            }
            ProgressEvent::RunFinished { part, aborted } => {
                if aborted {
                    tracing::error!("{}: run aborted", part);
                } else {
                    tracing::info!("{}: all tests finished", part);
                }
            }
        }
    }
}

// ==================== Reports ====================

/// Destination for finished results
pub trait ReportSink {
    fn write(&mut self, results: &RunResults) -> Result<()>;
}

/// Writes results as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A timestamped file in the app's results directory
    pub fn in_results_dir(part: &str) -> Result<Self> {
        let name = format!("{}-{}.json", part, Local::now().format("%Y%m%d-%H%M%S"));
        Ok(Self::new(crate::config::results_dir()?.join(name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn write(&mut self, results: &RunResults) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(results).context("Serializing results")?;
        std::fs::write(&self.path, json)
            .map_err(|e| RigError::Io(e).with_context(format!("Writing {}", self.path.display())))?;
        tracing::info!("Results written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{accuracy, Evaluated};
    use crate::types::{Point, TestCategory};
    use tempfile::tempdir;

    fn iteration(error_mm: f64) -> Iteration<AccuracyMeasurement> {
        let mut results = CategorySet::default();
        results.push(
            TestCategory::Core,
            Evaluated::new(
                accuracy(Point::new(10.0, 10.0), &[Point::new(10.0 + error_mm, 10.0)]),
                1.0,
            ),
        );
        Iteration {
            index: 1,
            started: Local::now(),
            outcome: IterationOutcome::Completed,
            results,
        }
    }

    #[test]
    fn test_part_verdicts() {
        let mut part = PartResults::new("panel-7");
        part.accuracy.push(iteration(0.5));
        assert!(part.passed());

        part.accuracy.push(iteration(2.0));
        assert!(!part.kind_passed(TestKind::Accuracy));
        assert!(part.kind_passed(TestKind::Jitter));
        assert_eq!(part.iterations(TestKind::Accuracy), 2);
    }

    #[test]
    fn test_aborted_part_fails() {
        let mut part = PartResults::new("panel-7");
        part.aborted = Some("link lost".into());
        assert!(!part.passed());
    }

    #[test]
    fn test_json_report_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("run.json");

        let mut results = RunResults {
            sensor_model: "sim".into(),
            ..Default::default()
        };
        let mut part = PartResults::new("panel-7");
        part.accuracy.push(iteration(0.25));
        results.parts.insert("panel-7".into(), part);

        JsonReportSink::new(&path).write(&results).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let first = &json["parts"]["panel-7"]["accuracy"][0];
        assert_eq!(first["outcome"]["status"], "completed");
        assert_eq!(first["results"]["core"][0]["verdict"], "pass");
        assert_eq!(first["results"]["core"][0]["errors"][0], 0.25);
    }
}
