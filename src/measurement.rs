//! Measurement formulas
//!
//! Pure functions over samples that have already been gathered and
//! converted to screen-space millimeters. Nothing here touches hardware.
//!
//! - [`accuracy`] - distance of each touch from the commanded point
//! - [`jitter`] - spread of repeated touch distances per axis
//! - [`linearity`] - perpendicular distance of trace samples from a line
//! - [`snr`] - per-node signal over noise around a touch point
//!
//! Each measurement can be checked against a threshold with [`Evaluate`],
//! and [`Evaluated`] bundles a measurement with its verdict for reporting.

use crate::sensor::NeighborhoodRead;
use crate::types::{Line, NodeAddress, NodeDelta, Point};
use serde::{Deserialize, Serialize};

/// Slope components smaller than this treat a line as axis-aligned
const AXIS_ALIGNED_EPSILON: f64 = 1e-5;

/// Round to 0.01
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ==================== Summary & Verdict ====================

/// Min/max/mean of a set of values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl Summary {
    /// `None` for an empty set
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let (min, max, sum) = values.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
        );
        Some(Self {
            min,
            max,
            mean: sum / values.len() as f64,
            count: values.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// Nothing was measured
    NoData,
}

impl Verdict {
    fn from_bool(pass: bool) -> Self {
        if pass {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

/// Pass/fail check against one threshold
pub trait Evaluate {
    fn verdict(&self, threshold: f64) -> Verdict;
}

/// A measurement with the threshold it was judged against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluated<M> {
    #[serde(flatten)]
    pub measurement: M,
    pub threshold: f64,
    pub verdict: Verdict,
}

impl<M: Evaluate> Evaluated<M> {
    pub fn new(measurement: M, threshold: f64) -> Self {
        let verdict = measurement.verdict(threshold);
        Self {
            measurement,
            threshold,
            verdict,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

fn max_within(summary: Option<Summary>, threshold: f64) -> Verdict {
    summary.map_or(Verdict::NoData, |s| Verdict::from_bool(s.max <= threshold))
}

// ==================== Accuracy ====================

/// Repeated touches at one commanded point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMeasurement {
    pub target: Point,
    pub samples: Vec<Point>,
    /// Distance of each sample from the target
    pub errors: Vec<f64>,
    /// Signed (sample - target) per axis
    pub error_components: Vec<Point>,
    pub summary: Option<Summary>,
}

pub fn accuracy(target: Point, samples: &[Point]) -> AccuracyMeasurement {
    let error_components: Vec<Point> = samples
        .iter()
        .map(|s| Point::new(s.x - target.x, s.y - target.y))
        .collect();
    let errors: Vec<f64> = samples.iter().map(|s| s.distance_to(&target)).collect();
    AccuracyMeasurement {
        target,
        samples: samples.to_vec(),
        summary: Summary::of(&errors),
        errors,
        error_components,
    }
}

impl Evaluate for AccuracyMeasurement {
    fn verdict(&self, threshold: f64) -> Verdict {
        max_within(self.summary, threshold)
    }
}

// ==================== Jitter ====================

/// Touches held at one point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitterMeasurement {
    pub reference: Point,
    pub samples: Vec<Point>,
    /// Spread of per-axis distances from the reference
    pub jitter: Point,
}

/// Range of `|sample - reference|` on each axis
///
/// Zero when there are no samples.
pub fn jitter(reference: Point, samples: &[Point]) -> JitterMeasurement {
    let spread = |axis: fn(&Point) -> f64| {
        let distances = samples.iter().map(|s| (axis(s) - axis(&reference)).abs());
        let (min, max) = distances.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| {
            (lo.min(d), hi.max(d))
        });
        if samples.is_empty() {
            0.0
        } else {
            max - min
        }
    };
    JitterMeasurement {
        reference,
        samples: samples.to_vec(),
        jitter: Point::new(spread(|p| p.x), spread(|p| p.y)),
    }
}

impl Evaluate for JitterMeasurement {
    fn verdict(&self, threshold: f64) -> Verdict {
        if self.samples.is_empty() {
            return Verdict::NoData;
        }
        Verdict::from_bool(self.jitter.x <= threshold && self.jitter.y <= threshold)
    }
}

// ==================== Linearity ====================

/// Samples traced along one line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearityMeasurement {
    pub line: Line,
    pub samples: Vec<Point>,
    /// Distance of each kept sample from the line
    pub distances: Vec<f64>,
    /// Samples dropped for exceeding the outlier ceiling
    pub outliers: usize,
    pub summary: Option<Summary>,
}

/// Perpendicular distance of `sample` from the infinite line through `line`
///
/// Axis-aligned lines use the plain coordinate offset, rounded to 0.01.
pub fn linearity_distance(line: &Line, sample: Point) -> f64 {
    let (start, end) = (line.start(), line.end());
    let rise = end.y - start.y;
    let run = end.x - start.x;

    if rise.abs() < AXIS_ALIGNED_EPSILON {
        return round_to_hundredths(start.y - sample.y).abs();
    }
    if run.abs() < AXIS_ALIGNED_EPSILON {
        return round_to_hundredths(start.x - sample.x).abs();
    }

    let slope = rise / run;
    let intercept = start.y - slope * start.x;
    let normal = -1.0 / slope;
    let normal_intercept = sample.y - normal * sample.x;

    let x = (normal_intercept - intercept) / (slope - normal);
    let y = slope * x + intercept;
    sample.distance_to(&Point::new(x, y))
}

/// Distances of every sample, dropping those at or above `ceiling`
pub fn linearity(line: Line, samples: &[Point], ceiling: f64) -> LinearityMeasurement {
    let all: Vec<f64> = samples.iter().map(|s| linearity_distance(&line, *s)).collect();
    let distances: Vec<f64> = all.iter().copied().filter(|d| *d < ceiling).collect();
    LinearityMeasurement {
        line,
        samples: samples.to_vec(),
        outliers: all.len() - distances.len(),
        summary: Summary::of(&distances),
        distances,
    }
}

impl Evaluate for LinearityMeasurement {
    fn verdict(&self, threshold: f64) -> Verdict {
        max_within(self.summary, threshold)
    }
}

// ==================== SNR ====================

/// Signal and noise of one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeSnr {
    pub node: NodeAddress,
    pub noise: f64,
    pub signal: f64,
    pub snr: f64,
}

/// SNR of every node in a neighborhood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnrMeasurement {
    pub target: Point,
    pub center: NodeAddress,
    pub nodes: Vec<NodeSnr>,
    pub max_snr: f64,
}

/// SNR of one node from its idle and touching delta series
///
/// Noise is the idle peak-to-peak and signal the touching mean less that
/// noise. SNR is 0 when the node shows no noise.
pub fn node_snr(node: NodeAddress, idle: &[NodeDelta], touching: &[NodeDelta]) -> NodeSnr {
    let noise = match (idle.iter().max(), idle.iter().min()) {
        (Some(max), Some(min)) => f64::from(max.value()) - f64::from(min.value()),
        _ => 0.0,
    };
    let mean = if touching.is_empty() {
        0.0
    } else {
        touching.iter().map(|d| f64::from(d.value())).sum::<f64>() / touching.len() as f64
    };
    let signal = mean - noise;
    let snr = if noise == 0.0 { 0.0 } else { signal / noise };
    NodeSnr {
        node,
        noise,
        signal,
        snr,
    }
}

/// SNR over a neighborhood read with the finger up and then down
///
/// Nodes are paired by position in the two reads.
pub fn snr(
    target: Point,
    center: NodeAddress,
    idle: &NeighborhoodRead,
    touching: &NeighborhoodRead,
) -> SnrMeasurement {
    let nodes: Vec<NodeSnr> = idle
        .nodes
        .iter()
        .zip(idle.deltas.iter().zip(&touching.deltas))
        .map(|(&node, (idle, touching))| node_snr(node, idle, touching))
        .collect();
    let max_snr = nodes.iter().map(|n| n.snr).fold(0.0, f64::max);
    SnrMeasurement {
        target,
        center,
        nodes,
        max_snr,
    }
}

impl Evaluate for SnrMeasurement {
    fn verdict(&self, threshold: f64) -> Verdict {
        if self.nodes.is_empty() {
            return Verdict::NoData;
        }
        Verdict::from_bool(self.max_snr >= threshold)
    }
}
