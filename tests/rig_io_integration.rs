//! Integration tests for sensor and probe I/O on the simulated rig
//!
//! These tests drive the real drivers over the simulated transports:
//! - Touches reported where the probe pressed
//! - Queue draining and diagnostic reads under a resting finger
//! - Traced moves, including a retried attempt

#![cfg(feature = "mock-rig")]

mod common;

use common::builders::ConfigBuilder;
use common::rig::aligned_rig;
use serial_test::serial;
use std::time::Duration;
use touch_rig::calibration::{CoordinateTransform, ScreenScale};
use touch_rig::config::{Neighborhood, NodeCounts};
use touch_rig::motion::{MotionDriver, MoveMode};
use touch_rig::sensor::TouchSensor;
use touch_rig::sim::SimulatedRig;
use touch_rig::trace_sampler::TraceSampler;
use touch_rig::types::{CalibrationResult, Point, Position};

const HOVER_Z: f64 = 20.0;
const TOUCH_Z: f64 = 50.0;

fn rig() -> SimulatedRig {
    aligned_rig(&ConfigBuilder::new().build())
}

fn press(rig: &mut SimulatedRig, point: Point) {
    assert!(rig.motion.move_to(Position::at(point, HOVER_Z), MoveMode::LINEAR).unwrap());
    assert!(rig.motion.move_to(Position::at(point, TOUCH_Z), MoveMode::LINEAR).unwrap());
}

fn lift(rig: &mut SimulatedRig, point: Point) {
    assert!(rig.motion.move_to(Position::at(point, HOVER_Z), MoveMode::LINEAR).unwrap());
}

/// The transform calibration finds for an aligned rig
fn aligned_transform(rig: &SimulatedRig) -> CoordinateTransform {
    CoordinateTransform::new(
        CalibrationResult {
            origin_corner: rig.mapping.origin,
            axes_swapped: false,
            x_flip: false,
            y_flip: false,
        },
        ScreenScale {
            range: rig.mapping.range,
            extent_mm: (160.0, 100.0),
        },
    )
}

#[test]
fn test_press_reports_mapped_coordinate() {
    let mut rig = rig();
    let point = Point::new(64.0, 87.0);

    press(&mut rig, point);
    lift(&mut rig, point);

    let touched = rig.sensor.await_touch_coordinate().unwrap();
    assert_eq!(touched, rig.mapping.to_screen(point));
}

#[test]
fn test_drain_after_lift_leaves_empty_queue() {
    let mut rig = rig();
    for point in [Point::new(40.0, 40.0), Point::new(90.0, 60.0), Point::new(150.0, 100.0)] {
        press(&mut rig, point);
        lift(&mut rig, point);
    }
    assert!(rig.sensor.pending_message_count().unwrap() > 0);

    rig.sensor.drain_queue().unwrap();
    assert_eq!(rig.sensor.pending_message_count().unwrap(), 0);
}

#[test]
fn test_neighborhood_raised_under_finger() {
    let mut rig = rig();
    let point = Point::new(101.0, 72.0);
    let center = rig
        .mapping
        .to_node(rig.mapping.to_screen(point), NodeCounts::new(32, 20));

    press(&mut rig, point);
    let touching = rig
        .sensor
        .read_neighborhood(center, Neighborhood::Coarse, 4, Duration::ZERO)
        .unwrap();
    lift(&mut rig, point);
    let idle = rig
        .sensor
        .read_neighborhood(center, Neighborhood::Coarse, 4, Duration::ZERO)
        .unwrap();

    let at_center = touching.nodes.iter().position(|&n| n == center).unwrap();
    assert!(touching.deltas[at_center].iter().all(|d| d.value() >= 396));
    for series in &idle.deltas {
        assert_eq!(series.len(), 4);
        assert!(series.iter().all(|d| d.value().abs() <= 4));
    }
}

#[test]
#[serial]
fn test_traced_line_follows_probe() {
    let mut rig = rig();
    let transform = aligned_transform(&rig);
    let (start, end) = (Point::new(40.0, 50.0), Point::new(160.0, 50.0));

    press(&mut rig, start);
    rig.motion.set_speed(10.0).unwrap();
    let samples = TraceSampler::default()
        .trace(
            &mut rig.motion,
            &mut rig.sensor,
            &transform,
            Position::at(start, TOUCH_Z),
            Position::at(end, TOUCH_Z),
            MoveMode::LINEAR,
        )
        .unwrap();

    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| s.y == 30.0));
    assert!(samples.iter().all(|s| (19.99..=140.01).contains(&s.x)));
    assert!(samples.windows(2).all(|w| w[0].x <= w[1].x), "queue order kept");
}

#[test]
fn test_trace_retried_after_sensor_fault() {
    let mut rig = rig();
    let transform = aligned_transform(&rig);
    let (start, end) = (Point::new(40.0, 50.0), Point::new(120.0, 50.0));

    press(&mut rig, start);
    let moves_before = rig.fisnar.commands().iter().filter(|c| c.starts_with("LA ")).count();

    rig.touch.fail_next_exchange(0x05);
    let samples = TraceSampler::default()
        .trace(
            &mut rig.motion,
            &mut rig.sensor,
            &transform,
            Position::at(start, TOUCH_Z),
            Position::at(end, TOUCH_Z),
            MoveMode::LINEAR,
        )
        .unwrap();

    assert!(!samples.is_empty());
    let moves = rig.fisnar.commands().iter().filter(|c| c.starts_with("LA ")).count();
    // failed attempt, return to the start, successful attempt
    assert_eq!(moves - moves_before, 3);
}
