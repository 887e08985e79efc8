//! Integration tests for calibration on the simulated rig
//!
//! These tests validate that calibration recovers the screen orientation:
//! - Origin corner, axis swap and mirroring for each panel mounting
//! - Probe points and touch reports landing in the same screen millimeters
//! - Once-per-session calibration and restoring an earlier result

#![cfg(feature = "mock-rig")]

mod common;

use common::assert_float_eq;
use common::builders::{full_panel_geometry, ConfigBuilder};
use common::rig::simulated_rig;
use touch_rig::calibration::CoordinateTransform;
use touch_rig::sim::ScreenMapping;
use touch_rig::types::{Point, Position};
use touch_rig::RigError;

/// Calibrate a freshly built rig with the given mounting
fn calibrate(swap: bool, flip_x: bool, flip_y: bool) -> (CoordinateTransform, ScreenMapping) {
    let config = ConfigBuilder::new().build();
    let rig = simulated_rig(&config, swap, flip_x, flip_y);
    let mapping = rig.mapping;
    let fisnar = rig.fisnar.clone();

    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));
    let transform = orchestrator.calibrate().unwrap();
    assert!(orchestrator.is_calibrated());
    assert_eq!(fisnar.position(), Position::new(0.0, 0.0, 0.0), "probe homed");
    (transform, mapping)
}

/// A touch at each probe point must read where the transform predicts
fn assert_consistent(transform: &CoordinateTransform, mapping: &ScreenMapping) {
    for point in [
        Point::new(30.0, 30.0),
        Point::new(101.0, 72.0),
        Point::new(170.0, 115.0),
    ] {
        let expected = transform.robot_to_screen(point);
        let seen = transform.screen_to_mm(mapping.to_screen(point));
        assert_float_eq(seen.x, expected.x, 0.11);
        assert_float_eq(seen.y, expected.y, 0.11);
    }
}

#[test]
fn test_aligned_panel() {
    let (transform, mapping) = calibrate(false, false, false);
    let c = transform.calibration;
    assert_eq!(c.origin_corner, Point::new(20.0, 20.0));
    assert!(!c.axes_swapped && !c.x_flip && !c.y_flip);
    assert_eq!(transform.scale.range, (1600, 1000));
    assert_eq!(transform.scale.extent_mm, (160.0, 100.0));
    assert_consistent(&transform, &mapping);
}

#[test]
fn test_mirrored_x_panel() {
    let (transform, mapping) = calibrate(false, true, false);
    let c = transform.calibration;
    assert_eq!(c.origin_corner, Point::new(180.0, 20.0));
    assert!(!c.axes_swapped);
    assert!(c.x_flip);
    assert!(!c.y_flip);
    assert_consistent(&transform, &mapping);
}

#[test]
fn test_rotated_panel() {
    let (transform, mapping) = calibrate(true, false, true);
    let c = transform.calibration;
    assert_eq!(c.origin_corner, Point::new(180.0, 20.0));
    assert!(c.axes_swapped);
    assert!(!c.x_flip);
    assert!(c.y_flip);
    // screen X runs along the panel's height
    assert_eq!(transform.scale.extent_mm, (100.0, 160.0));
    assert_consistent(&transform, &mapping);
}

#[test]
fn test_rotated_and_mirrored_panel() {
    let (transform, mapping) = calibrate(true, true, true);
    let c = transform.calibration;
    assert_eq!(c.origin_corner, Point::new(180.0, 120.0));
    assert!(c.axes_swapped && c.x_flip && c.y_flip);
    assert_consistent(&transform, &mapping);
}

#[test]
fn test_calibration_refused_twice() {
    let config = ConfigBuilder::new().build();
    let rig = simulated_rig(&config, false, false, false);
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));

    orchestrator.calibrate().unwrap();
    assert!(matches!(
        orchestrator.calibrate(),
        Err(RigError::AlreadyCalibrated)
    ));
}

#[test]
fn test_restored_calibration_skips_probing() {
    let (transform, _) = calibrate(true, false, true);

    let config = ConfigBuilder::new().build();
    let rig = simulated_rig(&config, true, false, true);
    let fisnar = rig.fisnar.clone();
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));

    orchestrator.restore_calibration(transform).unwrap();
    assert_eq!(orchestrator.transform(), Some(&transform));
    assert!(fisnar.commands().is_empty(), "no probe motion on restore");
    assert!(matches!(
        orchestrator.restore_calibration(transform),
        Err(RigError::AlreadyCalibrated)
    ));
}

#[test]
fn test_untouched_screen_fails_calibration() {
    let config = ConfigBuilder::new().build();
    let rig = simulated_rig(&config, false, false, false);
    // the finger no longer reaches the sensor
    rig.fisnar.set_observer(|_| {});
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));

    let err = orchestrator.calibrate().unwrap_err();
    assert!(matches!(err.root(), RigError::NoInput(_)), "got {}", err);
    assert!(!orchestrator.is_calibrated());
}
