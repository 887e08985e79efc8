//! Integration tests for complete test runs
//!
//! These tests validate the orchestrator against the simulated rig:
//! - Every test kind on aligned and rotated panels
//! - Results reports
//! - Failed iterations versus aborted runs

#![cfg(feature = "mock-rig")]

mod common;

use common::builders::{full_panel_geometry, ConfigBuilder};
use common::rig::{aligned_rig, simulated_rig};
use serial_test::serial;
use tempfile::tempdir;
use touch_rig::measurement::Verdict;
use touch_rig::orchestrator::{IterationOutcome, JsonReportSink, ReportSink, TestOrchestrator};
use touch_rig::sensor::maxtouch::MODEL_NAME;
use touch_rig::types::TestKind;
use touch_rig::RigError;

const PART: &str = "panel-7";

fn calibrated(config: &touch_rig::RigConfig, swap: bool, flip_y: bool) -> TestOrchestrator {
    let rig = simulated_rig(config, swap, false, flip_y);
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));
    orchestrator.calibrate().unwrap();
    orchestrator
}

#[test]
fn test_full_run_on_aligned_panel() {
    let config = ConfigBuilder::new().build();
    let mut orchestrator = calibrated(&config, false, false);

    orchestrator.run_tests(PART, &TestKind::ALL).unwrap();

    let part = orchestrator.results().part(PART).unwrap();
    assert!(part.aborted.is_none());
    for kind in TestKind::ALL {
        assert_eq!(part.iterations(kind), 1, "{} iterations", kind);
    }

    let accuracy = &part.accuracy[0].results;
    assert_eq!(accuracy.core.len(), 1);
    assert_eq!(accuracy.edge.len(), 1);
    for point in accuracy.iter() {
        assert_eq!(point.measurement.errors, vec![0.0, 0.0]);
        assert_eq!(point.verdict, Verdict::Pass);
    }

    let jitter = &part.jitter[0].results.core[0];
    assert!(!jitter.measurement.samples.is_empty());
    assert_eq!(jitter.verdict, Verdict::Pass);

    for line in part.linearity[0].results.iter() {
        assert!(!line.measurement.samples.is_empty());
        assert_eq!(line.measurement.outliers, 0);
        assert_eq!(line.verdict, Verdict::Pass);
    }

    let snr = &part.snr[0].results.core[0];
    assert_eq!(snr.measurement.nodes.len(), 9);
    assert!(snr.measurement.max_snr >= config.snr.thresholds.core);
    assert_eq!(snr.verdict, Verdict::Pass);

    assert!(part.passed());
}

#[test]
fn test_rotated_panel_measures_on_target() {
    let config = ConfigBuilder::new().build();
    let mut orchestrator = calibrated(&config, true, true);

    orchestrator
        .run_tests(PART, &[TestKind::Accuracy, TestKind::Linearity])
        .unwrap();

    let part = orchestrator.results().part(PART).unwrap();
    for point in part.accuracy[0].results.iter() {
        assert_eq!(point.measurement.errors, vec![0.0, 0.0]);
    }
    for line in part.linearity[0].results.iter() {
        let summary = line.measurement.summary.unwrap();
        assert!(summary.max < 0.2, "deviation {}", summary.max);
    }
    assert!(part.kind_passed(TestKind::Accuracy));
    assert!(part.kind_passed(TestKind::Linearity));
}

#[test]
fn test_report_written_after_run() {
    let config = ConfigBuilder::new().build();
    let mut orchestrator = calibrated(&config, false, false);
    orchestrator.run_tests(PART, &[TestKind::Accuracy]).unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("panel-7.json");
    let results = orchestrator.take_results();
    JsonReportSink::new(&path).write(&results).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["sensor_model"], MODEL_NAME);
    assert!(json["calibration"]["calibration"]["origin_corner"].is_object());
    let accuracy = &json["parts"][PART]["accuracy"][0];
    assert_eq!(accuracy["outcome"]["status"], "completed");
    assert_eq!(accuracy["results"]["edge"][0]["verdict"], "pass");

    // taken results leave a fresh set behind
    assert!(orchestrator.results().parts.is_empty());
    assert!(orchestrator.results().calibration.is_some());
}

#[test]
fn test_sensor_fault_fails_one_iteration() {
    let config = ConfigBuilder::new().iterations(2).build();
    let rig = aligned_rig(&config);
    let touch = rig.touch.clone();
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));
    orchestrator.calibrate().unwrap();

    touch.fail_next_exchange(0x05);
    orchestrator.run_tests(PART, &[TestKind::Accuracy]).unwrap();

    let part = orchestrator.results().part(PART).unwrap();
    assert!(part.aborted.is_none());
    assert_eq!(part.accuracy.len(), 2);
    match &part.accuracy[0].outcome {
        IterationOutcome::Failed { error } => assert!(error.contains("0x05"), "{}", error),
        other => panic!("expected a failed iteration, got {:?}", other),
    }
    assert!(part.accuracy[1].passed());
    assert!(!part.passed());
}

#[test]
#[serial]
fn test_stalled_probe_fails_iterations_without_aborting() {
    let config = ConfigBuilder::new().move_timeout_ms(200).build();
    let rig = aligned_rig(&config);
    let fisnar = rig.fisnar.clone();
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));
    orchestrator.calibrate().unwrap();

    // the probe sits at home, so the connectivity check still passes
    fisnar.set_stalled(true);
    orchestrator.run_tests(PART, &[TestKind::Accuracy]).unwrap();

    let part = orchestrator.results().part(PART).unwrap();
    assert!(part.aborted.is_none());
    match &part.accuracy[0].outcome {
        IterationOutcome::Failed { error } => assert!(error.contains("did not reach"), "{}", error),
        other => panic!("expected a timed out iteration, got {:?}", other),
    }
}

#[test]
fn test_unplugged_sensor_aborts_run() {
    let config = ConfigBuilder::new().iterations(3).build();
    let rig = aligned_rig(&config);
    let touch = rig.touch.clone();
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));
    orchestrator.calibrate().unwrap();

    touch.set_connected(false);
    let err = orchestrator
        .run_tests(PART, &[TestKind::Accuracy, TestKind::Jitter])
        .unwrap_err();
    assert!(matches!(err.root(), RigError::Transport(_)), "got {}", err);

    let part = orchestrator.results().part(PART).unwrap();
    assert!(part.aborted.is_some());
    assert_eq!(part.accuracy.len(), 1, "stopped at the first iteration");
    assert!(part.jitter.is_empty());
}

#[test]
fn test_disconnected_motion_fails_connectivity_check() {
    let config = ConfigBuilder::new().build();
    let rig = aligned_rig(&config);
    let fisnar = rig.fisnar.clone();
    let mut orchestrator = rig.into_orchestrator(Box::new(full_panel_geometry()));
    orchestrator.calibrate().unwrap();

    fisnar.set_connected(false);
    let err = orchestrator.run_tests(PART, &TestKind::ALL).unwrap_err();
    assert!(err.to_string().contains("Connectivity check"), "{}", err);
    assert!(orchestrator.results().part(PART).is_none());
}
