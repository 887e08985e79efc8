//! # Touch-Rig: Automated Touchscreen Test Rig
//!
//! Drives a probe finger over a capacitive touchscreen and measures how well
//! the sensor controller reports the touches. The probe is a Fisnar F4300N
//! gantry on a serial line; the sensor is a maXTouch controller behind a USB
//! HID bridge.
//!
//! ## Architecture
//!
//! - **Sensor**: Object protocol frames over HID, touch queue and diagnostic
//!   delta reads ([`sensor`])
//! - **Motion**: Fisnar command lines, arrival polling ([`motion`])
//! - **Calibration**: Works out which probe corner is the screen origin and
//!   how the screen axes run ([`calibration`])
//! - **Measurement**: Accuracy, jitter, linearity and SNR formulas
//!   ([`measurement`])
//! - **Trace sampling**: Samples the sensor while a move is in flight
//!   ([`trace_sampler`])
//! - **Orchestrator**: Runs the requested tests per part and collects results
//!   ([`orchestrator`])
//!
//! ## Configuration
//!
//! The rig configuration (`rig.toml`) and result files are stored in the
//! platform-appropriate data directory under `dev.hxyulin.touch-rig`; see
//! [`config`].
//!
//! ## Example
//!
//! ```ignore
//! use touch_rig::{
//!     config::RigConfig,
//!     geometry::StaticGeometry,
//!     motion::{Fisnar, SerialLinePort},
//!     orchestrator::TestOrchestrator,
//!     sensor::{HidLink, MaxTouch},
//!     types::TestKind,
//! };
//!
//! let config = RigConfig::load_or_default(RigConfig::default_path()?);
//! let sensor = MaxTouch::open(
//!     HidLink::open(config.sensor.vendor_id, config.sensor.product_id)?,
//!     &config.sensor,
//! )?;
//! let port = SerialLinePort::open(
//!     &config.motion.port,
//!     config.motion.baud_rate,
//!     config.motion.line_timeout(),
//! )?;
//! let motion = Fisnar::new(port, &config.motion);
//! let geometry = StaticGeometry::load("panel.json", config.session.finger_offset)?;
//!
//! let mut rig = TestOrchestrator::new(
//!     Box::new(motion),
//!     Box::new(sensor),
//!     Box::new(geometry),
//!     config,
//! );
//! rig.calibrate()?;
//! rig.run_tests("panel-7", &TestKind::ALL)?;
//! ```

pub mod calibration;
pub mod config;
pub mod error;
pub mod geometry;
pub mod measurement;
pub mod motion;
pub mod orchestrator;
pub mod sensor;
#[cfg(feature = "mock-rig")]
pub mod sim;
pub mod trace_sampler;
pub mod types;

// Re-export commonly used types
pub use calibration::{CalibrationEngine, CoordinateTransform, ScreenScale};
pub use config::RigConfig;
pub use error::{Result, RigError};
pub use geometry::{ActiveArea, GeometryProvider, StaticGeometry};
pub use motion::{Fisnar, MotionDriver};
pub use orchestrator::{JsonReportSink, ReportSink, RunResults, TestOrchestrator};
pub use sensor::{MaxTouch, TouchSensor};
pub use trace_sampler::TraceSampler;
pub use types::{Point, Position, ScreenPoint, TestCategory, TestKind};
