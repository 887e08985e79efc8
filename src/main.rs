//! Touch Rig - Command Line Entry Point
//!
//! Calibrates the probe against a part and runs touchscreen tests, either on
//! the real rig or on the simulated one (`--simulate`).

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use touch_rig::{
    config::{Neighborhood, RigConfig},
    geometry::{ActiveArea, GeometryProvider, StaticGeometry},
    motion::{available_ports, Fisnar, MotionDriver, SerialLinePort},
    orchestrator::{JsonReportSink, ReportSink, TestOrchestrator},
    sensor::{HidLink, MaxTouch, TouchSensor},
    types::{Point, TestKind},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "touch-rig", version, about = "Automated touchscreen test rig")]
struct Cli {
    /// Rig configuration file (TOML); the app data copy is used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write a daily rolling log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Use the simulated rig instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports the motion controller could be on
    Ports,
    /// Reset the sensor controller and check its handshake
    Reset,
    /// Calibrate the probe against a part and print the result
    Calibrate {
        #[command(flatten)]
        source: PartArgs,
    },
    /// Calibrate, then run tests and write the results as JSON
    Run {
        #[command(flatten)]
        source: PartArgs,

        /// Part identifier results are filed under
        #[arg(long)]
        part: String,

        /// Tests to run, in order
        #[arg(long, value_delimiter = ',', default_value = "accuracy,jitter,linearity,snr")]
        tests: Vec<TestKind>,

        /// Read a 5x5 node neighborhood for SNR instead of 3x3
        #[arg(long)]
        fine_snr: bool,

        /// Results file; a timestamped file in the results directory when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct PartArgs {
    /// Part geometry file (JSON)
    #[arg(long)]
    geometry: PathBuf,
}

/// Active area of the simulated part when no geometry is given
const SIMULATED_AREA: (Point, Point) = (Point::new(20.0, 20.0), Point::new(180.0, 120.0));

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Ports => {
            let ports = available_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}\t{}", port.name, port.kind);
            }
        }
        Command::Reset => {
            let area = ActiveArea::from_bounds(SIMULATED_AREA.0, SIMULATED_AREA.1)?;
            let (_, mut sensor) = open_rig(&config, cli.simulate, area)?;
            if !sensor.reset()? {
                bail!("Sensor controller did not complete its reset handshake");
            }
            println!("{}: reset OK", sensor.model());
        }
        Command::Calibrate { source } => {
            let mut rig = open_orchestrator(&config, cli.simulate, &source)?;
            let transform = rig.calibrate()?;
            println!("{}", serde_json::to_string_pretty(&transform)?);
        }
        Command::Run {
            source,
            part,
            tests,
            fine_snr,
            out,
        } => {
            let mut rig = open_orchestrator(&config, cli.simulate, &source)?;
            if fine_snr {
                rig.set_neighborhood(Neighborhood::Fine);
            }
            rig.calibrate()?;
            let outcome = rig.run_tests(&part, &tests);

            let mut sink = match out {
                Some(path) => JsonReportSink::new(path),
                None => JsonReportSink::in_results_dir(&part)?,
            };
            let results = rig.take_results();
            sink.write(&results)?;

            outcome.with_context(|| format!("Run for {} aborted", part))?;
            let passed = results.part(&part).is_some_and(|p| p.passed());
            println!(
                "{}: {} ({})",
                part,
                if passed { "PASS" } else { "FAIL" },
                sink.path().display()
            );
        }
    }

    Ok(())
}

fn init_logging(log_dir: Option<&std::path::Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "touch-rig.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,touch_rig=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<RigConfig> {
    match path {
        Some(path) => {
            let config = RigConfig::load(path)?;
            tracing::info!("Loaded rig config from {}", path.display());
            Ok(config)
        }
        None => Ok(RigConfig::load_or_default(RigConfig::default_path()?)),
    }
}

fn open_orchestrator(
    config: &RigConfig,
    simulate: bool,
    source: &PartArgs,
) -> anyhow::Result<TestOrchestrator> {
    let geometry = StaticGeometry::load(&source.geometry, config.session.finger_offset)?;
    let (motion, sensor) = open_rig(config, simulate, geometry.active_area().clone())?;
    Ok(TestOrchestrator::new(
        motion,
        sensor,
        Box::new(geometry),
        config.clone(),
    ))
}

#[cfg(feature = "mock-rig")]
fn open_rig(
    config: &RigConfig,
    simulate: bool,
    area: ActiveArea,
) -> anyhow::Result<(Box<dyn MotionDriver>, Box<dyn TouchSensor>)> {
    if simulate {
        tracing::info!("Using the simulated rig");
        let rig = touch_rig::sim::SimulatedRig::builder(area)
            .config(config.clone())
            .build()?;
        return Ok(rig.into_parts());
    }
    open_hardware(config)
}

#[cfg(not(feature = "mock-rig"))]
fn open_rig(
    config: &RigConfig,
    simulate: bool,
    _area: ActiveArea,
) -> anyhow::Result<(Box<dyn MotionDriver>, Box<dyn TouchSensor>)> {
    if simulate {
        bail!("This build has no simulated rig (feature `mock-rig` is off)");
    }
    open_hardware(config)
}

fn open_hardware(
    config: &RigConfig,
) -> anyhow::Result<(Box<dyn MotionDriver>, Box<dyn TouchSensor>)> {
    let link = HidLink::open(config.sensor.vendor_id, config.sensor.product_id)?;
    let sensor = MaxTouch::open(link, &config.sensor).context("Opening sensor controller")?;

    let port = SerialLinePort::open(
        &config.motion.port,
        config.motion.baud_rate,
        config.motion.line_timeout(),
    )
    .context("Opening motion controller")?;
    let motion = Fisnar::new(port, &config.motion);

    Ok((Box::new(motion), Box::new(sensor)))
}
