//! Simulated Fisnar line device
//!
//! Parses the same command lines as the real controller and moves a virtual
//! probe toward its target each time the position is queried, so arrival
//! polling sees a probe that takes time to travel.

use super::port::LinePort;
use crate::config::MachineLimits;
use crate::error::{Result, RigError};
use crate::types::Position;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Simulated seconds that pass per position query
const DEFAULT_SECONDS_PER_POLL: f64 = 0.05;

/// Smallest step taken per poll, whatever the speed
const MIN_STEP_MM: f64 = 0.01;

type Observer = Box<dyn FnMut(Position) + Send>;

struct FisnarState {
    limits: MachineLimits,
    position: Position,
    target: Position,
    speed: f64,
    seconds_per_poll: f64,
    output: VecDeque<String>,
    commands: Vec<String>,
    connected: bool,
    stalled: bool,
    garbled: bool,
    observer: Option<Observer>,
}

impl FisnarState {
    fn clamp(&self, p: Position) -> Position {
        Position::new(
            p.x.clamp(0.0, self.limits.max_x),
            p.y.clamp(0.0, self.limits.max_y),
            p.z.clamp(0.0, self.limits.max_z),
        )
    }

    fn step(&mut self) {
        if self.stalled {
            return;
        }
        let (dx, dy, dz) = (
            self.target.x - self.position.x,
            self.target.y - self.position.y,
            self.target.z - self.position.z,
        );
        let remaining = (dx * dx + dy * dy + dz * dz).sqrt();
        let step = (self.speed * self.seconds_per_poll).max(MIN_STEP_MM);
        self.position = if remaining <= step {
            self.target
        } else {
            let f = step / remaining;
            Position::new(
                self.position.x + dx * f,
                self.position.y + dy * f,
                self.position.z + dz * f,
            )
        };
        let position = self.position;
        if let Some(observer) = self.observer.as_mut() {
            observer(position);
        }
    }

    fn execute(&mut self, line: &str) {
        let line = line.trim();
        self.commands.push(line.to_string());
        let (mnemonic, args) = line.split_once(' ').unwrap_or((line, ""));
        let axes: Vec<f64> = args
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        match (mnemonic, axes.as_slice()) {
            ("LA" | "MA", &[x, y, z]) => self.target = self.clamp(Position::new(x, y, z)),
            ("LAR" | "MAR", &[x, y, z]) => {
                let base = self.target;
                self.target = self.clamp(Position::new(base.x + x, base.y + y, base.z + z));
            }
            ("HM", _) => self.target = Position::new(0.0, 0.0, 0.0),
            ("SP", &[speed]) => self.speed = speed,
            ("PA", _) => {
                self.step();
                let p = self.position;
                let answer = if self.garbled {
                    "E?".to_string()
                } else {
                    format!("{},{},{}", p.x, p.y, p.z)
                };
                self.output.extend([ACK.to_string(), answer, ACK.to_string()]);
                return;
            }
            _ => {
                tracing::debug!("Simulated Fisnar ignored {:?}", line);
            }
        }
        self.output.push_back(ACK.to_string());
    }
}

const ACK: &str = "ok";

fn lock(state: &Mutex<FisnarState>) -> MutexGuard<'_, FisnarState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Simulated motion controller port
pub struct SimulatedFisnar {
    state: Arc<Mutex<FisnarState>>,
}

impl SimulatedFisnar {
    pub fn new(limits: MachineLimits) -> Self {
        Self {
            state: Arc::new(Mutex::new(FisnarState {
                limits,
                position: Position::new(0.0, 0.0, 0.0),
                target: Position::new(0.0, 0.0, 0.0),
                speed: 50.0,
                seconds_per_poll: DEFAULT_SECONDS_PER_POLL,
                output: VecDeque::new(),
                commands: Vec::new(),
                connected: true,
                stalled: false,
                garbled: false,
                observer: None,
            })),
        }
    }

    pub fn handle(&self) -> FisnarHandle {
        FisnarHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl LinePort for SimulatedFisnar {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(RigError::Transport("simulated motion port closed".into()));
        }
        state.execute(line);
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(lock(&self.state).output.pop_front())
    }

    fn clear_input(&mut self) -> Result<()> {
        lock(&self.state).output.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated Fisnar F4300N".to_string()
    }
}

/// Shared control surface of a [`SimulatedFisnar`]
#[derive(Clone)]
pub struct FisnarHandle {
    state: Arc<Mutex<FisnarState>>,
}

impl FisnarHandle {
    pub fn position(&self) -> Position {
        lock(&self.state).position
    }

    /// Place the probe, target included, without a move
    pub fn teleport(&self, position: Position) {
        let mut state = lock(&self.state);
        state.position = position;
        state.target = position;
    }

    pub fn speed(&self) -> f64 {
        lock(&self.state).speed
    }

    /// Every command line received, terminators stripped
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Simulated travel time per position query
    pub fn set_seconds_per_poll(&self, seconds: f64) {
        lock(&self.state).seconds_per_poll = seconds;
    }

    /// Probe stops moving; arrival never happens
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }

    /// Position answers become unparseable
    pub fn set_garbled(&self, garbled: bool) {
        lock(&self.state).garbled = garbled;
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Called with the probe position after every simulated step
    pub fn set_observer(&self, observer: impl FnMut(Position) + Send + 'static) {
        lock(&self.state).observer = Some(Box::new(observer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotionConfig;
    use crate::motion::{Fisnar, MotionDriver, MotionState, MoveMode};
    use std::time::Duration;

    fn fast_config() -> MotionConfig {
        MotionConfig {
            poll_interval_ms: 0,
            move_timeout_ms: 2_000,
            home_timeout_ms: 2_000,
            position_read_timeout_ms: 50,
            ..Default::default()
        }
    }

    fn driver() -> (Fisnar<SimulatedFisnar>, FisnarHandle) {
        let port = SimulatedFisnar::new(MachineLimits::default());
        let handle = port.handle();
        handle.set_seconds_per_poll(1.0);
        (Fisnar::new(port, &fast_config()), handle)
    }

    #[test]
    fn test_absolute_move_arrives() {
        let (mut fisnar, handle) = driver();
        fisnar.set_speed(100.0).unwrap();
        assert!(fisnar
            .move_to(Position::new(120.0, 80.0, 20.0), MoveMode::POINT_TO_POINT)
            .unwrap());
        let p = handle.position();
        assert!((p.x - 120.0).abs() < 1.0 && (p.y - 80.0).abs() < 1.0);
        assert_eq!(fisnar.state(), MotionState::Idle);
        assert!(handle.commands().contains(&"MA 120,80,20".to_string()));
    }

    #[test]
    fn test_relative_move_from_current() {
        let (mut fisnar, handle) = driver();
        handle.teleport(Position::new(50.0, 50.0, 10.0));
        fisnar.set_speed(100.0).unwrap();
        assert!(fisnar
            .move_to(Position::new(-20.0, 5.0, 0.0), MoveMode::LINEAR_RELATIVE)
            .unwrap());
        let p = handle.position();
        assert!((p.x - 30.0).abs() < 1.0 && (p.y - 55.0).abs() < 1.0);
    }

    #[test]
    fn test_goal_outside_envelope_does_not_poll() {
        let (mut fisnar, handle) = driver();
        let arrived = fisnar
            .await_arrival(Position::new(400.0, 10.0, 10.0), Duration::from_secs(1))
            .unwrap();
        assert!(arrived);
        assert!(handle.commands().is_empty());
    }

    #[test]
    fn test_stalled_probe_times_out() {
        let (mut fisnar, handle) = driver();
        handle.set_stalled(true);
        let result = fisnar.await_arrival(Position::new(10.0, 10.0, 10.0), Duration::from_millis(20));
        assert!(matches!(result, Err(RigError::Timeout(_))));
    }

    #[test]
    fn test_garbled_position_is_unknown() {
        let (mut fisnar, handle) = driver();
        handle.set_garbled(true);
        assert_eq!(fisnar.current_position().unwrap(), Position::UNKNOWN);

        let relative = fisnar.move_to(Position::new(1.0, 1.0, 1.0), MoveMode::LINEAR_RELATIVE);
        assert!(matches!(relative, Err(RigError::Timeout(_))));
    }

    #[test]
    fn test_closed_port_reports_false() {
        let (mut fisnar, handle) = driver();
        handle.set_connected(false);
        assert!(!fisnar.home().unwrap());
        assert_eq!(fisnar.state(), MotionState::Disconnected);
    }
}
