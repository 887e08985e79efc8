//! Fisnar F4300N command set
//!
//! | Command          | Meaning                              |
//! |------------------|--------------------------------------|
//! | `LA x,y,z`       | absolute linear move                 |
//! | `LAR dx,dy,dz`   | relative linear move                 |
//! | `MA x,y,z`       | absolute point-to-point move         |
//! | `MAR dx,dy,dz`   | relative point-to-point move         |
//! | `HM`             | home                                 |
//! | `SP v`           | point-to-point speed in mm/s         |
//! | `PA`             | position query, answered `x,y,z`     |
//!
//! Position answers are surrounded by `ok` acknowledgement lines.

use super::port::LinePort;
use super::{has_arrived, within_envelope, MotionDriver, MotionState, MoveMode};
use crate::config::{MachineLimits, MotionConfig};
use crate::error::{Result, RigError};
use crate::types::Position;
use std::time::{Duration, Instant};

/// Longest coordinate string the firmware accepts
const MAX_COORDINATE_CHARS: usize = 5;

/// Lines read after a position query before giving up on the answer
const MAX_POSITION_LINES: usize = 8;

const ACK: &str = "ok";

/// Fisnar F4300N driver over any [`LinePort`]
pub struct Fisnar<P: LinePort> {
    port: P,
    config: MotionConfig,
    state: MotionState,
}

impl<P: LinePort> Fisnar<P> {
    pub fn new(port: P, config: &MotionConfig) -> Self {
        tracing::info!("Motion controller on {}", port.describe());
        Self {
            port,
            config: config.clone(),
            state: MotionState::Idle,
        }
    }

    fn send(&mut self, command: &str) -> Result<()> {
        tracing::trace!("-> {:?}", command);
        self.port.write_line(command)
    }

    /// Send a command whose failure is reported as `Ok(false)`
    fn send_or_report(&mut self, command: &str) -> bool {
        match self.send(command) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Motion command {:?} not sent: {}", command.trim_end(), e);
                self.state = MotionState::Disconnected;
                false
            }
        }
    }

    /// Wait for a readable position, re-polling while the report is unknown
    fn known_position(&mut self) -> Result<Position> {
        let start = Instant::now();
        loop {
            let position = self.current_position()?;
            if position.is_known() {
                return Ok(position);
            }
            if start.elapsed() > self.config.position_read_timeout() {
                return Err(RigError::Timeout(format!(
                    "no valid position report within {:?}",
                    self.config.position_read_timeout()
                )));
            }
            std::thread::sleep(self.config.poll_interval());
        }
    }
}

/// Format one axis value the way the firmware expects
///
/// Returns the command text and the value it actually encodes.
pub fn format_coordinate(value: f64) -> (String, f64) {
    let text: String = value.to_string().chars().take(MAX_COORDINATE_CHARS).collect();
    let encoded = text.parse().unwrap_or(value);
    (text, encoded)
}

/// Clamp one axis to `[0, max]`, or only to `max` for displacements
fn clamp_axis(value: f64, max: f64, relative: bool) -> f64 {
    if value > max {
        max
    } else if !relative && value < 0.0 {
        0.0
    } else {
        value
    }
}

/// Parse an `x,y,z` position answer
pub fn parse_position(line: &str) -> Option<Position> {
    let mut axes = line.trim().split(',').map(|s| s.trim().parse::<f64>());
    let position = Position::new(
        axes.next()?.ok()?,
        axes.next()?.ok()?,
        axes.next()?.ok()?,
    );
    if axes.next().is_some() {
        return None;
    }
    Some(position)
}

/// Build a move command and the coordinates it encodes
pub fn move_command(target: Position, mode: MoveMode, limits: MachineLimits) -> (String, Position) {
    let (x, ex) = format_coordinate(clamp_axis(target.x, limits.max_x, mode.relative));
    let (y, ey) = format_coordinate(clamp_axis(target.y, limits.max_y, mode.relative));
    let (z, ez) = format_coordinate(clamp_axis(target.z, limits.max_z, mode.relative));
    let mnemonic = match (mode.relative, mode.continuous) {
        (false, true) => "LA",
        (true, true) => "LAR",
        (false, false) => "MA",
        (true, false) => "MAR",
    };
    (
        format!("{} {},{},{} \r\n", mnemonic, x, y, z),
        Position::new(ex, ey, ez),
    )
}

impl<P: LinePort> MotionDriver for Fisnar<P> {
    fn state(&self) -> MotionState {
        self.state
    }

    fn limits(&self) -> MachineLimits {
        self.config.limits
    }

    fn move_to(&mut self, target: Position, mode: MoveMode) -> Result<bool> {
        let (command, encoded) = move_command(target, mode, self.config.limits);
        let goal = if mode.relative {
            let start = self.known_position()?;
            Position::new(start.x + encoded.x, start.y + encoded.y, start.z + encoded.z)
        } else {
            encoded
        };

        if !self.send_or_report(&command) {
            return Ok(false);
        }
        tracing::debug!("Moving to {}", goal);
        self.await_arrival(goal, self.config.move_timeout())
    }

    fn home(&mut self) -> Result<bool> {
        if !self.send_or_report("HM\r\n") {
            return Ok(false);
        }
        self.await_arrival(Position::new(0.0, 0.0, 0.0), self.config.home_timeout())
    }

    fn set_speed(&mut self, mm_per_sec: f64) -> Result<()> {
        tracing::debug!("Probe speed {} mm/s", mm_per_sec);
        self.send(&format!("SP {}\r\n", mm_per_sec))
    }

    fn current_position(&mut self) -> Result<Position> {
        self.port.clear_input()?;
        self.send("PA\r\n")?;

        for _ in 0..MAX_POSITION_LINES {
            let Some(line) = self.port.read_line()? else {
                tracing::debug!("Position query timed out");
                return Ok(Position::UNKNOWN);
            };
            let line = line.trim();
            if line.is_empty() || line.eq_ignore_ascii_case(ACK) {
                continue;
            }
            return Ok(parse_position(line).unwrap_or_else(|| {
                tracing::debug!("Malformed position report {:?}", line);
                Position::UNKNOWN
            }));
        }
        Ok(Position::UNKNOWN)
    }

    fn await_arrival(&mut self, goal: Position, timeout: Duration) -> Result<bool> {
        if !within_envelope(goal, self.config.limits) {
            tracing::debug!("Goal {} outside the envelope, not waiting", goal);
            return Ok(true);
        }

        let start = Instant::now();
        self.state = MotionState::Moving;
        loop {
            let position = match self.current_position() {
                Ok(position) => position,
                Err(e) => {
                    self.state = MotionState::Disconnected;
                    return Err(e);
                }
            };
            if position.is_known()
                && has_arrived(position, goal, self.config.arrival_tolerance_mm)
            {
                self.state = MotionState::Idle;
                return Ok(true);
            }
            if start.elapsed() > timeout {
                self.state = MotionState::Idle;
                return Err(RigError::Timeout(format!(
                    "probe at {} did not reach {} within {:?}",
                    position, goal, timeout
                )));
            }
            std::thread::sleep(self.config.poll_interval());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_truncated_to_five_chars() {
        assert_eq!(format_coordinate(65.3985), ("65.39".to_string(), 65.39));
        assert_eq!(format_coordinate(30.0), ("30".to_string(), 30.0));
        assert_eq!(format_coordinate(-12.25), ("-12.2".to_string(), -12.2));
    }

    #[test]
    fn test_absolute_command_clamps() {
        let (command, encoded) = move_command(
            Position::new(350.0, -5.0, 20.5),
            MoveMode::LINEAR,
            MachineLimits::default(),
        );
        assert_eq!(command, "LA 300,0,20.5 \r\n");
        assert_eq!(encoded, Position::new(300.0, 0.0, 20.5));
    }

    #[test]
    fn test_relative_command_keeps_negative() {
        let (command, _) = move_command(
            Position::new(-10.0, 0.0, 150.0),
            MoveMode::POINT_TO_POINT_RELATIVE,
            MachineLimits::default(),
        );
        assert_eq!(command, "MAR -10,0,100 \r\n");
    }

    #[test]
    fn test_mnemonics() {
        let limits = MachineLimits::default();
        let p = Position::new(1.0, 2.0, 3.0);
        assert!(move_command(p, MoveMode::POINT_TO_POINT, limits).0.starts_with("MA "));
        assert!(move_command(p, MoveMode::LINEAR_RELATIVE, limits).0.starts_with("LAR "));
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(
            parse_position("80,90,65.3985"),
            Some(Position::new(80.0, 90.0, 65.3985))
        );
        assert_eq!(parse_position("80,90"), None);
        assert_eq!(parse_position("80,90,1,2"), None);
        assert_eq!(parse_position("error"), None);
    }
}
