//! Simulated rig construction helpers

use super::builders::panel_area;
use touch_rig::config::RigConfig;
use touch_rig::sim::SimulatedRig;

/// Simulated seconds per position query; keeps moves to a few dozen polls
pub const FAST_SECONDS_PER_POLL: f64 = 0.2;

/// A simulated rig over the test panel with the given screen orientation
pub fn simulated_rig(config: &RigConfig, swap_axes: bool, flip_x: bool, flip_y: bool) -> SimulatedRig {
    SimulatedRig::builder(panel_area())
        .swap_axes(swap_axes)
        .flip(flip_x, flip_y)
        .seconds_per_poll(FAST_SECONDS_PER_POLL)
        .config(config.clone())
        .build()
        .unwrap()
}

/// A simulated rig whose screen axes match the probe axes
pub fn aligned_rig(config: &RigConfig) -> SimulatedRig {
    simulated_rig(config, false, false, false)
}
