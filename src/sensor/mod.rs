//! Sensor controller protocol client
//!
//! This module talks to the capacitive-sensor controller over a report
//! oriented link and decodes its two data surfaces: the touch-event queue
//! and the paged diagnostic-delta memory map.
//!
//! # Components
//!
//! - [`TouchSensor`] - Per-model interface the rest of the rig drives
//! - [`MaxTouch`] - Microchip maXTouch object-protocol implementation
//! - [`SensorLink`] / [`HidLink`] - Report transport (USB HID on the rig)
//! - [`frame`] - Request/response framing and two's-complement decoding
//! - [`page_map`] - Node to diagnostic page mapping and neighborhood clamping
//! - [`SimulatedMaxTouch`] - Byte-level controller simulator (feature-gated)
//!
//! # Example
//!
//! ```ignore
//! use touch_rig::sensor::{HidLink, MaxTouch, TouchSensor};
//!
//! let link = HidLink::open(config.sensor.vendor_id, config.sensor.product_id)?;
//! let mut sensor = MaxTouch::open(link, &config.sensor)?;
//!
//! sensor.drain_queue()?;
//! let touch = sensor.await_single_touch(12)?;
//! println!("touched at {:?}", touch);
//! ```

pub mod frame;
pub mod link;
pub mod maxtouch;
pub mod page_map;
#[cfg(feature = "mock-rig")]
pub mod simulator;

pub use frame::{DeviceFrame, FrameStatus, ObpRequest};
pub use link::{ExchangeStats, HidLink, SensorLink};
pub use maxtouch::{MaxTouch, DIAGNOSTIC_CHUNK};
pub use page_map::PageMap;
#[cfg(feature = "mock-rig")]
pub use simulator::{SimulatedMaxTouch, SimulatorHandle};

use crate::config::{Neighborhood, NodeCounts};
use crate::error::{Result, RigError};
use crate::types::{NodeAddress, NodeDelta, ScreenPoint, TouchSample};
use std::time::Duration;

/// Empty queue polls tolerated by [`TouchSensor::await_touch_coordinate`]
pub const TOUCH_COORDINATE_POLLS: u32 = 100;

/// Queue entries the controller can hold; a larger count is a misread
pub const MAX_QUEUE_DEPTH: u8 = 12;

/// Drain rounds before giving up on a queue that keeps refilling
const MAX_DRAIN_ROUNDS: u32 = 64;

/// Delta series read around one center node
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborhoodRead {
    /// Nodes read, row by row (Y outer, X inner)
    pub nodes: Vec<NodeAddress>,
    /// One series per node, `iterations` long, in node order
    pub deltas: Vec<Vec<NodeDelta>>,
}

/// Unified interface for sensor controllers
///
/// One implementation exists per controller model; the rest of the rig
/// holds a `dyn TouchSensor` rather than branching on a model name.
/// Implementations must be `Send` so the trace sampler can poll from its
/// own thread.
#[cfg_attr(test, mockall::automock)]
pub trait TouchSensor: Send {
    /// Controller model name
    fn model(&self) -> &str;

    /// Run one request/response exchange
    ///
    /// Fails with [`RigError::ProtocolFault`] when the status byte is neither
    /// OK-with-data nor OK-write-only. Never retried here.
    fn exchange(&mut self, request: &ObpRequest) -> Result<DeviceFrame>;

    /// Node grid used for neighborhood clamping
    fn node_bounds(&self) -> NodeCounts;

    /// Restrict the node grid to the physically wired nodes, never past the
    /// controller's matrix
    fn set_node_bounds(&mut self, bounds: NodeCounts);

    /// Touch coordinate ranges (X, Y) in controller units
    fn touch_range(&mut self) -> Result<(u16, u16)>;

    /// Outstanding touch-queue entries; 0 is a normal steady state
    fn pending_message_count(&mut self) -> Result<u8>;

    /// Read and discard one queue entry
    fn discard_message(&mut self) -> Result<()>;

    /// Read `count` queue entries, keeping the most recent touch coordinate
    ///
    /// A (0, 0) coordinate repeats the previous one. Returns `None` when no
    /// entry carried a coordinate.
    fn read_touch_point(&mut self, count: u8) -> Result<Option<ScreenPoint>>;

    /// Drain the queue into decoded touch samples
    fn read_all_points(&mut self) -> Result<Vec<TouchSample>>;

    /// Delta of one node
    fn read_node_delta(&mut self, node: NodeAddress) -> Result<NodeDelta>;

    /// Delta series for the grid around `center`
    ///
    /// The grid is clamped inside [`node_bounds`](Self::node_bounds). Each
    /// iteration reads every node once, then sleeps `delay`.
    fn read_neighborhood(
        &mut self,
        center: NodeAddress,
        neighborhood: Neighborhood,
        iterations: u32,
        delay: Duration,
    ) -> Result<NeighborhoodRead>;

    /// Reset the controller and validate the post-reset handshake
    fn reset(&mut self) -> Result<bool>;

    /// Read and discard queue entries until the count reads 0
    ///
    /// Call before every fresh sampling window.
    fn drain_queue(&mut self) -> Result<()> {
        for _ in 0..MAX_DRAIN_ROUNDS {
            let count = self.pending_message_count()?;
            if count == 0 {
                return Ok(());
            }
            for _ in 0..count {
                self.discard_message()?;
            }
        }
        tracing::warn!(
            "Touch queue still refilling after {} drain rounds",
            MAX_DRAIN_ROUNDS
        );
        Ok(())
    }

    /// Poll until a touch coordinate is queued
    ///
    /// Every poll that yields no coordinate counts as an attempt; fails with
    /// [`RigError::NoInput`] after `max_attempts`.
    fn await_single_touch(&mut self, max_attempts: u32) -> Result<ScreenPoint> {
        let mut attempts = 0;
        while attempts < max_attempts {
            let count = self.pending_message_count()?;
            if count > 0 {
                if let Some(point) = self.read_touch_point(count)? {
                    return Ok(point);
                }
            }
            attempts += 1;
        }
        Err(RigError::NoInput(format!(
            "no touch reported after {} polls",
            max_attempts
        )))
    }

    /// Poll until a valid coordinate pair is read
    ///
    /// Bounded at [`TOUCH_COORDINATE_POLLS`] polls. A queue count above
    /// [`MAX_QUEUE_DEPTH`] means the count read something else.
    fn await_touch_coordinate(&mut self) -> Result<ScreenPoint> {
        for _ in 0..TOUCH_COORDINATE_POLLS {
            let count = self.pending_message_count()?;
            if count > MAX_QUEUE_DEPTH {
                return Err(RigError::ProtocolFault {
                    status: count,
                    command: format!(
                        "queue count {} exceeds the controller's depth of {}",
                        count, MAX_QUEUE_DEPTH
                    ),
                });
            }
            if count > 0 {
                if let Some(point) = self.read_touch_point(count)? {
                    return Ok(point);
                }
            }
        }
        Err(RigError::NoInput(format!(
            "no touch coordinate after {} polls",
            TOUCH_COORDINATE_POLLS
        )))
    }
}
