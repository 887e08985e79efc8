//! Microchip maXTouch object-protocol client
//!
//! Objects used, by address:
//!
//! | Object | Address  | Use                                         |
//! |--------|----------|---------------------------------------------|
//! | ID     | `0x0000` | matrix X/Y size at bytes 4 and 5            |
//! | T37    | `0x0106` | diagnostic page, read in three 62-byte parts |
//! | T44    | `0x0188` | pending message count                       |
//! | T5     | `0x0189` | message processor (one queue entry per read) |
//! | T6     | `0x0194` | reset (byte 0) and diagnostic command (byte 5) |
//! | T100   | `0x06FC` | touch configuration, X/Y coordinate ranges   |

use super::frame::{decode_delta, DeviceFrame, ObpRequest, FRAME_LEN};
use super::link::{ExchangeStats, SensorLink};
use super::page_map::{neighborhood_nodes, PageMap};
use super::{NeighborhoodRead, TouchSensor};
use crate::config::{Neighborhood, NodeCounts, SensorConfig};
use crate::error::{Result, ResultExt, RigError};
use crate::types::{NodeAddress, NodeDelta, ScreenPoint, TouchEvent, TouchSample};
use std::time::{Duration, Instant};

pub const MODEL_NAME: &str = "Microchip ATMXT1066T2";

const ID_BLOCK_ADDR: u16 = 0x0000;
const ID_BLOCK_LEN: u8 = 0x0A;
const ID_MATRIX_X: usize = 4;
const ID_MATRIX_Y: usize = 5;

const T37_PAGE_ADDRS: [u16; 3] = [0x0106, 0x0144, 0x0182];

/// Bytes fetched by each of the three diagnostic page reads
pub const DIAGNOSTIC_CHUNK: usize = 0x3E;

/// Mode and page bytes at the front of the first diagnostic read
const T37_HEADER_LEN: usize = 2;

const T44_COUNT_ADDR: u16 = 0x0188;
const T5_MESSAGE_ADDR: u16 = 0x0189;
const T5_MESSAGE_LEN: u8 = 0x0A;

const T6_RESET_ADDR: u16 = 0x0194;
const T6_DIAGNOSTIC_ADDR: u16 = 0x0199;

const T100_CONFIG_ADDR: u16 = 0x06FC;
const T100_CONFIG_LEN: u8 = 0x26;
const T100_X_RANGE: usize = 13;
const T100_Y_RANGE: usize = 24;
const RANGE_READ_ATTEMPTS: u32 = 10;

/// Report id of command processor messages
const T6_REPORT_ID: u8 = 1;
/// Report ids of the T100 touch reports
const T100_TOUCH_REPORTS: std::ops::RangeInclusive<u8> = 50..=65;

/// Command processor status sequence after a reset: reset, orientation, end
const RESET_HANDSHAKE: [(u8, &str); 3] = [
    (0x80, "reset flag"),
    (0x10, "orientation flag"),
    (0x00, "terminator"),
];
const RESET_SETTLE: Duration = Duration::from_millis(200);
const MAX_RESET_MESSAGES: usize = 64;

/// Diagnostic command written to the command processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiagnosticCommand {
    Disable = 0x00,
    PageUp = 0x01,
    PageDown = 0x02,
    Deltas = 0x10,
}

/// One decoded message-processor entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedMessage {
    pub report_id: u8,
    pub status: u8,
    pub position: ScreenPoint,
}

impl QueuedMessage {
    fn from_frame(frame: &DeviceFrame) -> Self {
        Self {
            report_id: frame.byte(0),
            status: frame.byte(1),
            position: ScreenPoint::new(frame.u16_le(2), frame.u16_le(4)),
        }
    }

    pub fn is_touch_report(&self) -> bool {
        T100_TOUCH_REPORTS.contains(&self.report_id)
    }

    pub fn event(&self) -> TouchEvent {
        TouchEvent::from_status(self.status)
    }
}

/// maXTouch controller client over any [`SensorLink`]
pub struct MaxTouch<L: SensorLink> {
    link: L,
    report_id: u8,
    timeout: Duration,
    page_map: PageMap,
    bounds: NodeCounts,
    max_page_seek_attempts: u32,
    stats: ExchangeStats,
}

impl<L: SensorLink> MaxTouch<L> {
    /// Connect to a controller: reset it, leave diagnostics off and read the
    /// matrix size from the information block
    pub fn open(link: L, config: &SensorConfig) -> Result<Self> {
        let mut sensor = Self {
            link,
            report_id: config.report_id,
            timeout: config.exchange_timeout(),
            page_map: PageMap::new(NodeCounts::new(0, 0), config.page_size),
            bounds: NodeCounts::new(0, 0),
            max_page_seek_attempts: config.max_page_seek_attempts,
            stats: ExchangeStats::default(),
        };

        sensor.reset().context("Sensor reset on connect")?;

        match sensor.diagnostic(DiagnosticCommand::Disable) {
            Ok(()) | Err(RigError::ProtocolFault { .. }) => {}
            Err(e) => return Err(e),
        }

        let id = sensor.read(ID_BLOCK_ADDR, ID_BLOCK_LEN)?;
        let matrix = NodeCounts::new(id.byte(ID_MATRIX_X) as u16, id.byte(ID_MATRIX_Y) as u16);
        sensor.page_map = PageMap::new(matrix, config.page_size);
        sensor.bounds = match config.node_counts {
            Some(counts) if counts.x > matrix.x || counts.y > matrix.y => {
                return Err(RigError::Config(format!(
                    "node counts {}x{} exceed the controller's {}x{} matrix",
                    counts.x, counts.y, matrix.x, matrix.y
                )));
            }
            Some(counts) => counts,
            None => matrix,
        };

        tracing::info!(
            "Connected to {} via {}: {}x{} matrix, {}x{} nodes in use",
            MODEL_NAME,
            sensor.link.describe(),
            matrix.x,
            matrix.y,
            sensor.bounds.x,
            sensor.bounds.y
        );
        Ok(sensor)
    }

    /// Matrix size reported by the information block
    pub fn matrix(&self) -> NodeCounts {
        self.page_map.matrix()
    }

    pub fn stats(&self) -> &ExchangeStats {
        &self.stats
    }

    fn read(&mut self, address: u16, len: u8) -> Result<DeviceFrame> {
        self.exchange(&ObpRequest::read(address, len))
    }

    fn write(&mut self, address: u16, payload: &[u8]) -> Result<DeviceFrame> {
        self.exchange(&ObpRequest::write(address, payload))
    }

    fn diagnostic(&mut self, command: DiagnosticCommand) -> Result<()> {
        self.write(T6_DIAGNOSTIC_ADDR, &[command as u8]).map(|_| ())
    }

    fn read_message(&mut self) -> Result<QueuedMessage> {
        let frame = self.read(T5_MESSAGE_ADDR, T5_MESSAGE_LEN)?;
        Ok(QueuedMessage::from_frame(&frame))
    }

    /// Discard whatever the link still holds from an earlier exchange
    fn flush_link(&mut self) -> Result<()> {
        let mut buf = [0u8; FRAME_LEN];
        while self.link.read_report(&mut buf, Duration::from_millis(1))? > 0 {
            tracing::trace!("Discarded stale report {:02X?}", &buf[..8]);
        }
        Ok(())
    }

    /// Read the first part of the diagnostic page, paging until the
    /// controller reports `wanted`
    fn seek_page(&mut self, wanted: u8) -> Result<DeviceFrame> {
        let mut frame = self.read(T37_PAGE_ADDRS[0], DIAGNOSTIC_CHUNK as u8)?;
        let mut attempts = 0;
        loop {
            let current = frame.byte(1);
            if current == wanted {
                return Ok(frame);
            }
            if attempts >= self.max_page_seek_attempts {
                return Err(RigError::PageSeek {
                    wanted,
                    last_seen: current,
                    attempts,
                });
            }
            attempts += 1;
            let step = if current > wanted {
                DiagnosticCommand::PageDown
            } else {
                DiagnosticCommand::PageUp
            };
            tracing::trace!("On diagnostic page {}, want {}: {:?}", current, wanted, step);
            self.diagnostic(step)?;
            frame = self.read(T37_PAGE_ADDRS[0], DIAGNOSTIC_CHUNK as u8)?;
        }
    }

    /// Read a whole diagnostic page; debug mode must already be on
    fn read_page(&mut self, page: u8) -> Result<Vec<u8>> {
        let page_size = self.page_map.page_size();
        let first = self.seek_page(page)?;

        let mut data = Vec::with_capacity(page_size);
        data.extend_from_slice(page_chunk(&first, T37_HEADER_LEN, DIAGNOSTIC_CHUNK)?);
        for &address in &T37_PAGE_ADDRS[1..] {
            if data.len() >= page_size {
                break;
            }
            let part = self.read(address, DIAGNOSTIC_CHUNK as u8)?;
            let take = (page_size - data.len()).min(DIAGNOSTIC_CHUNK);
            data.extend_from_slice(page_chunk(&part, 0, take)?);
        }
        data.truncate(page_size);
        Ok(data)
    }

    fn delta_in_page(&mut self, node: NodeAddress) -> Result<NodeDelta> {
        let location = self.page_map.require(node)?;
        let page = self.read_page(location.page)?;
        match page.get(location.offset..location.offset + 2) {
            Some(&[lo, hi]) => Ok(decode_delta(lo, hi)),
            _ => Err(RigError::Transport(format!(
                "diagnostic page {} holds {} bytes, node {} is at offset {}",
                location.page,
                page.len(),
                node,
                location.offset
            ))),
        }
    }
}

/// Payload bytes `start..end` of a diagnostic read
fn page_chunk(frame: &DeviceFrame, start: usize, end: usize) -> Result<&[u8]> {
    frame.payload().get(start..end).ok_or_else(|| {
        RigError::Transport(format!(
            "short diagnostic response: {} payload bytes, need {}",
            frame.payload().len(),
            end
        ))
    })
}

impl<L: SensorLink> TouchSensor for MaxTouch<L> {
    fn model(&self) -> &str {
        MODEL_NAME
    }

    fn exchange(&mut self, request: &ObpRequest) -> Result<DeviceFrame> {
        let outbound = request.encode(self.report_id)?;
        let start = Instant::now();

        let result = self.link.write_report(&outbound).and_then(|_| {
            let mut inbound = vec![0u8; FRAME_LEN];
            let n = self.link.read_report(&mut inbound, self.timeout)?;
            if n == 0 {
                return Err(RigError::Transport(format!(
                    "no response to {} within {:?}",
                    request, self.timeout
                )));
            }
            inbound.truncate(n);
            DeviceFrame::parse(request, outbound, inbound)
        });

        match &result {
            Ok(frame) => {
                self.stats
                    .record_success(start.elapsed().as_micros() as u64);
                tracing::trace!("{} -> {:02X?}", request, &frame.inbound[..8.min(frame.inbound.len())]);
            }
            Err(e) => {
                self.stats.record_failure();
                tracing::debug!("Exchange {} failed: {}", request, e);
            }
        }
        result
    }

    fn node_bounds(&self) -> NodeCounts {
        self.bounds
    }

    fn set_node_bounds(&mut self, bounds: NodeCounts) {
        let matrix = self.page_map.matrix();
        let fitted = NodeCounts::new(bounds.x.min(matrix.x), bounds.y.min(matrix.y));
        if fitted != bounds {
            tracing::warn!(
                "Node bounds {}x{} clamped to the {}x{} matrix",
                bounds.x,
                bounds.y,
                matrix.x,
                matrix.y
            );
        }
        self.bounds = fitted;
    }

    fn touch_range(&mut self) -> Result<(u16, u16)> {
        let mut last_status = 0;
        for attempt in 1..=RANGE_READ_ATTEMPTS {
            let frame = self.read(T100_CONFIG_ADDR, T100_CONFIG_LEN)?;
            let x_range = frame.u16_le(T100_X_RANGE);
            let y_range = frame.u16_le(T100_Y_RANGE);
            if x_range != 0 && y_range != 0 {
                tracing::debug!("Touch range {}x{}", x_range, y_range);
                return Ok((x_range, y_range));
            }
            last_status = frame.status.as_byte();
            tracing::debug!("Touch range read zero (attempt {})", attempt);
        }
        Err(RigError::ProtocolFault {
            status: last_status,
            command: format!(
                "touch range read zero {} times at 0x{:04X}",
                RANGE_READ_ATTEMPTS, T100_CONFIG_ADDR
            ),
        })
    }

    fn pending_message_count(&mut self) -> Result<u8> {
        Ok(self.read(T44_COUNT_ADDR, 1)?.byte(0))
    }

    fn discard_message(&mut self) -> Result<()> {
        self.read_message().map(|_| ())
    }

    fn read_touch_point(&mut self, count: u8) -> Result<Option<ScreenPoint>> {
        let mut latest: Option<ScreenPoint> = None;
        for _ in 0..count {
            let message = self.read_message()?;
            if !message.is_touch_report() {
                continue;
            }
            tracing::trace!("{:?} at {:?}", message.event(), message.position);
            if !message.position.is_unchanged_marker() {
                latest = Some(message.position);
            }
        }
        Ok(latest)
    }

    fn read_all_points(&mut self) -> Result<Vec<TouchSample>> {
        let count = self.pending_message_count()?;
        let mut samples = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let message = self.read_message()?;
            if message.is_touch_report() && !message.position.is_unchanged_marker() {
                samples.push(TouchSample {
                    position: message.position,
                    event: message.event(),
                });
            }
        }
        Ok(samples)
    }

    fn read_node_delta(&mut self, node: NodeAddress) -> Result<NodeDelta> {
        self.diagnostic(DiagnosticCommand::Deltas)?;
        let delta = self.delta_in_page(node);
        self.diagnostic(DiagnosticCommand::Disable)?;
        delta
    }

    fn read_neighborhood(
        &mut self,
        center: NodeAddress,
        neighborhood: Neighborhood,
        iterations: u32,
        delay: Duration,
    ) -> Result<NeighborhoodRead> {
        let nodes = neighborhood_nodes(center, neighborhood.radius(), self.bounds)?;
        let mut deltas = vec![Vec::with_capacity(iterations as usize); nodes.len()];
        tracing::debug!(
            "Reading {} nodes around {} ({} iterations)",
            nodes.len(),
            center,
            iterations
        );

        for _ in 0..iterations {
            self.diagnostic(DiagnosticCommand::Deltas)?;
            let burst = nodes
                .iter()
                .map(|&node| self.delta_in_page(node))
                .collect::<Result<Vec<_>>>();
            // debug mode goes off even when the burst failed
            let disabled = self.diagnostic(DiagnosticCommand::Disable);
            for (series, delta) in deltas.iter_mut().zip(burst?) {
                series.push(delta);
            }
            disabled?;
            std::thread::sleep(delay);
        }

        Ok(NeighborhoodRead { nodes, deltas })
    }

    fn reset(&mut self) -> Result<bool> {
        self.flush_link()?;
        self.write(T6_RESET_ADDR, &[0x01])?;
        std::thread::sleep(RESET_SETTLE);

        let mut handshake = Vec::new();
        let mut read = 0;
        loop {
            let count = self.pending_message_count()?;
            if count == 0 || read >= MAX_RESET_MESSAGES {
                break;
            }
            for _ in 0..count {
                let message = self.read_message()?;
                read += 1;
                if message.report_id == T6_REPORT_ID {
                    handshake.push(message.status);
                }
            }
        }

        for (i, (expected, name)) in RESET_HANDSHAKE.iter().enumerate() {
            match handshake.get(i) {
                Some(value) if value == expected => {}
                Some(value) => {
                    return Err(RigError::Reset(format!(
                        "{} was 0x{:02X}, expected 0x{:02X}",
                        name, value, expected
                    )))
                }
                None => {
                    return Err(RigError::Reset(format!(
                        "{} missing from handshake {:02X?}",
                        name, handshake
                    )))
                }
            }
        }

        tracing::info!("Sensor controller reset");
        Ok(true)
    }
}
