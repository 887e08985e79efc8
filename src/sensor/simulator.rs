//! Byte-level maXTouch simulator
//!
//! Answers the same object-protocol frames as a real controller: the touch
//! queue, the paged diagnostic memory, the command processor and the
//! information and touch configuration blocks. Tests and the simulated rig
//! steer it through a [`SimulatorHandle`].

use super::frame::{encode_delta, encode_response, ObpRequest, FRAME_LEN, STATUS_OK_DATA, STATUS_OK_WRITE};
use super::link::SensorLink;
use super::page_map::{PageMap, BYTES_PER_NODE};
use super::MAX_QUEUE_DEPTH;
use crate::config::{NodeCounts, DEFAULT_PAGE_SIZE};
use crate::error::{Result, RigError};
use crate::types::{NodeAddress, NodeDelta, ScreenPoint, TouchEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Report id used for simulated touch reports
pub const SIM_TOUCH_REPORT_ID: u8 = 50;

/// Detect bit set in the status byte of every touch report
const DETECT: u8 = 0x80;

const EMPTY_QUEUE_REPORT_ID: u8 = 0xFF;
const MESSAGE_LEN: usize = 10;
const T37_MODE_DELTAS: u8 = 0x10;

type Message = [u8; MESSAGE_LEN];

fn touch_message(event: TouchEvent, position: ScreenPoint) -> Message {
    let [xl, xh] = position.x.to_le_bytes();
    let [yl, yh] = position.y.to_le_bytes();
    [
        SIM_TOUCH_REPORT_ID,
        DETECT | event.code(),
        xl,
        xh,
        yl,
        yh,
        0,
        0,
        0,
        0,
    ]
}

struct SensorState {
    matrix: NodeCounts,
    range: (u16, u16),
    page_size: usize,
    queue: VecDeque<Message>,
    forced_count: Option<u8>,
    deltas: HashMap<NodeAddress, i16>,
    press: Option<(NodeAddress, i16)>,
    held: Option<ScreenPoint>,
    noise_amplitude: i16,
    noise_seed: u32,
    diagnostic_mode: u8,
    page: u8,
    page_frozen: bool,
    handshake: Vec<u8>,
    pending_fault: Option<u8>,
    connected: bool,
    responses: VecDeque<Vec<u8>>,
    exchanges: u64,
}

impl SensorState {
    fn new(matrix: NodeCounts, range: (u16, u16)) -> Self {
        Self {
            matrix,
            range,
            page_size: DEFAULT_PAGE_SIZE,
            queue: VecDeque::new(),
            forced_count: None,
            deltas: HashMap::new(),
            press: None,
            held: None,
            noise_amplitude: 0,
            noise_seed: 0x2545_F491,
            diagnostic_mode: 0,
            page: 0,
            page_frozen: false,
            handshake: vec![0x80, 0x10, 0x00],
            pending_fault: None,
            connected: true,
            responses: VecDeque::new(),
            exchanges: 0,
        }
    }

    fn page_count(&self) -> u8 {
        let nodes = self.matrix.x as usize * self.matrix.y as usize;
        let per_page = (self.page_size / BYTES_PER_NODE).max(1);
        nodes.div_ceil(per_page).clamp(1, u8::MAX as usize) as u8
    }

    fn enqueue(&mut self, message: Message) {
        if self.queue.len() >= MAX_QUEUE_DEPTH as usize {
            tracing::trace!("Simulated touch queue full, dropping {:02X?}", message);
            return;
        }
        self.queue.push_back(message);
    }

    fn next_noise(&mut self) -> i16 {
        if self.noise_amplitude == 0 {
            return 0;
        }
        let mut x = self.noise_seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise_seed = x;
        let span = 2 * self.noise_amplitude as i32 + 1;
        ((x % span as u32) as i32 - self.noise_amplitude as i32) as i16
    }

    fn delta_of(&mut self, node: NodeAddress) -> i16 {
        let mut value = self.deltas.get(&node).copied().unwrap_or(0);
        if let Some((center, signal)) = self.press {
            let dx = node.x.abs_diff(center.x);
            let dy = node.y.abs_diff(center.y);
            if dx <= 1 && dy <= 1 {
                value = value.saturating_add(signal >> (dx + dy));
            }
        }
        value.saturating_add(self.next_noise())
    }

    fn page_data(&mut self) -> Vec<u8> {
        let mut data = vec![0u8; self.page_size];
        if self.diagnostic_mode != T37_MODE_DELTAS {
            return data;
        }
        let map = PageMap::new(self.matrix, self.page_size);
        let per_page = map.nodes_per_page();
        let first = self.page as usize * per_page;
        for (slot, node_number) in (first..first + per_page).enumerate() {
            let (x, y) = (
                node_number / self.matrix.y.max(1) as usize,
                node_number % self.matrix.y.max(1) as usize,
            );
            if x >= self.matrix.x as usize {
                break;
            }
            let delta = self.delta_of(NodeAddress::new(x as u16, y as u16));
            let [lo, hi] = encode_delta(NodeDelta(delta));
            data[slot * BYTES_PER_NODE] = lo;
            data[slot * BYTES_PER_NODE + 1] = hi;
        }
        data
    }

    fn diagnostic_part(&mut self, part: usize, len: usize) -> Vec<u8> {
        let page = self.page_data();
        let mut header = Vec::new();
        let start = if part == 0 {
            header.extend_from_slice(&[self.diagnostic_mode, self.page]);
            0
        } else {
            len * part - 2
        };
        let body_len = len - header.len();
        let mut out = header;
        for i in start..start + body_len {
            out.push(page.get(i).copied().unwrap_or(0));
        }
        out
    }

    fn write(&mut self, address: u16, payload: &[u8]) {
        let command = payload.first().copied().unwrap_or(0);
        match address {
            0x0194 if command != 0 => {
                self.queue.clear();
                self.diagnostic_mode = 0;
                if !self.page_frozen {
                    self.page = 0;
                }
                for status in self.handshake.clone() {
                    self.enqueue([1, status, 0, 0, 0, 0, 0, 0, 0, 0]);
                }
            }
            0x0199 => match command {
                0x01 if !self.page_frozen => {
                    self.page = (self.page + 1).min(self.page_count() - 1);
                }
                0x02 if !self.page_frozen => self.page = self.page.saturating_sub(1),
                0x01 | 0x02 => {}
                mode => self.diagnostic_mode = mode,
            },
            _ => {}
        }
    }

    fn read(&mut self, address: u16, len: usize) -> Vec<u8> {
        match address {
            0x0000 => {
                let mut id = vec![0xA6, 0x20, 0x10, 0xAA, self.matrix.x as u8, self.matrix.y as u8, 0x2A];
                id.resize(len, 0);
                id
            }
            0x0106 => self.diagnostic_part(0, len),
            0x0144 => self.diagnostic_part(1, len),
            0x0182 => self.diagnostic_part(2, len),
            0x0188 => {
                if let (true, Some(position)) = (self.queue.is_empty(), self.held) {
                    self.enqueue(touch_message(TouchEvent::Move, position));
                }
                let count = self
                    .forced_count
                    .unwrap_or(self.queue.len().min(u8::MAX as usize) as u8);
                vec![count]
            }
            0x0189 => {
                let mut message = self.queue.pop_front().unwrap_or([0; MESSAGE_LEN]);
                if message == [0; MESSAGE_LEN] {
                    message[0] = EMPTY_QUEUE_REPORT_ID;
                }
                message[..len.min(MESSAGE_LEN)].to_vec()
            }
            0x06FC => {
                let mut config = vec![0u8; len];
                let [xl, xh] = self.range.0.to_le_bytes();
                let [yl, yh] = self.range.1.to_le_bytes();
                if len > 25 {
                    config[13] = xl;
                    config[14] = xh;
                    config[24] = yl;
                    config[25] = yh;
                }
                config
            }
            _ => vec![0u8; len],
        }
    }

    fn respond(&mut self, report_id: u8, request: &ObpRequest) -> Vec<u8> {
        self.exchanges += 1;
        if let Some(status) = self.pending_fault.take() {
            return encode_response(report_id, status, &[]);
        }
        if request.is_write() {
            self.write(request.address(), request.payload());
            encode_response(report_id, STATUS_OK_WRITE, &[])
        } else {
            let data = self.read(request.address(), request.read_len() as usize);
            encode_response(report_id, STATUS_OK_DATA, &data)
        }
    }
}

/// Simulated controller link
pub struct SimulatedMaxTouch {
    state: Arc<Mutex<SensorState>>,
}

impl SimulatedMaxTouch {
    /// A controller with a `matrix` of nodes and the given touch ranges
    pub fn new(matrix: NodeCounts, range: (u16, u16)) -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState::new(matrix, range))),
        }
    }

    /// Handle for steering the simulator from tests or the simulated rig
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

fn lock(state: &Mutex<SensorState>) -> MutexGuard<'_, SensorState> {
    // a panicked test thread must not wedge the others
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SensorLink for SimulatedMaxTouch {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(RigError::Transport("simulated controller unplugged".into()));
        }
        let (report_id, request) = ObpRequest::decode(report)?;
        let response = state.respond(report_id, &request);
        state.responses.push_back(response);
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut state = lock(&self.state);
        match state.responses.pop_front() {
            Some(response) => {
                let n = response.len().min(buf.len()).min(FRAME_LEN);
                buf[..n].copy_from_slice(&response[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn describe(&self) -> String {
        "simulated maXTouch".to_string()
    }
}

/// Shared control surface of a [`SimulatedMaxTouch`]
#[derive(Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SensorState>>,
}

impl SimulatorHandle {
    /// Queue a touch report at `position`
    pub fn push_touch(&self, event: TouchEvent, position: ScreenPoint) {
        lock(&self.state).enqueue(touch_message(event, position));
    }

    /// Keep reporting `position` while the queue runs empty, as a resting
    /// finger does
    pub fn set_hold(&self, position: Option<ScreenPoint>) {
        lock(&self.state).held = position;
    }

    /// Queue an arbitrary message-processor entry
    pub fn push_raw_message(&self, message: [u8; MESSAGE_LEN]) {
        lock(&self.state).enqueue(message);
    }

    /// Pin the queue count read, whatever the queue holds
    pub fn force_message_count(&self, count: Option<u8>) {
        lock(&self.state).forced_count = count;
    }

    pub fn pending_messages(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Static delta reported for `node`
    pub fn set_delta(&self, node: NodeAddress, delta: i16) {
        lock(&self.state).deltas.insert(node, delta);
    }

    /// Amplitude of the deterministic noise added to every delta
    pub fn set_noise(&self, amplitude: i16) {
        lock(&self.state).noise_amplitude = amplitude.abs();
    }

    /// Signal added around `node` while a finger rests on it
    pub fn set_press(&self, press: Option<(NodeAddress, i16)>) {
        lock(&self.state).press = press;
    }

    pub fn set_page(&self, page: u8) {
        lock(&self.state).page = page;
    }

    /// Diagnostic mode last written to the command processor (0 when off)
    pub fn diagnostic_mode(&self) -> u8 {
        lock(&self.state).diagnostic_mode
    }

    /// Ignore page up/down commands
    pub fn freeze_page(&self, frozen: bool) {
        lock(&self.state).page_frozen = frozen;
    }

    /// Command processor statuses queued after a reset
    pub fn set_reset_handshake(&self, statuses: Vec<u8>) {
        lock(&self.state).handshake = statuses;
    }

    /// Answer the next exchange with `status` instead of executing it
    pub fn fail_next_exchange(&self, status: u8) {
        lock(&self.state).pending_fault = Some(status);
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    /// Exchanges answered so far
    pub fn exchanges(&self) -> u64 {
        lock(&self.state).exchanges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(link: &mut SimulatedMaxTouch, request: ObpRequest) -> Vec<u8> {
        link.write_report(&request.encode(6).unwrap()).unwrap();
        let mut buf = [0u8; FRAME_LEN];
        let n = link.read_report(&mut buf, Duration::ZERO).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_empty_queue_message() {
        let mut link = SimulatedMaxTouch::new(NodeCounts::new(4, 4), (100, 100));
        let response = exchange(&mut link, ObpRequest::read(0x0189, 10));
        assert_eq!(response[1], STATUS_OK_DATA);
        assert_eq!(response[3], EMPTY_QUEUE_REPORT_ID);
    }

    #[test]
    fn test_queue_depth_capped() {
        let link = SimulatedMaxTouch::new(NodeCounts::new(4, 4), (100, 100));
        let handle = link.handle();
        for _ in 0..20 {
            handle.push_touch(TouchEvent::Move, ScreenPoint::new(1, 1));
        }
        assert_eq!(handle.pending_messages(), MAX_QUEUE_DEPTH as usize);
    }

    #[test]
    fn test_deltas_hidden_outside_debug_mode() {
        let mut link = SimulatedMaxTouch::new(NodeCounts::new(4, 4), (100, 100));
        link.handle().set_delta(NodeAddress::new(0, 1), 500);
        let off = exchange(&mut link, ObpRequest::read(0x0106, 62));
        assert_eq!(&off[5..7], &[0, 0]);

        exchange(&mut link, ObpRequest::write(0x0199, &[0x10]));
        let on = exchange(&mut link, ObpRequest::read(0x0106, 62));
        assert_eq!(on[3], 0x10);
        assert_eq!(&on[7..9], &500i16.to_le_bytes());
    }

    #[test]
    fn test_held_touch_keeps_reporting() {
        let mut link = SimulatedMaxTouch::new(NodeCounts::new(4, 4), (100, 100));
        link.handle().set_hold(Some(ScreenPoint::new(40, 60)));
        for _ in 0..3 {
            let count = exchange(&mut link, ObpRequest::read(0x0188, 1));
            assert_eq!(count[3], 1);
            let message = exchange(&mut link, ObpRequest::read(0x0189, 10));
            assert_eq!(message[3], SIM_TOUCH_REPORT_ID);
            assert_eq!(&message[5..9], &[40, 0, 60, 0]);
        }
    }

    #[test]
    fn test_write_answers_write_status() {
        let mut link = SimulatedMaxTouch::new(NodeCounts::new(4, 4), (100, 100));
        let response = exchange(&mut link, ObpRequest::write(0x0199, &[0x00]));
        assert_eq!(response[1], STATUS_OK_WRITE);
    }

    #[test]
    fn test_unplugged_link_fails_writes() {
        let mut link = SimulatedMaxTouch::new(NodeCounts::new(4, 4), (100, 100));
        link.handle().set_connected(false);
        let frame = ObpRequest::read(0x0188, 1).encode(6).unwrap();
        assert!(matches!(
            link.write_report(&frame),
            Err(RigError::Transport(_))
        ));
    }
}
