//! Object protocol framing
//!
//! Outbound frames carry a report id, the object-protocol command byte, the
//! write and read byte counts, a little-endian object address and an
//! optional payload. Inbound frames carry the report id, a status byte, a
//! byte count and the payload.
//!
//! ```text
//! out: [report id][0x51][write count][read count][addr lo][addr hi][payload..]
//! in:  [report id][status][count][payload..]
//! ```
//!
//! The write count includes the two address bytes. Every frame is padded to
//! the link's fixed report length.

use crate::error::{Result, RigError};
use crate::types::NodeDelta;
use std::fmt;

/// Object protocol command byte for a combined write/read
pub const OBP_COMMAND: u8 = 0x51;

/// Report length without the report id
pub const REPORT_LEN: usize = 64;

/// Report length including the report id
pub const FRAME_LEN: usize = REPORT_LEN + 1;

/// Bytes before the payload in an inbound frame
pub const RESPONSE_HEADER_LEN: usize = 3;

/// Largest payload one inbound frame can carry
pub const MAX_RESPONSE_PAYLOAD: usize = FRAME_LEN - RESPONSE_HEADER_LEN;

/// Bytes before the payload in an outbound frame
const REQUEST_HEADER_LEN: usize = 6;

/// Status byte: read and write both completed
pub const STATUS_OK_DATA: u8 = 0x00;

/// Status byte: write-only request completed
pub const STATUS_OK_WRITE: u8 = 0x04;

/// Completion status of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    OkWithData,
    OkWriteOnly,
}

impl FrameStatus {
    /// Classify a status byte; anything unknown is a fault
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            STATUS_OK_DATA => Some(FrameStatus::OkWithData),
            STATUS_OK_WRITE => Some(FrameStatus::OkWriteOnly),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            FrameStatus::OkWithData => STATUS_OK_DATA,
            FrameStatus::OkWriteOnly => STATUS_OK_WRITE,
        }
    }
}

/// One object protocol request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObpRequest {
    address: u16,
    read_len: u8,
    payload: Vec<u8>,
}

impl ObpRequest {
    /// Read `len` bytes starting at `address`
    pub fn read(address: u16, len: u8) -> Self {
        Self {
            address,
            read_len: len,
            payload: Vec::new(),
        }
    }

    /// Write `payload` starting at `address`
    ///
    /// The controller wants a non-zero read count even for writes.
    pub fn write(address: u16, payload: &[u8]) -> Self {
        Self {
            address,
            read_len: 1,
            payload: payload.to_vec(),
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn read_len(&self) -> u8 {
        self.read_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_write(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Bytes written to the controller, address included
    pub fn write_count(&self) -> u8 {
        (2 + self.payload.len()) as u8
    }

    /// Encode into a padded outbound frame
    pub fn encode(&self, report_id: u8) -> Result<Vec<u8>> {
        if REQUEST_HEADER_LEN + self.payload.len() > FRAME_LEN {
            return Err(RigError::Transport(format!(
                "payload of {} bytes does not fit in one report",
                self.payload.len()
            )));
        }
        let [lo, hi] = self.address.to_le_bytes();
        let mut frame = Vec::with_capacity(FRAME_LEN);
        frame.extend_from_slice(&[
            report_id,
            OBP_COMMAND,
            self.write_count(),
            self.read_len,
            lo,
            hi,
        ]);
        frame.extend_from_slice(&self.payload);
        frame.resize(FRAME_LEN, 0);
        Ok(frame)
    }

    /// Parse an outbound frame back into a request
    pub fn decode(frame: &[u8]) -> Result<(u8, Self)> {
        if frame.len() < REQUEST_HEADER_LEN || frame[1] != OBP_COMMAND {
            return Err(RigError::Transport(format!(
                "not an object protocol request: {:02X?}",
                &frame[..frame.len().min(REQUEST_HEADER_LEN)]
            )));
        }
        let write_count = frame[2] as usize;
        if write_count < 2 || REQUEST_HEADER_LEN + write_count - 2 > frame.len() {
            return Err(RigError::Transport(format!(
                "bad write count {} in request",
                write_count
            )));
        }
        let payload = frame[REQUEST_HEADER_LEN..REQUEST_HEADER_LEN + write_count - 2].to_vec();
        Ok((
            frame[0],
            Self {
                address: u16::from_le_bytes([frame[4], frame[5]]),
                read_len: frame[3],
                payload,
            },
        ))
    }
}

impl fmt::Display for ObpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_write() {
            write!(f, "write {:02X?} @ 0x{:04X}", self.payload, self.address)
        } else {
            write!(f, "read {} @ 0x{:04X}", self.read_len, self.address)
        }
    }
}

/// One completed exchange
#[derive(Debug, Clone)]
pub struct DeviceFrame {
    pub outbound: Vec<u8>,
    pub inbound: Vec<u8>,
    pub status: FrameStatus,
}

impl DeviceFrame {
    /// Validate a response against the request that produced it
    pub fn parse(request: &ObpRequest, outbound: Vec<u8>, inbound: Vec<u8>) -> Result<Self> {
        if inbound.len() < RESPONSE_HEADER_LEN {
            return Err(RigError::Transport(format!(
                "short response ({} bytes) to {}",
                inbound.len(),
                request
            )));
        }
        let status =
            FrameStatus::from_byte(inbound[1]).ok_or_else(|| RigError::ProtocolFault {
                status: inbound[1],
                command: request.to_string(),
            })?;
        Ok(Self {
            outbound,
            inbound,
            status,
        })
    }

    /// Byte count reported by the controller
    pub fn count(&self) -> u8 {
        self.inbound[2]
    }

    /// Everything after the header
    pub fn payload(&self) -> &[u8] {
        &self.inbound[RESPONSE_HEADER_LEN..]
    }

    /// Payload byte at `index`, or 0 past the end of a short frame
    pub fn byte(&self, index: usize) -> u8 {
        self.payload().get(index).copied().unwrap_or(0)
    }

    /// Little-endian u16 at `index` of the payload
    pub fn u16_le(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.byte(index), self.byte(index + 1)])
    }
}

/// Build a padded inbound frame
pub fn encode_response(report_id: u8, status: u8, data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(MAX_RESPONSE_PAYLOAD)];
    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.extend_from_slice(&[report_id, status, data.len() as u8]);
    frame.extend_from_slice(data);
    frame.resize(FRAME_LEN, 0);
    frame
}

/// Decode two little-endian bytes as a 16-bit two's complement delta
pub fn decode_delta(lo: u8, hi: u8) -> NodeDelta {
    NodeDelta(i16::from_le_bytes([lo, hi]))
}

/// Encode a delta as two little-endian bytes
pub fn encode_delta(delta: NodeDelta) -> [u8; 2] {
    delta.0.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_layout() {
        let frame = ObpRequest::read(0x0189, 10).encode(0x06).unwrap();
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(&frame[..6], &[0x06, 0x51, 0x02, 0x0A, 0x89, 0x01]);
        assert!(frame[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_request_layout() {
        let frame = ObpRequest::write(0x0194, &[0x01]).encode(0x06).unwrap();
        assert_eq!(&frame[..7], &[0x06, 0x51, 0x03, 0x01, 0x94, 0x01, 0x01]);
    }

    #[test]
    fn test_request_decode() {
        let request = ObpRequest::write(0x0199, &[0x10]);
        let frame = request.encode(0x06).unwrap();
        let (report_id, decoded) = ObpRequest::decode(&frame).unwrap();
        assert_eq!(report_id, 0x06);
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_status_classification() {
        let request = ObpRequest::read(0x0188, 1);
        let ok = DeviceFrame::parse(&request, vec![], encode_response(6, 0x00, &[3])).unwrap();
        assert_eq!(ok.status, FrameStatus::OkWithData);
        assert_eq!(ok.byte(0), 3);

        let write_ok = DeviceFrame::parse(&request, vec![], encode_response(6, 0x04, &[])).unwrap();
        assert_eq!(write_ok.status, FrameStatus::OkWriteOnly);

        let fault = DeviceFrame::parse(&request, vec![], encode_response(6, 0x05, &[]));
        assert!(matches!(
            fault,
            Err(RigError::ProtocolFault { status: 0x05, .. })
        ));
    }

    #[test]
    fn test_short_response_is_transport_error() {
        let request = ObpRequest::read(0x0188, 1);
        let result = DeviceFrame::parse(&request, vec![], vec![6, 0]);
        assert!(matches!(result, Err(RigError::Transport(_))));
    }

    #[test]
    fn test_decode_delta_sign() {
        assert_eq!(decode_delta(0xFF, 0xFF), NodeDelta(-1));
        assert_eq!(decode_delta(0x00, 0x80), NodeDelta(i16::MIN));
        assert_eq!(decode_delta(0x2C, 0x01), NodeDelta(300));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_delta_codec_round_trip(value in any::<i16>()) {
            let [lo, hi] = encode_delta(NodeDelta(value));
            prop_assert_eq!(decode_delta(lo, hi), NodeDelta(value));
        }

        #[test]
        fn test_unknown_status_is_always_a_fault(status in any::<u8>()) {
            prop_assume!(status != STATUS_OK_DATA && status != STATUS_OK_WRITE);
            let request = ObpRequest::read(0x0188, 1);
            let result = DeviceFrame::parse(&request, vec![], encode_response(6, status, &[]));
            let is_fault = matches!(result, Err(RigError::ProtocolFault { .. }));
            prop_assert!(is_fault);
        }
    }
}
