//! Byte-level link to the sensor controller
//!
//! [`SensorLink`] moves whole reports to and from the controller. The real
//! rig uses [`HidLink`] over hidapi; tests plug in the byte-level simulator.

use crate::error::{Result, RigError};
use std::collections::VecDeque;
use std::time::Duration;

/// Size of the rolling window for recent exchange times
const RECENT_WINDOW_SIZE: usize = 100;

/// Report-oriented transport to a sensor controller
///
/// Implementations must be `Send` so a controller client can move into the
/// trace sampler's polling thread.
pub trait SensorLink: Send {
    /// Write one complete report, report id first
    fn write_report(&mut self, report: &[u8]) -> Result<()>;

    /// Read one report into `buf`, returning the number of bytes read
    ///
    /// Returns 0 when nothing arrived within `timeout`.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

// ==================== HID ====================

/// USB HID link to a maXTouch controller bridge
pub struct HidLink {
    device: hidapi::HidDevice,
    vendor_id: u16,
    product_id: u16,
}

impl HidLink {
    /// Open the first device matching the vendor/product pair
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self> {
        let api = hidapi::HidApi::new()?;
        let device = api.open(vendor_id, product_id).map_err(|e| {
            RigError::Hid(e).with_context(format!(
                "Failed to open sensor controller {:04X}:{:04X}",
                vendor_id, product_id
            ))
        })?;
        tracing::info!(
            "Opened sensor controller {:04X}:{:04X}",
            vendor_id,
            product_id
        );
        Ok(Self {
            device,
            vendor_id,
            product_id,
        })
    }
}

impl SensorLink for HidLink {
    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        let written = self.device.write(report)?;
        if written == 0 {
            return Err(RigError::Transport(format!(
                "HID write of {} bytes accepted nothing",
                report.len()
            )));
        }
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        Ok(self.device.read_timeout(buf, timeout_ms)?)
    }

    fn describe(&self) -> String {
        format!("hid {:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

// ==================== Exchange Statistics ====================

/// Statistics for sensor exchanges
///
/// Tracks success rate and round-trip timing of request/response pairs.
#[derive(Debug, Clone)]
pub struct ExchangeStats {
    /// Total number of successful exchanges
    pub successful: u64,
    /// Total number of failed exchanges (faults and transport errors)
    pub failed: u64,
    /// Total round-trip time in microseconds
    pub total_time_us: u64,
    /// Minimum round-trip time observed (microseconds)
    pub min_time_us: u64,
    /// Maximum round-trip time observed (microseconds)
    pub max_time_us: u64,
    /// Rolling window of recent round-trip times
    pub recent_times: VecDeque<u64>,
}

impl Default for ExchangeStats {
    fn default() -> Self {
        Self {
            successful: 0,
            failed: 0,
            total_time_us: 0,
            min_time_us: u64::MAX,
            max_time_us: 0,
            recent_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl ExchangeStats {
    /// Average round-trip time in microseconds
    pub fn avg_time_us(&self) -> f64 {
        if self.successful == 0 {
            0.0
        } else {
            self.total_time_us as f64 / self.successful as f64
        }
    }

    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.successful + self.failed;
        if total == 0 {
            100.0
        } else {
            (self.successful as f64 / total as f64) * 100.0
        }
    }

    pub fn record_success(&mut self, time_us: u64) {
        self.successful += 1;
        self.total_time_us += time_us;
        self.min_time_us = self.min_time_us.min(time_us);
        self.max_time_us = self.max_time_us.max(time_us);

        self.recent_times.push_back(time_us);
        if self.recent_times.len() > RECENT_WINDOW_SIZE {
            self.recent_times.pop_front();
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Spread (max - min) of recent round-trip times in microseconds
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_times.iter().min().copied().unwrap_or(0);
        let max = self.recent_times.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
