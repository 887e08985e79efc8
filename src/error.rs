//! Error handling for the touch rig
//!
//! This module defines the crate-wide error type and a Result alias used by
//! the sensor, motion, calibration and orchestration layers.

use thiserror::Error;

/// Main error type for rig operations
#[derive(Error, Debug)]
pub enum RigError {
    /// The sensor controller answered with a status byte that is neither
    /// "OK with data" nor "OK write-only"
    #[error("Protocol fault: status 0x{status:02X} in response to {command}")]
    ProtocolFault { status: u8, command: String },

    /// No sensor event arrived within the bounded polling window
    #[error("No input: {0}")]
    NoInput(String),

    /// The post-reset handshake did not match the expected sequence
    #[error("Reset failed: {0}")]
    Reset(String),

    /// Calibration could not identify a unique pair of screen axes
    #[error("Invalid axes: {0}")]
    InvalidAxes(String),

    /// Motion did not arrive (or report) in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Tests were requested before the session was calibrated
    #[error("Not oriented: {0}")]
    NotOriented(String),

    /// Calibration was requested on an already calibrated session
    #[error("Session already calibrated")]
    AlreadyCalibrated,

    /// The diagnostic page seek never reached the requested page
    #[error("Diagnostic page {wanted} not reached after {attempts} attempts (last saw page {last_seen})")]
    PageSeek {
        wanted: u8,
        last_seen: u8,
        attempts: u32,
    },

    /// The concurrent trace sampler exhausted its retries
    #[error("Trace sampling failed after {attempts} attempts: {last}")]
    TraceSampling { attempts: u32, last: String },

    /// Generic transport failures (short writes, closed links)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Errors from the motion controller's serial port
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Errors from the sensor controller's HID link
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors in geometry input (degenerate areas, misaligned nodal lines)
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RigError>,
    },
}

impl RigError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RigError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &RigError {
        match self {
            RigError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error ends a whole test run rather than one iteration
    ///
    /// A dead link, a broken reset handshake or missing calibration
    /// invalidates everything that follows. A failed read, a missed touch or
    /// a late arrival only invalidates the iteration it happened in; the
    /// pre-run connectivity check treats a timeout as fatal on its own.
    pub fn is_fatal_to_run(&self) -> bool {
        match self.root() {
            RigError::ProtocolFault { .. }
            | RigError::NoInput(_)
            | RigError::PageSeek { .. }
            | RigError::TraceSampling { .. }
            | RigError::Timeout(_)
            | RigError::Geometry(_) => false,
            RigError::Reset(_)
            | RigError::NotOriented(_)
            | RigError::InvalidAxes(_)
            | RigError::AlreadyCalibrated
            | RigError::Transport(_)
            | RigError::Serial(_)
            | RigError::Hid(_)
            | RigError::Config(_)
            | RigError::Io(_)
            | RigError::Serialization(_) => true,
            // root() strips every context layer
            RigError::WithContext { .. } => true,
        }
    }
}

/// Result type alias for rig operations
pub type Result<T> = std::result::Result<T, RigError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, serde_json::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RigError::Serialization(e.to_string()).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RigError::Serialization(e.to_string()).with_context(f()))
    }
}
