//! Error types.
//!
//! This module contains the error type returned by the protocol, runner and
//! board operations of this crate. Calibration procedures that do not find a
//! working setting are not errors; they return an outcome with the success flag
//! cleared.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for GHz DAC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when compiling sequences or talking to a board.
#[derive(Debug, Error)]
pub enum Error {
    /// The firmware build is not known.
    #[error("unknown firmware build {build}")]
    UnknownBuild {
        /// Build number reported by the board or configuration
        build: u32,
    },

    /// The configuration is invalid.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Reason for the rejection
        reason: String,
    },

    /// An input does not fit in the board memories.
    #[error("capacity exceeded: {0}")]
    Capacity(#[from] CapacityViolation),

    /// The operation is not implemented by this firmware build family.
    #[error("{operation} is not supported by firmware build {build}")]
    Unsupported {
        /// Name of the operation
        operation: &'static str,
        /// Firmware build of the board
        build: u32,
    },

    /// An argument is outside of its valid domain.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for the rejection
        reason: String,
    },

    /// No reply arrived before the deadline.
    #[error("no reply within {timeout:?}")]
    Timeout {
        /// Deadline that expired
        timeout: Duration,
    },

    /// A reply does not have the expected format.
    #[error("malformed reply ({} bytes, expected {expected})", raw.len())]
    MalformedReply {
        /// Expected reply length in bytes
        expected: usize,
        /// Raw reply, kept for diagnosis
        raw: Vec<u8>,
    },

    /// I/O error in the packet transport.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

/// Capacity violations.
///
/// These are detected before any packet is sent. The caller must resize the
/// input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityViolation {
    /// The memory program is longer than one memory page.
    #[error("memory program length {len} exceeds one page ({max} words)")]
    ProgramTooLong {
        /// Program length in words
        len: usize,
        /// Memory page length in words
        max: usize,
    },

    /// An SRAM write unit (derp) is outside of the SRAM.
    #[error("SRAM derp {derp} out of range (board has {derps} derps)")]
    SramDerpOutOfRange {
        /// Requested derp
        derp: usize,
        /// Number of derps of the board
        derps: usize,
    },

    /// An SRAM block is longer than the physical block.
    #[error("SRAM block{block} length {len} exceeds {max} words")]
    SramBlockTooLong {
        /// Block number (0 or 1)
        block: u8,
        /// Block length in words
        len: usize,
        /// Physical block length in words
        max: usize,
    },

    /// More than one SRAM call in a dual-block sequence.
    #[error("{count} SRAM calls in a dual-block sequence (only one allowed)")]
    MultipleSramCalls {
        /// Number of run-SRAM words found
        count: usize,
    },

    /// A value does not fit in the 20-bit field of a memory word.
    #[error("value {value} does not fit in a 20-bit memory word field")]
    FieldOverflow {
        /// Offending value
        value: i64,
    },

    /// The jump table does not fit in the jump table memory.
    #[error("jump table has {entries} entries and {counters} counters (max {max_entries} and {max_counters})")]
    JumpTableTooLarge {
        /// Number of entries
        entries: usize,
        /// Number of counters
        counters: usize,
        /// Maximum number of entries
        max_entries: usize,
        /// Maximum number of counters
        max_counters: usize,
    },
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Error {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Error {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the whole operation may succeed.
    ///
    /// Only transport timeouts are recoverable. They leave the sequence runner
    /// state untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
