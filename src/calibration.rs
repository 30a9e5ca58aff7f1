//! DAC calibration procedures.
//!
//! This module contains the calibration procedures of the DACs of a board:
//! the FIFO phase offset search, the LVDS sampling delay search and the
//! built-in self-test (BIST).
//!
//! The FIFO and LVDS procedures are state machines that do not do any I/O by
//! themselves. Each state gives the [`Request`] that must be sent to the board
//! next, and the state machine advances by consuming the reply to that
//! request. The [`Board`](crate::board::Board) drivers feed the state machines
//! with hardware replies, and tests feed them with scripted replies.

use crate::error::{Error, Result};
use ghzdac_json::DacChannel;

pub mod bist;
pub mod fifo;
pub mod lvds;

/// Hardware request issued by a calibration state machine.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Request {
    /// Set the sampling clock polarity of the DAC.
    ///
    /// The reply to this request is ignored.
    ClockPolarity {
        /// Invert the clock.
        invert: bool,
    },
    /// Run commands through the serial bus of the DAC.
    ///
    /// The reply contains one serial response byte per command.
    Serial(Vec<u32>),
}

/// Step of a calibration state machine.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Step<T> {
    /// The board must run this request and its reply must be given to the
    /// state machine.
    Request(Request),
    /// The procedure has finished with this outcome.
    Done(T),
}

/// Serial bus operation that addresses a DAC.
pub fn serial_op(channel: DacChannel) -> u8 {
    match channel {
        DacChannel::A => 2,
        DacChannel::B => 3,
    }
}

/// Bit shift of the SRAM samples played by a DAC.
pub fn sram_shift(channel: DacChannel) -> u32 {
    match channel {
        DacChannel::A => 0,
        DacChannel::B => 14,
    }
}

fn check_reply(reply: &[u8], expected: usize) -> Result<()> {
    if reply.len() != expected {
        return Err(Error::MalformedReply {
            expected,
            raw: reply.to_vec(),
        });
    }
    Ok(())
}
