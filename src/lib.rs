//! ghzdac controls GHz DAC boards. It compiles experiment sequences (memory
//! programs or jump tables, and SRAM waveforms) into the Ethernet packets
//! understood by the board firmware, runs them on one or several boards, and
//! implements the DAC calibration procedures. The `ghzdac` binary gives
//! command line access to the board operations.

#![warn(missing_docs)]

pub mod app;
pub mod args;
pub mod board;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod error;
pub mod jump_table;
pub mod memory;
pub mod pipeline;
pub mod registers;
pub mod runner;
pub mod sram;
pub mod transport;
pub mod variant;

pub use error::{Error, Result};
