//! GHz DAC protocol constants.
//!
//! This module contains constants that are common to all the firmware builds
//! of the GHz DAC boards.

use std::time::Duration;

/// Length in bytes of a register write packet.
pub const REG_PACKET_LEN: usize = 56;

/// Length in bytes of a register readback or timing data packet.
pub const READBACK_LEN: usize = 70;

/// Number of timing results carried by a timing data packet.
pub const TIMING_PACKET_LEN: u64 = 30;

/// Byte range of a timing data packet that holds the timing results.
pub const TIMING_DATA: std::ops::Range<usize> = 3..63;

/// Clock frequency of the memory sequencer in MHz.
pub const MEMORY_CLOCK_MHZ: u32 = 25;

/// Duration of one memory sequencer cycle in nanoseconds.
pub const MEMORY_CYCLE_NS: u64 = 40;

/// Worst-case number of memory cycles taken by a run-SRAM command.
///
/// The SRAM is at most 12 us long.
pub const SRAM_CALL_CYCLES: u64 = 25 * 12;

/// Delay added by the master board before SRAM calls, in microseconds.
///
/// This gives slave boards time to reach their SRAM synchronization point.
pub const MASTER_SRAM_DELAY_US: u32 = 2;

/// Factor applied to the estimated sequence time to obtain the timeout.
pub const TIMEOUT_FACTOR: u32 = 2;

/// Margin added to the sequence timeout.
pub const TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Timeout used for register readbacks.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound of the duration of one repetition of a jump table sequence.
pub const JUMP_TABLE_REP_TIME: Duration = Duration::from_secs(100);

/// Default sync byte of the run packet for legacy builds.
pub const LEGACY_SYNC: u8 = 249;

/// Prefix of the MAC address of the GHz DAC boards.
pub const MAC_PREFIX: &str = "00:01:CA:AA:00:";

/// I2C flag requesting a readback of the byte.
pub const I2C_RB: u16 = 0x100;

/// I2C flag requesting an acknowledge of the byte.
pub const I2C_ACK: u16 = 0x200;

/// I2C flag marking the end of a transfer.
pub const I2C_END: u16 = 0x400;
