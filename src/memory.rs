//! Memory sequence compiler.
//!
//! The memory sequencer of legacy builds runs a program of 24-bit memory
//! words. Each word has a 4-bit opcode in its most significant nibble and a
//! 20-bit address or immediate value. This module contains the word
//! representation, a builder for memory sequences, and the transforms that are
//! applied to a sequence before it is uploaded: SRAM address relocation for
//! paged execution, master synchronization delays and the dual-block address
//! fix-up. It also estimates the execution time of a sequence, which is used
//! to size network timeouts.

use crate::constants::{MEMORY_CYCLE_NS, SRAM_CALL_CYCLES};
use crate::error::{CapacityViolation, Error, Result};
use crate::variant::BoardCapabilities;
use std::time::Duration;

const ADDRESS_MASK: u32 = 0x0f_ffff;

/// Memory word opcode.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    NoOp = 0x0,
    /// Fiber output on channel 0.
    FiberOut0 = 0x1,
    /// Fiber output on channel 1.
    FiberOut1 = 0x2,
    /// Delay by `address + 1` cycles.
    Delay = 0x3,
    /// Timer start (immediate 0) or stop (immediate 1).
    Timer = 0x4,
    /// Set SRAM start address.
    SramStart = 0x8,
    /// Set SRAM end address.
    SramEnd = 0xa,
    /// Run SRAM.
    RunSram = 0xc,
    /// Branch to the start of the sequence.
    BranchToStart = 0xf,
}

impl Opcode {
    fn from_nibble(nibble: u8) -> Option<Opcode> {
        Some(match nibble {
            0x0 => Opcode::NoOp,
            0x1 => Opcode::FiberOut0,
            0x2 => Opcode::FiberOut1,
            0x3 => Opcode::Delay,
            0x4 => Opcode::Timer,
            0x8 => Opcode::SramStart,
            0xa => Opcode::SramEnd,
            0xc => Opcode::RunSram,
            0xf => Opcode::BranchToStart,
            _ => return None,
        })
    }

    /// Conservative number of cycles taken by a word with this opcode.
    fn cycles(self, address: u32) -> u64 {
        match self {
            Opcode::NoOp
            | Opcode::FiberOut0
            | Opcode::FiberOut1
            | Opcode::Timer
            | Opcode::SramStart
            | Opcode::SramEnd => 1,
            Opcode::BranchToStart => 2,
            Opcode::Delay => u64::from(address) + 1,
            Opcode::RunSram => SRAM_CALL_CYCLES,
        }
    }
}

/// Memory word.
///
/// A 24-bit memory sequencer command. Words can only be built with an opcode
/// from [`Opcode`] and an address that fits in 20 bits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct MemoryWord(u32);

/// Timer start word.
pub const START_TIMER: MemoryWord = MemoryWord(0x40_0000);
/// Timer stop word.
pub const STOP_TIMER: MemoryWord = MemoryWord(0x40_0001);

impl MemoryWord {
    /// Creates a word from an opcode and an address.
    pub fn new(opcode: Opcode, address: u32) -> Result<MemoryWord> {
        if address > ADDRESS_MASK {
            return Err(CapacityViolation::FieldOverflow {
                value: address.into(),
            }
            .into());
        }
        Ok(MemoryWord(((opcode as u32) << 20) | address))
    }

    /// Gives the raw 24-bit value of the word.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Gives the opcode of the word.
    pub fn opcode(self) -> Opcode {
        // the constructors only admit valid opcodes
        Opcode::from_nibble((self.0 >> 20) as u8).unwrap_or(Opcode::NoOp)
    }

    /// Gives the 20-bit address or immediate value of the word.
    pub fn address(self) -> u32 {
        self.0 & ADDRESS_MASK
    }

    /// Returns `true` if the word sets an SRAM start or end address.
    pub fn is_sram_address(self) -> bool {
        matches!(self.opcode(), Opcode::SramStart | Opcode::SramEnd)
    }

    fn with_address(self, address: i64) -> Result<MemoryWord> {
        match u32::try_from(address) {
            Ok(address) => MemoryWord::new(self.opcode(), address),
            Err(_) => Err(CapacityViolation::FieldOverflow { value: address }.into()),
        }
    }
}

impl TryFrom<u32> for MemoryWord {
    type Error = Error;

    fn try_from(raw: u32) -> Result<MemoryWord> {
        if raw > 0xff_ffff {
            return Err(Error::invalid_argument(format!(
                "memory word {raw:#x} is wider than 24 bits"
            )));
        }
        match Opcode::from_nibble((raw >> 20) as u8) {
            Some(_) => Ok(MemoryWord(raw)),
            None => Err(Error::invalid_argument(format!(
                "memory word {raw:#08x} has an unknown opcode"
            ))),
        }
    }
}

impl From<MemoryWord> for u32 {
    fn from(word: MemoryWord) -> u32 {
        word.0
    }
}

/// Memory sequence.
///
/// An ordered list of memory words. The builder methods append a word and
/// return the sequence, so that sequences can be written as chains.
///
/// # Examples
///
/// ```
/// use ghzdac::memory::MemorySequence;
///
/// let seq = MemorySequence::new()
///     .sram_start_address(0)?
///     .sram_end_address(99)?
///     .start_timer()
///     .run_sram()
///     .stop_timer()
///     .branch_to_start();
/// assert_eq!(seq.timer_stop_count(), 1);
/// # Ok::<(), ghzdac::Error>(())
/// ```
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct MemorySequence(Vec<MemoryWord>);

impl MemorySequence {
    /// Creates an empty sequence.
    pub fn new() -> MemorySequence {
        MemorySequence(Vec::new())
    }

    /// Creates a sequence from raw 24-bit words.
    ///
    /// Fails if any of the words is wider than 24 bits or has an unknown
    /// opcode.
    pub fn from_raw(words: &[u32]) -> Result<MemorySequence> {
        words
            .iter()
            .map(|&w| MemoryWord::try_from(w))
            .collect::<Result<Vec<_>>>()
            .map(MemorySequence)
    }

    /// Gives the words of the sequence.
    pub fn words(&self) -> &[MemoryWord] {
        &self.0
    }

    /// Gives the number of words in the sequence.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the sequence has no words.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(mut self, word: MemoryWord) -> MemorySequence {
        self.0.push(word);
        self
    }

    /// Appends a no-op.
    pub fn no_op(self) -> MemorySequence {
        self.push(MemoryWord(0))
    }

    /// Appends a delay of `cycles + 1` cycles.
    pub fn delay_cycles(self, cycles: u32) -> Result<MemorySequence> {
        Ok(self.push(MemoryWord::new(Opcode::Delay, cycles)?))
    }

    /// Appends a fiber output command.
    ///
    /// `channel` is the fiber channel (0 or 1). The 20 least significant bits
    /// of `data` are sent.
    pub fn fiber_out(self, channel: u8, data: u32) -> Result<MemorySequence> {
        let opcode = fiber_opcode(channel)?;
        Ok(self.push(MemoryWord::new(opcode, data & ADDRESS_MASK)?))
    }

    /// Appends a fast bias DAC command sent through a fiber output.
    ///
    /// `fb_dac` selects the fast bias DAC (0: fine, 1: coarse), and `slow`
    /// selects the slow channel of the coarse DAC.
    pub fn fastbias(self, channel: u8, fb_dac: u8, data: u16, slow: u8) -> Result<MemorySequence> {
        let opcode = fiber_opcode(channel)?;
        if fb_dac > 1 {
            return Err(Error::invalid_argument("fast bias DAC must be 0 or 1"));
        }
        if slow > 1 {
            return Err(Error::invalid_argument("fast bias slow flag must be 0 or 1"));
        }
        let address = (u32::from(data) << 3) | (u32::from(fb_dac) << 19) | (u32::from(slow) << 2);
        Ok(self.push(MemoryWord::new(opcode, address)?))
    }

    /// Appends an SRAM start address.
    pub fn sram_start_address(self, address: u32) -> Result<MemorySequence> {
        Ok(self.push(MemoryWord::new(Opcode::SramStart, address)?))
    }

    /// Appends an SRAM end address.
    pub fn sram_end_address(self, address: u32) -> Result<MemorySequence> {
        Ok(self.push(MemoryWord::new(Opcode::SramEnd, address)?))
    }

    /// Appends an SRAM run.
    pub fn run_sram(self) -> MemorySequence {
        self.push(MemoryWord(0xc0_0000))
    }

    /// Appends a timer start.
    pub fn start_timer(self) -> MemorySequence {
        self.push(START_TIMER)
    }

    /// Appends a timer stop.
    pub fn stop_timer(self) -> MemorySequence {
        self.push(STOP_TIMER)
    }

    /// Appends a branch to the start of the sequence.
    pub fn branch_to_start(self) -> MemorySequence {
        self.push(MemoryWord(0xf0_0000))
    }

    /// Adds a signed offset to every SRAM start and end address.
    ///
    /// Other words are left unchanged. Fails if any resulting address does not
    /// fit in 20 bits.
    pub fn offset_sram_addresses(&self, offset: i64) -> Result<MemorySequence> {
        self.0
            .iter()
            .map(|&word| {
                if word.is_sram_address() {
                    word.with_address(i64::from(word.address()) + offset)
                } else {
                    Ok(word)
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(MemorySequence)
    }

    /// Relocates a sequence written for page 0 onto another SRAM page.
    ///
    /// Adds `page * page_len` to every SRAM start and end address.
    pub fn shift_for_page(&self, page: usize, page_len: usize) -> Result<MemorySequence> {
        let offset = i64::try_from(page * page_len).map_err(|_| CapacityViolation::FieldOverflow {
            value: i64::MAX,
        })?;
        self.offset_sram_addresses(offset)
    }

    /// Adds a delay before every SRAM run.
    ///
    /// The delay lasts `delay_us * clock_mhz` cycles. The master board uses
    /// this to give slave boards time to reach their synchronization point
    /// before it starts the SRAM.
    pub fn with_master_delay(&self, delay_us: u32, clock_mhz: u32) -> Result<MemorySequence> {
        let cycles = delay_us
            .checked_mul(clock_mhz)
            .filter(|&c| c <= ADDRESS_MASK)
            .ok_or(CapacityViolation::FieldOverflow {
                value: i64::from(delay_us) * i64::from(clock_mhz),
            })?;
        let delay = MemoryWord::new(Opcode::Delay, cycles)?;
        let mut words = Vec::with_capacity(self.0.len() + self.sram_call_count());
        for &word in &self.0 {
            if word.opcode() == Opcode::RunSram {
                words.push(delay);
            }
            words.push(word);
        }
        Ok(MemorySequence(words))
    }

    /// Conservative estimate of the number of memory cycles of the sequence.
    pub fn execution_cycles(&self) -> u64 {
        self.0
            .iter()
            .map(|word| word.opcode().cycles(word.address()))
            .sum()
    }

    /// Conservative estimate of the execution time of the sequence.
    ///
    /// This is an upper bound that is only suitable to size timeouts. SRAM
    /// calls are assumed to take their maximum length and the memory clock is
    /// assumed to run at 25 MHz.
    pub fn estimate_execution_time(&self) -> Duration {
        Duration::from_nanos(self.execution_cycles() * MEMORY_CYCLE_NS)
    }

    /// Gives the number of timer stops in the sequence.
    ///
    /// This corresponds to the number of timing results per repetition. The
    /// timer logic (a start for each stop) is not checked.
    pub fn timer_stop_count(&self) -> usize {
        self.0.iter().filter(|&&w| w == STOP_TIMER).count()
    }

    /// Gives the number of SRAM runs in the sequence.
    pub fn sram_call_count(&self) -> usize {
        self.0
            .iter()
            .filter(|w| w.opcode() == Opcode::RunSram)
            .count()
    }

    /// Gives the maximum SRAM address used by the sequence.
    ///
    /// This is used to determine whether a sequence fits in one SRAM page.
    /// Sequences without SRAM addresses give 0.
    pub fn max_sram_address(&self) -> u32 {
        self.0
            .iter()
            .filter(|w| w.is_sram_address())
            .map(|w| w.address())
            .max()
            .unwrap_or(0)
    }

    /// Sets the SRAM addresses for a dual-block sequence.
    ///
    /// The SRAM start address is set so that the `block0_len` words of block 0
    /// end exactly at the end of physical block 0. The SRAM end address
    /// includes the inter-block delay, because it is counted in clock cycles
    /// rather than physical words. Only one SRAM call is allowed in a
    /// dual-block sequence.
    pub fn fix_dual_block_addresses(
        &self,
        block0_len: usize,
        block1_len: usize,
        delay_blocks: usize,
        caps: &BoardCapabilities,
    ) -> Result<MemorySequence> {
        let count = self.sram_call_count();
        if count > 1 {
            return Err(CapacityViolation::MultipleSramCalls { count }.into());
        }
        if block0_len > caps.sram_block0_len {
            return Err(CapacityViolation::SramBlockTooLong {
                block: 0,
                len: block0_len,
                max: caps.sram_block0_len,
            }
            .into());
        }
        let start = (caps.sram_block0_len - block0_len) as i64;
        let end = (caps.sram_block0_len + block1_len + caps.sram_delay_len * delay_blocks) as i64 - 1;
        self.0
            .iter()
            .map(|&word| match word.opcode() {
                Opcode::SramStart => word.with_address(start),
                Opcode::SramEnd => word.with_address(end),
                _ => Ok(word),
            })
            .collect::<Result<Vec<_>>>()
            .map(MemorySequence)
    }
}

fn fiber_opcode(channel: u8) -> Result<Opcode> {
    match channel {
        0 => Ok(Opcode::FiberOut0),
        1 => Ok(Opcode::FiberOut1),
        _ => Err(Error::invalid_argument(format!(
            "fiber channel {channel} (allowed channels are 0 and 1)"
        ))),
    }
}
