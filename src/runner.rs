//! Sequence runner.
//!
//! A [`SequenceRunner`] holds the compiled program and SRAM data of one board
//! for one execution. It derives the packets used to load, run and collect the
//! results of the sequence, and it is discarded once the results have been
//! extracted.
//!
//! On construction, dual-block SRAM data has its memory addresses fixed up and
//! is laid out over the physical SRAM blocks, which disables paging. Other
//! sequences are pageable if all their SRAM addresses fit in one SRAM page, in
//! which case the SRAM data is truncated to one page.

use crate::constants::{
    JUMP_TABLE_REP_TIME, MASTER_SRAM_DELAY_US, MEMORY_CLOCK_MHZ, READBACK_LEN, TIMEOUT_FACTOR,
    TIMEOUT_MARGIN, TIMING_DATA, TIMING_PACKET_LEN,
};
use crate::error::{CapacityViolation, Error, Result};
use crate::jump_table::JumpTable;
use crate::memory::MemorySequence;
use crate::registers::{self, RegisterFrame, Role, RunParams};
use crate::sram;
use crate::variant::{BuildFamily, Variant};
use bytes::Bytes;
use std::time::Duration;

/// Program run by a board.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Program {
    /// Memory sequence (legacy builds).
    Memory(MemorySequence),
    /// Jump table (jump table builds).
    JumpTable(JumpTable),
}

/// SRAM data of a sequence.
///
/// Data is given as 4 bytes per SRAM word, least significant byte first.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum SramData {
    /// Data written from the start of the SRAM page.
    Flat(Vec<u8>),
    /// Data split over the two physical SRAM blocks, with a delay between
    /// them.
    DualBlock {
        /// Data played from the first block. It is placed so that it ends at
        /// the end of the block.
        block0: Vec<u8>,
        /// Data played from the second block.
        block1: Vec<u8>,
        /// Number of delay units between the blocks.
        delay_blocks: u8,
    },
}

/// Execution request for one board.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RunRequest {
    /// Number of repetitions of the sequence.
    pub reps: u32,
    /// Start delay of the board.
    pub start_delay: u16,
    /// Delay between jump table loops (jump table builds only).
    pub loop_delay: u16,
    /// Program.
    pub program: Program,
    /// SRAM data.
    pub sram: SramData,
}

/// Sequence runner.
#[derive(Debug, Clone)]
pub struct SequenceRunner {
    board: String,
    variant: Variant,
    reps: u32,
    start_delay: u16,
    loop_delay: u16,
    program: Program,
    sram: Vec<u8>,
    block_delay: Option<u8>,
    pageable: bool,
    n_packets: u64,
    rep_time: Duration,
    master_delay_added: bool,
}

impl SequenceRunner {
    /// Creates the runner for an execution request on a board.
    ///
    /// `board` is the board name, which is used to match timing results to
    /// boards.
    pub fn new(board: &str, variant: &Variant, request: RunRequest) -> Result<SequenceRunner> {
        let RunRequest {
            reps,
            start_delay,
            loop_delay,
            program,
            sram,
        } = request;
        let caps = variant.capabilities();
        let mut runner = SequenceRunner {
            board: board.to_string(),
            variant: *variant,
            reps,
            start_delay,
            loop_delay,
            program,
            sram: Vec::new(),
            block_delay: None,
            pageable: false,
            n_packets: 0,
            rep_time: JUMP_TABLE_REP_TIME,
            master_delay_added: false,
        };
        match (variant.family(), &runner.program) {
            (BuildFamily::Legacy, Program::Memory(seq)) => {
                let seq = match sram {
                    SramData::DualBlock {
                        mut block0,
                        mut block1,
                        delay_blocks,
                    } => {
                        pad_to_words(&mut block0);
                        pad_to_words(&mut block1);
                        let (block0_len, block1_len) = (block0.len() / 4, block1.len() / 4);
                        if block1_len > caps.sram_block1_len {
                            return Err(CapacityViolation::SramBlockTooLong {
                                block: 1,
                                len: block1_len,
                                max: caps.sram_block1_len,
                            }
                            .into());
                        }
                        let seq = seq.fix_dual_block_addresses(
                            block0_len,
                            block1_len,
                            delay_blocks.into(),
                            caps,
                        )?;
                        // zeros before block 0 so that it ends at the end of
                        // the physical block
                        let mut data = vec![0; 4 * caps.sram_block0_len - block0.len()];
                        data.extend_from_slice(&block0);
                        data.extend_from_slice(&block1);
                        runner.sram = data;
                        runner.block_delay = Some(delay_blocks);
                        seq
                    }
                    SramData::Flat(mut data) => {
                        pad_to_words(&mut data);
                        runner.pageable = seq.max_sram_address() as usize <= caps.sram_page_len;
                        if runner.pageable {
                            data.truncate(4 * caps.sram_page_len);
                        }
                        runner.sram = data;
                        seq.clone()
                    }
                };
                runner.n_packets =
                    u64::from(reps) * seq.timer_stop_count() as u64 / TIMING_PACKET_LEN;
                runner.rep_time = seq.estimate_execution_time();
                runner.program = Program::Memory(seq);
            }
            (BuildFamily::JumpTable, Program::JumpTable(_)) => match sram {
                SramData::Flat(mut data) => {
                    pad_to_words(&mut data);
                    runner.sram = data;
                }
                SramData::DualBlock { .. } => {
                    return Err(variant.unsupported("dual-block SRAM"));
                }
            },
            (BuildFamily::JumpTable, Program::Memory(_)) => {
                return Err(variant.unsupported("memory sequence"));
            }
            (BuildFamily::Legacy, Program::JumpTable(_)) => {
                return Err(variant.unsupported("jump table"));
            }
        }
        tracing::debug!(
            board = %runner.board,
            reps,
            pageable = runner.pageable,
            n_packets = runner.n_packets,
            "sequence runner created"
        );
        Ok(runner)
    }

    /// Gives the name of the board.
    pub fn board(&self) -> &str {
        &self.board
    }

    /// Returns `true` if the sequence fits in one SRAM page.
    ///
    /// Pageable sequences can be written to one page while the other page is
    /// running.
    pub fn pageable(&self) -> bool {
        self.pageable
    }

    /// Gives the program, after any address fix-up or master delay.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Gives the SRAM bytes that are uploaded.
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    /// Gives the number of inter-block delay units of a dual-block sequence.
    pub fn block_delay(&self) -> Option<u8> {
        self.block_delay
    }

    /// Gives the number of timing data packets produced by the run.
    pub fn n_packets(&self) -> u64 {
        self.n_packets
    }

    /// Gives a conservative bound of the duration of the sequence.
    ///
    /// This is the timeout used when collecting the timing data packets.
    pub fn seq_time(&self) -> Duration {
        self.rep_time
            .checked_mul(self.reps)
            .and_then(|t| t.checked_mul(TIMEOUT_FACTOR))
            .map_or(Duration::MAX, |t| t.saturating_add(TIMEOUT_MARGIN))
    }

    /// Builds the packets that upload the program and the SRAM.
    ///
    /// The master board adds a synchronization delay before the SRAM calls of
    /// its memory sequence (or to its start delay in jump table builds). This
    /// is done once, the first time that the master packets are built, and the
    /// sequence time is recomputed.
    pub fn load_packets(&mut self, page: usize, is_master: bool) -> Result<Vec<Bytes>> {
        if page != 0 && !self.pageable {
            return Err(Error::invalid_argument(format!(
                "sequence for {} is not pageable and cannot be loaded to page {page}",
                self.board
            )));
        }
        if is_master && !self.master_delay_added {
            match &mut self.program {
                Program::Memory(seq) => {
                    *seq = seq.with_master_delay(MASTER_SRAM_DELAY_US, MEMORY_CLOCK_MHZ)?;
                    self.rep_time = seq.estimate_execution_time();
                }
                Program::JumpTable(_) => {
                    self.start_delay = self.start_delay.saturating_add(MASTER_SRAM_DELAY_US as u16);
                }
            }
            self.master_delay_added = true;
        }
        let caps = self.variant.capabilities();
        let mut packets = match &self.program {
            Program::Memory(seq) => vec![sram::packetize_memory(seq, page, &self.variant)?],
            Program::JumpTable(table) => vec![table.to_bytes(caps)?],
        };
        packets.extend(sram::packetize_sram(&self.sram, page, caps)?);
        Ok(packets)
    }

    /// Builds the run packet.
    ///
    /// `delay` is added to the start delay of the board.
    pub fn run_packet(&self, page: u8, role: Role, delay: u16, sync: u8) -> Result<RegisterFrame> {
        let reps = u16::try_from(self.reps).map_err(|_| {
            Error::invalid_argument(format!("{} repetitions do not fit in 16 bits", self.reps))
        })?;
        let start_delay = self
            .start_delay
            .checked_add(delay)
            .ok_or_else(|| Error::invalid_argument("start delay does not fit in 16 bits"))?;
        registers::run(
            &self.variant,
            &RunParams {
                reps,
                page,
                role,
                start_delay,
                block_delay: self.block_delay,
                sync,
                loop_delay: self.loop_delay,
            },
        )
    }

    /// Returns `true` if the timing results of this board are requested.
    ///
    /// Each entry of `timing_order` names a timing result, prefixed by the
    /// board name. Timing packets of boards that are not in the list are read
    /// and discarded.
    pub fn keeps_timing<S: AsRef<str>>(&self, timing_order: &[S]) -> bool {
        timing_order
            .iter()
            .any(|s| s.as_ref().starts_with(self.board.as_str()))
    }

    /// Extracts the timing results from the collected timing packets.
    pub fn extract(&self, packets: &[Bytes]) -> Result<Vec<u16>> {
        extract_timing(packets)
    }
}

/// Extracts the timing results from timing packets.
///
/// The results are 16-bit little-endian values in bytes 3 to 62 of each
/// packet.
pub fn extract_timing(packets: &[Bytes]) -> Result<Vec<u16>> {
    let mut timing = Vec::with_capacity(packets.len() * TIMING_DATA.len() / 2);
    for packet in packets {
        if packet.len() != READBACK_LEN {
            return Err(Error::MalformedReply {
                expected: READBACK_LEN,
                raw: packet.to_vec(),
            });
        }
        timing.extend(
            packet[TIMING_DATA]
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]])),
        );
    }
    Ok(timing)
}

/// Zero pads a trailing partial SRAM word.
fn pad_to_words(data: &mut Vec<u8>) {
    data.resize(data.len().next_multiple_of(4), 0);
}
