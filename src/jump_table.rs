//! Jump table.
//!
//! Firmware builds 13 and later replace the memory sequencer with a jump
//! table. The SRAM plays from the start address until it reaches the address
//! of one of the table entries, where the entry decides what to do next: stop,
//! continue, jump to another SRAM address, or jump a number of times given by
//! one of the counters.
//!
//! The table is uploaded as a single blob of `jump_table_len` bytes:
//!
//! | bytes | contents |
//! |---|---|
//! | `0..4*n` | `n` counters, 32-bit little-endian |
//! | then 8 bytes per entry | from address (24-bit LE), to address (24-bit LE), opcode, argument |
//!
//! Entry 0 holds the start address in its "to" field. The rest of the blob is
//! zero.

use crate::error::{CapacityViolation, Error, Result};
use crate::variant::BoardCapabilities;
use bytes::{BufMut, Bytes, BytesMut};

const ENTRY_LEN: usize = 8;
const MAX_ADDRESS: u32 = 0xff_ffff;

/// Action taken when the SRAM reaches the address of a jump table entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum JumpOp {
    /// Stop the sequence.
    End,
    /// Continue with the next SRAM address.
    Nop,
    /// Jump to an SRAM address.
    Jump {
        /// Destination SRAM address
        to: u32,
    },
    /// Jump to an SRAM address while a counter has not expired.
    Cycle {
        /// Destination SRAM address
        to: u32,
        /// Counter index
        counter: u8,
    },
}

impl JumpOp {
    fn encode(self) -> (u32, u8, u8) {
        match self {
            JumpOp::End => (0, 0x01, 0),
            JumpOp::Nop => (0, 0x05, 0),
            JumpOp::Jump { to } => (to, 0x0d, 0),
            JumpOp::Cycle { to, counter } => (to, 0x03, counter),
        }
    }
}

/// Jump table entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct JumpEntry {
    /// SRAM address at which the entry is evaluated.
    pub from_addr: u32,
    /// Action of the entry.
    pub op: JumpOp,
}

/// Jump table.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct JumpTable {
    /// SRAM address at which the sequence starts.
    pub start_addr: u32,
    /// Ordered entries.
    pub entries: Vec<JumpEntry>,
    /// Counter values used by [`JumpOp::Cycle`] entries.
    pub counters: Vec<u32>,
}

impl JumpTable {
    /// Creates a jump table that runs the SRAM from `start` to `end - 1`.
    ///
    /// If `looped` is `true`, the SRAM runs continuously; otherwise it runs
    /// once. This is the jump table equivalent of a direct SRAM run.
    pub fn run_sram(start: u32, end: u32, looped: bool) -> JumpTable {
        let op = if looped {
            JumpOp::Jump { to: start }
        } else {
            JumpOp::End
        };
        JumpTable {
            start_addr: start,
            entries: vec![JumpEntry {
                from_addr: end.saturating_sub(1).max(start),
                op,
            }],
            counters: Vec::new(),
        }
    }

    /// Maximum number of entries that fit in the jump table memory.
    pub fn max_entries(caps: &BoardCapabilities) -> usize {
        let counters_len = 4 * caps.jump_table_counters;
        // one slot holds the start address
        (caps.jump_table_len.saturating_sub(counters_len) / ENTRY_LEN).saturating_sub(1)
    }

    /// Serializes the jump table into the blob uploaded to the board.
    pub fn to_bytes(&self, caps: &BoardCapabilities) -> Result<Bytes> {
        let max_entries = Self::max_entries(caps);
        if self.entries.len() > max_entries || self.counters.len() > caps.jump_table_counters {
            return Err(CapacityViolation::JumpTableTooLarge {
                entries: self.entries.len(),
                counters: self.counters.len(),
                max_entries,
                max_counters: caps.jump_table_counters,
            }
            .into());
        }
        let mut blob = BytesMut::with_capacity(caps.jump_table_len);
        for j in 0..caps.jump_table_counters {
            blob.put_u32_le(self.counters.get(j).copied().unwrap_or(0));
        }
        put_entry(&mut blob, 0, self.start_addr, 0, 0)?;
        for entry in &self.entries {
            let (to, opcode, argument) = entry.op.encode();
            if let JumpOp::Cycle { counter, .. } = entry.op {
                if usize::from(counter) >= self.counters.len() {
                    return Err(Error::invalid_argument(format!(
                        "jump table entry uses counter {counter}, but only {} counters are set",
                        self.counters.len()
                    )));
                }
            }
            put_entry(&mut blob, entry.from_addr, to, opcode, argument)?;
        }
        blob.resize(caps.jump_table_len, 0);
        Ok(blob.freeze())
    }
}

fn put_entry(blob: &mut BytesMut, from: u32, to: u32, opcode: u8, argument: u8) -> Result<()> {
    for addr in [from, to] {
        if addr > MAX_ADDRESS {
            return Err(Error::invalid_argument(format!(
                "jump table address {addr:#x} is wider than 24 bits"
            )));
        }
        blob.put_uint_le(addr.into(), 3);
    }
    blob.put_u8(opcode);
    blob.put_u8(argument);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::variant::Variant;

    fn caps() -> BoardCapabilities {
        *Variant::for_build(13).unwrap().capabilities()
    }

    #[test]
    fn run_sram_once() {
        let blob = JumpTable::run_sram(0, 20, false).to_bytes(&caps()).unwrap();
        assert_eq!(blob.len(), 528);
        assert!(blob[..16].iter().all(|&b| b == 0));
        // start entry
        assert_eq!(&blob[16..24], &[0, 0, 0, 0, 0, 0, 0, 0]);
        // end at word 19
        assert_eq!(&blob[24..32], &[19, 0, 0, 0, 0, 0, 0x01, 0]);
        assert!(blob[32..].iter().all(|&b| b == 0));
    }

    #[test]
    fn run_sram_looped() {
        let table = JumpTable::run_sram(0x10, 0x110, true);
        assert_eq!(
            table.entries,
            vec![JumpEntry {
                from_addr: 0x10f,
                op: JumpOp::Jump { to: 0x10 }
            }]
        );
        let blob = table.to_bytes(&caps()).unwrap();
        assert_eq!(&blob[16..24], &[0, 0, 0, 0x10, 0, 0, 0, 0]);
        assert_eq!(&blob[24..32], &[0x0f, 0x01, 0, 0x10, 0, 0, 0x0d, 0]);
        // an empty run evaluates its entry at the start address
        assert_eq!(JumpTable::run_sram(0, 0, false).entries[0].from_addr, 0);
    }

    #[test]
    fn counters() {
        let table = JumpTable {
            start_addr: 0,
            entries: vec![
                JumpEntry {
                    from_addr: 99,
                    op: JumpOp::Cycle { to: 0, counter: 1 },
                },
                JumpEntry {
                    from_addr: 199,
                    op: JumpOp::End,
                },
            ],
            counters: vec![5, 0x01020304],
        };
        let blob = table.to_bytes(&caps()).unwrap();
        assert_eq!(&blob[..8], &[5, 0, 0, 0, 4, 3, 2, 1]);
        assert_eq!(&blob[24..32], &[99, 0, 0, 0, 0, 0, 0x03, 1]);

        let bad = JumpTable {
            counters: vec![5],
            ..table
        };
        assert!(matches!(
            bad.to_bytes(&caps()),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn capacity() {
        assert_eq!(JumpTable::max_entries(&caps()), 63);
        let entry = JumpEntry {
            from_addr: 0,
            op: JumpOp::Nop,
        };
        let full = JumpTable {
            start_addr: 0,
            entries: vec![entry; 63],
            counters: vec![1, 2, 3, 4],
        };
        assert_eq!(full.to_bytes(&caps()).unwrap().len(), 528);
        let too_many = JumpTable {
            entries: vec![entry; 64],
            ..full.clone()
        };
        assert!(matches!(
            too_many.to_bytes(&caps()),
            Err(Error::Capacity(CapacityViolation::JumpTableTooLarge { .. }))
        ));
        let too_many_counters = JumpTable {
            counters: vec![0; 5],
            ..full
        };
        assert!(too_many_counters.to_bytes(&caps()).is_err());
    }
}
