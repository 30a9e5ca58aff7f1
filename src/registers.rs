//! Register codec.
//!
//! This module encodes the 56-byte register write packets that control a GHz
//! DAC board and decodes the 70-byte register readback replies.
//!
//! Every encoder returns a freshly allocated [`RegisterFrame`] in which only the
//! bytes relevant to the operation are set. The firmware treats zero bytes as
//! "leave default", so all other bytes are kept at zero. Multi-byte fields are
//! little-endian. Some fields are laid out differently in jump table builds,
//! so the encoders for those operations take the board [`Variant`].

use crate::constants::{READBACK_LEN, REG_PACKET_LEN};
use crate::error::{Error, Result};
use crate::variant::{BuildFamily, Variant};
use ghzdac_json::DacChannel;

/// Register write packet.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RegisterFrame([u8; REG_PACKET_LEN]);

impl RegisterFrame {
    fn new(start: u8, readback: u8) -> RegisterFrame {
        let mut frame = RegisterFrame([0; REG_PACKET_LEN]);
        frame.0[0] = start;
        frame.0[1] = readback;
        frame
    }

    fn set_le(&mut self, offset: usize, value: u32, len: usize) {
        self.0[offset..offset + len].copy_from_slice(&value.to_le_bytes()[..len]);
    }

    /// Gives the bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Gives the start mode byte.
    pub fn start_mode(&self) -> u8 {
        self.0[0]
    }

    /// Gives the readback mode byte.
    ///
    /// A value of zero means that the board does not send a readback reply.
    pub fn readback_mode(&self) -> u8 {
        self.0[1]
    }
}

impl AsRef<[u8]> for RegisterFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Role of a board in a run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Role {
    /// The board starts the sequence and triggers the slaves.
    Master,
    /// The board waits for the daisy chain trigger of the master.
    Slave,
    /// The board does not run, but passes the daisy chain trigger.
    Idle,
    /// Test mode (jump table builds only).
    Test,
}

/// Parameters of a run packet.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RunParams {
    /// Number of repetitions of the sequence.
    pub reps: u16,
    /// SRAM and memory page (legacy builds only).
    pub page: u8,
    /// Board role.
    pub role: Role,
    /// Start delay.
    pub start_delay: u16,
    /// Number of inter-block delay units for dual-block sequences (legacy
    /// builds only).
    pub block_delay: Option<u8>,
    /// Sync byte.
    pub sync: u8,
    /// Delay between loops of the jump table (jump table builds only).
    pub loop_delay: u16,
}

impl RunParams {
    /// Creates the parameters for a run with the default settings of the
    /// variant.
    pub fn new(variant: &Variant, reps: u16, role: Role) -> RunParams {
        RunParams {
            reps,
            page: 0,
            role,
            start_delay: 0,
            block_delay: None,
            sync: variant.default_sync(),
            loop_delay: 0,
        }
    }
}

/// Encodes a ping.
///
/// The board does not start and sends a readback after 2 us.
pub fn ping() -> RegisterFrame {
    RegisterFrame::new(0, 1)
}

/// Encodes a PLL status query.
pub fn pll_query() -> RegisterFrame {
    RegisterFrame::new(1, 1)
}

/// Encodes a serial bus operation.
///
/// The 24 least significant bits of `data` are sent. The readback is delayed
/// to allow for the serial transfer.
pub fn serial(op: u8, data: u32) -> RegisterFrame {
    let mut frame = RegisterFrame::new(0, 1);
    frame.0[47] = op;
    frame.set_le(48, data, 3);
    frame
}

/// Encodes a reset pulse for the 1 GHz PLL.
pub fn pll_reset() -> RegisterFrame {
    let mut frame = RegisterFrame::new(0, 1);
    frame.0[46] = 0x80;
    frame
}

/// Encodes a sampling clock polarity change for one of the DACs.
pub fn clock_polarity(channel: DacChannel, invert: bool) -> RegisterFrame {
    let (set, polarity) = match channel {
        DacChannel::A => (4, 0),
        DacChannel::B => (5, 1),
    };
    let mut frame = RegisterFrame::new(0, 1);
    frame.0[46] = (1 << set) | (u8::from(invert) << polarity);
    frame
}

/// Encodes an I2C transfer of up to 8 bytes.
///
/// `read` and `ack` flag, for each byte in `data`, whether the byte is read
/// back and whether it is acknowledged.
pub fn i2c(data: &[u8], read: &[bool], ack: &[bool]) -> Result<RegisterFrame> {
    if data.len() != read.len() || data.len() != ack.len() {
        return Err(Error::invalid_argument(
            "data, read and ack must have the same length for I2C",
        ));
    }
    if data.is_empty() || data.len() > 8 {
        return Err(Error::invalid_argument(format!(
            "cannot send {} I2C data bytes (1 to 8 allowed)",
            data.len()
        )));
    }
    let mut frame = RegisterFrame::new(0, 2);
    frame.0[2] = 1 << (8 - data.len());
    frame.0[3] = msb_first_flags(read);
    frame.0[4] = msb_first_flags(ack);
    for (j, &byte) in data.iter().enumerate() {
        // data is written backwards starting at byte 12
        frame.0[12 - j] = byte;
    }
    Ok(frame)
}

fn msb_first_flags(flags: &[bool]) -> u8 {
    flags
        .iter()
        .enumerate()
        .fold(0, |acc, (j, &flag)| acc | (u8::from(flag) << (7 - j)))
}

/// Encodes a run packet.
///
/// In legacy builds the page is encoded in the start byte and the role in byte
/// 43. In jump table builds the start byte carries the role, the page and the
/// block delay are not supported, and a loop delay is added.
pub fn run(variant: &Variant, params: &RunParams) -> Result<RegisterFrame> {
    match variant.family() {
        BuildFamily::Legacy => {
            if params.page > 1 {
                return Err(Error::invalid_argument(format!(
                    "page {} out of range",
                    params.page
                )));
            }
            let role = match params.role {
                Role::Master => 0,
                Role::Slave => 1,
                Role::Idle => 3,
                Role::Test => return Err(variant.unsupported("test run")),
            };
            let mut frame = RegisterFrame::new(1 + (params.page << 7), 3);
            frame.set_le(13, params.reps.into(), 2);
            if let Some(block_delay) = params.block_delay {
                frame.0[19] = block_delay;
            }
            frame.0[43] = role;
            // the start delay high byte was added after the rest of the
            // registers had been defined
            let [low, high] = params.start_delay.to_le_bytes();
            frame.0[44] = low;
            frame.0[51] = high;
            frame.0[45] = params.sync;
            Ok(frame)
        }
        BuildFamily::JumpTable => {
            if params.page != 0 {
                return Err(variant.unsupported("paged run"));
            }
            if params.block_delay.is_some() {
                return Err(variant.unsupported("dual-block run"));
            }
            let start = match params.role {
                Role::Idle => 0,
                Role::Master => 1,
                Role::Test => 2,
                Role::Slave => 3,
            };
            let mut frame = RegisterFrame::new(start, 0);
            frame.set_le(13, params.reps.into(), 2);
            frame.set_le(15, params.loop_delay.into(), 2);
            // byte 17 selects the jump table whose activations are counted
            frame.0[17] = 0;
            frame.set_le(43, params.start_delay.into(), 2);
            frame.0[45] = params.sync;
            Ok(frame)
        }
    }
}

/// Encodes a single master run of the jump table with default settings.
pub fn run_simple(variant: &Variant) -> Result<RegisterFrame> {
    variant.require_jump_table("simple run")?;
    run(variant, &RunParams::new(variant, 1, Role::Master))
}

/// Encodes a direct SRAM run (legacy builds only).
///
/// The SRAM runs from `start` to `end - 1`, extended by `block_delay` delay
/// units. If `looped` is `true`, the SRAM runs continuously; otherwise it runs
/// once. No readback is produced.
pub fn run_sram(
    variant: &Variant,
    start: u32,
    end: u32,
    looped: bool,
    block_delay: u8,
    sync: u8,
) -> Result<RegisterFrame> {
    variant.require_legacy("direct SRAM run")?;
    let delay_len = variant.capabilities().sram_delay_len as u32;
    let mut frame = RegisterFrame::new(if looped { 3 } else { 4 }, 0);
    frame.set_le(13, start, 3);
    // wraps to 0xffffff for an empty SRAM run at address 0
    let end = (end + delay_len * u32::from(block_delay)).wrapping_sub(1) & 0xff_ffff;
    frame.set_le(16, end, 3);
    frame.0[19] = block_delay;
    frame.0[45] = sync;
    Ok(frame)
}

/// Encodes idle mode.
pub fn idle(variant: &Variant, delay: u16) -> RegisterFrame {
    let mut frame = RegisterFrame::new(0, 0);
    match variant.family() {
        BuildFamily::Legacy => {
            frame.0[43] = 3;
            frame.0[44] = delay as u8;
        }
        BuildFamily::JumpTable => frame.set_le(43, delay.into(), 2),
    }
    frame
}

/// Encodes debug mode (legacy builds only).
///
/// The four words are output continuously by the board.
pub fn debug(variant: &Variant, words: [u32; 4]) -> Result<RegisterFrame> {
    variant.require_legacy("debug output")?;
    let mut frame = RegisterFrame::new(2, 1);
    for (j, word) in words.into_iter().enumerate() {
        frame.set_le(13 + 4 * j, word, 4);
    }
    Ok(frame)
}

/// Register readback.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Readback {
    /// Firmware build number.
    pub build: u8,
    /// Response of the last serial bus operation.
    pub serial_response: u8,
    /// The PLL has lost lock since the last reset.
    pub no_pll_latch: bool,
    /// I2C acknowledge byte.
    pub i2c_ack: u8,
    /// I2C readback bytes, in transfer order.
    pub i2c_bytes: [u8; 8],
    /// SRAM execution counter.
    pub execution_counter: u16,
}

impl Readback {
    /// Decodes a register readback reply.
    ///
    /// Fails with [`Error::MalformedReply`] if the reply does not have the
    /// readback length.
    pub fn parse(reply: &[u8]) -> Result<Readback> {
        if reply.len() != READBACK_LEN {
            return Err(Error::MalformedReply {
                expected: READBACK_LEN,
                raw: reply.to_vec(),
            });
        }
        let mut i2c_bytes = [0; 8];
        for (j, byte) in i2c_bytes.iter_mut().enumerate() {
            *byte = reply[69 - j];
        }
        Ok(Readback {
            build: reply[51],
            serial_response: reply[56],
            no_pll_latch: reply[58] & 0x80 != 0,
            i2c_ack: reply[61],
            i2c_bytes,
            execution_counter: u16::from_le_bytes([reply[52], reply[53]]),
        })
    }
}

impl From<&Readback> for ghzdac_json::Readback {
    fn from(readback: &Readback) -> ghzdac_json::Readback {
        ghzdac_json::Readback {
            build: readback.build,
            serial_response: readback.serial_response,
            no_pll_latch: readback.no_pll_latch,
            i2c_ack: readback.i2c_ack,
            i2c_bytes: readback.i2c_bytes.to_vec(),
            execution_counter: readback.execution_counter,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn legacy() -> Variant {
        Variant::for_build(7).unwrap()
    }

    fn jump_table() -> Variant {
        Variant::for_build(13).unwrap()
    }

    fn nonzero(frame: &RegisterFrame) -> Vec<(usize, u8)> {
        frame
            .as_bytes()
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b != 0)
            .map(|(j, &b)| (j, b))
            .collect()
    }

    #[test]
    fn simple_frames() {
        assert_eq!(nonzero(&ping()), vec![(1, 1)]);
        assert_eq!(nonzero(&pll_query()), vec![(0, 1), (1, 1)]);
        assert_eq!(nonzero(&pll_reset()), vec![(1, 1), (46, 0x80)]);
        assert_eq!(ping().as_bytes().len(), 56);
    }

    #[test]
    fn serial_frame() {
        let frame = serial(2, 0x1fc093);
        assert_eq!(
            nonzero(&frame),
            vec![(1, 1), (47, 2), (48, 0x93), (49, 0xc0), (50, 0x1f)]
        );
        // only 24 bits are sent
        assert_eq!(serial(1, 0xff00_0001), serial(1, 1));
    }

    #[test]
    fn clock_polarity_frames() {
        assert_eq!(clock_polarity(DacChannel::A, false).as_bytes()[46], 0x10);
        assert_eq!(clock_polarity(DacChannel::A, true).as_bytes()[46], 0x11);
        assert_eq!(clock_polarity(DacChannel::B, false).as_bytes()[46], 0x20);
        assert_eq!(clock_polarity(DacChannel::B, true).as_bytes()[46], 0x22);
    }

    #[test]
    fn i2c_frame() {
        let frame = i2c(&[0xa0, 0x12, 0x34], &[false, false, true], &[true, true, false]).unwrap();
        let b = frame.as_bytes();
        assert_eq!(b[1], 2);
        assert_eq!(b[2], 0x20);
        assert_eq!(b[3], 0b0010_0000);
        // ack is passed through as one bit per byte
        assert_eq!(b[4], 0b1100_0000);
        assert_eq!(&b[10..13], &[0x34, 0x12, 0xa0]);
        assert_eq!(b[9], 0);
    }

    #[test]
    fn i2c_length_checks() {
        assert!(i2c(&[], &[], &[]).is_err());
        assert!(i2c(&[0; 9], &[false; 9], &[false; 9]).is_err());
        assert!(i2c(&[0; 2], &[false; 1], &[false; 2]).is_err());
        let frame = i2c(&[1; 8], &[true; 8], &[false; 8]).unwrap();
        assert_eq!(frame.as_bytes()[2], 1);
        assert_eq!(frame.as_bytes()[3], 0xff);
        assert_eq!(&frame.as_bytes()[5..13], &[1; 8]);
    }

    #[test]
    fn legacy_run() {
        let v = legacy();
        let params = RunParams {
            reps: 0x0302,
            page: 1,
            role: Role::Slave,
            start_delay: 0x0504,
            block_delay: Some(2),
            sync: 249,
            loop_delay: 0,
        };
        let frame = run(&v, &params).unwrap();
        assert_eq!(
            nonzero(&frame),
            vec![
                (0, 0x81),
                (1, 3),
                (13, 2),
                (14, 3),
                (19, 2),
                (43, 1),
                (44, 4),
                (45, 249),
                (51, 5)
            ]
        );
        let idle_params = RunParams {
            role: Role::Idle,
            ..params
        };
        assert_eq!(run(&v, &idle_params).unwrap().as_bytes()[43], 3);
        let test_params = RunParams {
            role: Role::Test,
            ..params
        };
        assert!(matches!(
            run(&v, &test_params),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn jump_table_run() {
        let v = jump_table();
        let mut params = RunParams::new(&v, 10, Role::Slave);
        params.loop_delay = 0x0201;
        params.start_delay = 0x0403;
        let frame = run(&v, &params).unwrap();
        assert_eq!(
            nonzero(&frame),
            vec![(0, 3), (13, 10), (15, 1), (16, 2), (43, 3), (44, 4)]
        );
        for (role, start) in [
            (Role::Idle, 0),
            (Role::Master, 1),
            (Role::Test, 2),
            (Role::Slave, 3),
        ] {
            params.role = role;
            assert_eq!(run(&v, &params).unwrap().start_mode(), start);
        }
        params.page = 1;
        assert!(matches!(run(&v, &params), Err(Error::Unsupported { .. })));
        params.page = 0;
        params.block_delay = Some(1);
        assert!(matches!(run(&v, &params), Err(Error::Unsupported { .. })));
        assert_eq!(run_simple(&v).unwrap().start_mode(), 1);
        assert!(run_simple(&legacy()).is_err());
    }

    #[test]
    fn run_sram_frames() {
        let v = legacy();
        let frame = run_sram(&v, 0, 20, false, 0, 249).unwrap();
        assert_eq!(
            nonzero(&frame),
            vec![(0, 4), (16, 19), (45, 249)]
        );
        let frame = run_sram(&v, 0x10, 100, true, 2, 0).unwrap();
        let b = frame.as_bytes();
        assert_eq!(b[0], 3);
        assert_eq!(b[13], 0x10);
        // 100 - 1 + 2 * 1024 = 2147
        assert_eq!(&b[16..19], &[0x63, 0x08, 0x00]);
        assert_eq!(b[19], 2);
        let empty = run_sram(&v, 0, 0, false, 0, 249).unwrap();
        assert_eq!(&empty.as_bytes()[16..19], &[0xff, 0xff, 0xff]);
        assert!(matches!(
            run_sram(&jump_table(), 0, 0, false, 0, 0),
            Err(Error::Unsupported { build: 13, .. })
        ));
    }

    #[test]
    fn idle_frames() {
        assert_eq!(nonzero(&idle(&legacy(), 0x0105)), vec![(43, 3), (44, 5)]);
        assert_eq!(nonzero(&idle(&jump_table(), 0x0105)), vec![(43, 5), (44, 1)]);
    }

    #[test]
    fn debug_frame() {
        let frame = debug(&legacy(), [1, 0x0200, 0x030000, 0x04000000]).unwrap();
        assert_eq!(
            nonzero(&frame),
            vec![(0, 2), (1, 1), (13, 1), (18, 2), (23, 3), (28, 4)]
        );
        assert!(debug(&jump_table(), [0; 4]).is_err());
    }

    #[test]
    fn readback() {
        let mut reply = [0u8; 70];
        reply[51] = 8;
        reply[52] = 0x34;
        reply[53] = 0x12;
        reply[56] = 0x5a;
        reply[58] = 0x80;
        reply[61] = 0x0f;
        for j in 0..8 {
            reply[62 + j] = j as u8;
        }
        let readback = Readback::parse(&reply).unwrap();
        assert_eq!(readback.build, 8);
        assert_eq!(readback.serial_response, 0x5a);
        assert!(readback.no_pll_latch);
        assert_eq!(readback.i2c_ack, 0x0f);
        assert_eq!(readback.i2c_bytes, [7, 6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(readback.execution_counter, 0x1234);
        reply[58] = 0x7f;
        assert!(!Readback::parse(&reply).unwrap().no_pll_latch);
    }

    #[test]
    fn readback_wrong_length() {
        match Readback::parse(&[1, 2, 3]) {
            Err(Error::MalformedReply { expected, raw }) => {
                assert_eq!(expected, 70);
                assert_eq!(raw, vec![1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
