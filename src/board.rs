//! GHz DAC board session.
//!
//! This module contains [`Board`], which owns the packet transport to one
//! board and implements the board operations on top of the register codec and
//! the SRAM packetizer: register writes and readbacks, the serial and I2C
//! sub-protocols, SRAM and jump table uploads, PLL initialization, and the
//! drivers that feed the calibration state machines with hardware replies.
//!
//! All the operations take `&mut self`, so the operations on one board are
//! strictly ordered. Several boards can be driven concurrently by polling
//! futures that borrow different boards.

use crate::calibration::{
    self, bist,
    fifo::FifoSearch,
    lvds::LvdsSearch,
    Request, Step,
};
use crate::config;
use crate::constants::{I2C_ACK, I2C_RB, MAC_PREFIX, READBACK_LEN, REGISTER_TIMEOUT};
use crate::error::{Error, Result};
use crate::jump_table::JumpTable;
use crate::registers::{self, Readback, RegisterFrame};
use crate::runner::SequenceRunner;
use crate::sram;
use crate::transport::PacketTransport;
use crate::variant::{BuildFamily, Variant};
use bytes::Bytes;
use ghzdac_json::{BuildParams, DacChannel};
use std::collections::BTreeMap;
use std::time::Duration;

const PLL_INIT_COMMANDS: [u32; 4] = [0x1f_c093, 0x1f_c092, 0x10_0004, 0x00_0c11];
const PLL_SERIAL_OP: u8 = 1;

/// Gives the MAC address of the board with a given id.
pub fn mac_for(id: u8) -> String {
    format!("{MAC_PREFIX}{id:02X}")
}

/// Returns `true` if the MAC address belongs to a GHz DAC board.
pub fn is_mac(mac: &str) -> bool {
    mac.to_uppercase().starts_with(MAC_PREFIX)
}

/// GHz DAC board.
#[derive(Debug)]
pub struct Board<T> {
    name: String,
    variant: Variant,
    fifo_counter: u8,
    lvds_sd: u8,
    transport: T,
}

impl<T: PacketTransport> Board<T> {
    /// Creates a board with a known variant.
    pub fn new(config: &ghzdac_json::Board, variant: Variant, transport: T) -> Board<T> {
        Board {
            name: config.name.clone(),
            variant,
            fifo_counter: config.fifo_counter,
            lvds_sd: config.lvds_sd,
            transport,
        }
    }

    /// Connects to a board.
    ///
    /// If the configuration does not give the firmware build, the board is
    /// pinged and the build is taken from its readback. `builds` contains the
    /// capability overrides of the configuration.
    #[tracing::instrument(name = "Board::connect", level = "debug", skip_all, fields(board = %config.name))]
    pub async fn connect(
        config: &ghzdac_json::Board,
        builds: &BTreeMap<u32, BuildParams>,
        mut transport: T,
    ) -> Result<Board<T>> {
        let build = match config.build {
            Some(build) => build,
            None => {
                let reply = transport
                    .request(registers::ping().as_bytes(), READBACK_LEN, REGISTER_TIMEOUT)
                    .await?;
                Readback::parse(&reply)?.build.into()
            }
        };
        let variant = config::variant_for(build, builds)?;
        tracing::info!(board = %config.name, build, family = ?variant.family(), "connected to board");
        Ok(Board::new(config, variant, transport))
    }

    /// Gives the name of the board.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gives the firmware variant of the board.
    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Gives access to the packet transport of the board.
    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Sends a register frame without waiting for a readback.
    pub async fn send_registers(&mut self, frame: &RegisterFrame) -> Result<()> {
        self.transport.send(frame.as_bytes()).await
    }

    /// Sends a register frame and waits for its readback.
    pub async fn query_registers(&mut self, frame: &RegisterFrame) -> Result<Readback> {
        let reply = self
            .transport
            .request(frame.as_bytes(), READBACK_LEN, REGISTER_TIMEOUT)
            .await?;
        Readback::parse(&reply)
    }

    /// Pings the board.
    pub async fn ping(&mut self) -> Result<Readback> {
        self.query_registers(&registers::ping()).await
    }

    /// Queries the PLL status.
    pub async fn pll_query(&mut self) -> Result<Readback> {
        self.query_registers(&registers::pll_query()).await
    }

    /// Resets the 1 GHz PLL.
    #[tracing::instrument(level = "debug", skip(self), fields(board = %self.name))]
    pub async fn reset_pll(&mut self) -> Result<Readback> {
        self.query_registers(&registers::pll_reset()).await
    }

    /// Programs the PLL.
    ///
    /// This is only needed once after the board is powered on. The SRAM is
    /// run once with an empty range afterwards.
    #[tracing::instrument(level = "debug", skip(self), fields(board = %self.name))]
    pub async fn init_pll(&mut self) -> Result<()> {
        self.run_serial(PLL_SERIAL_OP, &PLL_INIT_COMMANDS).await?;
        self.run_sram_once(0, 0).await
    }

    /// Starts the debug output of four words.
    pub async fn debug_output(&mut self, words: [u32; 4]) -> Result<Readback> {
        let frame = registers::debug(&self.variant, words)?;
        self.query_registers(&frame).await
    }

    /// Sets the sampling clock polarity of a DAC.
    pub async fn set_polarity(&mut self, channel: DacChannel, invert: bool) -> Result<()> {
        self.query_registers(&registers::clock_polarity(channel, invert))
            .await?;
        Ok(())
    }

    /// Runs commands through the serial bus.
    ///
    /// Returns the serial response to each of the commands.
    pub async fn run_serial(&mut self, op: u8, commands: &[u32]) -> Result<Vec<u8>> {
        let mut responses = Vec::with_capacity(commands.len());
        for &command in commands {
            let readback = self.query_registers(&registers::serial(op, command)).await?;
            responses.push(readback.serial_response);
        }
        tracing::trace!(op, ?commands, ?responses, "serial commands");
        Ok(responses)
    }

    /// Runs I2C transfers.
    ///
    /// Each transfer is a list of 16-bit items, whose low byte is the data and
    /// whose high bits are the [`I2C_RB`] and [`I2C_ACK`] flags. Items with
    /// any high bit set send a zero data byte. Transfers are sent in chunks of
    /// 8 items. Returns the bytes read back, in transfer order.
    ///
    /// [`I2C_RB`]: crate::constants::I2C_RB
    /// [`I2C_ACK`]: crate::constants::I2C_ACK
    pub async fn run_i2c(&mut self, transfers: &[Vec<u16>]) -> Result<Vec<u8>> {
        let mut answer = Vec::new();
        for transfer in transfers {
            for chunk in transfer.chunks(8) {
                let data: Vec<u8> = chunk.iter().map(|&b| u8::try_from(b).unwrap_or(0)).collect();
                let read: Vec<bool> = chunk.iter().map(|&b| b & I2C_RB != 0).collect();
                let ack: Vec<bool> = chunk.iter().map(|&b| b & I2C_ACK != 0).collect();
                let readback = self
                    .query_registers(&registers::i2c(&data, &read, &ack)?)
                    .await?;
                // the bytes of a short transfer are at the end of the readback
                let bytes = &readback.i2c_bytes[8 - chunk.len()..];
                answer.extend(bytes.iter().zip(&read).filter(|&(_, &r)| r).map(|(&b, _)| b));
            }
        }
        Ok(answer)
    }

    /// Writes SRAM data from the start of the SRAM.
    ///
    /// `data` holds 4 bytes per SRAM word, least significant byte first.
    pub async fn write_sram(&mut self, data: &[u8]) -> Result<()> {
        for packet in sram::packetize_sram(data, 0, self.variant.capabilities())? {
            self.transport.send(&packet).await?;
        }
        Ok(())
    }

    /// Writes a jump table (jump table builds only).
    pub async fn write_jump_table(&mut self, table: &JumpTable) -> Result<()> {
        self.variant.require_jump_table("jump table write")?;
        let blob = table.to_bytes(self.variant.capabilities())?;
        self.transport.send(&blob).await
    }

    /// Writes SRAM words and runs them.
    ///
    /// If `looped` is `true` the SRAM runs continuously. The block delay is
    /// only supported by legacy builds.
    #[tracing::instrument(level = "debug", skip(self, words), fields(board = %self.name, len = words.len()))]
    pub async fn run_sram(&mut self, words: &[u32], looped: bool, block_delay: u8) -> Result<()> {
        if block_delay != 0 && self.variant.has_jump_table() {
            return Err(self.variant.unsupported("SRAM block delay"));
        }
        self.ping().await?;
        self.write_sram(&sram::sram_bytes(words)).await?;
        let end = sram_end(words.len())?;
        match self.variant.family() {
            BuildFamily::Legacy => {
                let frame = registers::run_sram(
                    &self.variant,
                    0,
                    end,
                    looped,
                    block_delay,
                    self.variant.default_sync(),
                )?;
                self.send_registers(&frame).await
            }
            BuildFamily::JumpTable => {
                self.write_jump_table(&JumpTable::run_sram(0, end, looped))
                    .await?;
                self.send_registers(&registers::run_simple(&self.variant)?)
                    .await
            }
        }
    }

    /// Runs the SRAM once from `start` to `end - 1`.
    async fn run_sram_once(&mut self, start: u32, end: u32) -> Result<()> {
        match self.variant.family() {
            BuildFamily::Legacy => {
                let frame = registers::run_sram(
                    &self.variant,
                    start,
                    end,
                    false,
                    0,
                    self.variant.default_sync(),
                )?;
                self.send_registers(&frame).await
            }
            BuildFamily::JumpTable => {
                self.write_jump_table(&JumpTable::run_sram(start, end, false))
                    .await?;
                self.send_registers(&registers::run_simple(&self.variant)?)
                    .await
            }
        }
    }

    async fn calibration_request(&mut self, channel: DacChannel, request: &Request) -> Result<Vec<u8>> {
        match request {
            Request::ClockPolarity { invert } => {
                self.set_polarity(channel, *invert).await?;
                Ok(Vec::new())
            }
            Request::Serial(commands) => {
                self.run_serial(calibration::serial_op(channel), commands)
                    .await
            }
        }
    }

    /// Runs the FIFO calibration of a DAC.
    ///
    /// If `target` is `None`, the FIFO counter of the board configuration is
    /// used.
    #[tracing::instrument(level = "debug", skip(self), fields(board = %self.name))]
    pub async fn set_fifo(
        &mut self,
        channel: DacChannel,
        target: Option<u8>,
    ) -> Result<ghzdac_json::FifoCalibration> {
        let mut search = FifoSearch::new(
            target.unwrap_or(self.fifo_counter),
            self.variant.capabilities().max_fifo_tries,
        );
        loop {
            match search.step() {
                Step::Request(request) => {
                    let reply = self.calibration_request(channel, &request).await?;
                    search = search.advance(&reply)?;
                }
                Step::Done(outcome) => {
                    tracing::info!(board = %self.name, %channel, ?outcome, "FIFO calibration");
                    return Ok(outcome);
                }
            }
        }
    }

    /// Runs the LVDS calibration of a DAC.
    ///
    /// If `optimize` is `true`, the sampling delay is searched for. Otherwise
    /// `sd` is verified, or the sampling delay of the board configuration if
    /// `sd` is `None`.
    #[tracing::instrument(level = "debug", skip(self), fields(board = %self.name))]
    pub async fn set_lvds(
        &mut self,
        channel: DacChannel,
        sd: Option<u8>,
        optimize: bool,
    ) -> Result<ghzdac_json::LvdsCalibration> {
        let mut search = if optimize {
            LvdsSearch::optimize()
        } else {
            LvdsSearch::with_sd(sd.unwrap_or(self.lvds_sd))
        };
        loop {
            match search.step() {
                Step::Request(request) => {
                    let reply = self.calibration_request(channel, &request).await?;
                    search = search.advance(&reply)?;
                }
                Step::Done(outcome) => {
                    tracing::info!(
                        board = %self.name,
                        %channel,
                        success = outcome.success,
                        sd = outcome.sd,
                        "LVDS calibration"
                    );
                    return Ok(outcome);
                }
            }
        }
    }

    /// Runs the built-in self-test of a DAC with the given samples.
    #[tracing::instrument(level = "debug", skip(self, samples), fields(board = %self.name))]
    pub async fn run_bist(&mut self, channel: DacChannel, samples: &[u32]) -> Result<ghzdac_json::Bist> {
        let op = calibration::serial_op(channel);
        self.run_sram_once(0, 0).await?;
        let words = bist::bist_sram(samples, calibration::sram_shift(channel));
        self.write_sram(&sram::sram_bytes(&words)).await?;
        self.run_serial(op, &bist::SETUP_COMMANDS).await?;
        self.run_sram_once(0, sram_end(words.len())?).await?;
        let responses = self.run_serial(op, &bist::read_commands()).await?;
        bist::evaluate(samples, &responses)
    }

    /// Uploads the program and SRAM of a sequence runner.
    pub async fn load(&mut self, runner: &mut SequenceRunner, page: usize, is_master: bool) -> Result<()> {
        for packet in runner.load_packets(page, is_master)? {
            self.transport.send(&packet).await?;
        }
        Ok(())
    }

    /// Receives the timing data packets of a run.
    pub async fn collect(&mut self, n_packets: u64, timeout: Duration) -> Result<Vec<Bytes>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut packets = Vec::new();
        for _ in 0..n_packets {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let packet = self
                .transport
                .receive(READBACK_LEN, remaining)
                .await
                .map_err(|err| match err {
                    Error::Timeout { .. } => Error::Timeout { timeout },
                    err => err,
                })?;
            packets.push(packet);
        }
        Ok(packets)
    }
}

fn sram_end(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::invalid_argument(format!("{len} SRAM words")))
}
