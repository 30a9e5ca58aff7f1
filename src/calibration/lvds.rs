//! LVDS sampling delay search.
//!
//! The DAC samples its LVDS data lanes with a programmable sampling delay
//! (SD). For each of the 16 phase steps, the probe sequence sets the minimum
//! setup delay (MSD) and the minimum hold delay (MHD) and reads back a check
//! bit. With a clean data clock, each of the two check bit sequences switches
//! exactly once, and the two switches are at most one step apart.
//!
//! The search optionally starts with an optimization pass with SD = 0, which
//! locates the falling edges of the MSD and MHD check bits and places SD
//! halfway between them. The chosen SD is then written, the probe sequence is
//! run again to verify it, and a final read gives a check value.

use super::{check_reply, Request, Step};
use crate::error::Result;
use ghzdac_json::LvdsCalibration;

const PHASE_STEPS: usize = 16;
// the SD write followed by four commands per phase step
const PASS_LEN: usize = 1 + 4 * PHASE_STEPS;

fn probe_pass(sd: u8) -> Vec<u32> {
    std::iter::once(0x0500 + (u32::from(sd) << 4))
        .chain(
            (0..PHASE_STEPS as u32).flat_map(|i| [0x0400 + (i << 4), 0x8500, 0x0400 + i, 0x8500]),
        )
        .collect()
}

fn msd_bits(reply: &[u8]) -> Vec<bool> {
    (0..PHASE_STEPS).map(|i| reply[4 * i + 2] & 1 != 0).collect()
}

fn mhd_bits(reply: &[u8]) -> Vec<bool> {
    (0..PHASE_STEPS).map(|i| reply[4 * i + 4] & 1 != 0).collect()
}

/// Index of the first 1 to 0 transition, or 0 if there is none.
fn falling_edge(bits: &[bool]) -> u8 {
    let mut high = false;
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            high = true;
        } else if high {
            return i as u8;
        }
    }
    0
}

/// Positions at which consecutive bits differ.
fn switches(bits: &[bool]) -> Vec<usize> {
    bits.windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] != w[1])
        .map(|(i, _)| i)
        .collect()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum State {
    Optimize,
    Verify,
    Check,
    Done { check: u8 },
}

/// LVDS calibration state machine.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct LvdsSearch {
    sd: u8,
    optimized: bool,
    msd: Option<u8>,
    mhd: Option<u8>,
    msd_bits: Vec<bool>,
    mhd_bits: Vec<bool>,
    success: bool,
    state: State,
}

impl LvdsSearch {
    /// Creates a search that looks for the optimal sampling delay.
    pub fn optimize() -> LvdsSearch {
        LvdsSearch {
            optimized: true,
            state: State::Optimize,
            ..LvdsSearch::with_sd(0)
        }
    }

    /// Creates a search that verifies the given sampling delay.
    ///
    /// Only the 4 least significant bits of `sd` are used.
    pub fn with_sd(sd: u8) -> LvdsSearch {
        LvdsSearch {
            sd: sd & 0xf,
            optimized: false,
            msd: None,
            mhd: None,
            msd_bits: Vec::new(),
            mhd_bits: Vec::new(),
            success: false,
            state: State::Verify,
        }
    }

    /// Gives the next step of the search.
    pub fn step(&self) -> Step<LvdsCalibration> {
        match self.state {
            State::Optimize => Step::Request(Request::Serial(probe_pass(0))),
            State::Verify => Step::Request(Request::Serial(probe_pass(self.sd))),
            State::Check => Step::Request(Request::Serial(vec![0x8500])),
            State::Done { check } => Step::Done(LvdsCalibration {
                success: self.success,
                msd: self.msd,
                mhd: self.mhd,
                sd: self.sd,
                msd_bits: self.msd_bits.clone(),
                mhd_bits: self.mhd_bits.clone(),
                check,
            }),
        }
    }

    /// Advances the search with the reply to the current request.
    pub fn advance(mut self, reply: &[u8]) -> Result<LvdsSearch> {
        self.state = match self.state {
            State::Optimize => {
                check_reply(reply, PASS_LEN)?;
                let msd = falling_edge(&msd_bits(reply));
                let mhd = falling_edge(&mhd_bits(reply));
                self.sd = ((i32::from(mhd) - i32::from(msd)).div_euclid(2) & 0xf) as u8;
                self.msd = Some(msd);
                self.mhd = Some(mhd);
                tracing::debug!(msd, mhd, sd = self.sd, "LVDS edges located");
                State::Verify
            }
            State::Verify => {
                check_reply(reply, PASS_LEN)?;
                self.msd_bits = msd_bits(reply);
                self.mhd_bits = mhd_bits(reply);
                let msd_switches = switches(&self.msd_bits);
                let mhd_switches = switches(&self.mhd_bits);
                if !self.optimized {
                    self.msd = single_edge(&msd_switches);
                    self.mhd = single_edge(&mhd_switches);
                }
                self.success = match (single_edge(&msd_switches), single_edge(&mhd_switches)) {
                    (Some(leading), Some(trailing)) => leading.abs_diff(trailing) <= 1,
                    _ => false,
                };
                if !self.success {
                    tracing::warn!(
                        sd = self.sd,
                        ?msd_switches,
                        ?mhd_switches,
                        "LVDS sampling window not clean"
                    );
                }
                State::Check
            }
            State::Check => {
                check_reply(reply, 1)?;
                State::Done {
                    check: reply[0] & 0x7,
                }
            }
            State::Done { check } => State::Done { check },
        };
        Ok(self)
    }
}

fn single_edge(switches: &[usize]) -> Option<u8> {
    match switches {
        [edge] => Some(*edge as u8),
        _ => None,
    }
}
