//! FIFO phase offset search.
//!
//! The FIFO counter of a DAC depends on the phase offset (PHOF) written to the
//! DAC and on the polarity of its sampling clock. The search starts with a
//! positive clock polarity and measures the FIFO counter for each of the four
//! PHOFs. Each PHOF that gives the target counter is written again to verify
//! the counter. If no PHOF is verified, the clock polarity is flipped and the
//! search is tried again, up to a maximum number of tries.

use super::{check_reply, Request, Step};
use crate::error::Result;
use ghzdac_json::FifoCalibration;

const MEASURE_COMMANDS: [u32; 8] = [
    0x0700, 0x8700, 0x0701, 0x8700, 0x0702, 0x8700, 0x0703, 0x8700,
];

fn fifo_counter(response: u8) -> u8 {
    (response >> 4) & 0xf
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
enum State {
    SetPolarity,
    Measure,
    Verify { candidates: Vec<u8>, next: usize },
    Done,
}

/// FIFO calibration state machine.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FifoSearch {
    target: u8,
    max_tries: u32,
    tries: u32,
    invert: bool,
    phof: Option<u8>,
    found: bool,
    state: State,
}

impl FifoSearch {
    /// Creates a search for the `target` FIFO counter value.
    pub fn new(target: u8, max_tries: u32) -> FifoSearch {
        FifoSearch {
            target,
            max_tries,
            tries: 1,
            invert: false,
            phof: None,
            found: false,
            state: State::SetPolarity,
        }
    }

    /// Gives the next step of the search.
    pub fn step(&self) -> Step<FifoCalibration> {
        match &self.state {
            State::SetPolarity => Step::Request(Request::ClockPolarity {
                invert: self.invert,
            }),
            State::Measure => Step::Request(Request::Serial(MEASURE_COMMANDS.to_vec())),
            State::Verify { candidates, next } => Step::Request(Request::Serial(vec![
                0x0700 + u32::from(candidates[*next]),
                0x8700,
            ])),
            State::Done => Step::Done(FifoCalibration {
                found: self.found,
                clock_inverted: self.invert,
                phof: self.phof,
                tries: self.tries,
                target: self.target,
            }),
        }
    }

    /// Advances the search with the reply to the current request.
    pub fn advance(mut self, reply: &[u8]) -> Result<FifoSearch> {
        self.state = match std::mem::replace(&mut self.state, State::Done) {
            State::SetPolarity => State::Measure,
            State::Measure => {
                check_reply(reply, MEASURE_COMMANDS.len())?;
                let candidates: Vec<u8> = (0..4u8)
                    .filter(|&phof| fifo_counter(reply[2 * usize::from(phof) + 1]) == self.target)
                    .collect();
                tracing::debug!(
                    counters = ?reply.iter().skip(1).step_by(2).map(|&r| fifo_counter(r)).collect::<Vec<_>>(),
                    ?candidates,
                    "FIFO counters measured"
                );
                if candidates.is_empty() {
                    self.phof = None;
                    self.next_try()
                } else {
                    State::Verify {
                        candidates,
                        next: 0,
                    }
                }
            }
            State::Verify { candidates, next } => {
                check_reply(reply, 2)?;
                self.phof = Some(candidates[next]);
                if fifo_counter(reply[1]) == self.target {
                    self.found = true;
                    State::Done
                } else if next + 1 < candidates.len() {
                    State::Verify {
                        candidates,
                        next: next + 1,
                    }
                } else {
                    self.next_try()
                }
            }
            State::Done => State::Done,
        };
        Ok(self)
    }

    fn next_try(&mut self) -> State {
        if self.tries >= self.max_tries {
            tracing::warn!(tries = self.tries, "FIFO calibration failed");
            return State::Done;
        }
        self.tries += 1;
        self.invert = !self.invert;
        State::SetPolarity
    }
}
