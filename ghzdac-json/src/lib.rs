//! ghzdac-json contains the JSON schemas used by ghzdac: the board
//! configuration file and the results of the board operations printed by the
//! `ghzdac` command line tool.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration file JSON schema.
///
/// The configuration file lists the boards that can be controlled and,
/// optionally, overrides the capability constants of particular firmware
/// builds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Boards known to the configuration.
    pub boards: Vec<Board>,
    /// Capability overrides, keyed by firmware build number.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub builds: BTreeMap<u32, BuildParams>,
}

/// Board JSON schema.
///
/// This contains the identity of a board, the address of the packet bridge
/// used to talk to it, and the per-board calibration defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct Board {
    /// Board name.
    ///
    /// Timing results are matched to boards by this name.
    pub name: String,
    /// Address of the board packet bridge, as `host:port`.
    pub address: String,
    /// Firmware build number.
    ///
    /// If this is not given, the build number is read back from the board
    /// when connecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<u32>,
    /// FIFO counter value targeted by the FIFO calibration.
    pub fifo_counter: u8,
    /// LVDS sampling delay used when it is not optimized.
    pub lvds_sd: u8,
}

/// Firmware build capability JSON schema.
///
/// All lengths are given in SRAM words (4 bytes each).
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct BuildParams {
    /// Length of the whole SRAM.
    pub sram_len: u32,
    /// Length of one SRAM page.
    ///
    /// This is typically half of `sram_len`.
    pub sram_page_len: u32,
    /// Number of words written by one SRAM write packet (one derp).
    pub sram_write_pkt_len: u32,
    /// Number of clock cycles of one inter-block delay unit.
    pub sram_delay_len: u32,
    /// Length of the first SRAM block.
    pub sram_block0_len: u32,
    /// Length of the second SRAM block.
    pub sram_block1_len: u32,
}

/// DAC channel.
///
/// Each board contains two DACs, which share the serial bus but have separate
/// clock polarity and data lanes.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DacChannel {
    /// DAC A.
    A,
    /// DAC B.
    B,
}

macro_rules! impl_str_conv {
    ($ty:ty, $($s:expr => $v:ident),*) => {
        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, String> {
                Ok(match s {
                    $(
                        $s => <$ty>::$v,
                    )*
                        _ => return Err(format!("invalid value {s:?}")),
                })
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
                write!(f, "{}", match self {
                    $(
                        <$ty>::$v => $s,
                    )*
                })
            }
        }
    }
}

impl_str_conv!(DacChannel,
               "A" => A,
               "B" => B);

/// Register readback JSON schema.
///
/// This contains the decoded fields of a register readback reply.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Readback {
    /// Firmware build number.
    pub build: u8,
    /// Last serial bus response byte.
    pub serial_response: u8,
    /// Whether the PLL lock has been lost.
    pub no_pll_latch: bool,
    /// I2C acknowledge byte.
    pub i2c_ack: u8,
    /// I2C readback bytes.
    pub i2c_bytes: Vec<u8>,
    /// Execution counter.
    pub execution_counter: u16,
}

/// FIFO calibration JSON schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct FifoCalibration {
    /// Whether a PHOF giving the target FIFO counter was found and verified.
    pub found: bool,
    /// Clock polarity used in the last try.
    pub clock_inverted: bool,
    /// PHOF found (or last candidate tried), if any.
    pub phof: Option<u8>,
    /// Number of tries used.
    pub tries: u32,
    /// Target FIFO counter value.
    pub target: u8,
}

/// LVDS calibration JSON schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct LvdsCalibration {
    /// Whether a clean sampling window was found.
    pub success: bool,
    /// Minimum setup delay edge, if any.
    pub msd: Option<u8>,
    /// Minimum hold delay edge, if any.
    pub mhd: Option<u8>,
    /// Sampling delay that has been programmed.
    pub sd: u8,
    /// MSD check bits for each of the 16 phase steps.
    pub msd_bits: Vec<bool>,
    /// MHD check bits for each of the 16 phase steps.
    pub mhd_bits: Vec<bool>,
    /// Check value read after programming the sampling delay.
    pub check: u8,
}

/// BIST JSON schema.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bist {
    /// Whether both hardware checksums match the expected one.
    pub success: bool,
    /// Expected checksum.
    pub expected: [u32; 2],
    /// Checksum read from the LVDS path.
    pub lvds: [u32; 2],
    /// Checksum read from the FIFO path.
    pub fifo: [u32; 2],
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_with_build_overrides() {
        let json = r#"{
            "boards": [
                {"name": "Vince DAC 11", "address": "10.0.0.11:5000",
                 "build": 8, "fifo_counter": 3, "lvds_sd": 6}
            ],
            "builds": {
                "8": {"sram_len": 18432, "sram_page_len": 9216,
                      "sram_write_pkt_len": 256, "sram_delay_len": 1024,
                      "sram_block0_len": 16384, "sram_block1_len": 2048}
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.boards[0].build, Some(8));
        assert_eq!(config.builds[&8].sram_page_len, 9216);
    }

    #[test]
    fn unknown_keys_rejected() {
        let json = r#"{"boards": [{"name": "a", "address": "x:1",
            "fifo_counter": 3, "lvds_sd": 6, "colour": "red"}]}"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }

    #[test]
    fn dac_channel_str() {
        assert_eq!("B".parse::<DacChannel>(), Ok(DacChannel::B));
        assert!("C".parse::<DacChannel>().is_err());
        assert_eq!(DacChannel::A.to_string(), "A");
    }
}
