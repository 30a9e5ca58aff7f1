//! Firmware build variants.
//!
//! This module maps the firmware build number of a board to its build family
//! and to the capability constants of that build. A [`Variant`] is selected
//! once when connecting to a board and it is read-only afterwards. Operations
//! whose behaviour depends on the firmware take the variant as a parameter.

use crate::constants::LEGACY_SYNC;
use crate::error::{Error, Result};

/// Firmware build family.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BuildFamily {
    /// Builds that run a memory sequence program (builds 7, 8 and 11).
    Legacy,
    /// Builds that run a jump table instead of a memory program (builds 13
    /// and later).
    JumpTable,
}

/// Board capabilities.
///
/// Capacity constants of a firmware build. SRAM and memory lengths are given
/// in words.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BoardCapabilities {
    /// Length of the whole SRAM.
    pub sram_len: usize,
    /// Length of one SRAM page.
    pub sram_page_len: usize,
    /// Number of SRAM words written by one write packet (derp).
    pub sram_write_pkt_len: usize,
    /// Number of clock cycles of one inter-block delay unit.
    pub sram_delay_len: usize,
    /// Length of the first physical SRAM block.
    pub sram_block0_len: usize,
    /// Length of the second physical SRAM block.
    pub sram_block1_len: usize,
    /// Length of the memory.
    pub mem_len: usize,
    /// Length of one memory page.
    pub mem_page_len: usize,
    /// Maximum number of tries of the FIFO calibration.
    pub max_fifo_tries: u32,
    /// Length in bytes of the serialized jump table.
    pub jump_table_len: usize,
    /// Number of jump table counters.
    pub jump_table_counters: usize,
}

const BUILD7: BoardCapabilities = BoardCapabilities {
    sram_len: 10240,
    sram_page_len: 5120,
    sram_write_pkt_len: 256,
    sram_delay_len: 1024,
    sram_block0_len: 8192,
    sram_block1_len: 2048,
    mem_len: 512,
    mem_page_len: 256,
    max_fifo_tries: 5,
    jump_table_len: 528,
    jump_table_counters: 4,
};

const BUILD8: BoardCapabilities = BoardCapabilities {
    sram_len: 18432,
    sram_page_len: 9216,
    sram_block0_len: 16384,
    ..BUILD7
};

impl BoardCapabilities {
    /// Returns the number of SRAM write units (derps) of the SRAM.
    pub fn sram_write_derps(&self) -> usize {
        self.sram_len / self.sram_write_pkt_len
    }

    /// Returns a copy with the SRAM constants taken from a configuration
    /// entry.
    ///
    /// The resulting capabilities are validated.
    pub fn with_params(&self, params: &ghzdac_json::BuildParams) -> Result<BoardCapabilities> {
        let caps = BoardCapabilities {
            sram_len: params.sram_len as usize,
            sram_page_len: params.sram_page_len as usize,
            sram_write_pkt_len: params.sram_write_pkt_len as usize,
            sram_delay_len: params.sram_delay_len as usize,
            sram_block0_len: params.sram_block0_len as usize,
            sram_block1_len: params.sram_block1_len as usize,
            ..*self
        };
        caps.validate()?;
        Ok(caps)
    }

    fn validate(&self) -> Result<()> {
        let lengths = [
            ("SRAM", self.sram_len),
            ("SRAM page", self.sram_page_len),
            ("SRAM write packet", self.sram_write_pkt_len),
            ("SRAM delay unit", self.sram_delay_len),
            ("SRAM block0", self.sram_block0_len),
            ("SRAM block1", self.sram_block1_len),
        ];
        if let Some((name, _)) = lengths.iter().find(|(_, len)| *len == 0) {
            return Err(Error::configuration(format!("{name} length must be non-zero")));
        }
        if 2 * self.sram_page_len > self.sram_len {
            return Err(Error::configuration(format!(
                "SRAM page length {} is larger than half of the SRAM ({})",
                self.sram_page_len, self.sram_len
            )));
        }
        if self.sram_len % self.sram_write_pkt_len != 0
            || self.sram_page_len % self.sram_write_pkt_len != 0
        {
            return Err(Error::configuration(format!(
                "SRAM and page lengths must be multiples of the write packet length {}",
                self.sram_write_pkt_len
            )));
        }
        if self.sram_block0_len + self.sram_block1_len > self.sram_len {
            return Err(Error::configuration(format!(
                "SRAM blocks ({} + {}) do not fit in the SRAM ({})",
                self.sram_block0_len, self.sram_block1_len, self.sram_len
            )));
        }
        // derp indices are sent as 16-bit numbers
        if self.sram_write_derps() > 1 << 16 {
            return Err(Error::configuration("too many SRAM derps"));
        }
        Ok(())
    }
}

/// Firmware build variant.
///
/// This combines the build number, its family and the capability constants.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Variant {
    build: u32,
    family: BuildFamily,
    capabilities: BoardCapabilities,
}

impl Variant {
    /// Selects the variant of a firmware build.
    ///
    /// Fails with [`Error::UnknownBuild`] if the build is not supported.
    pub fn for_build(build: u32) -> Result<Variant> {
        let (family, capabilities) = match build {
            7 | 11 => (BuildFamily::Legacy, BUILD7),
            8 => (BuildFamily::Legacy, BUILD8),
            13 => (BuildFamily::JumpTable, BUILD7),
            14 | 15 => (BuildFamily::JumpTable, BUILD8),
            _ => return Err(Error::UnknownBuild { build }),
        };
        Ok(Variant {
            build,
            family,
            capabilities,
        })
    }

    /// Selects the variant of a firmware build, overriding its SRAM
    /// constants with those given in the configuration.
    pub fn with_params(build: u32, params: &ghzdac_json::BuildParams) -> Result<Variant> {
        let variant = Variant::for_build(build)?;
        Ok(Variant {
            capabilities: variant.capabilities.with_params(params)?,
            ..variant
        })
    }

    /// Gives the firmware build number.
    pub fn build(&self) -> u32 {
        self.build
    }

    /// Gives the firmware build family.
    pub fn family(&self) -> BuildFamily {
        self.family
    }

    /// Gives the capability constants of the build.
    pub fn capabilities(&self) -> &BoardCapabilities {
        &self.capabilities
    }

    /// Returns `true` if the build runs jump tables.
    pub fn has_jump_table(&self) -> bool {
        self.family == BuildFamily::JumpTable
    }

    /// Default sync byte of the run packet.
    pub fn default_sync(&self) -> u8 {
        match self.family {
            BuildFamily::Legacy => LEGACY_SYNC,
            BuildFamily::JumpTable => 0,
        }
    }

    /// Fails with [`Error::Unsupported`] unless the build is a legacy build.
    pub(crate) fn require_legacy(&self, operation: &'static str) -> Result<()> {
        match self.family {
            BuildFamily::Legacy => Ok(()),
            BuildFamily::JumpTable => Err(self.unsupported(operation)),
        }
    }

    /// Fails with [`Error::Unsupported`] unless the build runs jump tables.
    pub(crate) fn require_jump_table(&self, operation: &'static str) -> Result<()> {
        match self.family {
            BuildFamily::JumpTable => Ok(()),
            BuildFamily::Legacy => Err(self.unsupported(operation)),
        }
    }

    pub(crate) fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            operation,
            build: self.build,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_builds() {
        let v7 = Variant::for_build(7).unwrap();
        assert_eq!(v7.family(), BuildFamily::Legacy);
        assert_eq!(v7.capabilities().sram_write_derps(), 40);
        let v8 = Variant::for_build(8).unwrap();
        assert_eq!(v8.capabilities().sram_page_len, 9216);
        assert_eq!(v8.capabilities().sram_write_derps(), 72);
        assert_eq!(
            Variant::for_build(11).unwrap().capabilities(),
            v7.capabilities()
        );
        let v13 = Variant::for_build(13).unwrap();
        assert!(v13.has_jump_table());
        assert_eq!(v13.capabilities().sram_len, 10240);
        assert_eq!(Variant::for_build(15).unwrap().capabilities().sram_len, 18432);
    }

    #[test]
    fn unknown_build() {
        for build in [0, 6, 9, 10, 12, 16] {
            assert!(matches!(
                Variant::for_build(build),
                Err(Error::UnknownBuild { build: b }) if b == build
            ));
        }
    }

    #[test]
    fn sync_defaults() {
        assert_eq!(Variant::for_build(7).unwrap().default_sync(), 249);
        assert_eq!(Variant::for_build(14).unwrap().default_sync(), 0);
    }

    #[test]
    fn params_override() {
        let params = ghzdac_json::BuildParams {
            sram_len: 20480,
            sram_page_len: 10240,
            sram_write_pkt_len: 256,
            sram_delay_len: 1024,
            sram_block0_len: 16384,
            sram_block1_len: 4096,
        };
        let v = Variant::with_params(8, &params).unwrap();
        assert_eq!(v.capabilities().sram_len, 20480);
        assert_eq!(v.capabilities().mem_page_len, 256);

        let bad_page = ghzdac_json::BuildParams {
            sram_page_len: 12288,
            ..params
        };
        assert!(matches!(
            Variant::with_params(8, &bad_page),
            Err(Error::Configuration { .. })
        ));
        let bad_blocks = ghzdac_json::BuildParams {
            sram_block1_len: 8192,
            ..params
        };
        assert!(Variant::with_params(8, &bad_blocks).is_err());
        assert!(Variant::with_params(9, &params).is_err());
    }

    #[test]
    fn zero_lengths_rejected() {
        let params = ghzdac_json::BuildParams {
            sram_len: 18432,
            sram_page_len: 9216,
            sram_write_pkt_len: 256,
            sram_delay_len: 1024,
            sram_block0_len: 16384,
            sram_block1_len: 2048,
        };
        assert!(Variant::with_params(8, &params).is_ok());
        for zeroed in [
            ghzdac_json::BuildParams {
                sram_delay_len: 0,
                ..params
            },
            ghzdac_json::BuildParams {
                sram_block0_len: 0,
                ..params
            },
            ghzdac_json::BuildParams {
                sram_block1_len: 0,
                ..params
            },
            ghzdac_json::BuildParams {
                sram_block0_len: 0,
                sram_block1_len: 0,
                sram_delay_len: 0,
                ..params
            },
        ] {
            assert!(matches!(
                Variant::with_params(8, &zeroed),
                Err(Error::Configuration { .. })
            ));
        }
    }
}
