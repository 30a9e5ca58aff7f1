//! ghzdac CLI arguments.
//!
//! This module contains the definition of the CLI arguments for the ghzdac
//! application.

use clap::{Parser, Subcommand};
use ghzdac_json::DacChannel;
use std::path::PathBuf;

/// ghzdac CLI arguments.
#[derive(Parser, Debug, Clone, Eq, PartialEq, Hash)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Board configuration file (JSON)
    #[clap(long, default_value = "ghzdac.json")]
    pub config: PathBuf,
    /// Command to run
    #[clap(subcommand)]
    pub command: Command,
}

/// ghzdac commands.
#[derive(Subcommand, Debug, Clone, Eq, PartialEq, Hash)]
pub enum Command {
    /// Pings a board and prints its register readback
    Ping {
        /// Board name
        #[clap(long)]
        board: String,
    },
    /// Queries the PLL status of a board
    PllQuery {
        /// Board name
        #[clap(long)]
        board: String,
    },
    /// Resets the 1 GHz PLL of a board
    ResetPll {
        /// Board name
        #[clap(long)]
        board: String,
    },
    /// Programs the PLL of a board after power on
    InitPll {
        /// Board name
        #[clap(long)]
        board: String,
    },
    /// Runs the FIFO calibration of a DAC
    Fifo {
        /// Board name
        #[clap(long)]
        board: String,
        /// DAC channel (A or B)
        #[clap(long)]
        channel: DacChannel,
        /// Target FIFO counter (defaults to the configured value)
        #[clap(long)]
        target: Option<u8>,
    },
    /// Runs the LVDS calibration of a DAC
    Lvds {
        /// Board name
        #[clap(long)]
        board: String,
        /// DAC channel (A or B)
        #[clap(long)]
        channel: DacChannel,
        /// Sampling delay to verify (defaults to the configured value)
        #[clap(long, conflicts_with = "optimize")]
        sd: Option<u8>,
        /// Search for the optimal sampling delay
        #[clap(long)]
        optimize: bool,
    },
    /// Runs the built-in self-test of a DAC with random samples
    Bist {
        /// Board name
        #[clap(long)]
        board: String,
        /// DAC channel (A or B)
        #[clap(long)]
        channel: DacChannel,
        /// Number of random samples
        #[clap(long, default_value_t = 1000)]
        samples: usize,
    },
    /// Writes SRAM words and runs them
    RunSram {
        /// Board name
        #[clap(long)]
        board: String,
        /// JSON file with the SRAM words (array of integers)
        #[clap(long)]
        words: PathBuf,
        /// Run the SRAM continuously
        #[clap(long)]
        looped: bool,
        /// Number of inter-block delay units
        #[clap(long, default_value_t = 0)]
        block_delay: u8,
    },
}

impl Command {
    /// Gives the name of the board addressed by the command.
    pub fn board(&self) -> &str {
        match self {
            Command::Ping { board }
            | Command::PllQuery { board }
            | Command::ResetPll { board }
            | Command::InitPll { board }
            | Command::Fifo { board, .. }
            | Command::Lvds { board, .. }
            | Command::Bist { board, .. }
            | Command::RunSram { board, .. } => board,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_commands() {
        let args = Args::parse_from([
            "ghzdac", "--config", "lab.json", "fifo", "--board", "dac1", "--channel", "B",
        ]);
        assert_eq!(args.config, PathBuf::from("lab.json"));
        assert_eq!(
            args.command,
            Command::Fifo {
                board: "dac1".to_string(),
                channel: DacChannel::B,
                target: None,
            }
        );
        assert_eq!(args.command.board(), "dac1");

        let args = Args::parse_from(["ghzdac", "bist", "--board", "dac2", "--channel", "A"]);
        assert_eq!(args.config, PathBuf::from("ghzdac.json"));
        assert!(matches!(args.command, Command::Bist { samples: 1000, .. }));
    }

    #[test]
    fn lvds_sd_conflicts_with_optimize() {
        let result = Args::try_parse_from([
            "ghzdac", "lvds", "--board", "dac1", "--channel", "A", "--sd", "3", "--optimize",
        ]);
        assert!(result.is_err());
    }
}
