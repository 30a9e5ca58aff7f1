//! ghzdac application.
//!
//! This module contains a top-level structure [`App`] that represents the whole
//! ghzdac application. It connects to the board addressed by the command, runs
//! the command and prints its result as JSON.

use crate::{
    args::{Args, Command},
    board::Board,
    config,
    transport::UdpTransport,
};
use anyhow::{Context, Result};
use ghzdac_json::Config;
use rand::Rng;
use serde_json::Value;
use std::path::Path;

/// ghzdac application.
#[derive(Debug)]
pub struct App {
    config: Config,
    command: Command,
}

impl App {
    /// Creates a new application.
    ///
    /// This reads and validates the configuration file.
    #[tracing::instrument(name = "App::new", level = "debug")]
    pub async fn new(args: &Args) -> Result<App> {
        let config = config::load(&args.config)
            .await
            .with_context(|| format!("failed to load {}", args.config.display()))?;
        // fail before connecting if the board is unknown
        config::board(&config, args.command.board())?;
        Ok(App {
            config,
            command: args.command.clone(),
        })
    }

    /// Runs the application.
    ///
    /// The result of the command is printed to stdout.
    #[tracing::instrument(name = "App::run", level = "debug", skip_all)]
    pub async fn run(self) -> Result<()> {
        let mut board = self.connect(self.command.board()).await?;
        let output = match &self.command {
            Command::Ping { .. } => to_json(&ghzdac_json::Readback::from(&board.ping().await?))?,
            Command::PllQuery { .. } => {
                to_json(&ghzdac_json::Readback::from(&board.pll_query().await?))?
            }
            Command::ResetPll { .. } => {
                to_json(&ghzdac_json::Readback::from(&board.reset_pll().await?))?
            }
            Command::InitPll { .. } => {
                board.init_pll().await.context("failed to initialize PLL")?;
                Value::Null
            }
            Command::Fifo {
                channel, target, ..
            } => to_json(&board.set_fifo(*channel, *target).await?)?,
            Command::Lvds {
                channel,
                sd,
                optimize,
                ..
            } => to_json(&board.set_lvds(*channel, *sd, *optimize).await?)?,
            Command::Bist {
                channel, samples, ..
            } => {
                let mut rng = rand::thread_rng();
                let samples: Vec<u32> = (0..*samples).map(|_| rng.gen_range(0..0x4000)).collect();
                to_json(&board.run_bist(*channel, &samples).await?)?
            }
            Command::RunSram {
                words,
                looped,
                block_delay,
                ..
            } => {
                let words = read_words(words).await?;
                board.run_sram(&words, *looped, *block_delay).await?;
                Value::Null
            }
        };
        if !output.is_null() {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Ok(())
    }

    async fn connect(&self, name: &str) -> Result<Board<UdpTransport>> {
        let board = config::board(&self.config, name)?;
        let transport = UdpTransport::connect(&board.address)
            .await
            .with_context(|| format!("failed to open transport to {}", board.address))?;
        Board::connect(board, &self.config.builds, transport)
            .await
            .with_context(|| format!("failed to connect to {name}"))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn read_words(path: &Path) -> Result<Vec<u32>> {
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
}
