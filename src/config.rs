//! Board configuration.
//!
//! The configuration is a JSON file with the [`Config`] schema. It is read and
//! validated once, when the application starts. After validation, each board
//! has a unique name, its calibration defaults are in range, and every build
//! that it mentions maps to a supported variant.

use crate::error::{Error, Result};
use crate::variant::Variant;
use ghzdac_json::{Board, BuildParams, Config};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Reads and validates a configuration file.
pub async fn load(path: &Path) -> Result<Config> {
    let json = tokio::fs::read_to_string(path).await?;
    let config = parse(&json)
        .map_err(|err| Error::configuration(format!("{}: {err}", path.display())))?;
    tracing::info!(path = %path.display(), boards = config.boards.len(), "loaded configuration");
    Ok(config)
}

/// Parses and validates a configuration.
pub fn parse(json: &str) -> Result<Config> {
    let config: Config =
        serde_json::from_str(json).map_err(|err| Error::configuration(err.to_string()))?;
    validate(&config)?;
    Ok(config)
}

/// Validates a configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.boards.is_empty() {
        return Err(Error::configuration("no boards are listed"));
    }
    for (&build, params) in &config.builds {
        Variant::with_params(build, params)?;
    }
    let mut names = HashSet::new();
    for board in &config.boards {
        if board.name.is_empty() {
            return Err(Error::configuration("board with an empty name"));
        }
        if !names.insert(board.name.as_str()) {
            return Err(Error::configuration(format!(
                "board {} is listed more than once",
                board.name
            )));
        }
        if board.fifo_counter > 0xf {
            return Err(Error::configuration(format!(
                "board {}: FIFO counter {} does not fit in 4 bits",
                board.name, board.fifo_counter
            )));
        }
        if board.lvds_sd > 0xf {
            return Err(Error::configuration(format!(
                "board {}: LVDS SD {} does not fit in 4 bits",
                board.name, board.lvds_sd
            )));
        }
        if let Some(build) = board.build {
            variant_for(build, &config.builds)?;
        }
    }
    Ok(())
}

/// Selects the variant of a build, applying the capability overrides of the
/// configuration.
pub fn variant_for(build: u32, builds: &BTreeMap<u32, BuildParams>) -> Result<Variant> {
    match builds.get(&build) {
        Some(params) => Variant::with_params(build, params),
        None => Variant::for_build(build),
    }
}

/// Finds a board by name.
pub fn board<'a>(config: &'a Config, name: &str) -> Result<&'a Board> {
    config
        .boards
        .iter()
        .find(|board| board.name == name)
        .ok_or_else(|| Error::configuration(format!("board {name} is not configured")))
}

#[cfg(test)]
mod test {
    use super::*;

    const CONFIG: &str = r#"{
        "boards": [
            {"name": "dac1", "address": "10.0.0.1:5000", "build": 7,
             "fifo_counter": 3, "lvds_sd": 6},
            {"name": "dac2", "address": "10.0.0.2:5000",
             "fifo_counter": 3, "lvds_sd": 4}
        ],
        "builds": {
            "7": {"sram_len": 8192, "sram_page_len": 4096,
                  "sram_write_pkt_len": 256, "sram_delay_len": 1024,
                  "sram_block0_len": 6144, "sram_block1_len": 2048}
        }
    }"#;

    #[test]
    fn valid() {
        let config = parse(CONFIG).unwrap();
        assert_eq!(config.boards.len(), 2);
        let variant = variant_for(7, &config.builds).unwrap();
        assert_eq!(variant.capabilities().sram_page_len, 4096);
        assert_eq!(variant.capabilities().mem_page_len, 256);
        let variant = variant_for(8, &config.builds).unwrap();
        assert_eq!(variant.capabilities().sram_page_len, 9216);
        assert_eq!(board(&config, "dac2").unwrap().lvds_sd, 4);
        assert!(board(&config, "dac3").is_err());
    }

    #[test]
    fn invalid() {
        let duplicate = CONFIG.replace("dac2", "dac1");
        assert!(matches!(parse(&duplicate), Err(Error::Configuration { .. })));
        let unknown_build = CONFIG.replace("\"build\": 7", "\"build\": 9");
        assert!(matches!(
            parse(&unknown_build),
            Err(Error::UnknownBuild { build: 9 })
        ));
        let fifo = CONFIG.replace("\"fifo_counter\": 3, \"lvds_sd\": 6", "\"fifo_counter\": 16, \"lvds_sd\": 6");
        assert!(parse(&fifo).is_err());
        let page = CONFIG.replace("\"sram_page_len\": 4096", "\"sram_page_len\": 8192");
        assert!(parse(&page).is_err());
        assert!(parse(r#"{"boards": []}"#).is_err());
        assert!(parse("{").is_err());
    }
}
