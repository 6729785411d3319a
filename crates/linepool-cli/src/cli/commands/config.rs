//! `linepool config` – print the config path and effective settings.

use anyhow::Result;
use linepool_core::config::{self, LinepoolConfig};

pub fn run_config(cfg: &LinepoolConfig) -> Result<()> {
    println!("# {}", config::config_path()?.display());
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
