//! Optional configuration file, TOML encoded:
//!
//! ```toml
//! symbol_path = "/opt/symbols;SRV*/var/cache/symbols*https://msdl.microsoft.com/download/symbols"
//! include_internal_frames = true
//! perf_map_dir = "/tmp"
//! unwinder = "frame-pointer"
//! ```

use crate::dump::DumpOptions;
use crate::muted_error;
use crate::target::linux::unwind::UnwindStrategy;
use crate::target::SymbolPath;
use anyhow::Context;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub symbol_path: Option<String>,
    pub include_internal_frames: Option<bool>,
    pub perf_map_dir: Option<PathBuf>,
    pub unwinder: Option<UnwindStrategy>,
}

impl Config {
    const DEFAULT_PATH: &'static str = ".config/clrstack/config.toml";

    /// Load configuration from a file.
    /// Without an explicit path a file from the home directory is used if it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let data = match path {
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                match muted_error!(read_to_string(home.join(Self::DEFAULT_PATH))) {
                    Some(data) => data,
                    None => return Ok(Self::default()),
                }
            }
            Some(path) => read_to_string(path)
                .with_context(|| format!("read config file {}", path.display()))?,
        };

        Self::parse(&data)
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        toml::de::from_str(data).context("parse config")
    }

    /// Dump options with unset values replaced by defaults.
    pub fn dump_options(&self) -> anyhow::Result<DumpOptions> {
        let default = DumpOptions::default();
        let symbol_path = match &self.symbol_path {
            Some(path) => SymbolPath::from_str(path)?,
            None => default.symbol_path,
        };
        Ok(DumpOptions {
            symbol_path,
            include_internal_frames: self
                .include_internal_frames
                .unwrap_or(default.include_internal_frames),
        })
    }
}
