// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{NodeConfig, RawNodeConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawNodeConfig`.
///
/// This only performs TOML deserialization; durations and limits are checked
/// by [`load_and_validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawNodeConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawNodeConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and turn it into a [`NodeConfig`].
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<NodeConfig> {
    let raw_config = load_from_path(&path)?;
    let config = NodeConfig::try_from(raw_config)?;
    Ok(config)
}

/// Parse and validate configuration from an in-memory TOML string.
pub fn from_toml_str(contents: &str) -> Result<NodeConfig> {
    let raw: RawNodeConfig = toml::from_str(contents)?;
    NodeConfig::try_from(raw)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("eventdroid.toml")
}
