// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::config::model::RawMonitorConfig;
use crate::errors::Result;
use crate::watch::MonitorConfig;

/// Load a configuration file and return the raw [`RawMonitorConfig`].
///
/// This only performs TOML deserialization; it does **not** check that the
/// root exists or that patterns compile. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawMonitorConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: RawMonitorConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file and validate it into a [`MonitorConfig`].
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<MonitorConfig> {
    let raw_config = load_from_path(&path)?;
    let config = MonitorConfig::try_from(raw_config)?;
    Ok(config)
}
