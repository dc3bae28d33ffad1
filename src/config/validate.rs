// src/config/validate.rs

use std::time::Duration;

use crate::config::model::RawMonitorConfig;
use crate::errors::{Result, TreewatchError};
use crate::types::EventMask;
use crate::watch::MonitorConfig;

impl TryFrom<RawMonitorConfig> for MonitorConfig {
    type Error = TreewatchError;

    fn try_from(raw: RawMonitorConfig) -> std::result::Result<Self, Self::Error> {
        let events = event_mask(&raw)?;
        let delay = coalescing_delay(raw.delay)?;
        MonitorConfig::new(&raw.root, &raw.exclude, events, delay, raw.backend)
    }
}

fn event_mask(cfg: &RawMonitorConfig) -> Result<EventMask> {
    if cfg.events.is_empty() {
        return Err(TreewatchError::ConfigError(
            "`events` must list at least one kind".to_string(),
        ));
    }
    Ok(EventMask::from_kinds(cfg.events.iter().copied()))
}

/// Seconds as written in the file; must be finite and not negative.
pub fn coalescing_delay(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        TreewatchError::ConfigError(format!(
            "`delay` must be a finite number of seconds >= 0 (got {secs})"
        ))
    })
}
