//! Configuration file loading.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::PanewatchError;
use crate::tmux::{BackoffConfig, ControlConfig, PatternOverrides, PatternRegistry};
use crate::Result;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "PANEWATCH_CONFIG";
/// Largest accepted `backoff.factor`.
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to tmux binary
    pub tmux_path: String,
    /// `tmux -L` socket name; unset means the default server
    pub socket_name: Option<String>,
    /// One full capture round across all panes
    pub poll_interval_ms: u64,
    /// Scrollback lines requested per capture
    pub scrollback_lines: usize,
    /// Trailing non-empty lines the classifier considers
    pub window_lines: usize,
    /// Treat a spinner as stale after this many seconds without change
    pub stale_spinner_secs: Option<u64>,
    pub backoff: BackoffConfig,
    /// Pattern overrides keyed by tool name
    pub tools: HashMap<String, PatternOverrides>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
            socket_name: None,
            poll_interval_ms: 1000,
            scrollback_lines: 200,
            window_lines: crate::tmux::heuristics::DEFAULT_WINDOW_LINES,
            stale_spinner_secs: None,
            backoff: BackoffConfig::default(),
            tools: HashMap::new(),
        }
    }
}

impl Config {
    /// Default location: `$PANEWATCH_CONFIG`, else `<config dir>/panewatch/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        resolve_path(std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(target: "panewatch::config", "no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(target: "panewatch::config", "loaded {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(PanewatchError::Config("poll_interval_ms must be positive".to_string()));
        }
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&self.backoff.factor) {
            return Err(PanewatchError::Config(format!(
                "backoff.factor must be between 1 and {}",
                MAX_BACKOFF_FACTOR
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_spinner(&self) -> Option<Duration> {
        self.stale_spinner_secs.map(Duration::from_secs)
    }

    pub fn control(&self) -> ControlConfig {
        ControlConfig {
            tmux_path: self.tmux_path.clone(),
            socket_name: self.socket_name.clone(),
            ..ControlConfig::default()
        }
    }

    /// Compile the built-in patterns merged with `tools`.
    pub fn registry(&self) -> Result<PatternRegistry> {
        PatternRegistry::new(&self.tools)
    }
}

fn resolve_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| dirs::config_dir().map(|dir| dir.join("panewatch").join("config.json")))
}
