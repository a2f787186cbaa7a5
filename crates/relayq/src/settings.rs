//! Settings file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relayq_smtp::{QueueSettings, SmtpSettings};
use serde::{Deserialize, Serialize};

/// Settings read at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Relay to send through.
    pub smtp: SmtpSettings,
    /// Pacing and recycling limits.
    #[serde(default)]
    pub queue: QueueSettings,
}

/// `<config dir>/relayq/settings.json`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("relayq").join("settings.json"))
}

/// Loads settings from `path`, or from [`default_path`] when none is given.
pub async fn load(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_path().context("No config directory on this platform; pass --config")?,
    };

    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    parse(&contents).with_context(|| format!("Invalid settings in {}", path.display()))
}

fn parse(contents: &str) -> Result<Settings> {
    Ok(serde_json::from_str(contents)?)
}
