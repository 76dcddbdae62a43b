//! Configuration file support: TOML, loaded from the XDG config directory unless a path is
//! given explicitly. A missing file is not an error — the agent runs with defaults, same as a
//! fresh install would expect.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watch `dmesg`/`journalctl` for kernel Xid and fallen-off-the-bus events.
    pub watch_kernel_log: bool,
    /// Path to the NVIDIA fabric-manager log, if fabric-manager monitoring should run.
    pub fabric_manager_log_path: Option<PathBuf>,
    pub event_retention: EventRetentionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_kernel_log: true,
            fabric_manager_log_path: None,
            event_retention: EventRetentionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventRetentionConfig {
    pub purge_interval_secs: u64,
    pub max_age_secs: u64,
}

impl Default for EventRetentionConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: 600,
            max_age_secs: 7 * 24 * 3600,
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit_path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "config: no file at {}, falling back to defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn default_config_path() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("hostagent").join("config.toml"))
        .ok_or_else(|| anyhow::anyhow!("could not determine a config directory for this platform"))
}
