//! Layered configuration: built-in defaults, optional `premium.toml`, then
//! `PREMIUM_` environment variables (`__` separates nested keys).

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use premium_core::MonitorConfig;

/// Console-only options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    /// Table refresh period; 0 prints only on `show`
    pub refresh_interval_ms: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 5_000,
        }
    }
}

impl ConsoleSettings {
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub monitor: MonitorConfig,
    pub console: ConsoleSettings,
}

impl Settings {
    pub const FILE_NAME: &'static str = "premium";
    pub const ENV_PREFIX: &'static str = "PREMIUM";

    /// Load from the default file name and the process environment
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Self::FILE_NAME, Environment::with_prefix(Self::ENV_PREFIX))
    }

    pub fn load_from(file: &str, environment: Environment) -> anyhow::Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name(file).required(false))
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.monitor.validate()?;
        Ok(settings)
    }
}
