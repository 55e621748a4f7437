use crate::error::SimError;
use crate::logging;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Simulator settings.
///
/// ```toml
/// seed = 42
/// trace_steps = false
/// log_level = "debug"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Seed for the random draws. `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Emit a `debug!` line with the full state after every step.
    pub trace_steps: bool,
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            trace_steps: true,
            log_level: "info".to_string(),
        }
    }
}

impl SimulatorConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SimError> {
        let config: Self = toml::from_str(text).map_err(|e| SimError::Config(e.to_string()))?;
        config.level_filter()?;
        Ok(config)
    }

    pub fn level_filter(&self) -> Result<LevelFilter, SimError> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| SimError::Config(format!("unknown log level '{}'", self.log_level)))
    }

    /// Installs the terminal logger at `log_level`.
    ///
    /// Returns `Ok(false)` when the level is `off` or another logger is
    /// already installed.
    pub fn init_logging(&self) -> Result<bool, SimError> {
        let level = self.level_filter()?;
        if level == LevelFilter::Off {
            return Ok(false);
        }
        Ok(logging::init_logging(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config = SimulatorConfig::from_toml_str("seed = 7").expect("config");
        assert_eq!(config.seed, Some(7));
        assert!(config.trace_steps);
        assert_eq!(config.level_filter().expect("level"), LevelFilter::Info);
    }

    #[test]
    fn parses_full_toml() {
        let config = SimulatorConfig::from_toml_str(
            "seed = 1\ntrace_steps = false\nlog_level = \"debug\"\n",
        )
        .expect("config");
        assert_eq!(
            config,
            SimulatorConfig {
                seed: Some(1),
                trace_steps: false,
                log_level: "debug".to_string(),
            }
        );
    }

    #[test]
    fn logging_follows_configured_level() {
        let off = SimulatorConfig {
            log_level: "off".to_string(),
            ..SimulatorConfig::default()
        };
        assert!(!off.init_logging().expect("off"));

        let loud = SimulatorConfig {
            log_level: "loud".to_string(),
            ..SimulatorConfig::default()
        };
        let err = loud.init_logging().expect_err("unknown level");
        assert!(err.to_string().contains("unknown log level 'loud'"));

        // Whichever call installs the logger first wins; the second is refused.
        let warn = SimulatorConfig {
            log_level: "warn".to_string(),
            ..SimulatorConfig::default()
        };
        let _ = warn.init_logging().expect("warn");
        assert!(!warn.init_logging().expect("warn"));
    }

    #[test]
    fn rejects_bad_values() {
        let err = SimulatorConfig::from_toml_str("log_level = \"loud\"").expect_err("level");
        assert!(err.to_string().contains("unknown log level 'loud'"));
        let err = SimulatorConfig::from_toml_str("seed = \"x\"").expect_err("type");
        assert!(matches!(err, SimError::Config(_)));
    }
}
