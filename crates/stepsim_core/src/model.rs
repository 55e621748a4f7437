use crate::config::SimulatorConfig;
use crate::error::SimError;
use crate::params::RunParameters;
use crate::series::TimeSeries;
use crate::simulator::Simulator;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A named model: the two equation blocks plus the run parameters.
///
/// This is the unit front ends and model stores exchange; storing it is up
/// to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub name: String,
    pub init: String,
    pub dynamics: String,
    #[serde(default)]
    pub params: RunParameters,
}

impl ModelRecord {
    pub fn new(name: &str, init: &str, dynamics: &str, params: RunParameters) -> Self {
        Self {
            name: name.to_string(),
            init: init.to_string(),
            dynamics: dynamics.to_string(),
            params,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SimError> {
        toml::from_str(text).map_err(|e| SimError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, SimError> {
        toml::to_string(self).map_err(|e| SimError::Config(e.to_string()))
    }

    /// Builds a simulator for the record and runs it once, installing the
    /// terminal logger at the configured level first.
    pub fn simulate(&self, config: SimulatorConfig) -> Result<TimeSeries> {
        config.init_logging().context("Failed to set up logging")?;
        let mut simulator = Simulator::with_config(&self.init, &self.dynamics, config)
            .with_context(|| format!("Failed to build model '{}'", self.name))?;
        let series = simulator
            .run(self.params)
            .with_context(|| format!("Failed to run model '{}'", self.name))?;
        Ok(series.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANDOM_WALK: &str = r#"
name = "random walk"
init = "W = 0"
dynamics = """
W = W + n_eps*sqrt(dt)
S = W > 0
"""

[params]
start = 0.0
stop = 20.0
dt = 0.5
"#;

    #[test]
    fn toml_record_round_trips_and_simulates() {
        let record = ModelRecord::from_toml_str(RANDOM_WALK).expect("record");
        assert_eq!(record.name, "random walk");
        assert_eq!(record.params, RunParameters::new(0.0, 20.0, 0.5));

        let text = record.to_toml_string().expect("serialize");
        assert_eq!(ModelRecord::from_toml_str(&text).expect("reparse"), record);

        let err = record
            .simulate(SimulatorConfig::seeded(3))
            .expect_err("S has no initial condition");
        assert!(format!("{err:#}").contains("no initial condition"));
    }

    #[test]
    fn simulate_returns_full_series() {
        let record = ModelRecord::new(
            "decay",
            "X = 100",
            "DX = -0.5*X",
            RunParameters::new(0.0, 2.0, 0.5),
        );
        let series = record.simulate(SimulatorConfig::seeded(1)).expect("series");
        assert_eq!(series.len(), 4);
        assert_eq!(series.get("X"), Some(&[100.0, 75.0, 56.25, 42.1875][..]));
    }

    #[test]
    fn missing_params_fall_back_to_defaults() {
        let record =
            ModelRecord::from_toml_str("name = \"n\"\ninit = \"X = 0\"\ndynamics = \"X = X + 1\"\n")
                .expect("record");
        assert_eq!(record.params, RunParameters::default());
    }

    #[test]
    fn simulate_rejects_unknown_log_level() {
        let record = ModelRecord::new("counter", "X = 0", "X = X + 1", RunParameters::default());
        let config = SimulatorConfig {
            log_level: "chatty".to_string(),
            ..SimulatorConfig::seeded(1)
        };
        let err = record.simulate(config).expect_err("bad level");
        let message = format!("{err:#}");
        assert!(message.contains("Failed to set up logging"));
        assert!(message.contains("unknown log level 'chatty'"));
    }

    #[test]
    fn error_context_names_the_model() {
        let record = ModelRecord::new("broken", "X = 0", "X = Y", RunParameters::default());
        let err = record.simulate(SimulatorConfig::seeded(1)).expect_err("Y undefined");
        let message = format!("{err:#}");
        assert!(message.contains("Failed to run model 'broken'"));
        assert!(message.contains("name 'Y' is not defined"));
    }
}
