//! Core WASM simulator wrapper.

use js_sys::Float64Array;
use serde::Serialize;
use stepsim_core::{RunParameters, Simulator, SimulatorConfig, TimeSeries};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmSimulator {
    pub(crate) simulator: Simulator,
}

pub(crate) fn build_simulator(
    init_text: &str,
    dynamics_text: &str,
    seed: Option<u32>,
) -> anyhow::Result<Simulator> {
    let config = SimulatorConfig {
        seed: seed.map(u64::from),
        trace_steps: false,
        log_level: "off".to_string(),
    };
    Ok(Simulator::with_config(init_text, dynamics_text, config)?)
}

pub(crate) fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

/// Serializes a series with plain-object maps so JS callers can index
/// `values[name]` directly.
pub(crate) fn series_to_value(series: &TimeSeries) -> Result<JsValue, JsValue> {
    series
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
impl WasmSimulator {
    #[wasm_bindgen(constructor)]
    pub fn new(
        init_text: &str,
        dynamics_text: &str,
        seed: Option<u32>,
    ) -> Result<WasmSimulator, JsValue> {
        console_error_panic_hook::set_once();

        let simulator = build_simulator(init_text, dynamics_text, seed).map_err(to_js_error)?;
        Ok(WasmSimulator { simulator })
    }

    /// Runs over `[start, stop)` and returns `{ ts, vars, values }`.
    pub fn run(&mut self, start: f64, stop: f64, dt: f64) -> Result<JsValue, JsValue> {
        let series = self
            .simulator
            .run(RunParameters::new(start, stop, dt))
            .map_err(|e| to_js_error(e.into()))?;
        series_to_value(series)
    }

    pub fn reseed(&mut self, seed: u32) {
        self.simulator.reseed(u64::from(seed));
    }

    pub fn variables(&self) -> Vec<String> {
        self.simulator.vars().to_vec()
    }

    pub fn get_state(&self) -> Vec<f64> {
        self.simulator.state().to_vec()
    }

    /// Time array of the last successful run.
    pub fn times(&self) -> Option<Float64Array> {
        let series = self.simulator.history()?;
        Some(Float64Array::from(series.ts()))
    }

    /// Values of one variable over the last successful run.
    pub fn values(&self, name: &str) -> Option<Float64Array> {
        let values = self.simulator.history()?.get(name)?;
        Some(Float64Array::from(values))
    }

    /// Whether a variable of the last run only toggles between 0 and 1.
    pub fn is_binary(&self, name: &str) -> bool {
        self.simulator
            .history()
            .is_some_and(|series| series.is_binary(name))
    }

    pub fn describe(&self) -> String {
        self.simulator.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_arch = "wasm32")]
    fn wasm_simulator_rejects_malformed_text() {
        let result = WasmSimulator::new("X 0", "X = X + 1", None);
        assert!(result.is_err(), "expected malformed equation error");
        let message = result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("Malformed equation"));
    }

    #[test]
    fn build_simulator_reports_missing_initial_condition() {
        let err = build_simulator("X = 0", "X = X; Y = X", Some(1))
            .err()
            .expect("missing initial condition");
        assert!(format!("{err:#}").contains("'Y' has no initial condition"));
    }

    #[test]
    fn wasm_simulator_exposes_variables_and_state() {
        let mut system = WasmSimulator::new("A = 1; B = 2", "A = A + 1; B = A * B", Some(7))
            .expect("simulator");
        assert_eq!(system.variables(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(system.get_state(), vec![1.0, 2.0]);
        assert_eq!(system.describe(), "A=1\nB=2\nA=A+1\nB=A*B");

        system
            .simulator
            .run(RunParameters::new(0.0, 3.0, 1.0))
            .expect("run");
        // A: 1, 2, 3; B: 2, 4, 12
        assert_eq!(system.get_state(), vec![3.0, 12.0]);
    }

    #[test]
    fn reseed_makes_runs_repeatable() {
        let mut system = WasmSimulator::new("W = 0", "W = W + n_eps", Some(11)).expect("simulator");
        let params = RunParameters::new(0.0, 20.0, 1.0);
        let first = system.simulator.run(params).expect("run").clone();
        system.reseed(11);
        let second = system.simulator.run(params).expect("run").clone();
        assert_eq!(first, second);
    }
}
