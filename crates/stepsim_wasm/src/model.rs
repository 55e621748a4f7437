//! Model-record runner.

use crate::simulator::{series_to_value, to_js_error};
use anyhow::{anyhow, Context};
use serde_wasm_bindgen::from_value;
use stepsim_core::{ModelRecord, SimulatorConfig};
use wasm_bindgen::prelude::*;

/// Runs a `{ name, init, dynamics, params: { start, stop, dt } }` record and
/// returns the resulting series.
#[wasm_bindgen]
pub fn run_model(record: JsValue, seed: Option<u32>) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let record: ModelRecord = from_value(record)
        .map_err(|e| anyhow!("{e}"))
        .context("Invalid model record")
        .map_err(to_js_error)?;
    let config = SimulatorConfig {
        seed: seed.map(u64::from),
        trace_steps: false,
        log_level: "off".to_string(),
    };
    let series = record.simulate(config).map_err(to_js_error)?;
    series_to_value(&series)
}

/// Parses a model record from its TOML form.
#[wasm_bindgen]
pub fn parse_model_toml(text: &str) -> Result<JsValue, JsValue> {
    let record = ModelRecord::from_toml_str(text)
        .context("Invalid model file")
        .map_err(to_js_error)?;
    serde_wasm_bindgen::to_value(&record)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_wasm_bindgen::to_value;
    use stepsim_core::{RunParameters, TimeSeries};
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn run_model_returns_series() {
        let record = ModelRecord::new(
            "counter",
            "X = 0",
            "X = X + 1",
            RunParameters::new(0.0, 4.0, 1.0),
        );
        let value = run_model(to_value(&record).expect("record"), Some(1)).expect("run");
        let series: TimeSeries = from_value(value).expect("series");
        assert_eq!(series.get("X"), Some(&[0.0, 1.0, 2.0, 3.0][..]));
    }

    #[wasm_bindgen_test]
    fn run_model_rejects_invalid_record() {
        let result = run_model(JsValue::from_str("not a record"), None);
        let message = result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("Invalid model record"));
    }

    #[wasm_bindgen_test]
    fn parse_model_toml_reports_errors() {
        let result = parse_model_toml("name = ");
        let message = result
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("Invalid model file"));
    }
}
