//! WASM bindings for `stepsim_core`.

mod model;
mod simulator;

pub use model::{parse_model_toml, run_model};
pub use simulator::WasmSimulator;
