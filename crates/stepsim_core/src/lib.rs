pub mod config;
pub mod equation;
pub mod error;
pub mod expr;
pub mod logging;
pub mod model;
pub mod params;
pub mod series;
pub mod simulator;
pub mod system;
/// The `stepsim_core` crate turns a pair of small equation blocks into a
/// discrete-time simulation.
///
/// Key components:
/// - **Equation / EquationSystem**: Parse `lhs = rhs` statements, rewrite `DX = f` into a
///   forward-Euler update and index the statements by variable name.
/// - **Expression Engine**: A closed-grammar parser, bytecode compiler and stack VM that
///   evaluates right-hand sides against an explicit environment.
/// - **Simulator**: The recurrence engine. Evaluates initial conditions, then steps the dynamics
///   in place, with fresh random draws for every variable at every step.
/// - **Traits**: `Scalar` (numeric type abstraction), `RandomSource` (draw injection),
///   `StepObserver` (progress reporting).
pub mod traits;

pub use config::SimulatorConfig;
pub use equation::Equation;
pub use error::{Phase, SimError};
pub use model::ModelRecord;
pub use params::RunParameters;
pub use series::TimeSeries;
pub use simulator::Simulator;
pub use system::EquationSystem;
