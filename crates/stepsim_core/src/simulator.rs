//! Recurrence engine.
//!
//! A [`Simulator`] owns two equation systems over the same variables: the
//! initial conditions and the dynamics. A run evaluates, for every step and
//! for every dynamics variable in declaration order, either the initial
//! expression (step 0) or the dynamics expression (later steps).
//!
//! Updates are in place: a variable evaluated later in a step sees the values
//! already computed for earlier variables in that same step, and the previous
//! step's value of everything else. Every variable evaluation receives its own
//! fresh `n_eps` and `u_eps` draws.
//!
//! Initial expressions are evaluated twice. Construction evaluates them once
//! with constants and functions only, which fills [`Simulator::state`] and
//! rejects models whose initial conditions depend on step bindings or other
//! variables. Each run then re-evaluates them at step 0 with the full step
//! environment, and only that second value is recorded in the history.

use crate::config::SimulatorConfig;
use crate::error::{Phase, SimError};
use crate::expr::{parse, Bytecode, Compiler, Environment, HistoryView, StepBindings, VM};
use crate::params::RunParameters;
use crate::series::TimeSeries;
use crate::system::EquationSystem;
use crate::traits::{NoopObserver, RandomSource, StepObserver};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;

/// One compiled expression and the text it came from.
#[derive(Debug, Clone)]
struct CompiledExpr {
    source: String,
    code: Bytecode,
}

impl CompiledExpr {
    fn compile(compiler: &Compiler, variable: &str, source: &str) -> Result<Self, SimError> {
        let invalid = |message: String| SimError::InvalidExpression {
            variable: variable.to_string(),
            expression: source.to_string(),
            message,
        };
        let expr = parse(source).map_err(invalid)?;
        let code = compiler.compile(&expr).map_err(invalid)?;
        Ok(Self {
            source: source.to_string(),
            code,
        })
    }
}

/// Compiled form of both systems, indexed like `vars`.
#[derive(Debug, Clone)]
struct Program {
    vars: Vec<String>,
    init: Vec<CompiledExpr>,
    dynamics: Vec<CompiledExpr>,
}

impl Program {
    fn compile(init: &EquationSystem, dynamics: &EquationSystem) -> Result<Self, SimError> {
        let vars = dynamics.vars().to_vec();
        let compiler = Compiler::new(&vars);

        let mut init_code = Vec::with_capacity(vars.len());
        let mut dynamics_code = Vec::with_capacity(vars.len());
        for name in &vars {
            let init_rhs = init
                .rhs(name)
                .ok_or_else(|| SimError::MissingVariable { name: name.clone() })?;
            init_code.push(CompiledExpr::compile(&compiler, name, init_rhs)?);

            let dynamics_rhs = dynamics
                .rhs(name)
                .ok_or_else(|| SimError::MissingVariable { name: name.clone() })?;
            dynamics_code.push(CompiledExpr::compile(&compiler, name, dynamics_rhs)?);
        }

        Ok(Self {
            vars,
            init: init_code,
            dynamics: dynamics_code,
        })
    }

    /// Evaluates the initial expressions with constants and functions only.
    fn initial_state(&self) -> Result<Vec<f64>, SimError> {
        let undefined: Vec<Option<f64>> = vec![None; self.vars.len()];
        let env = Environment::new(&self.vars, &undefined);
        let mut stack = Vec::new();
        self.init
            .iter()
            .zip(&self.vars)
            .map(|(expr, name)| {
                VM::execute(&expr.code, &env, &mut stack).map_err(|err| {
                    SimError::from_eval(err, name, &expr.source, Phase::Initialization)
                })
            })
            .collect()
    }

    fn integrate<R, O>(
        &self,
        params: &RunParameters,
        rng: &mut R,
        observer: &mut O,
        trace_steps: bool,
    ) -> Result<TimeSeries, SimError>
    where
        R: RandomSource + ?Sized,
        O: StepObserver + ?Sized,
    {
        let ts = params.time_grid()?;
        let steps = ts.len();
        let dim = self.vars.len();

        let mut columns = vec![vec![0.0; steps]; dim];
        let mut current: Vec<Option<f64>> = vec![None; dim];
        let mut snapshot = vec![0.0; dim];
        let mut stack = Vec::with_capacity(32);

        for (i, &t) in ts.iter().enumerate() {
            let program = if i == 0 { &self.init } else { &self.dynamics };

            for (v, expr) in program.iter().enumerate() {
                let bindings = StepBindings {
                    index: i,
                    time: t,
                    dt: params.dt,
                    normal: rng.normal(),
                    uniform: rng.uniform(),
                };
                let history = HistoryView {
                    columns: &columns,
                    step: i,
                    computed: v,
                };
                let env = Environment::new(&self.vars, &current)
                    .with_bindings(bindings)
                    .with_history(history);
                let value = VM::execute(&expr.code, &env, &mut stack).map_err(|err| {
                    SimError::from_eval(err, &self.vars[v], &expr.source, Phase::Step(i))
                })?;

                columns[v][i] = value;
                current[v] = Some(value);
                snapshot[v] = value;
            }

            if trace_steps {
                debug!(
                    "Step:{}  t:{:.6}  State: {}",
                    i,
                    t,
                    format_state(&self.vars, &snapshot)
                );
            }
            observer.on_step(i, t, &self.vars, &snapshot);
        }

        Ok(TimeSeries::from_columns(ts, self.vars.clone(), columns))
    }
}

fn format_state(vars: &[String], values: &[f64]) -> String {
    let pairs: Vec<String> = vars
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

/// Discrete-time simulator built from an initial-condition block and a
/// dynamics block.
pub struct Simulator {
    init_system: EquationSystem,
    dynamics_system: EquationSystem,
    program: Program,
    state: Vec<f64>,
    history: Option<TimeSeries>,
    rng: StdRng,
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(init_text: &str, dynamics_text: &str) -> Result<Self, SimError> {
        Self::with_config(init_text, dynamics_text, SimulatorConfig::default())
    }

    pub fn with_config(
        init_text: &str,
        dynamics_text: &str,
        config: SimulatorConfig,
    ) -> Result<Self, SimError> {
        let init_system = EquationSystem::parse(init_text)?;
        let dynamics_system = EquationSystem::parse(dynamics_text)?;
        let program = Program::compile(&init_system, &dynamics_system)?;
        let state = program.initial_state()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            init_system,
            dynamics_system,
            program,
            state,
            history: None,
            rng,
            config,
        })
    }

    /// Resets the internal random generator.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Runs with the simulator's own random generator.
    pub fn run(&mut self, params: RunParameters) -> Result<&TimeSeries, SimError> {
        self.history = None;
        self.announce(&params);
        let series = self.program.integrate(
            &params,
            &mut self.rng,
            &mut NoopObserver,
            self.config.trace_steps,
        );
        self.finish(&params, series)
    }

    /// Runs with caller-supplied randomness and a progress observer.
    pub fn run_with<R, O>(
        &mut self,
        params: RunParameters,
        rng: &mut R,
        observer: &mut O,
    ) -> Result<&TimeSeries, SimError>
    where
        R: RandomSource + ?Sized,
        O: StepObserver + ?Sized,
    {
        self.history = None;
        self.announce(&params);
        let series = self
            .program
            .integrate(&params, rng, observer, self.config.trace_steps);
        self.finish(&params, series)
    }

    fn announce(&self, params: &RunParameters) {
        info!(
            "Running {} variable(s) over [{}, {}) with dt = {}",
            self.program.vars.len(),
            params.start,
            params.stop,
            params.dt
        );
    }

    fn finish(
        &mut self,
        params: &RunParameters,
        series: Result<TimeSeries, SimError>,
    ) -> Result<&TimeSeries, SimError> {
        let series = match series {
            Ok(series) => series,
            Err(err) => {
                warn!("Run failed: {err}");
                return Err(err);
            }
        };
        if series.is_empty() {
            warn!(
                "Run over [{}, {}) produced no steps",
                params.start, params.stop
            );
        }
        if let Some(last) = series.last_state() {
            self.state = last;
        }
        info!("Run finished after {} step(s)", series.len());
        Ok(&*self.history.insert(series))
    }

    /// Dynamics variables in evaluation order.
    pub fn vars(&self) -> &[String] {
        &self.program.vars
    }

    /// Current value of every variable, indexed like [`Simulator::vars`]:
    /// the construction-time initial values, or the last step of the most
    /// recent successful run.
    pub fn state(&self) -> &[f64] {
        &self.state
    }

    /// History of the last successful run. `None` before the first run and
    /// after a failed one.
    pub fn history(&self) -> Option<&TimeSeries> {
        self.history.as_ref()
    }

    pub fn init_system(&self) -> &EquationSystem {
        &self.init_system
    }

    pub fn dynamics_system(&self) -> &EquationSystem {
        &self.dynamics_system
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }
}

impl fmt::Display for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.init_system, self.dynamics_system)
    }
}
