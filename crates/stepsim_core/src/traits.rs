use num_traits::{Float, FromPrimitive};
use rand::distr::{Distribution, StandardUniform};
use rand::Rng;
use rand_distr::StandardNormal;
use std::fmt::Debug;

/// A trait for types that can be used as scalars by the expression VM.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Source of the per-variable random draws injected at every step.
///
/// Every variable evaluated during a step receives one fresh `normal` draw
/// (bound to `n_eps`) and one fresh `uniform` draw (bound to `u_eps`).
pub trait RandomSource {
    /// A standard normal sample, N(0, 1).
    fn normal(&mut self) -> f64;

    /// A uniform sample in [0, 1).
    fn uniform(&mut self) -> f64;
}

impl<R: Rng + ?Sized> RandomSource for R {
    fn normal(&mut self) -> f64 {
        StandardNormal.sample(self)
    }

    fn uniform(&mut self) -> f64 {
        StandardUniform.sample(self)
    }
}

/// Receives the state snapshot after every completed step.
pub trait StepObserver {
    /// step: index of the completed step
    /// t: time value of the step
    /// vars: variable names in evaluation order
    /// state: values of `vars` at this step
    fn on_step(&mut self, step: usize, t: f64, vars: &[String], state: &[f64]);
}

/// Observer that ignores every step.
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    fn on_step(&mut self, _step: usize, _t: f64, _vars: &[String], _state: &[f64]) {}
}

impl<F> StepObserver for F
where
    F: FnMut(usize, f64, &[String], &[f64]),
{
    fn on_step(&mut self, step: usize, t: f64, vars: &[String], state: &[f64]) {
        self(step, t, vars, state)
    }
}
