use crate::error::SimError;
use serde::{Deserialize, Serialize};

/// Upper bound on the number of steps a single run may allocate.
pub const MAX_STEPS: usize = 50_000_000;

/// Time grid of a run: `start, start + dt, ...` strictly below `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub start: f64,
    pub stop: f64,
    pub dt: f64,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 10.0,
            dt: 1.0,
        }
    }
}

impl RunParameters {
    pub fn new(start: f64, stop: f64, dt: f64) -> Self {
        Self { start, stop, dt }
    }

    /// Checks the parameters and returns the number of steps.
    /// `start >= stop` is a valid, empty run.
    pub fn validate(&self) -> Result<usize, SimError> {
        if !self.start.is_finite() || !self.stop.is_finite() || !self.dt.is_finite() {
            return Err(SimError::InvalidRunParameters(format!(
                "start, stop and dt must be finite (got {}, {}, {})",
                self.start, self.stop, self.dt
            )));
        }
        if self.dt <= 0.0 {
            return Err(SimError::InvalidRunParameters(format!(
                "dt must be positive (got {})",
                self.dt
            )));
        }
        if self.start >= self.stop {
            return Ok(0);
        }
        let estimate = ((self.stop - self.start) / self.dt).ceil();
        if estimate > MAX_STEPS as f64 {
            return Err(SimError::InvalidRunParameters(format!(
                "run would take {estimate} steps, more than the limit of {MAX_STEPS}"
            )));
        }
        // The quotient can round either way; the last grid point must stay below stop.
        let mut steps = estimate as usize;
        while steps > 0 && self.time_at(steps - 1) >= self.stop {
            steps -= 1;
        }
        while steps < MAX_STEPS && self.time_at(steps) < self.stop {
            steps += 1;
        }
        Ok(steps)
    }

    fn time_at(&self, k: usize) -> f64 {
        self.start + k as f64 * self.dt
    }

    /// The half-open time array. Each value is computed as `start + k*dt`
    /// rather than accumulated, so rounding does not drift.
    pub fn time_grid(&self) -> Result<Vec<f64>, SimError> {
        let steps = self.validate()?;
        Ok((0..steps).map(|k| self.time_at(k)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn grid_excludes_stop() {
        let grid = RunParameters::new(0.0, 5.0, 1.0).time_grid().expect("grid");
        assert_eq!(grid, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn grid_with_fractional_step_keeps_last_partial_step() {
        let grid = RunParameters::new(0.0, 1.0, 0.3).time_grid().expect("grid");
        assert_eq!(grid.len(), 4);
        assert_relative_eq!(grid[3], 0.9, epsilon = 1e-12);
    }

    #[test]
    fn grid_stays_below_stop_when_quotient_rounds_up() {
        // (1.3 - 1.0) / 0.1 is slightly above 3.
        let params = RunParameters::new(1.0, 1.3, 0.1);
        assert_eq!(params.validate().expect("valid"), 3);
        let grid = params.time_grid().expect("grid");
        assert_eq!(grid.len(), 3);
        for (t, expected) in grid.iter().zip([1.0, 1.1, 1.2]) {
            assert_relative_eq!(*t, expected, epsilon = 1e-12);
        }
        assert!(grid.iter().all(|&t| t < 1.3));
    }

    #[test]
    fn grid_never_reaches_stop_for_decimal_steps() {
        for (start, stop, dt) in [
            (0.0, 0.3, 0.1),
            (0.0, 0.7, 0.1),
            (2.0, 2.6, 0.2),
            (0.5, 1.0, 0.05),
        ] {
            let grid = RunParameters::new(start, stop, dt).time_grid().expect("grid");
            assert!(grid.iter().all(|&t| t < stop), "{grid:?} reaches {stop}");
            let next = start + grid.len() as f64 * dt;
            assert!(next >= stop, "grid for [{start}, {stop}) stops early at {next}");
        }
    }

    #[test]
    fn empty_range_is_valid() {
        assert_eq!(RunParameters::new(5.0, 5.0, 1.0).validate().expect("valid"), 0);
        assert!(RunParameters::new(6.0, 5.0, 1.0)
            .time_grid()
            .expect("valid")
            .is_empty());
    }

    #[test]
    fn rejects_non_positive_or_non_finite_values() {
        for params in [
            RunParameters::new(0.0, 1.0, 0.0),
            RunParameters::new(0.0, 1.0, -0.1),
            RunParameters::new(0.0, f64::INFINITY, 1.0),
            RunParameters::new(f64::NAN, 1.0, 1.0),
        ] {
            let err = params.validate().expect_err("invalid parameters");
            assert!(matches!(err, SimError::InvalidRunParameters(_)));
        }
    }

    #[test]
    fn rejects_runs_beyond_step_limit() {
        let err = RunParameters::new(0.0, 1.0, 1e-12)
            .validate()
            .expect_err("too many steps");
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn defaults_span_ten_unit_steps() {
        let grid = RunParameters::default().time_grid().expect("grid");
        assert_eq!(grid.len(), 10);
    }
}
