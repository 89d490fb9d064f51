//! The IVP runtime object (spec.md 3) and the solution it produces.

use crate::error::{IvpError, Result};
use crate::linalg::Vector;
use serde::{Deserialize, Serialize};

/// The independent-variable range and output grid step (spec.md 3).
/// `step` is the interval between *returned* samples, not the
/// integrator's internal adaptive step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub start: f64,
    pub finish: f64,
    pub step: f64,
}

/// The right-hand side `f(t, y)`, written in place into `out`. Must be
/// pure aside from writing `out` -- the integrator may call it more than
/// once per step (Jacobian columns) and relies on that.
pub type Rhs = Box<dyn Fn(f64, &Vector, &mut Vector)>;

/// Polled once per accepted step by the driver (spec.md 5): cancellation
/// is coarse, observable only between steps.
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

/// The default for callers who don't need cancellation.
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// The minimal contract the integrator consumes (spec.md 3).
pub struct Problem {
    pub name: String,
    pub arg: ArgSpec,
    pub initial: Vector,
    pub func: Rhs,
    pub tolerance: f64,
    pub solution_col_names: Vec<String>,
}

impl Problem {
    /// Checks the invariants from spec.md 3 and reports the first
    /// violation found as a `Config` error, before any integration begins.
    pub fn validate(&self) -> Result<()> {
        let n = self.initial.len();
        if self.arg.start >= self.arg.finish {
            return Err(IvpError::config(format!(
                "argument range must satisfy start < finish, got start={} finish={}",
                self.arg.start, self.arg.finish
            )));
        }
        if self.arg.step <= 0.0 {
            return Err(IvpError::config(format!(
                "output step must be > 0, got {}",
                self.arg.step
            )));
        }
        if self.arg.step > self.arg.finish - self.arg.start {
            return Err(IvpError::config(
                "output step must not exceed the argument range",
            ));
        }
        if self.solution_col_names.len() != n {
            return Err(IvpError::config(format!(
                "initial state has {} components but {} solution column names were given",
                n,
                self.solution_col_names.len()
            )));
        }
        if n == 0 {
            return Err(IvpError::config("state vector must have at least one component"));
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(IvpError::config(format!(
                "tolerance must be in (0, 1), got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Counters surfaced to the caller alongside a [`Solution`] (not named in
/// spec.md as a field, but implied by the refresh/rejection policy the
/// driver must track -- see `SPEC_FULL.md` 4).
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub accepted_steps: u64,
    pub rejected_steps: u64,
    pub jacobian_refreshes: u64,
    pub rhs_evals: u64,
}

/// `(n+1)` dense columns: column 0 is the argument grid, columns 1..=n
/// are the state (or declared output) components, in order.
#[derive(Debug, Clone)]
pub struct Solution {
    pub arg: Vec<f64>,
    pub columns: Vec<Vec<f64>>,
    pub names: Vec<String>,
    pub stats: Stats,
}

impl Solution {
    pub fn samples(&self) -> usize {
        self.arg.len()
    }

    pub fn n_components(&self) -> usize {
        self.columns.len()
    }

    /// Row `k`: `(t_k, y_k[0], ..., y_k[n-1])`.
    pub fn row(&self, k: usize) -> Vec<f64> {
        let mut row = vec![self.arg[k]];
        row.extend(self.columns.iter().map(|c| c[k]));
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_problem(start: f64, finish: f64, step: f64, tol: f64, n: usize) -> Problem {
        Problem {
            name: "p".into(),
            arg: ArgSpec {
                name: "t".into(),
                start,
                finish,
                step,
            },
            initial: Vector::zeros(n),
            func: Box::new(|_t, _y, out| out.fill(0.0)),
            tolerance: tol,
            solution_col_names: (0..n).map(|i| format!("y{i}")).collect(),
        }
    }

    #[test]
    fn rejects_bad_bounds() {
        assert!(dummy_problem(1.0, 0.0, 0.1, 1e-3, 1).validate().is_err());
    }

    #[test]
    fn rejects_nonpositive_step() {
        assert!(dummy_problem(0.0, 1.0, 0.0, 1e-3, 1).validate().is_err());
    }

    #[test]
    fn rejects_step_larger_than_range() {
        assert!(dummy_problem(0.0, 1.0, 2.0, 1e-3, 1).validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_tolerance() {
        assert!(dummy_problem(0.0, 1.0, 0.1, 1.5, 1).validate().is_err());
        assert!(dummy_problem(0.0, 1.0, 0.1, 0.0, 1).validate().is_err());
    }

    #[test]
    fn accepts_well_formed_problem() {
        assert!(dummy_problem(0.0, 1.0, 0.1, 1e-6, 2).validate().is_ok());
    }
}
