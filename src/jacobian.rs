//! Finite-difference Jacobian estimator (component B).

use crate::linalg::{Matrix, Vector};

/// How many accepted steps may elapse before `J` is forced stale again,
/// per spec.md 4.B refresh policy item 3.
pub const K_REFRESH: u32 = 20;

/// One-sided finite-difference Jacobian of `f(t, y)`, column by column.
///
/// `f0` is the already-computed baseline `f(t, y)` (reused, not
/// recomputed): the total cost is `n` extra evaluations, `n + 1`
/// including the baseline, matching spec.md 4.B.
pub fn estimate<F>(t: f64, y: &Vector, f0: &Vector, mut f: F) -> Matrix
where
    F: FnMut(f64, &Vector, &mut Vector),
{
    let n = y.len();
    let mut jac = Matrix::zeros(n, n);
    let mut y_pert = y.clone();
    let mut f_pert = Vector::zeros(n);

    for j in 0..n {
        let yj = y[j];
        let sign = if yj >= 0.0 { 1.0 } else { -1.0 };
        let delta = f64::EPSILON.sqrt() * yj.abs().max(1.0) * sign;
        y_pert[j] = yj + delta;
        f(t, &y_pert, &mut f_pert);
        y_pert[j] = yj;
        for i in 0..n {
            jac[(i, j)] = (f_pert[i] - f0[i]) / delta;
        }
    }
    jac
}

/// Tracks whether `J` needs recomputing, per the four triggers in
/// spec.md 4.B: first step of a stage, any rejected step, more than
/// [`K_REFRESH`] accepted steps since the last refresh, and a singular
/// `W` after a forced refresh.
#[derive(Debug, Default)]
pub struct RefreshTracker {
    steps_since_refresh: u32,
    stale: bool,
}

impl RefreshTracker {
    pub fn new() -> Self {
        Self {
            steps_since_refresh: 0,
            stale: true,
        }
    }

    pub fn mark_rejected(&mut self) {
        self.stale = true;
    }

    pub fn mark_singular(&mut self) {
        self.stale = true;
    }

    pub fn mark_accepted(&mut self) {
        self.steps_since_refresh += 1;
        if self.steps_since_refresh > K_REFRESH {
            self.stale = true;
        }
    }

    pub fn needs_refresh(&self) -> bool {
        self.stale
    }

    pub fn mark_refreshed(&mut self) {
        self.stale = false;
        self.steps_since_refresh = 0;
    }
}
