//! ROW step kernel (component C): one adaptive step of a given tableau.
//!
//! The stage loop in [`attempt`] is shared across MRT, ROS3PRw, and
//! ROS34PRw; only the [`crate::tableau::Tableau`] differs (spec.md 4.C).

use crate::control::error_norm;
use crate::error::{IvpError, Result};
use crate::linalg::{Lu, Matrix, Vector};
use crate::problem::Rhs;
use crate::tableau::Tableau;

/// Scratch space for one step attempt, allocated once per stage and
/// reused for every attempt (accepted or rejected) within it -- the
/// "workspace never reallocated mid-step" invariant from spec.md 3.
pub struct StepWorkspace {
    pub k: Vec<Vector>,
    sum_y: Vector,
    rhs: Vector,
    f_buf: Vector,
    pub y_new: Vector,
    pub y_hat: Vector,
    pub err: Vector,
}

impl StepWorkspace {
    pub fn new(n: usize, stages: usize) -> Self {
        Self {
            k: vec![Vector::zeros(n); stages],
            sum_y: Vector::zeros(n),
            rhs: Vector::zeros(n),
            f_buf: Vector::zeros(n),
            y_new: Vector::zeros(n),
            y_hat: Vector::zeros(n),
            err: Vector::zeros(n),
        }
    }
}

/// The outcome of one step attempt: `accepted` reflects spec.md 4.C's
/// `err_norm <= 1` rule, `singular` flags a forced-refresh-worthy `W`.
pub struct StepOutcome {
    pub err_norm: f64,
    pub singular: bool,
}

/// Forms `W = (1 / (gamma * h)) * I - J`, factors it, runs the s-stage
/// loop, and fills `ws.y_new`/`ws.y_hat`/`ws.err`. Returns the embedded
/// error norm; a `singular` outcome means the caller should reject,
/// force a Jacobian refresh, and retry without trusting `ws.y_new`.
#[allow(clippy::too_many_arguments)]
pub fn attempt(
    tableau: &Tableau,
    f: &Rhs,
    jac: &Matrix,
    lu: &mut Lu,
    t: f64,
    y: &Vector,
    h: f64,
    atol: f64,
    rtol: f64,
    ws: &mut StepWorkspace,
    rhs_evals: &mut u64,
) -> Result<StepOutcome> {
    let n = y.len();
    let s = tableau.stages();

    let scale = 1.0 / (tableau.gamma * h);
    let mut w = Matrix::identity(n, n);
    w *= scale;
    w -= jac;

    if !lu.factor(&w) {
        return Ok(StepOutcome {
            err_norm: f64::INFINITY,
            singular: true,
        });
    }

    for i in 0..s {
        ws.sum_y.copy_from(y);
        for j in 0..i {
            ws.sum_y.axpy(tableau.a[i][j], &ws.k[j], 1.0);
        }
        let sum_t = t + tableau.alpha(i) * h;

        f(sum_t, &ws.sum_y, &mut ws.f_buf);
        *rhs_evals += 1;
        if !ws.f_buf.iter().all(|v| v.is_finite()) {
            return Err(IvpError::Numeric {
                quantity: "f".into(),
                t: sum_t,
            });
        }

        ws.rhs.copy_from(&ws.f_buf);
        for j in 0..i {
            ws.rhs.axpy(tableau.c[i][j] / h, &ws.k[j], 1.0);
        }
        lu.solve(&mut ws.rhs);
        ws.k[i].copy_from(&ws.rhs);
    }

    ws.y_new.copy_from(y);
    ws.y_hat.copy_from(y);
    for i in 0..s {
        ws.y_new.axpy(tableau.b[i], &ws.k[i], 1.0);
        ws.y_hat.axpy(tableau.b_hat[i], &ws.k[i], 1.0);
    }
    if !ws.y_new.iter().all(|v| v.is_finite()) {
        return Err(IvpError::Numeric {
            quantity: "y_new".into(),
            t: t + h,
        });
    }

    for i in 0..n {
        ws.err[i] = ws.y_new[i] - ws.y_hat[i];
    }
    let norm = error_norm(&ws.err, y, &ws.y_new, atol, rtol);

    Ok(StepOutcome {
        err_norm: norm,
        singular: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jacobian;
    use crate::tableau::Tableau;

    #[test]
    fn single_step_on_linear_decay_matches_analytic_to_tolerance() {
        // y' = -y, y(0) = 1. Exact solution at t=h is exp(-h).
        let tableau = Tableau::mrt();
        let f: Rhs = Box::new(|_t, y: &Vector, out: &mut Vector| out.copy_from(&(-y)));
        let y0 = Vector::from_vec(vec![1.0]);
        let mut f0 = Vector::zeros(1);
        f(0.0, &y0, &mut f0);
        let jac = jacobian::estimate(0.0, &y0, &f0, |t, y, out| f(t, y, out));

        let h = 0.01;
        let mut lu = Lu::new(1);
        let mut ws = StepWorkspace::new(1, tableau.stages());
        let mut rhs_evals = 0;
        let outcome = attempt(&tableau, &f, &jac, &mut lu, 0.0, &y0, h, 1e-10, 1e-10, &mut ws, &mut rhs_evals)
            .unwrap();
        assert!(!outcome.singular);
        let exact = (-h).exp();
        assert!((ws.y_new[0] - exact).abs() < 1e-6);
    }

    #[test]
    fn flags_numeric_error_on_nonfinite_rhs() {
        let tableau = Tableau::mrt();
        let f: Rhs = Box::new(|_t, _y: &Vector, out: &mut Vector| out[0] = f64::NAN);
        let y0 = Vector::from_vec(vec![1.0]);
        let jac = Matrix::zeros(1, 1);
        let mut lu = Lu::new(1);
        let mut ws = StepWorkspace::new(1, tableau.stages());
        let mut rhs_evals = 0;
        let res = attempt(&tableau, &f, &jac, &mut lu, 0.0, &y0, 0.1, 1e-6, 1e-6, &mut ws, &mut rhs_evals);
        assert!(res.is_err());
    }
}
