//! Integrator driver (component D): loops steps from t0 to t1, emits the
//! solution on a uniform output grid, and owns the step-size controller.

use crate::control::{self, StepControlConfig};
use crate::error::{IvpError, Result};
use crate::jacobian::{self, RefreshTracker};
use crate::linalg::{Lu, Matrix, Vector};
use crate::problem::{Cancellation, NeverCancel, Problem, Solution, Stats};
use crate::step::{self, StepWorkspace};
use crate::tableau::Tableau;

/// One of the three supplied ROW tableaux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Mrt,
    Ros3PRw,
    Ros34PRw,
}

impl Method {
    pub fn tableau(self) -> Tableau {
        match self {
            Method::Mrt => Tableau::mrt(),
            Method::Ros3PRw => Tableau::ros3prw(),
            Method::Ros34PRw => Tableau::ros34prw(),
        }
    }
}

/// `solve(ivp, method)` from spec.md 6, with default controller
/// constants and no cancellation.
pub fn solve(problem: &Problem, method: Method) -> Result<Solution> {
    integrate(
        problem,
        &method.tableau(),
        &StepControlConfig::default(),
        &NeverCancel,
        &problem.name,
    )
}

pub fn solve_cancellable(problem: &Problem, method: Method, cancel: &dyn Cancellation) -> Result<Solution> {
    integrate(problem, &method.tableau(), &StepControlConfig::default(), cancel, &problem.name)
}

pub fn solve_with_config(
    problem: &Problem,
    method: Method,
    cfg: &StepControlConfig,
    cancel: &dyn Cancellation,
) -> Result<Solution> {
    integrate(problem, &method.tableau(), cfg, cancel, &problem.name)
}

/// The shared driver loop. `stage_label` is only used to attach context
/// to errors (spec.md 7: "integration errors surface with the current t
/// and stage name attached") -- [`crate::model::pipeline`] calls this
/// directly with its own per-stage name.
pub fn integrate(
    problem: &Problem,
    tableau: &Tableau,
    cfg: &StepControlConfig,
    cancel: &dyn Cancellation,
    stage_label: &str,
) -> Result<Solution> {
    problem.validate()?;
    tracing::debug!(stage = stage_label, t0 = problem.arg.start, t1 = problem.arg.finish, "entering stage");

    let n = problem.initial.len();
    let s = tableau.stages();
    let t0 = problem.arg.start;
    let t1 = problem.arg.finish;
    let h_out = problem.arg.step;
    let atol = problem.tolerance;
    let rtol = problem.tolerance;

    let m = ((t1 - t0) / h_out + 0.5).floor() as usize + 1;
    let mut arg = Vec::with_capacity(m);
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(m); n];

    let mut t = t0;
    let mut y = problem.initial.clone();
    arg.push(t0);
    for i in 0..n {
        columns[i].push(y[i]);
    }
    let mut k_sample = 1usize;

    let mut jac = Matrix::zeros(n, n);
    let mut lu = Lu::new(n);
    let mut ws = StepWorkspace::new(n, s);
    let mut refresh = RefreshTracker::new();
    let mut stats = Stats::default();
    let mut f0 = Vector::zeros(n);

    let mut h = h_out.min(t1 - t0);
    let h_min_abs = f64::EPSILON * t1.abs().max(1.0);

    let refresh_jacobian = |t: f64, y: &Vector, jac: &mut Matrix, f0: &mut Vector, stats: &mut Stats| {
        (problem.func)(t, y, f0);
        stats.rhs_evals += 1;
        *jac = jacobian::estimate(t, y, f0, |tt, yy, out| (problem.func)(tt, yy, out));
        stats.rhs_evals += n as u64;
        stats.jacobian_refreshes += 1;
        tracing::debug!(stage = stage_label, t, refreshes = stats.jacobian_refreshes, "refreshed jacobian");
    };

    while t < t1 - h_min_abs {
        if refresh.needs_refresh() {
            refresh_jacobian(t, &y, &mut jac, &mut f0, &mut stats);
            refresh.mark_refreshed();
        }

        h = h.min(h_out).min(t1 - t);
        if h <= 0.0 {
            break;
        }

        let mut consecutive_rejections = 0u32;
        let mut faults_at_t = 0u32;
        let t_prev = t;
        let y_prev = y.clone();

        loop {
            let attempted = step::attempt(
                tableau,
                &problem.func,
                &jac,
                &mut lu,
                t,
                &y,
                h,
                atol,
                rtol,
                &mut ws,
                &mut stats.rhs_evals,
            );

            let outcome = match attempted {
                Ok(outcome) if !outcome.singular => outcome,
                Ok(_singular) => {
                    faults_at_t += 1;
                    tracing::warn!(stage = stage_label, t, h, "singular iteration matrix");
                    refresh.mark_singular();
                    if faults_at_t > 1 {
                        return Err(IvpError::Singular {
                            t,
                            stage: stage_label.to_string(),
                        });
                    }
                    refresh_jacobian(t, &y, &mut jac, &mut f0, &mut stats);
                    refresh.mark_refreshed();
                    h *= 0.5;
                    continue;
                }
                Err(e) => {
                    faults_at_t += 1;
                    if faults_at_t > 1 {
                        return Err(e);
                    }
                    refresh_jacobian(t, &y, &mut jac, &mut f0, &mut stats);
                    refresh.mark_refreshed();
                    h *= 0.5;
                    continue;
                }
            };

            if outcome.err_norm <= 1.0 {
                t += h;
                y.copy_from(&ws.y_new);
                stats.accepted_steps += 1;
                refresh.mark_accepted();
                h = control::next_step_size(h, outcome.err_norm, tableau.order_embedded, true, cfg);
                break;
            }

            stats.rejected_steps += 1;
            tracing::debug!(stage = stage_label, t, h, err_norm = outcome.err_norm, "step rejected");
            refresh.mark_rejected();
            consecutive_rejections += 1;
            if consecutive_rejections > cfg.max_consecutive_rejections {
                return Err(IvpError::Convergence {
                    t,
                    stage: stage_label.to_string(),
                    reason: "step rejected more than 10 consecutive times".into(),
                });
            }
            h = control::next_step_size(h, outcome.err_norm, tableau.order_embedded, false, cfg);
            if h < h_min_abs {
                return Err(IvpError::Convergence {
                    t,
                    stage: stage_label.to_string(),
                    reason: "step size fell below h_min".into(),
                });
            }
        }

        // Emit any output grid points that fall in (t_prev, t] by linear
        // interpolation between the two accepted endpoints (spec.md 4.D).
        while k_sample < m {
            let t_k = if k_sample == m - 1 {
                t1
            } else {
                t0 + k_sample as f64 * h_out
            };
            if t_k > t + h_min_abs {
                break;
            }
            let span = t - t_prev;
            let frac = if span > 0.0 { (t_k - t_prev) / span } else { 1.0 };
            arg.push(t_k);
            for i in 0..n {
                columns[i].push(y_prev[i] + frac * (y[i] - y_prev[i]));
            }
            k_sample += 1;
        }

        if cancel.is_cancelled() {
            return Err(IvpError::Convergence {
                t,
                stage: stage_label.to_string(),
                reason: "cancelled".into(),
            });
        }
    }

    // The last sample is always t1 exactly; fill it in if the loop above
    // exited with rounding leaving it unemitted.
    if k_sample < m {
        arg.push(t1);
        for i in 0..n {
            columns[i].push(y[i]);
        }
        k_sample += 1;
    }
    debug_assert_eq!(k_sample, m);

    Ok(Solution {
        arg,
        columns,
        names: problem.solution_col_names.clone(),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::ArgSpec;

    fn exp_decay_problem(k: f64, tol: f64, finish: f64, step: f64) -> Problem {
        Problem {
            name: "exp_decay".into(),
            arg: ArgSpec {
                name: "t".into(),
                start: 0.0,
                finish,
                step,
            },
            initial: Vector::from_vec(vec![1.0]),
            func: Box::new(move |_t, y, out| out[0] = -k * y[0]),
            tolerance: tol,
            solution_col_names: vec!["y".into()],
        }
    }

    #[test]
    fn output_grid_is_exact_and_terminates_at_finish() {
        let problem = exp_decay_problem(1.0, 1e-8, 1.0, 0.1);
        let solution = solve(&problem, Method::Ros3PRw).unwrap();
        assert_eq!(solution.samples(), 11);
        assert_eq!(solution.arg[0], 0.0);
        assert_eq!(*solution.arg.last().unwrap(), 1.0);
        for (k, &t) in solution.arg.iter().enumerate() {
            let expected = if k == solution.arg.len() - 1 {
                1.0
            } else {
                0.1 * k as f64
            };
            assert!((t - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn matches_analytic_exponential_decay() {
        let problem = exp_decay_problem(2.0, 1e-9, 2.0, 0.2);
        let solution = solve(&problem, Method::Mrt).unwrap();
        for (k, &t) in solution.arg.iter().enumerate() {
            let exact = (-2.0 * t).exp();
            assert!((solution.columns[0][k] - exact).abs() < 1e-5);
        }
    }

    #[test]
    fn rejects_malformed_problem_before_integrating() {
        let mut problem = exp_decay_problem(1.0, 1e-6, 1.0, 0.1);
        problem.arg.step = 0.0;
        assert!(solve(&problem, Method::Mrt).is_err());
    }
}
