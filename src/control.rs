//! PI-style step-size controller (spec.md 4.C).

/// Tunable constants behind the step-size controller and Jacobian
/// refresh cap. Defaults reproduce spec.md's literal numbers exactly;
/// see `SPEC_FULL.md` 3.3 for why this exists as a struct rather than
/// hard-coded constants.
#[derive(Debug, Clone, Copy)]
pub struct StepControlConfig {
    pub safety: f64,
    pub h_min_factor: f64,
    pub h_max_factor: f64,
    pub max_consecutive_rejections: u32,
}

impl Default for StepControlConfig {
    fn default() -> Self {
        Self {
            safety: 0.9,
            h_min_factor: 0.2,
            h_max_factor: 5.0,
            max_consecutive_rejections: 10,
        }
    }
}

/// Weighted RMS error norm over n components (spec.md 4.C).
///
/// `atol`/`rtol` both equal the model's single tolerance per spec.md 9 OQ1.
pub fn error_norm(err: &crate::linalg::Vector, y: &crate::linalg::Vector, y_new: &crate::linalg::Vector, atol: f64, rtol: f64) -> f64 {
    let n = err.len();
    let mut acc = 0.0;
    for i in 0..n {
        let scale = atol + rtol * y[i].abs().max(y_new[i].abs());
        let term = err[i] / scale;
        acc += term * term;
    }
    (acc / n as f64).sqrt()
}

/// Suggests the next step size given the error norm of the step just
/// attempted. `accepted` selects the growth cap (5 on accept, 1 -- i.e.
/// no growth -- on reject, per spec.md 4.C).
pub fn next_step_size(h: f64, err_norm: f64, order_embedded: u32, accepted: bool, cfg: &StepControlConfig) -> f64 {
    let p = f64::from(order_embedded + 1);
    let growth_cap = if accepted { cfg.h_max_factor } else { 1.0 };
    // err_norm == 0 would blow up the -1/p power; treat it as "grow by the cap".
    let raw = if err_norm > 0.0 {
        cfg.safety * err_norm.powf(-1.0 / p)
    } else {
        growth_cap
    };
    let factor = raw.clamp(cfg.h_min_factor, growth_cap);
    h * factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Vector;

    #[test]
    fn error_norm_zero_when_err_is_zero() {
        let err = Vector::zeros(3);
        let y = Vector::from_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(error_norm(&err, &y, &y, 1e-6, 1e-6), 0.0);
    }

    #[test]
    fn rejection_never_grows_step() {
        let cfg = StepControlConfig::default();
        let h_new = next_step_size(1.0, 2.0, 2, false, &cfg);
        assert!(h_new <= 1.0);
    }

    #[test]
    fn acceptance_can_grow_up_to_cap() {
        let cfg = StepControlConfig::default();
        let h_new = next_step_size(1.0, 1e-6, 2, true, &cfg);
        assert!(h_new <= cfg.h_max_factor);
    }

    #[test]
    fn shrink_never_goes_below_min_factor() {
        let cfg = StepControlConfig::default();
        let h_new = next_step_size(1.0, 1e9, 2, false, &cfg);
        assert!((h_new - cfg.h_min_factor).abs() < 1e-12);
    }
}
