use super::Matrix;

/// Dense LU factorisation with partial pivoting, factored and solved
/// in place on a caller-owned buffer.
///
/// Mirrors the "W owned by the step kernel for the lifetime of one step"
/// policy from spec.md 5: a [`Lu`] doesn't allocate a fresh matrix per
/// step, it refactors `W` in place and keeps only an `n`-length pivot
/// vector alongside it.
pub struct Lu {
    /// LU factors in a single dense buffer: U in the upper triangle
    /// (including the diagonal), L's subdiagonal multipliers below it.
    factors: Matrix,
    pivots: Vec<usize>,
    n: usize,
}

impl Lu {
    /// Allocates storage for an `n x n` system. Call [`Lu::factor`] before
    /// the first [`Lu::solve`].
    pub fn new(n: usize) -> Self {
        Self {
            factors: Matrix::zeros(n, n),
            pivots: (0..n).collect(),
            n,
        }
    }

    /// Factors `w` in place with partial pivoting.
    ///
    /// Returns `false` (without consuming `w`'s usable factors) when the
    /// matrix is judged singular: the step kernel treats this as the
    /// "Jacobian stale or step too large" signal from spec.md 4.A and
    /// forces a rejection plus refresh rather than returning a garbage
    /// solve downstream.
    pub fn factor(&mut self, w: &Matrix) -> bool {
        assert_eq!(w.nrows(), self.n);
        assert_eq!(w.ncols(), self.n);
        self.factors.copy_from(w);
        for i in 0..self.n {
            self.pivots[i] = i;
        }

        let inf_norm = row_inf_norm(w);
        let threshold = f64::EPSILON.sqrt() * inf_norm.max(f64::MIN_POSITIVE);

        for k in 0..self.n {
            // Partial pivot: largest-magnitude entry in column k, rows >= k.
            let mut pivot_row = k;
            let mut pivot_val = self.factors[(k, k)].abs();
            for i in (k + 1)..self.n {
                let v = self.factors[(i, k)].abs();
                if v > pivot_val {
                    pivot_val = v;
                    pivot_row = i;
                }
            }
            if pivot_row != k {
                self.factors.swap_rows(k, pivot_row);
                self.pivots.swap(k, pivot_row);
            }
            if pivot_val < threshold {
                return false;
            }
            let pivot = self.factors[(k, k)];
            for i in (k + 1)..self.n {
                let factor = self.factors[(i, k)] / pivot;
                self.factors[(i, k)] = factor;
                for j in (k + 1)..self.n {
                    let sub = factor * self.factors[(k, j)];
                    self.factors[(i, j)] -= sub;
                }
            }
        }
        true
    }

    /// Solves `W x = rhs` in place, overwriting `rhs` with the solution.
    /// Must be called after a successful [`Lu::factor`].
    pub fn solve(&self, rhs: &mut super::Vector) {
        assert_eq!(rhs.len(), self.n);

        // Apply the row permutation.
        let mut permuted = rhs.clone();
        for i in 0..self.n {
            permuted[i] = rhs[self.pivots[i]];
        }

        // Forward substitution: L y = Pb (L has an implicit unit diagonal).
        for i in 0..self.n {
            let mut sum = permuted[i];
            for j in 0..i {
                sum -= self.factors[(i, j)] * permuted[j];
            }
            permuted[i] = sum;
        }

        // Back substitution: U x = y.
        for i in (0..self.n).rev() {
            let mut sum = permuted[i];
            for j in (i + 1)..self.n {
                sum -= self.factors[(i, j)] * permuted[j];
            }
            permuted[i] = sum / self.factors[(i, i)];
        }

        rhs.copy_from(&permuted);
    }
}

fn row_inf_norm(m: &Matrix) -> f64 {
    (0..m.nrows())
        .map(|i| (0..m.ncols()).map(|j| m[(i, j)].abs()).sum::<f64>())
        .fold(0.0_f64, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::Vector;

    #[test]
    fn solves_identity() {
        let mut lu = Lu::new(3);
        let w = Matrix::identity(3, 3);
        assert!(lu.factor(&w));
        let mut b = Vector::from_vec(vec![1.0, 2.0, 3.0]);
        lu.solve(&mut b);
        assert_eq!(b, Vector::from_vec(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn solves_with_pivoting() {
        // Requires a row swap: the (0,0) entry is zero.
        let w = Matrix::from_row_slice(3, 3, &[0.0, 2.0, 1.0, 1.0, 1.0, 1.0, 3.0, 3.0, 1.0]);
        let mut lu = Lu::new(3);
        assert!(lu.factor(&w));
        let mut b = Vector::from_vec(vec![5.0, 3.0, 10.0]);
        let expected = w.clone().lu().solve(&b).unwrap();
        lu.solve(&mut b);
        for i in 0..3 {
            assert!((b[i] - expected[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn flags_singular() {
        let w = Matrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let mut lu = Lu::new(2);
        assert!(!lu.factor(&w));
    }

    #[test]
    fn reused_buffer_no_realloc_signature() {
        // `factor` takes `&mut self` and refactors in place; calling it
        // twice on the same Lu must not change its dimensions.
        let mut lu = Lu::new(2);
        let w1 = Matrix::identity(2, 2);
        let w2 = Matrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]);
        assert!(lu.factor(&w1));
        assert!(lu.factor(&w2));
        assert_eq!(lu.n, 2);
    }
}
