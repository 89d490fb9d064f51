//! Dense linear algebra kernel (component A).
//!
//! The integrator only ever needs one thing from this layer: factor an
//! `n x n` iteration matrix once per step and reuse the factors for every
//! stage's right-hand side. `nalgebra::DMatrix<f64>` backs storage; the LU
//! itself is hand-rolled (partial pivoting, in-place) so the "reuse, never
//! reallocate" invariant from spec.md 4.A is something we control directly
//! rather than trusting a generic decomposition type to uphold it.

mod lu;

pub use lu::Lu;

use nalgebra::{DMatrix, DVector};

pub type Matrix = DMatrix<f64>;
pub type Vector = DVector<f64>;
