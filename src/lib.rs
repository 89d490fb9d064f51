//! `rowivp` -- adaptive Rosenbrock-Wanner solvers for stiff ODE systems,
//! with a declarative model compiler and multi-stage pipeline driver.
//!
//! The integrator (components A-D: [`linalg`], [`jacobian`], [`tableau`],
//! [`step`], [`driver`]) can be driven directly against a hand-written
//! [`problem::Problem`], or a model can be parsed from source text
//! ([`model::parse`]), lowered into a [`model::pipeline::Pipeline`]
//! (components E-H), and driven with [`model::pipeline::apply_pipeline`].

pub mod control;
pub mod driver;
pub mod error;
pub mod jacobian;
pub mod linalg;
pub mod model;
pub mod problem;
pub mod step;
pub mod tableau;

pub use control::StepControlConfig;
pub use driver::{integrate, solve, solve_cancellable, solve_with_config, Method};
pub use error::{IvpError, Result};
pub use model::{parse, ParsedModel};
pub use problem::{ArgSpec, Cancellation, NeverCancel, Problem, Solution, Stats};
