//! The declarative model subsystem (components E–H): parsing model
//! source text into a [`ParsedModel`], compiling its right-hand sides,
//! lowering it into a [`pipeline::Pipeline`] of integrator stages, and
//! rendering a parsed model back out as source text.

pub mod binding;
pub mod emitter;
pub mod expr;
pub mod parser;
pub mod pipeline;

pub use binding::Binding;
pub use expr::Expr;
pub use parser::parse;

use crate::error::{IvpError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
        }
    }

    pub fn apply(self, current: f64, rhs: f64) -> f64 {
        match self {
            AssignOp::Set => rhs,
            AssignOp::Add => current + rhs,
            AssignOp::Sub => current - rhs,
            AssignOp::Mul => current * rhs,
            AssignOp::Div => current / rhs,
        }
    }
}

/// `d<state>/d<arg> = <rhs>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub state: String,
    pub text: String,
    pub expr: Expr,
}

/// `<name> = <rhs>`, evaluated top-to-bottom before equations each call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub name: String,
    pub text: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub text: String,
    pub expr: Expr,
    pub default: f64,
    pub meta: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub text: String,
    pub expr: Expr,
    pub value: f64,
}

/// `<state> = <rhs>`, evaluated once against parameters/constants to
/// seed the initial state vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
    pub name: String,
    pub text: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub target: String,
    pub op: AssignOp,
    pub text: String,
    pub expr: Expr,
}

/// One `#update` block: a stage boundary plus the assignments applied
/// to the workspace when entering the new stage (spec.md 4.G).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBlock {
    pub label: String,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDecl {
    pub name: String,
    pub label: String,
    pub start: f64,
    pub finish: f64,
    pub step: f64,
}

/// The compile-time IVP object produced by the parser and expression
/// compiler (spec.md 3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedModel {
    pub name: String,
    pub tags: Vec<String>,
    pub description: String,
    pub argument: ArgumentDecl,
    pub equations: Vec<Equation>,
    pub expressions: Vec<Expression>,
    pub parameters: Vec<Parameter>,
    pub constants: Vec<Constant>,
    pub inits: Vec<Init>,
    pub updates: Vec<UpdateBlock>,
    pub outputs: Vec<String>,
    pub tolerance: Option<f64>,
    pub loop_count: Option<u32>,
    pub meta: Vec<String>,
    pub binding: Binding,
}

impl ParsedModel {
    pub fn n_states(&self) -> usize {
        self.equations.len()
    }

    /// The names the solution columns should carry: the declared
    /// `#output` list if non-empty, else every state in declaration
    /// order (spec.md 3: "outputs (subset of state and expression
    /// names, ordered)").
    pub fn output_names(&self) -> Vec<String> {
        if self.outputs.is_empty() {
            self.equations.iter().map(|e| e.state.clone()).collect()
        } else {
            self.outputs.clone()
        }
    }

    /// Projects a keyed input map into a positional vector ordered by
    /// this model's name binding, defaulting to a parameter's declared
    /// default or a constant's value for keys the caller omits
    /// (spec.md 6: `input_vector(input_map, parsed_model)`).
    pub fn input_vector(&self, input: &std::collections::HashMap<String, f64>) -> Result<Vec<f64>> {
        let mut names: Vec<&str> = Vec::new();
        for p in &self.parameters {
            names.push(p.name.as_str());
        }
        for c in &self.constants {
            names.push(c.name.as_str());
        }
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if let Some(&v) = input.get(name) {
                out.push(v);
                continue;
            }
            if let Some(p) = self.parameters.iter().find(|p| p.name == name) {
                out.push(p.default);
                continue;
            }
            if let Some(c) = self.constants.iter().find(|c| c.name == name) {
                out.push(c.value);
                continue;
            }
            return Err(IvpError::Name { name: name.to_string() });
        }
        for key in input.keys() {
            if self.binding.get(key).is_none() {
                return Err(IvpError::Name { name: key.clone() });
            }
        }
        Ok(out)
    }
}
