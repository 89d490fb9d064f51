use thiserror::Error;

/// Every error this crate can return, from parsing a model to a failed
/// integration step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IvpError {
    /// An invariant on the [`crate::problem::Problem`] descriptor was violated.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The model source text was malformed.
    #[error("parse error at {section} line {line}: {message}")]
    Parse {
        line: usize,
        section: String,
        message: String,
    },

    /// An expression referenced an identifier that isn't bound.
    #[error("unbound name `{name}`")]
    Name { name: String },

    /// A non-finite value (NaN/Inf) appeared in y, f, J, or W.
    #[error("non-finite value in {quantity} at t = {t}")]
    Numeric { quantity: String, t: f64 },

    /// The iteration matrix stayed singular after a forced Jacobian refresh.
    #[error("singular iteration matrix at t = {t} (stage \"{stage}\") after forced refresh")]
    Singular { t: f64, stage: String },

    /// A step was rejected more than 10 consecutive times, or h fell below h_min.
    #[error("cannot advance past t = {t} (stage \"{stage}\"): {reason}")]
    Convergence {
        t: f64,
        stage: String,
        reason: String,
    },
}

impl IvpError {
    pub fn config(message: impl Into<String>) -> Self {
        IvpError::Config {
            message: message.into(),
        }
    }

    pub fn parse(line: usize, section: impl Into<String>, message: impl Into<String>) -> Self {
        IvpError::Parse {
            line,
            section: section.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IvpError>;
