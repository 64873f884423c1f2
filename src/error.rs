//! Error taxonomy.
//!
//! Each subsystem has its own error enum; [`SpectralError`] wraps them so
//! callers can propagate everything with `?`:
//! - [`BasisError`]: transform shape and derivative-order mismatches
//! - [`FieldError`]: space/rank mismatches between fields
//! - [`ExprError`]: malformed or unsupported operator trees
//! - [`AssemblyError`]: unknown/equation count mismatches per pencil
//! - [`SingularSystemError`]: factorization failures
//! - [`ConvergenceError`]: reserved for iterative fallbacks
//! - [`CflError`]: non-finite velocities in the step-size controller

use thiserror::Error;

/// Errors raised by bases and their transforms.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error("data length {actual} does not match expected {expected} for {context}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("derivative order {requested} exceeds supported depth {supported}")]
    DerivativeDepth { requested: usize, supported: usize },

    #[error("invalid basis parameter: {0}")]
    InvalidParameter(String),

    #[error("Gamma function only defined here for positive half-integers, got {0}")]
    GammaArgument(f64),
}

/// Errors raised when combining or transforming fields.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("field '{name}' has incompatible space: {reason}")]
    IncompatibleSpace { name: String, reason: String },

    #[error("tensor rank mismatch: expected {expected}, found {found}")]
    RankMismatch { expected: usize, found: usize },

    #[error("unsupported tensor rank {rank} for {context}")]
    UnsupportedRank { rank: usize, context: &'static str },

    #[error(transparent)]
    Basis(#[from] BasisError),
}

/// Errors raised while evaluating or linearizing expressions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("operator {op} is not supported here: {reason}")]
    Unsupported { op: &'static str, reason: String },

    #[error("term is nonlinear in the unknowns: {0}")]
    NonlinearTerm(String),

    #[error("time derivative cannot be evaluated numerically")]
    TimeDerivativeEvaluation,

    #[error("operand ranks incompatible for {op}: {left} and {right}")]
    RankMismatch {
        op: &'static str,
        left: usize,
        right: usize,
    },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Basis(#[from] BasisError),
}

/// Errors raised while building per-pencil systems.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    #[error("pencil {pencil}: {equations} equation rows for {unknowns} unknown coefficients")]
    DimensionMismatch {
        pencil: String,
        equations: usize,
        unknowns: usize,
    },

    #[error("equation {index} contains no unknowns")]
    NoUnknowns { index: usize },

    #[error("equation {index}: left and right sides differ ({reason})")]
    SideMismatch { index: usize, reason: String },

    #[error("problem has no equations")]
    Empty,

    #[error("variable '{0}' listed twice")]
    DuplicateVariable(String),

    #[error("invalid problem domain: {0}")]
    Domain(String),

    #[error("equation {index}: condition '{condition}' does not apply to this domain")]
    InvalidCondition { index: usize, condition: String },

    #[error("equation {index}: {source}")]
    Expression {
        index: usize,
        #[source]
        source: ExprError,
    },
}

/// Raised when a per-pencil implicit matrix cannot be factorized.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("singular system in pencil {pencil}: smallest pivot {pivot:e} (largest {max_pivot:e})")]
pub struct SingularSystemError {
    pub pencil: String,
    pub pivot: f64,
    pub max_pivot: f64,
}

/// Reserved for iterative solvers.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("iteration did not converge after {iterations} iterations (residual {residual:e})")]
pub struct ConvergenceError {
    pub iterations: usize,
    pub residual: f64,
}

/// Errors raised by the CFL controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CflError {
    #[error("non-finite velocity encountered in '{0}'")]
    NonFiniteVelocity(String),

    #[error("invalid CFL configuration: {0}")]
    InvalidConfig(String),
}

/// Top-level error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpectralError {
    #[error(transparent)]
    Basis(#[from] BasisError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Singular(#[from] SingularSystemError),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error(transparent)]
    Cfl(#[from] CflError),

    #[error("invalid process mesh: {0}")]
    Mesh(String),

    #[error("checkpoint does not match solver state: {0}")]
    Checkpoint(String),

    #[error("output handler: {0}")]
    Output(String),

    #[error("solver is in state {state}, cannot {action}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SpectralError>;
