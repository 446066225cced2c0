use metagrad::{AdError, TreeError};
use thiserror::Error;

/// Errors from building or running an implicit-differentiation binding.
///
/// Configuration variants are raised by [`CustomRootBuilder::build`] and by
/// module registration, before any forward call. Errors produced by a user's
/// forward solver are never wrapped here: entry points are generic over the
/// caller's error type and hand those back untouched.
///
/// [`CustomRootBuilder::build`]: crate::CustomRootBuilder::build
#[derive(Error, Debug)]
pub enum ImplicitError {
    #[error("exactly one of optimality, objective or fixed-point map must be supplied, got {supplied}")]
    ConditionSource { supplied: usize },

    #[error("no meta-parameter argument declared")]
    NoMetaArguments,

    #[error("argument index {index} out of range for {num_args} arguments")]
    ArgnumOutOfRange { index: usize, num_args: usize },

    #[error("argument index {0} declared twice")]
    DuplicateArgnum(usize),

    #[error("argument {0} is the inner solution and cannot also be a meta-parameter")]
    InnerIsMeta(usize),

    #[error("invalid solver configuration: {0}")]
    InvalidSolverConfig(String),

    #[error("forward returned auxiliary output but the binding was built without has_aux (or the reverse)")]
    AuxMismatch,

    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    #[error("forward solver returned {got} values for an inner argument of length {expected}")]
    SolutionShape { expected: usize, got: usize },

    #[error("optimality residual has length {got}, inner parameters have length {expected}")]
    ResidualShape { expected: usize, got: usize },

    #[error("meta-parameters have length {got}, expected {expected}")]
    MetaShape { expected: usize, got: usize },

    #[error("operator of dimension {expected} applied to a vector of length {got}")]
    OperatorShape { expected: usize, got: usize },

    #[error("linear system is singular")]
    SingularSystem,

    #[error("module has no objective to evaluate")]
    NoObjective,

    #[error("parameter `{0}` registered after the first solve")]
    AlreadySolved(String),

    #[error("parameter name `{0}` already registered")]
    DuplicateParameter(String),

    #[error(transparent)]
    Ad(#[from] AdError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}
