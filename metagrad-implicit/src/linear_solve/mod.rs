//! Linear solvers for the adjoint system of the implicit function theorem.
//!
//! Every solver implements [`LinearSolver`]: configuration is captured at
//! construction and `solve(operator, b)` is pure in its inputs, so two calls
//! with the same operator and right-hand side return identical results.
//!
//! | factory | method | applications per step |
//! |---|---|---|
//! | [`solve_cg`] | conjugate gradient on `A` (symmetric positive-definite `A`) | 1 |
//! | [`solve_normal_cg`] | conjugate gradient on `AᵀA x = Aᵀ b` | `A` and `Aᵀ` |
//! | [`solve_inv`] | truncated Neumann series, or dense LU for small systems | 1 per term |
//!
//! Hitting an iteration cap or a CG breakdown is reported through
//! [`SolveTermination`](crate::SolveTermination), never as an error.

mod cg;
mod inv;
mod normal_cg;

pub use cg::Cg;
pub use inv::Inverse;
pub use normal_cg::NormalCg;

use metagrad::Float;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ImplicitError;
use crate::operator::LinearOperator;
use crate::result::LinearSolution;

/// A strategy for solving `A x = b` with a matrix-free `A`.
pub trait LinearSolver<F: Float> {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    fn solve(
        &self,
        op: &dyn LinearOperator<F>,
        b: &[F],
    ) -> Result<LinearSolution<F>, ImplicitError>;

    /// Check the configuration. Bindings call this once at construction.
    fn validate(&self) -> Result<(), ImplicitError> {
        Ok(())
    }
}

/// Configuration shared by the conjugate-gradient solvers.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CgConfig<F> {
    /// Hard iteration cap (default: 100). Zero returns the initial iterate.
    pub max_iterations: usize,
    /// Stop when `‖r‖ ≤ absolute_tolerance` (default: 1e-10 for f64, 1e-6 for f32).
    pub absolute_tolerance: F,
    /// Stop when `‖r‖ ≤ relative_tolerance · ‖b‖` (default: 0, disabled).
    pub relative_tolerance: F,
    /// Solve with `A + ρI` (or `AᵀA + ρI`) instead of `A` (default: none).
    pub ridge: Option<F>,
}

impl<F: Float> Default for CgConfig<F> {
    fn default() -> Self {
        CgConfig {
            max_iterations: 100,
            absolute_tolerance: default_tolerance(),
            relative_tolerance: F::zero(),
            ridge: None,
        }
    }
}

/// Configuration of the inverse solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InvConfig<F> {
    /// Sum a Neumann series (default) or factor the materialised operator.
    pub use_neumann_series: bool,
    /// Number of series terms after the zeroth (default: 10).
    pub max_terms: usize,
    /// Damping: `A⁻¹ ≈ α Σ_k (I − αA)^k` (default: 1).
    pub alpha: F,
    /// Invert `A + ρI` instead of `A` (default: none).
    pub ridge: Option<F>,
}

impl<F: Float> Default for InvConfig<F> {
    fn default() -> Self {
        InvConfig {
            use_neumann_series: true,
            max_terms: 10,
            alpha: F::one(),
            ridge: None,
        }
    }
}

/// 1e-10 where the float type resolves it comfortably, 1e-6 otherwise.
fn default_tolerance<F: Float>() -> F {
    let tight = F::from(1e-10).unwrap_or_else(F::epsilon);
    if F::epsilon() < F::from(1e-12).unwrap_or_else(F::epsilon) {
        tight
    } else {
        F::from(1e-6).unwrap_or_else(F::epsilon)
    }
}

/// Serializable choice of solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SolverConfig<F> {
    Cg(CgConfig<F>),
    NormalCg(CgConfig<F>),
    Inv(InvConfig<F>),
}

impl<F: Float> Default for SolverConfig<F> {
    fn default() -> Self {
        SolverConfig::NormalCg(CgConfig::default())
    }
}

impl<F: Float> SolverConfig<F> {
    /// Check tolerances, damping and ridge.
    pub fn validate(&self) -> Result<(), ImplicitError> {
        match self {
            SolverConfig::Cg(c) | SolverConfig::NormalCg(c) => c.validate(),
            SolverConfig::Inv(c) => c.validate(),
        }
    }

    /// Build the configured solver.
    pub fn into_solver(self) -> Box<dyn LinearSolver<F>> {
        match self {
            SolverConfig::Cg(config) => Box::new(Cg::new(config)),
            SolverConfig::NormalCg(config) => Box::new(NormalCg::new(config)),
            SolverConfig::Inv(config) => Box::new(Inverse::new(config)),
        }
    }
}

fn invalid(msg: impl Into<String>) -> ImplicitError {
    ImplicitError::InvalidSolverConfig(msg.into())
}

fn check_ridge<F: Float>(ridge: Option<F>) -> Result<(), ImplicitError> {
    match ridge {
        Some(r) if !(r >= F::zero() && r.is_finite()) => Err(invalid(format!(
            "ridge must be finite and non-negative, got {r}"
        ))),
        _ => Ok(()),
    }
}

impl<F: Float> CgConfig<F> {
    pub fn validate(&self) -> Result<(), ImplicitError> {
        if !(self.absolute_tolerance >= F::zero()) {
            return Err(invalid(format!(
                "absolute_tolerance must be non-negative, got {}",
                self.absolute_tolerance
            )));
        }
        if !(self.relative_tolerance >= F::zero()) {
            return Err(invalid(format!(
                "relative_tolerance must be non-negative, got {}",
                self.relative_tolerance
            )));
        }
        check_ridge(self.ridge)
    }
}

impl<F: Float> InvConfig<F> {
    pub fn validate(&self) -> Result<(), ImplicitError> {
        if !(self.alpha > F::zero() && self.alpha.is_finite()) {
            return Err(invalid(format!(
                "alpha must be finite and positive, got {}",
                self.alpha
            )));
        }
        check_ridge(self.ridge)
    }
}

/// Conjugate gradient for symmetric positive-definite operators.
pub fn solve_cg<F: Float>(max_iterations: usize, absolute_tolerance: F) -> Cg<F> {
    Cg::new(CgConfig {
        max_iterations,
        absolute_tolerance,
        ..CgConfig::default()
    })
}

/// Conjugate gradient on the normal equations `AᵀA x = Aᵀ b`.
pub fn solve_normal_cg<F: Float>(max_iterations: usize, absolute_tolerance: F) -> NormalCg<F> {
    NormalCg::new(CgConfig {
        max_iterations,
        absolute_tolerance,
        ..CgConfig::default()
    })
}

/// Neumann-series inverse (`use_neumann_series = true`) or explicit inverse.
pub fn solve_inv<F: Float>(use_neumann_series: bool, max_terms: usize, alpha: F) -> Inverse<F> {
    Inverse::new(InvConfig {
        use_neumann_series,
        max_terms,
        alpha,
        ridge: None,
    })
}

/// Check `b` and an optional initial guess against the operator.
fn check_rhs<F: Float>(
    op: &dyn LinearOperator<F>,
    b: &[F],
    init: Option<&[F]>,
) -> Result<(), ImplicitError> {
    let expected = op.dim();
    for got in std::iter::once(b.len()).chain(init.map(<[F]>::len)) {
        if got != expected {
            return Err(ImplicitError::OperatorShape { expected, got });
        }
    }
    Ok(())
}

fn log_solution<F: Float>(name: &str, solution: &LinearSolution<F>) {
    log::debug!(
        "{name}: {} after {} iterations (residual {:?})",
        solution.termination,
        solution.iterations,
        solution.residual_norm
    );
}
