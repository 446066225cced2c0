use metagrad::Float;

use super::cg::conjugate_gradient;
use super::{check_rhs, log_solution, CgConfig, LinearSolver};
use crate::error::ImplicitError;
use crate::operator::{LinearOperator, NormalOperator};
use crate::result::LinearSolution;

/// Conjugate gradient on the normal equations `AᵀA x = Aᵀ b`.
///
/// Works for any nonsingular `A`, symmetric or not. Each iteration applies
/// `A` once and `Aᵀ` once; `AᵀA` is never formed. The reported residual is
/// that of the normal equations. A ridge turns the system into
/// `(AᵀA + ρI) x = Aᵀ b`.
#[derive(Debug, Clone)]
pub struct NormalCg<F> {
    config: CgConfig<F>,
    init: Option<Vec<F>>,
}

impl<F: Float> NormalCg<F> {
    pub fn new(config: CgConfig<F>) -> Self {
        NormalCg { config, init: None }
    }

    pub fn with_ridge(mut self, ridge: F) -> Self {
        self.config.ridge = Some(ridge);
        self
    }

    /// Start from `x0` instead of zero.
    pub fn with_init(mut self, x0: Vec<F>) -> Self {
        self.init = Some(x0);
        self
    }

    pub fn with_relative_tolerance(mut self, rtol: F) -> Self {
        self.config.relative_tolerance = rtol;
        self
    }

    pub fn config(&self) -> &CgConfig<F> {
        &self.config
    }
}

impl<F: Float> LinearSolver<F> for NormalCg<F> {
    fn name(&self) -> &'static str {
        "normal_cg"
    }

    fn solve(
        &self,
        op: &dyn LinearOperator<F>,
        b: &[F],
    ) -> Result<LinearSolution<F>, ImplicitError> {
        check_rhs(op, b, self.init.as_deref())?;
        let rhs = op.apply_transpose(b)?;
        let normal = NormalOperator::new(op, self.config.ridge.unwrap_or_else(F::zero));
        let solution = conjugate_gradient(&normal, &rhs, self.init.as_deref(), &self.config)?;
        log_solution(self.name(), &solution);
        Ok(solution)
    }

    fn validate(&self) -> Result<(), ImplicitError> {
        self.config.validate()
    }
}
