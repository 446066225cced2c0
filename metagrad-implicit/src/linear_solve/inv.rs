use metagrad::Float;

use super::{check_rhs, log_solution, InvConfig, LinearSolver};
use crate::convergence::{axpy, scale};
use crate::error::ImplicitError;
use crate::linalg::lu_factor;
use crate::operator::{materialize, LinearOperator, RidgeOperator};
use crate::result::{LinearSolution, SolveTermination};

/// Above this dimension the explicit inverse warns before materialising.
const LARGE_DENSE_DIM: usize = 512;

/// Approximate inverse of the operator.
///
/// With `use_neumann_series`, returns `x = α Σ_{k=0}^{K} (I − αA)^k b` for
/// `K = max_terms`: exactly `K` operator applications and no convergence
/// check. The series converges to `A⁻¹ b` when the spectral radius of
/// `I − αA` is below one. `max_terms = 0` keeps only the zeroth term, `α b`.
///
/// Otherwise the operator is materialised column by column and solved by LU;
/// meant for small systems.
#[derive(Debug, Clone)]
pub struct Inverse<F> {
    config: InvConfig<F>,
}

impl<F: Float> Inverse<F> {
    pub fn new(config: InvConfig<F>) -> Self {
        Inverse { config }
    }

    pub fn with_ridge(mut self, ridge: F) -> Self {
        self.config.ridge = Some(ridge);
        self
    }

    pub fn config(&self) -> &InvConfig<F> {
        &self.config
    }

    fn neumann(&self, op: &dyn LinearOperator<F>, b: &[F]) -> Result<LinearSolution<F>, ImplicitError> {
        let alpha = self.config.alpha;
        let mut term = b.to_vec();
        let mut sum = b.to_vec();
        for _ in 0..self.config.max_terms {
            // term ← (I − αA) term
            let a_term = op.apply(&term)?;
            axpy(-alpha, &a_term, &mut term);
            axpy(F::one(), &term, &mut sum);
        }
        Ok(LinearSolution {
            x: scale(alpha, &sum),
            iterations: self.config.max_terms,
            residual_norm: None,
            termination: SolveTermination::FixedTerms,
        })
    }

    fn direct(&self, op: &dyn LinearOperator<F>, b: &[F]) -> Result<LinearSolution<F>, ImplicitError> {
        let n = op.dim();
        if n > LARGE_DENSE_DIM {
            log::warn!(
                "inverse: materialising a {n}x{n} operator ({} applications); \
                 consider the Neumann series or a CG solver",
                n
            );
        }
        let dense = materialize(op)?;
        let factors = lu_factor(dense.data(), n).ok_or(ImplicitError::SingularSystem)?;
        Ok(LinearSolution {
            x: factors.solve(b),
            iterations: n,
            residual_norm: None,
            termination: SolveTermination::Direct,
        })
    }
}

impl<F: Float> LinearSolver<F> for Inverse<F> {
    fn name(&self) -> &'static str {
        if self.config.use_neumann_series {
            "neumann"
        } else {
            "inverse"
        }
    }

    fn solve(
        &self,
        op: &dyn LinearOperator<F>,
        b: &[F],
    ) -> Result<LinearSolution<F>, ImplicitError> {
        check_rhs(op, b, None)?;
        let ridged;
        let op: &dyn LinearOperator<F> = match self.config.ridge {
            Some(ridge) => {
                ridged = RidgeOperator::new(op, ridge);
                &ridged
            }
            None => op,
        };
        let solution = if self.config.use_neumann_series {
            self.neumann(op, b)?
        } else {
            self.direct(op, b)?
        };
        log_solution(self.name(), &solution);
        Ok(solution)
    }

    fn validate(&self) -> Result<(), ImplicitError> {
        self.config.validate()
    }
}
