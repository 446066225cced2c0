use metagrad::Float;

use super::{check_rhs, log_solution, CgConfig, LinearSolver};
use crate::convergence::{axpy, dot, norm};
use crate::error::ImplicitError;
use crate::operator::{LinearOperator, RidgeOperator};
use crate::result::{LinearSolution, SolveTermination};

/// Conjugate gradient on `A x = b` (or `(A + ρI) x = b`).
///
/// Requires a symmetric positive-definite operator, as produced by an
/// optimality condition derived from a convex objective.
#[derive(Debug, Clone)]
pub struct Cg<F> {
    config: CgConfig<F>,
    init: Option<Vec<F>>,
}

impl<F: Float> Cg<F> {
    pub fn new(config: CgConfig<F>) -> Self {
        Cg { config, init: None }
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

impl<F: Float> LinearSolver<F> for Cg<F> {
    fn name(&self) -> &'static str {
        "cg"
    }

    fn solve(
        &self,
        op: &dyn LinearOperator<F>,
        b: &[F],
    ) -> Result<LinearSolution<F>, ImplicitError> {
        check_rhs(op, b, self.init.as_deref())?;
        let solution = match self.config.ridge {
            Some(ridge) => conjugate_gradient(
                &RidgeOperator::new(op, ridge),
                b,
                self.init.as_deref(),
                &self.config,
            )?,
            None => conjugate_gradient(op, b, self.init.as_deref(), &self.config)?,
        };
        log_solution(self.name(), &solution);
        Ok(solution)
    }

    fn validate(&self) -> Result<(), ImplicitError> {
        self.config.validate()
    }
}

/// Conjugate gradient iteration on a symmetric operator.
///
/// Stops when `‖r‖ ≤ max(rtol·‖b‖, atol)`, after `max_iterations`
/// iterations, or when the search direction (or its curvature `pᵀAp`)
/// underflows to zero. The last two return the current iterate.
pub(crate) fn conjugate_gradient<F: Float>(
    op: &dyn LinearOperator<F>,
    b: &[F],
    x0: Option<&[F]>,
    config: &CgConfig<F>,
) -> Result<LinearSolution<F>, ImplicitError> {
    let n = b.len();
    let (mut x, mut r) = match x0 {
        Some(x0) => {
            let ax = op.apply(x0)?;
            let r: Vec<F> = b.iter().zip(&ax).map(|(&bi, &ai)| bi - ai).collect();
            (x0.to_vec(), r)
        }
        None => (vec![F::zero(); n], b.to_vec()),
    };

    let threshold = config
        .absolute_tolerance
        .max(config.relative_tolerance * norm(b));
    let mut rs = dot(&r, &r);

    let finish = |x: Vec<F>, iterations: usize, rs: F, termination| LinearSolution {
        x,
        iterations,
        residual_norm: Some(rs.sqrt()),
        termination,
    };

    if rs.sqrt() <= threshold {
        return Ok(finish(x, 0, rs, SolveTermination::Converged));
    }

    let tiny = F::min_positive_value();
    let mut p = r.clone();
    for iter in 0..config.max_iterations {
        if dot(&p, &p) <= tiny {
            log::warn!("cg: search direction vanished at iteration {iter}; returning current iterate");
            return Ok(finish(x, iter, rs, SolveTermination::Breakdown));
        }
        let ap = op.apply(&p)?;
        let curvature = dot(&p, &ap);
        if curvature.abs() <= tiny {
            log::warn!(
                "cg: zero curvature along search direction at iteration {iter}; \
                 returning current iterate"
            );
            return Ok(finish(x, iter, rs, SolveTermination::Breakdown));
        }

        let alpha = rs / curvature;
        axpy(alpha, &p, &mut x);
        axpy(-alpha, &ap, &mut r);
        let rs_new = dot(&r, &r);

        if rs_new.sqrt() <= threshold {
            return Ok(finish(x, iter + 1, rs_new, SolveTermination::Converged));
        }

        let beta = rs_new / rs;
        for (pi, &ri) in p.iter_mut().zip(&r) {
            *pi = ri + beta * *pi;
        }
        rs = rs_new;
    }

    log::debug!(
        "cg: iteration cap {} reached with residual {}",
        config.max_iterations,
        rs.sqrt()
    );
    Ok(finish(
        x,
        config.max_iterations,
        rs,
        SolveTermination::MaxIterations,
    ))
}
