//! Matrix-free linear operators.
//!
//! The operator that backward solves with is [`ImplicitOperator`]: the adjoint
//! `(∂R/∂φ)ᵀ` of the optimality Jacobian at the captured root. Applying it
//! costs one reverse pass through the condition; applying its transpose costs
//! one forward pass. The Jacobian is never formed.

use metagrad::{Float, Real};

use crate::condition::{Condition, RootPoint};
use crate::convergence::axpy;
use crate::error::ImplicitError;

/// A square linear map `v ↦ A v` together with `v ↦ Aᵀ v`.
pub trait LinearOperator<F: Float> {
    /// Dimension of the (square) operator.
    fn dim(&self) -> usize;

    fn apply(&self, v: &[F]) -> Result<Vec<F>, ImplicitError>;

    fn apply_transpose(&self, v: &[F]) -> Result<Vec<F>, ImplicitError>;
}

fn check_dim(dim: usize, got: usize) -> Result<(), ImplicitError> {
    if dim == got {
        Ok(())
    } else {
        Err(ImplicitError::OperatorShape { expected: dim, got })
    }
}

/// `A = (∂R/∂φ)ᵀ` evaluated at a captured root.
///
/// For a fixed-point residual `R = φ − T` this is `v ↦ v − (∂T/∂φ)ᵀ v`.
pub struct ImplicitOperator<'a, F: Real> {
    condition: &'a dyn Condition<F>,
    point: &'a RootPoint<F>,
}

impl<'a, F: Real> ImplicitOperator<'a, F> {
    pub fn new(condition: &'a dyn Condition<F>, point: &'a RootPoint<F>) -> Self {
        ImplicitOperator { condition, point }
    }
}

impl<F: Real> LinearOperator<F> for ImplicitOperator<'_, F> {
    fn dim(&self) -> usize {
        self.point.inner_len()
    }

    fn apply(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        check_dim(self.dim(), v.len())?;
        self.condition.vjp_inner(self.point, v)
    }

    fn apply_transpose(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        check_dim(self.dim(), v.len())?;
        self.condition.jvp_inner(self.point, v)
    }
}

/// `A + ρI`.
pub struct RidgeOperator<'a, F: Float> {
    inner: &'a dyn LinearOperator<F>,
    ridge: F,
}

impl<'a, F: Float> RidgeOperator<'a, F> {
    pub fn new(inner: &'a dyn LinearOperator<F>, ridge: F) -> Self {
        RidgeOperator { inner, ridge }
    }
}

impl<F: Float> LinearOperator<F> for RidgeOperator<'_, F> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn apply(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        let mut out = self.inner.apply(v)?;
        axpy(self.ridge, v, &mut out);
        Ok(out)
    }

    fn apply_transpose(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        let mut out = self.inner.apply_transpose(v)?;
        axpy(self.ridge, v, &mut out);
        Ok(out)
    }
}

/// `AᵀA + ρI`, applied as `Aᵀ(A v) + ρ v`. Symmetric.
pub struct NormalOperator<'a, F: Float> {
    inner: &'a dyn LinearOperator<F>,
    ridge: F,
}

impl<'a, F: Float> NormalOperator<'a, F> {
    pub fn new(inner: &'a dyn LinearOperator<F>, ridge: F) -> Self {
        NormalOperator { inner, ridge }
    }
}

impl<F: Float> LinearOperator<F> for NormalOperator<'_, F> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn apply(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        let av = self.inner.apply(v)?;
        let mut out = self.inner.apply_transpose(&av)?;
        if self.ridge != F::zero() {
            axpy(self.ridge, v, &mut out);
        }
        Ok(out)
    }

    fn apply_transpose(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        self.apply(v)
    }
}

/// A dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixOperator<F> {
    n: usize,
    data: Vec<F>,
}

impl<F: Float> MatrixOperator<F> {
    /// Build from rows. Every row must have `rows.len()` entries.
    pub fn from_rows(rows: &[Vec<F>]) -> Result<Self, ImplicitError> {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for row in rows {
            check_dim(n, row.len())?;
            data.extend_from_slice(row);
        }
        Ok(MatrixOperator { n, data })
    }

    /// Row-major entries.
    pub fn data(&self) -> &[F] {
        &self.data
    }
}

impl<F: Float> LinearOperator<F> for MatrixOperator<F> {
    fn dim(&self) -> usize {
        self.n
    }

    fn apply(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        check_dim(self.n, v.len())?;
        Ok(self
            .data
            .chunks(self.n.max(1))
            .take(self.n)
            .map(|row| row.iter().zip(v).fold(F::zero(), |s, (&a, &x)| s + a * x))
            .collect())
    }

    fn apply_transpose(&self, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        check_dim(self.n, v.len())?;
        let mut out = vec![F::zero(); self.n];
        for (row, &vi) in self.data.chunks(self.n.max(1)).zip(v) {
            axpy(vi, row, &mut out);
        }
        Ok(out)
    }
}

/// Form the dense matrix of `op` column by column (`dim` applications).
pub fn materialize<F: Float>(op: &dyn LinearOperator<F>) -> Result<MatrixOperator<F>, ImplicitError> {
    let n = op.dim();
    let mut data = vec![F::zero(); n * n];
    let mut e = vec![F::zero(); n];
    for j in 0..n {
        e[j] = F::one();
        let col = op.apply(&e)?;
        check_dim(n, col.len())?;
        for (i, c) in col.into_iter().enumerate() {
            data[i * n + j] = c;
        }
        e[j] = F::zero();
    }
    Ok(MatrixOperator { n, data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MatrixOperator<f64> {
        MatrixOperator::<f64>::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap()
    }

    #[test]
    fn matrix_apply_and_transpose() {
        let a = sample();
        assert_eq!(a.apply(&[1.0, 1.0]).unwrap(), vec![3.0, 7.0]);
        assert_eq!(a.apply_transpose(&[1.0, 1.0]).unwrap(), vec![4.0, 6.0]);
    }

    #[test]
    fn ridge_and_normal() {
        let a = sample();
        let ridge = RidgeOperator::new(&a, 0.5);
        assert_eq!(ridge.apply(&[1.0, 0.0]).unwrap(), vec![1.5, 3.0]);
        // AᵀA = [[10, 14], [14, 20]]
        let normal = NormalOperator::new(&a, 1.0);
        assert_eq!(normal.apply(&[1.0, 0.0]).unwrap(), vec![11.0, 14.0]);
    }

    #[test]
    fn materialize_recovers_matrix() {
        let a = sample();
        assert_eq!(materialize(&a).unwrap(), a);
    }

    #[test]
    fn shape_checked() {
        let a = sample();
        assert!(matches!(
            a.apply(&[1.0]),
            Err(ImplicitError::OperatorShape { expected: 2, got: 1 })
        ));
        assert!(MatrixOperator::<f64>::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }
}
