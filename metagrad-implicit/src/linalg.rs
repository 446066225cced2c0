//! Dense LU factorisation with partial pivoting, used by the explicit-inverse
//! solver on small systems.

use num_traits::Float;

/// LU factors of a square row-major matrix.
///
/// L (unit diagonal, implicit) sits below the diagonal of `lu`, U on and
/// above it. `perm[i]` is the original row of factored row `i`.
#[derive(Debug, Clone)]
pub struct LuFactors<F> {
    lu: Vec<F>,
    perm: Vec<usize>,
    n: usize,
}

impl<F: Float> LuFactors<F> {
    /// Solve `A x = b` with the stored factors.
    pub fn solve(&self, b: &[F]) -> Vec<F> {
        let n = self.n;
        debug_assert_eq!(b.len(), n);
        let at = |i: usize, j: usize| self.lu[i * n + j];

        let mut y: Vec<F> = self.perm.iter().map(|&p| b[p]).collect();
        for i in 1..n {
            let mut s = y[i];
            for (j, &yj) in y.iter().enumerate().take(i) {
                s = s - at(i, j) * yj;
            }
            y[i] = s;
        }

        let mut x = vec![F::zero(); n];
        for i in (0..n).rev() {
            let mut s = y[i];
            for (j, &xj) in x.iter().enumerate().skip(i + 1) {
                s = s - at(i, j) * xj;
            }
            x[i] = s / at(i, i);
        }
        x
    }
}

/// Factorise the `n x n` row-major matrix `a`.
///
/// Returns `None` when a pivot falls below `1e-12` times the largest entry of
/// `a` (or is exactly zero for a zero matrix).
pub fn lu_factor<F: Float>(a: &[F], n: usize) -> Option<LuFactors<F>> {
    debug_assert_eq!(a.len(), n * n);
    let mut lu = a.to_vec();
    let mut perm: Vec<usize> = (0..n).collect();

    let scale = a.iter().fold(F::zero(), |m, &v| m.max(v.abs()));
    let eps = F::from(1e-12).unwrap_or_else(F::epsilon) * scale;

    for col in 0..n {
        let (pivot_row, pivot_abs) = (col..n)
            .map(|r| (r, lu[r * n + col].abs()))
            .fold((col, F::zero()), |best, cur| if cur.1 > best.1 { cur } else { best });

        if pivot_abs <= eps {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                lu.swap(col * n + j, pivot_row * n + j);
            }
            perm.swap(col, pivot_row);
        }

        let pivot = lu[col * n + col];
        for row in (col + 1)..n {
            let factor = lu[row * n + col] / pivot;
            lu[row * n + col] = factor;
            for j in (col + 1)..n {
                lu[row * n + j] = lu[row * n + j] - factor * lu[col * n + j];
            }
        }
    }

    Some(LuFactors { lu, perm, n })
}

/// Solve `A x = b` for the `n x n` row-major matrix `a`.
pub fn lu_solve<F: Float>(a: &[F], b: &[F]) -> Option<Vec<F>> {
    let n = b.len();
    lu_factor(a, n).map(|f| f.solve(b))
}
