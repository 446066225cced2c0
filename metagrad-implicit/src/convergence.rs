use num_traits::Float;

/// Compute the L2 norm of a vector.
pub fn norm<F: Float>(v: &[F]) -> F {
    dot(v, v).sqrt()
}

/// Compute the dot product of two vectors.
pub fn dot<F: Float>(a: &[F], b: &[F]) -> F {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .fold(F::zero(), |acc, (&ai, &bi)| acc + ai * bi)
}

/// `y += alpha * x`.
pub fn axpy<F: Float>(alpha: F, x: &[F], y: &mut [F]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi = *yi + alpha * xi;
    }
}

/// `alpha * x` as a new vector.
pub fn scale<F: Float>(alpha: F, x: &[F]) -> Vec<F> {
    x.iter().map(|&xi| alpha * xi).collect()
}
