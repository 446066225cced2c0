//! User-facing problem definitions.
//!
//! Each trait has a single method generic over the number type, so one
//! definition is evaluated at plain floats, on the reverse tape, in forward
//! mode and in forward-over-reverse mode. Arguments arrive as positional
//! groups in the order given to the binding: the inner solution φ at the
//! inner argument index, meta-parameters and auxiliary data elsewhere.
//!
//! ```
//! use metagrad::Scalar;
//! use metagrad_implicit::Optimality;
//!
//! /// φ* = θ / 2, i.e. R(φ, θ) = φ − θ/2.
//! struct Halve;
//!
//! impl Optimality<f64> for Halve {
//!     fn residual<T: Scalar<Float = f64>>(&self, args: &[&[T]]) -> Vec<T> {
//!         let half = T::from_const(0.5);
//!         args[0].iter().zip(args[1]).map(|(&p, &t)| p - half * t).collect()
//!     }
//! }
//! ```

use metagrad::{Real, Scalar};

/// An explicit stationarity condition `R(args)`. Its output must have the
/// length of the inner argument and vanish at the inner solution.
pub trait Optimality<F: Real> {
    fn residual<T: Scalar<Float = F>>(&self, args: &[&[T]]) -> Vec<T>;
}

/// A scalar objective minimised over the inner argument. The optimality
/// condition is its gradient with respect to φ.
pub trait Objective<F: Real> {
    fn value<T: Scalar<Float = F>>(&self, args: &[&[T]]) -> T;
}

/// A fixed-point map `T(args)` with `φ* = T(φ*, …)`. Its output must have the
/// length of the inner argument.
pub trait FixedPointMap<F: Real> {
    fn map<T: Scalar<Float = F>>(&self, args: &[&[T]]) -> Vec<T>;
}
