use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

use crate::scalar::Scalar;
use crate::tape::TapeThreadLocal;

/// Marker trait for base floating-point types (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed throughout metagrad.
/// Only primitive float types implement this — AD wrapper types do not.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
}

impl Float for f32 {}
impl Float for f64 {}

/// A primitive float that can drive every engine in the crate: it owns a
/// thread-local tape and is a [`Scalar`] of itself.
///
/// Generic code bounded on `Real` sees the elementary functions twice (from
/// `num_traits::Float` and from [`Scalar`]); call them through a path, e.g.
/// `num_traits::Float::sqrt(x)`, to pick one.
pub trait Real: Float + TapeThreadLocal + Scalar<Float = Self> {}

impl Real for f32 {}
impl Real for f64 {}
