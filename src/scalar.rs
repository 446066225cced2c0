//! The [`Scalar`] trait for writing AD-generic numeric code.
//!
//! Residuals, objectives and fixed-point maps are written once as
//! `fn f<T: Scalar>(x: &[T]) -> T` and evaluated at plain `f64`, at
//! [`Reverse<f64>`] on a tape, at [`Dual<f64>`] for forward tangents, or at the
//! nested `Dual<Reverse<f64>>` used for Hessian-vector products.

use std::fmt::{Debug, Display};
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::NumCast;

use crate::dual::Dual;
use crate::float::Float;
use crate::reverse::Reverse;
use crate::tape::TapeThreadLocal;

/// The central trait for AD-generic numeric code.
///
/// The arithmetic operators come from `std::ops`; the elementary functions
/// are the ones every implementor can differentiate.
pub trait Scalar:
    Copy
    + Debug
    + Display
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    /// The underlying primitive float type.
    type Float: Float;

    /// Lift a plain float to this scalar (constant — zero derivative).
    fn from_f(val: Self::Float) -> Self;

    /// Extract the primal value.
    fn value(&self) -> Self::Float;

    /// Lift an `f64` literal. Literals the float type cannot represent become NaN.
    #[inline]
    fn from_const(val: f64) -> Self {
        Self::from_f(
            <Self::Float as NumCast>::from(val)
                .unwrap_or_else(<Self::Float as num_traits::Float>::nan),
        )
    }

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tanh(self) -> Self;
    fn abs(self) -> Self;
}

macro_rules! impl_scalar_primitive {
    ($f:ty) => {
        impl Scalar for $f {
            type Float = $f;

            #[inline]
            fn from_f(val: $f) -> Self {
                val
            }

            #[inline]
            fn value(&self) -> $f {
                *self
            }

            #[inline]
            fn exp(self) -> Self {
                <$f>::exp(self)
            }

            #[inline]
            fn ln(self) -> Self {
                <$f>::ln(self)
            }

            #[inline]
            fn sqrt(self) -> Self {
                <$f>::sqrt(self)
            }

            #[inline]
            fn powi(self, n: i32) -> Self {
                <$f>::powi(self, n)
            }

            #[inline]
            fn sin(self) -> Self {
                <$f>::sin(self)
            }

            #[inline]
            fn cos(self) -> Self {
                <$f>::cos(self)
            }

            #[inline]
            fn tanh(self) -> Self {
                <$f>::tanh(self)
            }

            #[inline]
            fn abs(self) -> Self {
                <$f>::abs(self)
            }
        }
    };
}

impl_scalar_primitive!(f32);
impl_scalar_primitive!(f64);

impl<F: Float + TapeThreadLocal> Scalar for Reverse<F> {
    type Float = F;

    #[inline]
    fn from_f(val: F) -> Self {
        Reverse::constant(val)
    }

    #[inline]
    fn value(&self) -> F {
        self.value
    }

    #[inline]
    fn exp(self) -> Self {
        Reverse::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        Reverse::ln(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Reverse::sqrt(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Reverse::powi(self, n)
    }

    #[inline]
    fn sin(self) -> Self {
        Reverse::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        Reverse::cos(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        Reverse::tanh(self)
    }

    #[inline]
    fn abs(self) -> Self {
        Reverse::abs(self)
    }
}

impl<T: Scalar> Scalar for Dual<T> {
    type Float = T::Float;

    #[inline]
    fn from_f(val: T::Float) -> Self {
        Dual::constant(T::from_f(val))
    }

    #[inline]
    fn value(&self) -> T::Float {
        self.re.value()
    }

    #[inline]
    fn exp(self) -> Self {
        Dual::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        Dual::ln(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        Dual::sqrt(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }

    #[inline]
    fn sin(self) -> Self {
        Dual::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        Dual::cos(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        Dual::tanh(self)
    }

    #[inline]
    fn abs(self) -> Self {
        Dual::abs(self)
    }
}
