use std::fmt::{self, Display};

use crate::tape::{self, TapeThreadLocal, CONSTANT};
use crate::Float;

/// Reverse-mode AD variable.
///
/// Just a value and a tape index — 12 bytes for `f64`. `Copy` because the
/// tape lives in a thread-local, not inside this struct.
#[derive(Clone, Copy, Debug)]
pub struct Reverse<F: Float> {
    pub(crate) value: F,
    pub(crate) index: u32,
}

impl<F: Float> Reverse<F> {
    /// Create a constant (not tracked on tape).
    #[inline]
    pub fn constant(value: F) -> Self {
        Reverse {
            value,
            index: CONSTANT,
        }
    }

    /// Create a reverse variable from a tape allocation.
    /// Typically only used internally by the API layer and tests.
    #[inline]
    pub fn from_tape(value: F, index: u32) -> Self {
        Reverse { value, index }
    }

    /// Get the tape index (for advanced usage / testing).
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Primal value.
    #[inline]
    pub fn value(&self) -> F {
        self.value
    }

    /// Whether this variable is recorded on a tape.
    #[inline]
    pub fn is_tracked(&self) -> bool {
        self.index != CONSTANT
    }
}

impl<F: Float + TapeThreadLocal> Reverse<F> {
    /// Record `value = f(self)` with `deriv = f'(self)`. Constants stay off the tape.
    #[inline]
    fn unary(self, value: F, deriv: F) -> Self {
        if self.index == CONSTANT {
            return Reverse::constant(value);
        }
        let index = tape::with_active_tape(|t| t.push_unary(self.index, deriv));
        Reverse { value, index }
    }

    #[inline]
    pub fn exp(self) -> Self {
        let e = self.value.exp();
        self.unary(e, e)
    }

    #[inline]
    pub fn ln(self) -> Self {
        self.unary(self.value.ln(), F::one() / self.value)
    }

    #[inline]
    pub fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        self.unary(s, F::one() / (s + s))
    }

    #[inline]
    pub fn powi(self, n: i32) -> Self {
        let deriv = match F::from_i32(n) {
            Some(nf) => nf * self.value.powi(n - 1),
            None => F::nan(),
        };
        self.unary(self.value.powi(n), deriv)
    }

    #[inline]
    pub fn sin(self) -> Self {
        self.unary(self.value.sin(), self.value.cos())
    }

    #[inline]
    pub fn cos(self) -> Self {
        self.unary(self.value.cos(), -self.value.sin())
    }

    #[inline]
    pub fn tanh(self) -> Self {
        let t = self.value.tanh();
        self.unary(t, F::one() - t * t)
    }

    /// `|x|`, with derivative 0 at the kink.
    #[inline]
    pub fn abs(self) -> Self {
        let sign = if self.value > F::zero() {
            F::one()
        } else if self.value < F::zero() {
            -F::one()
        } else {
            F::zero()
        };
        self.unary(self.value.abs(), sign)
    }
}

impl<F: Float> Display for Reverse<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<F: Float> Default for Reverse<F> {
    fn default() -> Self {
        Reverse::constant(F::zero())
    }
}
