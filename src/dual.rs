use std::fmt::{self, Display};

use crate::scalar::Scalar;

/// Forward-mode dual number: a value paired with its tangent (derivative).
///
/// `Dual { re, eps }` represents `re + eps·ε` where `ε² = 0`. The components
/// may themselves be AD scalars: `Dual<Reverse<F>>` records the tangent
/// computation on the active tape, so reversing from `eps` yields a
/// Hessian-vector product.
#[derive(Clone, Copy, Debug)]
pub struct Dual<T> {
    /// Primal (real) value.
    pub re: T,
    /// Tangent (derivative) value.
    pub eps: T,
}

impl<T: Display> Display for Dual<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

impl<T: Scalar> Dual<T> {
    /// Create a new dual number.
    #[inline]
    pub fn new(re: T, eps: T) -> Self {
        Dual { re, eps }
    }

    /// Create a constant (zero derivative).
    #[inline]
    pub fn constant(re: T) -> Self {
        Dual {
            re,
            eps: T::from_const(0.0),
        }
    }

    /// Create a variable (unit derivative) for differentiation.
    #[inline]
    pub fn variable(re: T) -> Self {
        Dual {
            re,
            eps: T::from_const(1.0),
        }
    }

    /// Apply the chain rule: given `f(self.re)` and `f'(self.re)`, produce the dual result.
    #[inline]
    fn chain(self, f_val: T, f_deriv: T) -> Self {
        Dual {
            re: f_val,
            eps: self.eps * f_deriv,
        }
    }

    #[inline]
    pub fn exp(self) -> Self {
        let e = self.re.exp();
        self.chain(e, e)
    }

    #[inline]
    pub fn ln(self) -> Self {
        self.chain(self.re.ln(), T::from_const(1.0) / self.re)
    }

    #[inline]
    pub fn sqrt(self) -> Self {
        let s = self.re.sqrt();
        self.chain(s, T::from_const(1.0) / (s + s))
    }

    #[inline]
    pub fn powi(self, n: i32) -> Self {
        let deriv = T::from_const(f64::from(n)) * self.re.powi(n - 1);
        self.chain(self.re.powi(n), deriv)
    }

    #[inline]
    pub fn sin(self) -> Self {
        self.chain(self.re.sin(), self.re.cos())
    }

    #[inline]
    pub fn cos(self) -> Self {
        self.chain(self.re.cos(), -self.re.sin())
    }

    #[inline]
    pub fn tanh(self) -> Self {
        let t = self.re.tanh();
        self.chain(t, T::from_const(1.0) - t * t)
    }

    #[inline]
    pub fn abs(self) -> Self {
        if self.re < T::from_const(0.0) {
            -self
        } else {
            self
        }
    }
}
