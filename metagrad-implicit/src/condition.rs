//! Optimality conditions evaluated at a captured root.
//!
//! [`Condition`] is the object-safe view of a stationarity condition
//! `R(φ, θ, …)` that the linear operator and the backward rule consume. Three
//! adapters turn the generic user traits of [`crate::objective`] into one:
//!
//! | adapter | condition | Jacobian products |
//! |---|---|---|
//! | [`ExplicitCondition`] | user `R` | reverse pass (VJP), forward pass (JVP) |
//! | [`DerivedCondition`] | `∇_φ f` | forward-over-reverse through `f` |
//! | [`FixedPointCondition`] | `φ − T(φ, θ)` | as explicit |
//!
//! The derived condition is recomputed from the objective at every call;
//! nothing is cached between backward invocations.

use std::marker::PhantomData;

use metagrad::{grad_groups, hvp_groups, jvp_group, vjp_groups, Real, Reverse, Scalar};

use crate::error::ImplicitError;
use crate::objective::{FixedPointMap, Objective, Optimality};

/// Argument values captured at the inner solution. `args[inner]` holds φ*.
#[derive(Debug, Clone)]
pub struct RootPoint<F> {
    pub args: Vec<Vec<F>>,
    pub inner: usize,
}

impl<F> RootPoint<F> {
    pub fn new(args: Vec<Vec<F>>, inner: usize) -> Self {
        RootPoint { args, inner }
    }

    /// Borrowed views of every argument group.
    pub fn views(&self) -> Vec<&[F]> {
        self.args.iter().map(Vec::as_slice).collect()
    }

    /// The inner solution φ*.
    pub fn solution(&self) -> &[F] {
        &self.args[self.inner]
    }

    /// Length of the flattened inner argument.
    pub fn inner_len(&self) -> usize {
        self.args[self.inner].len()
    }
}

/// A stationarity condition `R` with its first-order products at a point.
///
/// `R` maps the argument groups to a vector of the inner argument's length.
pub trait Condition<F: Real> {
    /// `R(point)`.
    fn residual(&self, point: &RootPoint<F>) -> Result<Vec<F>, ImplicitError>;

    /// `(∂R/∂φ)ᵀ w`.
    fn vjp_inner(&self, point: &RootPoint<F>, w: &[F]) -> Result<Vec<F>, ImplicitError>;

    /// `(∂R/∂φ) v`.
    fn jvp_inner(&self, point: &RootPoint<F>, v: &[F]) -> Result<Vec<F>, ImplicitError>;

    /// `(∂R/∂args[g])ᵀ w` for every `g` in `argnums`, from one reverse pass.
    fn vjp_args(
        &self,
        point: &RootPoint<F>,
        argnums: &[usize],
        w: &[F],
    ) -> Result<Vec<Vec<F>>, ImplicitError>;
}

/// A scalar objective evaluated at a point; used by the module facade.
pub trait ScalarObjective<F: Real> {
    fn value(&self, point: &RootPoint<F>) -> F;
}

fn check_residual<F>(point: &RootPoint<F>, got: usize) -> Result<(), ImplicitError> {
    let expected = point.inner_len();
    if got == expected {
        Ok(())
    } else {
        Err(ImplicitError::ResidualShape { expected, got })
    }
}

/// A user-supplied [`Optimality`].
pub struct ExplicitCondition<F, O> {
    optimality: O,
    _marker: PhantomData<F>,
}

impl<F: Real, O: Optimality<F>> ExplicitCondition<F, O> {
    pub fn new(optimality: O) -> Self {
        ExplicitCondition {
            optimality,
            _marker: PhantomData,
        }
    }
}

impl<F: Real, O: Optimality<F>> Condition<F> for ExplicitCondition<F, O> {
    fn residual(&self, point: &RootPoint<F>) -> Result<Vec<F>, ImplicitError> {
        let r = self.optimality.residual::<F>(&point.views());
        check_residual(point, r.len())?;
        Ok(r)
    }

    fn vjp_inner(&self, point: &RootPoint<F>, w: &[F]) -> Result<Vec<F>, ImplicitError> {
        let mut g = self.vjp_args(point, &[point.inner], w)?;
        Ok(g.swap_remove(0))
    }

    fn jvp_inner(&self, point: &RootPoint<F>, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        let (values, tangents) = jvp_group(
            |a| self.optimality.residual(a),
            &point.views(),
            point.inner,
            v,
        )?;
        check_residual(point, values.len())?;
        Ok(tangents)
    }

    fn vjp_args(
        &self,
        point: &RootPoint<F>,
        argnums: &[usize],
        w: &[F],
    ) -> Result<Vec<Vec<F>>, ImplicitError> {
        let mut len = 0;
        let (_, grads) = vjp_groups(
            |a: &[&[Reverse<F>]]| {
                let r = self.optimality.residual(a);
                len = r.len();
                r
            },
            &point.views(),
            argnums,
            w,
        )
        .map_err(|e| match e {
            metagrad::AdError::ShapeMismatch { .. } => ImplicitError::ResidualShape {
                expected: point.inner_len(),
                got: len,
            },
            other => other.into(),
        })?;
        Ok(grads)
    }
}

/// The gradient of a user [`Objective`] with respect to the inner argument.
///
/// `∂R/∂φ` is the Hessian of the objective in φ, so `vjp_inner` and
/// `jvp_inner` coincide.
pub struct DerivedCondition<F, O> {
    objective: O,
    _marker: PhantomData<F>,
}

impl<F: Real, O: Objective<F>> DerivedCondition<F, O> {
    pub fn new(objective: O) -> Self {
        DerivedCondition {
            objective,
            _marker: PhantomData,
        }
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }
}

impl<F: Real, O: Objective<F>> Condition<F> for DerivedCondition<F, O> {
    fn residual(&self, point: &RootPoint<F>) -> Result<Vec<F>, ImplicitError> {
        let mut g = grad_groups(
            |a| self.objective.value(a),
            &point.views(),
            &[point.inner],
        )?;
        Ok(g.swap_remove(0))
    }

    fn vjp_inner(&self, point: &RootPoint<F>, w: &[F]) -> Result<Vec<F>, ImplicitError> {
        let mut g = self.vjp_args(point, &[point.inner], w)?;
        Ok(g.swap_remove(0))
    }

    fn jvp_inner(&self, point: &RootPoint<F>, v: &[F]) -> Result<Vec<F>, ImplicitError> {
        self.vjp_inner(point, v)
    }

    fn vjp_args(
        &self,
        point: &RootPoint<F>,
        argnums: &[usize],
        w: &[F],
    ) -> Result<Vec<Vec<F>>, ImplicitError> {
        check_residual(point, w.len())?;
        let (_, _, products) = hvp_groups(
            |a| self.objective.value(a),
            &point.views(),
            point.inner,
            w,
            argnums,
        )?;
        Ok(products)
    }
}

impl<F: Real, O: Objective<F>> ScalarObjective<F> for DerivedCondition<F, O> {
    fn value(&self, point: &RootPoint<F>) -> F {
        self.objective.value::<F>(&point.views())
    }
}

/// Residual `φ − T(args)` of a [`FixedPointMap`]. The linear operator then
/// reads `v ↦ v − (∂T/∂φ)ᵀ v`.
pub struct FixedPointResidual<M> {
    map: M,
    inner: usize,
}

impl<M> FixedPointResidual<M> {
    pub fn new(map: M, inner: usize) -> Self {
        FixedPointResidual { map, inner }
    }
}

impl<F: Real, M: FixedPointMap<F>> Optimality<F> for FixedPointResidual<M> {
    fn residual<T: Scalar<Float = F>>(&self, args: &[&[T]]) -> Vec<T> {
        let image = self.map.map(args);
        args[self.inner]
            .iter()
            .zip(image)
            .map(|(&phi, t)| phi - t)
            .collect()
    }
}

/// A fixed-point condition.
pub type FixedPointCondition<F, M> = ExplicitCondition<F, FixedPointResidual<M>>;
