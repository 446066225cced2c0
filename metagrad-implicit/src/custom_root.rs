//! Differentiation through the output of an opaque inner solver.
//!
//! A [`CustomRoot`] binds an optimality condition `R(φ, θ, …) = 0`, the
//! positions of the inner argument φ and of the meta-parameters θ, and a
//! linear solver. [`CustomRoot::apply`] runs a user forward solver, captures
//! the point it returns, and hands φ* back as tape variables whose reverse
//! rule is the implicit function theorem:
//!
//! 1. solve `(∂R/∂φ)ᵀ u = −g` for the incoming adjoint `g`,
//! 2. return `(∂R/∂θ)ᵀ u` for every meta-parameter group, from one reverse
//!    pass through `R`.
//!
//! The solve runs once per backward call no matter how many meta-parameter
//! groups there are. Arguments that are tracked on the tape but not declared
//! as meta-parameters get no gradient from the node.
//!
//! ```
//! use metagrad::Scalar;
//! use metagrad_implicit::{linear_solve::solve_normal_cg, Arg, CustomRoot, ImplicitError, Optimality};
//!
//! // φ* = θ / 2
//! struct Halve;
//! impl Optimality<f64> for Halve {
//!     fn residual<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> Vec<T> {
//!         vec![a[0][0] - T::from_const(0.5) * a[1][0]]
//!     }
//! }
//!
//! let root = CustomRoot::builder(2)
//!     .optimality(Halve)
//!     .argnums(&[1])
//!     .solver(solve_normal_cg(20, 1e-12))
//!     .build()
//!     .unwrap();
//!
//! let g = metagrad::try_grad(
//!     |x| {
//!         let phi = root.apply(&[Arg::Const(&[0.0]), Arg::Tracked(x)], |a| {
//!             Ok::<_, ImplicitError>(vec![0.5 * a[1][0]])
//!         })?;
//!         Ok::<_, ImplicitError>(phi[0] * phi[0])
//!     },
//!     &[3.0],
//! )
//! .unwrap();
//! // d/dθ (θ/2)² = θ/2
//! assert!((g[0] - 1.5).abs() < 1e-9);
//! ```

use std::fmt;
use std::rc::Rc;

use metagrad::tape::{self, CustomBackward};
use metagrad::{BackwardError, Real, Reverse};

use crate::condition::{
    Condition, DerivedCondition, ExplicitCondition, FixedPointResidual, RootPoint,
};
use crate::error::ImplicitError;
use crate::linear_solve::{LinearSolver, SolverConfig};
use crate::objective::{FixedPointMap, Objective, Optimality};
use crate::operator::ImplicitOperator;

/// A positional argument of a bound forward call.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a, F: metagrad::Float> {
    /// Values recorded on the active tape.
    Tracked(&'a [Reverse<F>]),
    /// Plain values; never receive gradients.
    Const(&'a [F]),
}

impl<F: metagrad::Float> Arg<'_, F> {
    pub fn len(&self) -> usize {
        match self {
            Arg::Tracked(v) => v.len(),
            Arg::Const(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn values(&self) -> Vec<F> {
        match self {
            Arg::Tracked(v) => v.iter().map(Reverse::value).collect(),
            Arg::Const(v) => v.to_vec(),
        }
    }

    fn tape_indices(&self) -> Option<Vec<u32>> {
        match self {
            Arg::Tracked(v) if v.iter().any(Reverse::is_tracked) => {
                Some(v.iter().map(Reverse::index).collect())
            }
            _ => None,
        }
    }
}

type DeferredCondition<F> = Box<dyn FnOnce(usize) -> Rc<dyn Condition<F>>>;

/// Builder for [`CustomRoot`]. Created by [`CustomRoot::builder`].
pub struct CustomRootBuilder<F: Real> {
    num_args: usize,
    sources: Vec<DeferredCondition<F>>,
    argnums: Vec<usize>,
    inner: usize,
    has_aux: bool,
    solver: Option<Rc<dyn LinearSolver<F>>>,
}

impl<F: Real> CustomRootBuilder<F> {
    /// Use an explicit stationarity condition.
    pub fn optimality<O: Optimality<F> + 'static>(mut self, optimality: O) -> Self {
        self.sources
            .push(Box::new(move |_| -> Rc<dyn Condition<F>> {
                Rc::new(ExplicitCondition::new(optimality))
            }));
        self
    }

    /// Derive the condition as the gradient of `objective` in φ.
    pub fn objective<O: Objective<F> + 'static>(mut self, objective: O) -> Self {
        self.sources
            .push(Box::new(move |_| -> Rc<dyn Condition<F>> {
                Rc::new(DerivedCondition::new(objective))
            }));
        self
    }

    /// Use the fixed-point condition `φ = T(φ, …)`.
    pub fn fixed_point<M: FixedPointMap<F> + 'static>(mut self, map: M) -> Self {
        self.sources
            .push(Box::new(move |inner| -> Rc<dyn Condition<F>> {
                Rc::new(ExplicitCondition::new(FixedPointResidual::new(map, inner)))
            }));
        self
    }

    /// Use an already type-erased condition.
    pub fn condition(mut self, condition: Rc<dyn Condition<F>>) -> Self {
        self.sources
            .push(Box::new(move |_| -> Rc<dyn Condition<F>> { condition }));
        self
    }

    /// Positions of the meta-parameter arguments.
    pub fn argnums(mut self, argnums: &[usize]) -> Self {
        self.argnums = argnums.to_vec();
        self
    }

    /// Position of the inner argument φ (default: 0).
    pub fn inner_argnum(mut self, inner: usize) -> Self {
        self.inner = inner;
        self
    }

    /// Whether the forward solver returns an auxiliary value alongside φ*.
    pub fn has_aux(mut self, has_aux: bool) -> Self {
        self.has_aux = has_aux;
        self
    }

    pub fn solver<S: LinearSolver<F> + 'static>(self, solver: S) -> Self {
        self.solver_rc(Rc::new(solver))
    }

    /// Share a solver between bindings.
    pub fn solver_rc(mut self, solver: Rc<dyn LinearSolver<F>>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn solver_config(self, config: SolverConfig<F>) -> Self {
        self.solver_rc(Rc::from(config.into_solver()))
    }

    /// Validate and build. Without a solver, conjugate gradient on the normal
    /// equations with default settings is used.
    pub fn build(self) -> Result<CustomRoot<F>, ImplicitError> {
        let num_args = self.num_args;
        if self.sources.len() != 1 {
            return Err(ImplicitError::ConditionSource {
                supplied: self.sources.len(),
            });
        }
        if self.argnums.is_empty() {
            return Err(ImplicitError::NoMetaArguments);
        }
        for (i, &index) in self.argnums.iter().chain([&self.inner]).enumerate() {
            if index >= num_args {
                return Err(ImplicitError::ArgnumOutOfRange { index, num_args });
            }
            if i < self.argnums.len() && self.argnums[..i].contains(&index) {
                return Err(ImplicitError::DuplicateArgnum(index));
            }
        }
        if self.argnums.contains(&self.inner) {
            return Err(ImplicitError::InnerIsMeta(self.inner));
        }

        let solver = match self.solver {
            Some(solver) => solver,
            None => Rc::from(SolverConfig::default().into_solver()),
        };
        solver.validate()?;

        let condition = match self.sources.into_iter().next() {
            Some(make) => make(self.inner),
            None => return Err(ImplicitError::ConditionSource { supplied: 0 }),
        };

        Ok(CustomRoot {
            condition,
            solver,
            num_args,
            inner: self.inner,
            argnums: self.argnums,
            has_aux: self.has_aux,
        })
    }
}

/// An immutable implicit-differentiation binding.
///
/// Built once and applied any number of times; every call records its own
/// custom node owning the point captured by that call.
pub struct CustomRoot<F: Real> {
    condition: Rc<dyn Condition<F>>,
    solver: Rc<dyn LinearSolver<F>>,
    num_args: usize,
    inner: usize,
    argnums: Vec<usize>,
    has_aux: bool,
}

impl<F: Real> fmt::Debug for CustomRoot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRoot")
            .field("solver", &self.solver.name())
            .field("num_args", &self.num_args)
            .field("inner", &self.inner)
            .field("argnums", &self.argnums)
            .field("has_aux", &self.has_aux)
            .finish_non_exhaustive()
    }
}

impl<F: Real> CustomRoot<F> {
    /// Start a binding over a forward function of `num_args` arguments.
    pub fn builder(num_args: usize) -> CustomRootBuilder<F> {
        CustomRootBuilder {
            num_args,
            sources: Vec::new(),
            argnums: Vec::new(),
            inner: 0,
            has_aux: false,
            solver: None,
        }
    }

    pub fn num_args(&self) -> usize {
        self.num_args
    }

    pub fn inner_argnum(&self) -> usize {
        self.inner
    }

    pub fn argnums(&self) -> &[usize] {
        &self.argnums
    }

    pub fn has_aux(&self) -> bool {
        self.has_aux
    }

    pub fn condition(&self) -> &Rc<dyn Condition<F>> {
        &self.condition
    }

    /// Run `forward` on the argument values and return its solution φ* as
    /// tape variables differentiable with respect to the meta-parameters.
    ///
    /// `forward` sees every argument by value, with the initial guess at the
    /// inner position. Its errors are returned unchanged.
    pub fn apply<E>(
        &self,
        args: &[Arg<'_, F>],
        forward: impl FnOnce(&[&[F]]) -> Result<Vec<F>, E>,
    ) -> Result<Vec<Reverse<F>>, E>
    where
        E: From<ImplicitError>,
    {
        if self.has_aux {
            return Err(ImplicitError::AuxMismatch.into());
        }
        let values = self.arg_values(args)?;
        let solution = forward(&views(&values))?;
        Ok(self.bind(args, values, solution)?)
    }

    /// [`apply`](Self::apply) for a forward solver that also returns an
    /// auxiliary value. The auxiliary value is passed through untouched.
    pub fn apply_with_aux<A, E>(
        &self,
        args: &[Arg<'_, F>],
        forward: impl FnOnce(&[&[F]]) -> Result<(Vec<F>, A), E>,
    ) -> Result<(Vec<Reverse<F>>, A), E>
    where
        E: From<ImplicitError>,
    {
        if !self.has_aux {
            return Err(ImplicitError::AuxMismatch.into());
        }
        let values = self.arg_values(args)?;
        let (solution, aux) = forward(&views(&values))?;
        Ok((self.bind(args, values, solution)?, aux))
    }

    fn arg_values(&self, args: &[Arg<'_, F>]) -> Result<Vec<Vec<F>>, ImplicitError> {
        if args.len() != self.num_args {
            return Err(ImplicitError::ArityMismatch {
                expected: self.num_args,
                got: args.len(),
            });
        }
        Ok(args.iter().map(Arg::values).collect())
    }

    fn bind(
        &self,
        args: &[Arg<'_, F>],
        mut values: Vec<Vec<F>>,
        solution: Vec<F>,
    ) -> Result<Vec<Reverse<F>>, ImplicitError> {
        let expected = values[self.inner].len();
        if solution.len() != expected {
            return Err(ImplicitError::SolutionShape {
                expected,
                got: solution.len(),
            });
        }
        values[self.inner] = solution;
        let point = RootPoint::new(values, self.inner);

        #[cfg(debug_assertions)]
        report_convergence(self.condition.as_ref(), &point);

        // Every tracked argument becomes an input group of the node; only the
        // declared meta-parameters receive gradients through it.
        let mut inputs = Vec::new();
        let mut groups = Vec::new();
        for (i, arg) in args.iter().enumerate() {
            if let Some(indices) = arg.tape_indices() {
                inputs.push(indices);
                groups.push(self.argnums.contains(&i).then_some(i));
            }
        }

        let solution = point.solution().to_vec();
        if !groups.iter().any(Option::is_some) {
            return Ok(solution.into_iter().map(Reverse::constant).collect());
        }

        let rule = RootBackward {
            condition: Rc::clone(&self.condition),
            solver: Rc::clone(&self.solver),
            point,
            groups,
        };
        let n = solution.len();
        let first = tape::with_active_tape::<F, _>(|t| t.push_custom(inputs, n, Box::new(rule)));
        Ok(solution
            .into_iter()
            .enumerate()
            .map(|(i, v)| Reverse::from_tape(v, first + i as u32))
            .collect())
    }
}

fn views<F>(values: &[Vec<F>]) -> Vec<&[F]> {
    values.iter().map(Vec::as_slice).collect()
}

/// Logs how far φ* is from a root. Never fails: a condition that cannot be
/// evaluated here fails again in the backward sweep, whatever the profile.
#[cfg(debug_assertions)]
fn report_convergence<F: Real>(condition: &dyn Condition<F>, point: &RootPoint<F>) {
    match condition.residual(point) {
        Ok(residual) => {
            let r = crate::convergence::norm(&residual);
            let threshold = F::from(1e-6).unwrap_or_else(F::epsilon);
            if !(r <= threshold) {
                log::warn!(
                    "custom root: ‖R(φ*, θ)‖ = {r} > 1e-6; implicit gradients assume φ* is a root"
                );
            }
        }
        Err(e) => log::warn!("custom root: residual at φ* could not be evaluated: {e}"),
    }
}

/// Reverse rule of one [`CustomRoot::apply`] call.
struct RootBackward<F: Real> {
    condition: Rc<dyn Condition<F>>,
    solver: Rc<dyn LinearSolver<F>>,
    point: RootPoint<F>,
    /// Per input group: the argument index when it is a meta-parameter.
    groups: Vec<Option<usize>>,
}

impl<F: Real> RootBackward<F> {
    fn meta_gradients(&self, g: &[F]) -> Result<Vec<Option<Vec<F>>>, ImplicitError> {
        let rhs: Vec<F> = g.iter().map(|&gi| F::zero() - gi).collect();
        let op = ImplicitOperator::new(self.condition.as_ref(), &self.point);
        let u = self.solver.solve(&op, &rhs)?;
        log::debug!(
            "custom root backward: {} ({} iterations)",
            u.termination,
            u.iterations
        );

        let metas: Vec<usize> = self.groups.iter().flatten().copied().collect();
        let mut grads = self
            .condition
            .vjp_args(&self.point, &metas, &u.x)?
            .into_iter();
        Ok(self
            .groups
            .iter()
            .map(|slot| slot.and_then(|_| grads.next()))
            .collect())
    }
}

impl<F: Real> CustomBackward<F> for RootBackward<F> {
    fn name(&self) -> &'static str {
        "custom_root"
    }

    fn backward(&self, output_adjoints: &[F]) -> Result<Vec<Option<Vec<F>>>, BackwardError> {
        Ok(self.meta_gradients(output_adjoints)?)
    }
}
