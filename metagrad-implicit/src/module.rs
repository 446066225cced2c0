//! Stateful facade over [`CustomRoot`]: a module owning its inner
//! parameters, with meta-parameters supplied by the caller on each solve.
//!
//! Parameters and meta-parameters are registered explicitly by name. The
//! condition comes from an optimality condition when one is supplied and is
//! otherwise derived from the objective; at least one of the two is required.
//! Every [`ImplicitModule::solve`] builds a fresh binding for the current
//! partition, so re-solving is always allowed.
//!
//! Conditions and objectives see the argument groups
//! `[parameters, meta-parameters, data…]`, each flattened in registration
//! order.

use std::fmt;
use std::rc::Rc;

use metagrad::{Real, Reverse, Tensor, Tree, TreeDef};

use crate::condition::{
    Condition, DerivedCondition, ExplicitCondition, RootPoint, ScalarObjective,
};
use crate::custom_root::{Arg, CustomRoot};
use crate::error::ImplicitError;
use crate::linear_solve::{LinearSolver, SolverConfig};
use crate::objective::{Objective, Optimality};

const PARAMS: usize = 0;
const META: usize = 1;

/// Lifecycle of an [`ImplicitModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Parameters are being registered; no solve has run.
    Constructed,
    /// At least one solve has completed; parameters hold its solution.
    Solved,
}

/// Builder for [`ImplicitModule`].
pub struct ImplicitModuleBuilder<F: Real> {
    optimality: Option<Rc<dyn Condition<F>>>,
    objective: Option<(Rc<dyn Condition<F>>, Rc<dyn ScalarObjective<F>>)>,
    solver: Option<Rc<dyn LinearSolver<F>>>,
}

impl<F: Real> ImplicitModuleBuilder<F> {
    pub fn objective<O: Objective<F> + 'static>(mut self, objective: O) -> Self {
        let derived = Rc::new(DerivedCondition::new(objective));
        self.objective = Some((derived.clone(), derived));
        self
    }

    /// Overrides the condition derived from the objective.
    pub fn optimality<O: Optimality<F> + 'static>(mut self, optimality: O) -> Self {
        self.optimality = Some(Rc::new(ExplicitCondition::new(optimality)));
        self
    }

    pub fn solver<S: LinearSolver<F> + 'static>(mut self, solver: S) -> Self {
        self.solver = Some(Rc::new(solver));
        self
    }

    pub fn solver_config(mut self, config: SolverConfig<F>) -> Self {
        self.solver = Some(Rc::from(config.into_solver()));
        self
    }

    pub fn build(self) -> Result<ImplicitModule<F>, ImplicitError> {
        let (derived, objective) = match self.objective {
            Some((condition, objective)) => (Some(condition), Some(objective)),
            None => (None, None),
        };
        let condition = self
            .optimality
            .or(derived)
            .ok_or(ImplicitError::ConditionSource { supplied: 0 })?;
        let solver = match self.solver {
            Some(solver) => solver,
            None => Rc::from(SolverConfig::default().into_solver()),
        };
        solver.validate()?;

        Ok(ImplicitModule {
            condition,
            objective,
            solver,
            params: Vec::new(),
            meta: Vec::new(),
            state: ModuleState::Constructed,
        })
    }
}

/// A module whose parameters are the solution of an inner problem
/// parameterised by meta-parameters.
pub struct ImplicitModule<F: Real> {
    condition: Rc<dyn Condition<F>>,
    objective: Option<Rc<dyn ScalarObjective<F>>>,
    solver: Rc<dyn LinearSolver<F>>,
    params: Vec<(String, Tensor<F>)>,
    meta: Vec<(String, Vec<usize>)>,
    state: ModuleState,
}

impl<F: Real> fmt::Debug for ImplicitModule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplicitModule")
            .field("params", &self.params)
            .field("meta", &self.meta)
            .field("solver", &self.solver.name())
            .field("has_objective", &self.objective.is_some())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<F: Real> ImplicitModule<F> {
    pub fn builder() -> ImplicitModuleBuilder<F> {
        ImplicitModuleBuilder {
            optimality: None,
            objective: None,
            solver: None,
        }
    }

    fn check_registration(&self, name: &str) -> Result<(), ImplicitError> {
        if self.state == ModuleState::Solved {
            return Err(ImplicitError::AlreadySolved(name.to_string()));
        }
        let taken = self.params.iter().any(|(n, _)| n == name)
            || self.meta.iter().any(|(n, _)| n == name);
        if taken {
            return Err(ImplicitError::DuplicateParameter(name.to_string()));
        }
        Ok(())
    }

    /// Register an inner parameter with its initial value.
    pub fn register_parameter(
        &mut self,
        name: &str,
        value: Tensor<F>,
    ) -> Result<(), ImplicitError> {
        self.check_registration(name)?;
        self.params.push((name.to_string(), value));
        Ok(())
    }

    /// Declare a meta-parameter by shape. Its values are supplied by the
    /// caller on every solve.
    pub fn register_meta_parameter(
        &mut self,
        name: &str,
        shape: &[usize],
    ) -> Result<(), ImplicitError> {
        self.check_registration(name)?;
        self.meta.push((name.to_string(), shape.to_vec()));
        Ok(())
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn is_solved(&self) -> bool {
        self.state == ModuleState::Solved
    }

    /// Current parameters as a named tree.
    pub fn parameters(&self) -> Tree<F> {
        Tree::Map(
            self.params
                .iter()
                .map(|(n, t)| (n.clone(), Tree::Leaf(t.clone())))
                .collect(),
        )
    }

    pub fn parameter(&self, name: &str) -> Option<&Tensor<F>> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// Current parameters flattened in registration order.
    pub fn flat_parameters(&self) -> Vec<F> {
        self.parameters().flatten_values().0
    }

    /// Structure of the meta-parameters.
    pub fn meta_def(&self) -> TreeDef {
        TreeDef::Map(
            self.meta
                .iter()
                .map(|(n, shape)| (n.clone(), TreeDef::Leaf(shape.clone())))
                .collect(),
        )
    }

    /// Run `inner_loop` from the current parameters and store its result.
    ///
    /// `inner_loop` receives the flat parameters to update in place, the meta
    /// values and the data groups. The returned variables are the solution
    /// on the active tape, differentiable with respect to `meta`. Errors from
    /// `inner_loop` are returned unchanged and leave the module untouched.
    pub fn solve<E>(
        &mut self,
        meta: &[Reverse<F>],
        data: &[&[F]],
        inner_loop: impl FnOnce(&mut [F], &[F], &[&[F]]) -> Result<(), E>,
    ) -> Result<Vec<Reverse<F>>, E>
    where
        E: From<ImplicitError>,
    {
        let meta_def = self.meta_def();
        self.check_meta(&meta_def, meta.len())?;

        let (phi0, def) = self.parameters().flatten_values();
        let root = CustomRoot::builder(2 + data.len())
            .condition(Rc::clone(&self.condition))
            .inner_argnum(PARAMS)
            .argnums(&[META])
            .solver_rc(Rc::clone(&self.solver))
            .build()?;

        let mut args = vec![Arg::Const(&phi0), Arg::Tracked(meta)];
        args.extend(data.iter().map(|d| Arg::Const(*d)));

        let phi_star = root.apply(&args, |a| {
            let mut phi = a[PARAMS].to_vec();
            inner_loop(&mut phi, a[META], &a[META + 1..])?;
            Ok::<_, E>(phi)
        })?;

        let values: Vec<F> = phi_star.iter().map(Reverse::value).collect();
        let solved = def.unflatten_values(&values).map_err(ImplicitError::from)?;
        let Tree::Map(entries) = solved else {
            return Err(ImplicitError::SolutionShape {
                expected: phi0.len(),
                got: values.len(),
            }
            .into());
        };
        for ((_, slot), (_, tree)) in self.params.iter_mut().zip(entries) {
            if let Tree::Leaf(t) = tree {
                *slot = t;
            }
        }
        self.state = ModuleState::Solved;
        Ok(phi_star)
    }

    /// The optimality residual at the current parameters.
    pub fn residual(&self, meta: &[F], data: &[&[F]]) -> Result<Vec<F>, ImplicitError> {
        let point = self.point(meta, data)?;
        self.condition.residual(&point)
    }

    /// The objective at the current parameters.
    pub fn objective_value(&self, meta: &[F], data: &[&[F]]) -> Result<F, ImplicitError> {
        let objective = self.objective.as_ref().ok_or(ImplicitError::NoObjective)?;
        let point = self.point(meta, data)?;
        Ok(objective.value(&point))
    }

    fn check_meta(&self, meta_def: &TreeDef, got: usize) -> Result<(), ImplicitError> {
        let expected = meta_def.num_elements();
        if got != expected {
            return Err(ImplicitError::MetaShape { expected, got });
        }
        Ok(())
    }

    fn point(&self, meta: &[F], data: &[&[F]]) -> Result<RootPoint<F>, ImplicitError> {
        self.check_meta(&self.meta_def(), meta.len())?;
        let mut args = vec![self.flat_parameters(), meta.to_vec()];
        args.extend(data.iter().map(|d| d.to_vec()));
        Ok(RootPoint::new(args, PARAMS))
    }
}
