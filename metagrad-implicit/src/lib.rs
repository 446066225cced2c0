//! Implicit differentiation through inner-loop optima.
//!
//! An inner solver (gradient descent, a fixed-point iteration, anything) is
//! run as an opaque forward computation. Its output φ* is handed back to the
//! reverse tape of [`metagrad`] with a custom reverse rule derived from the
//! implicit function theorem, so meta-gradients cost one linear solve instead
//! of backpropagating through every inner step.
//!
//! * [`Optimality`], [`Objective`] and [`FixedPointMap`] describe the inner
//!   problem once, generically over the number type.
//! * [`CustomRoot`] binds a condition to argument positions and a solver.
//! * [`linear_solve`] holds the solvers: conjugate gradient, CG on the normal
//!   equations and the Neumann-series / explicit inverse.
//! * [`ImplicitModule`] is a stateful facade owning named parameters, in the
//!   style of iMAML.

pub mod condition;
pub mod convergence;
pub mod custom_root;
pub mod error;
pub mod linalg;
pub mod linear_solve;
pub mod module;
pub mod objective;
pub mod operator;
pub mod result;

pub use condition::{
    Condition, DerivedCondition, ExplicitCondition, FixedPointCondition, FixedPointResidual,
    RootPoint, ScalarObjective,
};
pub use custom_root::{Arg, CustomRoot, CustomRootBuilder};
pub use error::ImplicitError;
pub use linear_solve::{
    solve_cg, solve_inv, solve_normal_cg, CgConfig, InvConfig, LinearSolver, SolverConfig,
};
pub use module::{ImplicitModule, ImplicitModuleBuilder, ModuleState};
pub use objective::{FixedPointMap, Objective, Optimality};
pub use operator::{ImplicitOperator, LinearOperator, MatrixOperator};
pub use result::{LinearSolution, SolveTermination};
