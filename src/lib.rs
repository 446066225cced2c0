//! Automatic differentiation for meta-learning workloads.
//!
//! * [`Reverse<F>`] records onto an Adept-style tape; [`grad`], [`vjp`] and the
//!   group-wise [`grad_groups`] / [`vjp_groups`] drive it.
//! * [`Dual<T>`] is forward mode; [`jvp`] and [`jvp_group`] drive it. Nesting
//!   `Dual<Reverse<F>>` gives second-order products ([`hvp_groups`]).
//! * [`tape::CustomBackward`] nodes let an opaque computation supply its own
//!   reverse rule. The `metagrad-implicit` crate uses them to differentiate
//!   through inner-loop optima.
//! * [`tree`] flattens nested parameter structures to flat vectors and back.
//!
//! User functions are written once against the [`Scalar`] trait and then
//! evaluated at any of these number types.

pub mod api;
pub mod dual;
pub mod error;
pub mod float;
pub mod reverse;
pub mod scalar;
pub mod tape;
pub mod tree;
mod traits;

pub use api::{grad, grad_groups, hvp_groups, jvp, jvp_group, try_grad, vjp, vjp_groups};
pub use dual::Dual;
pub use error::{AdError, BackwardError, TreeError};
pub use float::{Float, Real};
pub use reverse::Reverse;
pub use scalar::Scalar;
pub use tape::{CustomBackward, Tape, TapeGuard};
pub use tree::{Tensor, Tree, TreeDef};

/// Type alias for forward-mode dual numbers over `f64`.
pub type Dual64 = Dual<f64>;
/// Type alias for forward-mode dual numbers over `f32`.
pub type Dual32 = Dual<f32>;
/// Type alias for reverse-mode variables over `f64`.
pub type Reverse64 = Reverse<f64>;
/// Type alias for reverse-mode variables over `f32`.
pub type Reverse32 = Reverse<f32>;
