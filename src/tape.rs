//! Adept-style two-stack tape for reverse-mode AD.
//!
//! Stores precomputed partial derivatives (multipliers) and operand indices during the
//! forward pass. The reverse sweep is a single multiply-accumulate loop with zero-adjoint
//! skipping — no opcode dispatch overhead. Used internally by [`crate::Reverse`].
//!
//! Besides elementary statements the tape records **custom nodes**: a block of
//! fresh output variables whose adjoints are mapped back to groups of input
//! variables by a user-supplied [`CustomBackward`] rule. This is the hook
//! through which opaque computations (e.g. an inner-loop solver) rejoin the
//! gradient flow.

use std::cell::Cell;

use crate::error::{AdError, BackwardError};
use crate::Float;

/// Sentinel index indicating a constant (not recorded on tape).
pub const CONSTANT: u32 = u32::MAX;

/// Marks a statement that is not a custom node.
const NOT_CUSTOM: u32 = u32::MAX;

/// Reverse rule of a custom node recorded with [`Tape::push_custom`].
pub trait CustomBackward<F: Float> {
    /// Short name used in error reports.
    fn name(&self) -> &'static str;

    /// Map the adjoints of the node's outputs to adjoints of its input groups.
    ///
    /// Returns one entry per input group, in registration order. `None` means
    /// the group receives no gradient from this node and nothing is
    /// accumulated into its adjoints.
    fn backward(&self, output_adjoints: &[F]) -> Result<Vec<Option<Vec<F>>>, BackwardError>;
}

/// A recorded operation: its result lives at `lhs_index`, and its operands'
/// multipliers/indices span `[prev.end_plus_one .. self.end_plus_one)`.
/// Custom nodes carry an index into `Tape::custom` and no multipliers.
#[derive(Clone, Copy, Debug)]
struct Statement {
    lhs_index: u32,
    end_plus_one: u32,
    custom: u32,
}

struct CustomNode<F: Float> {
    inputs: Vec<Vec<u32>>,
    first_output: u32,
    num_outputs: u32,
    rule: Box<dyn CustomBackward<F>>,
}

/// Adept-style two-stack tape for reverse-mode AD.
///
/// Records precomputed partial derivatives (multipliers) and operand indices
/// during the forward sweep. The reverse sweep is a single multiply-accumulate
/// loop with zero-adjoint skipping — no opcode dispatch.
pub struct Tape<F: Float> {
    statements: Vec<Statement>,
    multipliers: Vec<F>,
    indices: Vec<u32>,
    custom: Vec<CustomNode<F>>,
    num_variables: u32,
}

impl<F: Float> Default for Tape<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> Tape<F> {
    /// Create an empty tape.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a tape with pre-allocated capacity.
    pub fn with_capacity(est_ops: usize) -> Self {
        let mut tape = Tape {
            statements: Vec::with_capacity(est_ops + 1),
            multipliers: Vec::with_capacity(est_ops * 2),
            indices: Vec::with_capacity(est_ops * 2),
            custom: Vec::new(),
            num_variables: 0,
        };
        // Sentinel statement at index 0 so that `statements[i-1].end_plus_one`
        // is always valid for i >= 1.
        tape.statements.push(Statement {
            lhs_index: 0,
            end_plus_one: 0,
            custom: NOT_CUSTOM,
        });
        tape
    }

    /// Number of variables allocated so far (inputs, intermediates, custom outputs).
    #[inline]
    pub fn num_variables(&self) -> usize {
        self.num_variables as usize
    }

    /// Number of custom nodes recorded.
    #[inline]
    pub fn num_custom_nodes(&self) -> usize {
        self.custom.len()
    }

    /// Register a new independent variable. Returns `(gradient_index, value)`.
    ///
    /// No statement is pushed for input variables — they are leaf nodes
    /// whose adjoints should not be zeroed during the reverse sweep.
    #[inline]
    pub fn new_variable(&mut self, value: F) -> (u32, F) {
        let idx = self.num_variables;
        self.num_variables += 1;
        (idx, value)
    }

    /// Record a unary operation: `result = f(operand)` with precomputed `multiplier = df/d(operand)`.
    #[inline]
    pub fn push_unary(&mut self, operand_idx: u32, multiplier: F) -> u32 {
        let result_idx = self.num_variables;
        self.num_variables += 1;

        if operand_idx != CONSTANT {
            self.multipliers.push(multiplier);
            self.indices.push(operand_idx);
        }

        self.statements.push(Statement {
            lhs_index: result_idx,
            end_plus_one: self.multipliers.len() as u32,
            custom: NOT_CUSTOM,
        });
        result_idx
    }

    /// Record a binary operation with precomputed partial derivatives.
    #[inline]
    pub fn push_binary(&mut self, lhs_idx: u32, lhs_mult: F, rhs_idx: u32, rhs_mult: F) -> u32 {
        let result_idx = self.num_variables;
        self.num_variables += 1;

        if lhs_idx != CONSTANT {
            self.multipliers.push(lhs_mult);
            self.indices.push(lhs_idx);
        }
        if rhs_idx != CONSTANT {
            self.multipliers.push(rhs_mult);
            self.indices.push(rhs_idx);
        }

        self.statements.push(Statement {
            lhs_index: result_idx,
            end_plus_one: self.multipliers.len() as u32,
            custom: NOT_CUSTOM,
        });
        result_idx
    }

    /// Record a custom node with `num_outputs` fresh output variables.
    ///
    /// `inputs` lists the tape indices of each input group; [`CONSTANT`]
    /// entries are allowed and never receive adjoints. Returns the index of
    /// the first output; outputs are contiguous.
    pub fn push_custom(
        &mut self,
        inputs: Vec<Vec<u32>>,
        num_outputs: usize,
        rule: Box<dyn CustomBackward<F>>,
    ) -> u32 {
        let first_output = self.num_variables;
        let num_outputs = num_outputs as u32;
        self.num_variables += num_outputs;

        let node = self.custom.len() as u32;
        self.custom.push(CustomNode {
            inputs,
            first_output,
            num_outputs,
            rule,
        });
        self.statements.push(Statement {
            lhs_index: first_output,
            end_plus_one: self.multipliers.len() as u32,
            custom: node,
        });
        first_output
    }

    /// Run the reverse sweep, seeding the adjoint of `seed_index` with 1.
    /// Returns the full adjoint vector.
    pub fn reverse(&self, seed_index: u32) -> Result<Vec<F>, AdError> {
        let mut adjoints = vec![F::zero(); self.num_variables as usize];
        if seed_index != CONSTANT {
            adjoints[seed_index as usize] = F::one();
        }
        self.sweep(adjoints)
    }

    /// Run the reverse sweep with custom adjoint seeds.
    pub fn reverse_seeded(&self, seeds: &[(u32, F)]) -> Result<Vec<F>, AdError> {
        let mut adjoints = vec![F::zero(); self.num_variables as usize];
        for &(idx, seed) in seeds {
            if idx != CONSTANT {
                adjoints[idx as usize] = adjoints[idx as usize] + seed;
            }
        }
        self.sweep(adjoints)
    }

    fn sweep(&self, mut adjoints: Vec<F>) -> Result<Vec<F>, AdError> {
        for i in (1..self.statements.len()).rev() {
            let stmt = self.statements[i];
            if stmt.custom != NOT_CUSTOM {
                self.reverse_custom(&self.custom[stmt.custom as usize], &mut adjoints)?;
                continue;
            }
            let a = adjoints[stmt.lhs_index as usize];
            if a != F::zero() {
                adjoints[stmt.lhs_index as usize] = F::zero();
                let start = self.statements[i - 1].end_plus_one as usize;
                let end = stmt.end_plus_one as usize;
                for j in start..end {
                    adjoints[self.indices[j] as usize] =
                        adjoints[self.indices[j] as usize] + self.multipliers[j] * a;
                }
            }
        }
        Ok(adjoints)
    }

    fn reverse_custom(&self, node: &CustomNode<F>, adjoints: &mut [F]) -> Result<(), AdError> {
        let outputs = node.first_output as usize..(node.first_output + node.num_outputs) as usize;
        if adjoints[outputs.clone()].iter().all(|&a| a == F::zero()) {
            return Ok(());
        }
        let seed = adjoints[outputs.clone()].to_vec();
        for a in &mut adjoints[outputs] {
            *a = F::zero();
        }

        let grads = node
            .rule
            .backward(&seed)
            .map_err(|source| AdError::CustomBackward {
                op: node.rule.name(),
                source,
            })?;
        if grads.len() != node.inputs.len() {
            return Err(AdError::ShapeMismatch {
                what: "custom backward input groups",
                expected: node.inputs.len(),
                got: grads.len(),
            });
        }

        for (group, grad) in node.inputs.iter().zip(grads) {
            let Some(grad) = grad else { continue };
            if grad.len() != group.len() {
                return Err(AdError::ShapeMismatch {
                    what: "custom backward group gradient",
                    expected: group.len(),
                    got: grad.len(),
                });
            }
            for (&idx, g) in group.iter().zip(grad) {
                if idx != CONSTANT {
                    adjoints[idx as usize] = adjoints[idx as usize] + g;
                }
            }
        }
        Ok(())
    }
}

// Thread-local active tape pointer.
thread_local! {
    static TAPE_F32: Cell<*mut Tape<f32>> = const { Cell::new(std::ptr::null_mut()) };
    static TAPE_F64: Cell<*mut Tape<f64>> = const { Cell::new(std::ptr::null_mut()) };
}

/// Trait to select the correct thread-local for a given float type.
pub trait TapeThreadLocal: Float {
    fn cell() -> &'static std::thread::LocalKey<Cell<*mut Tape<Self>>>;
}

impl TapeThreadLocal for f32 {
    fn cell() -> &'static std::thread::LocalKey<Cell<*mut Tape<Self>>> {
        &TAPE_F32
    }
}

impl TapeThreadLocal for f64 {
    fn cell() -> &'static std::thread::LocalKey<Cell<*mut Tape<Self>>> {
        &TAPE_F64
    }
}

/// Access the active tape for the current thread. Panics if no tape is active.
#[inline]
pub fn with_active_tape<F: TapeThreadLocal, R>(f: impl FnOnce(&mut Tape<F>) -> R) -> R {
    F::cell().with(|cell| {
        let ptr = cell.get();
        assert!(
            !ptr.is_null(),
            "No active tape. Use metagrad::grad() or similar API."
        );
        // SAFETY: The TapeGuard guarantees the pointer is valid for the
        // duration of the closure-based API scope, and only one mutable
        // reference exists at a time (single-threaded access via thread-local).
        let tape = unsafe { &mut *ptr };
        f(tape)
    })
}

/// RAII guard that sets a tape as the thread-local active tape and restores
/// the previous one on drop.
///
/// Guards nest: a custom backward rule may activate a scratch tape of its own
/// while the outer tape is being swept.
pub struct TapeGuard<F: TapeThreadLocal> {
    prev: *mut Tape<F>,
}

impl<F: TapeThreadLocal> TapeGuard<F> {
    /// Activate `tape` as the thread-local tape. Returns a guard that restores
    /// the previous tape on drop.
    pub fn new(tape: &mut Tape<F>) -> Self {
        let prev = F::cell().with(|cell| {
            let prev = cell.get();
            cell.set(tape as *mut Tape<F>);
            prev
        });
        TapeGuard { prev }
    }
}

impl<F: TapeThreadLocal> Drop for TapeGuard<F> {
    fn drop(&mut self) {
        F::cell().with(|cell| {
            cell.set(self.prev);
        });
    }
}
