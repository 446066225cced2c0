use std::fmt;

/// Result of a linear solve.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolution<F> {
    /// Approximate solution.
    pub x: Vec<F>,
    /// Iterations (CG) or operator applications (Neumann) performed.
    pub iterations: usize,
    /// Residual norm at exit, when the solver tracks one.
    pub residual_norm: Option<F>,
    /// Reason for termination.
    pub termination: SolveTermination,
}

/// Why a linear solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveTermination {
    /// Residual norm fell below tolerance.
    Converged,
    /// Reached the iteration cap; the best iterate is returned.
    MaxIterations,
    /// The search direction degenerated; the current iterate is returned.
    Breakdown,
    /// A fixed number of series terms was summed.
    FixedTerms,
    /// Solved by factorisation.
    Direct,
}

impl fmt::Display for SolveTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveTermination::Converged => write!(f, "residual below tolerance"),
            SolveTermination::MaxIterations => write!(f, "maximum iterations reached"),
            SolveTermination::Breakdown => write!(f, "search direction broke down"),
            SolveTermination::FixedTerms => write!(f, "fixed number of series terms"),
            SolveTermination::Direct => write!(f, "direct factorisation"),
        }
    }
}
