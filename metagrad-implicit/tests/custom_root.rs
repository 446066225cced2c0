use std::cell::Cell;
use std::rc::Rc;

use approx::assert_relative_eq;
use metagrad::{try_grad, AdError, Reverse, Scalar};
use metagrad_implicit::linalg::lu_solve;
use metagrad_implicit::linear_solve::NormalCg;
use metagrad_implicit::{
    solve_cg, solve_inv, solve_normal_cg, Arg, CgConfig, CustomRoot, FixedPointMap,
    ImplicitError, LinearOperator, LinearSolution, LinearSolver, Objective, Optimality,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ── Problems ──

const A: [f64; 4] = [2.0, 0.5, 0.5, 1.0];
const B: [f64; 4] = [1.0, 0.0, 1.0, 1.0];

/// R(φ, θ) = Aφ − Bθ with symmetric positive-definite A.
struct Linear;

impl Optimality<f64> for Linear {
    fn residual<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> Vec<T> {
        let c = T::from_const;
        let (phi, theta) = (a[0], a[1]);
        (0..2)
            .map(|i| {
                c(A[2 * i]) * phi[0] + c(A[2 * i + 1]) * phi[1]
                    - c(B[2 * i]) * theta[0]
                    - c(B[2 * i + 1]) * theta[1]
            })
            .collect()
    }
}

fn linear_forward(a: &[&[f64]]) -> Result<Vec<f64>, ImplicitError> {
    let theta = a[1];
    let b_theta = [
        B[0] * theta[0] + B[1] * theta[1],
        B[2] * theta[0] + B[3] * theta[1],
    ];
    lu_solve(&A, &b_theta).ok_or(ImplicitError::SingularSystem)
}

/// d/dθ ‖φ*‖² = Bᵀ A⁻¹ (2φ*).
fn linear_expected(theta: &[f64]) -> Vec<f64> {
    let phi = linear_forward(&[&[0.0, 0.0][..], theta]).unwrap();
    let u = lu_solve(&A, &[2.0 * phi[0], 2.0 * phi[1]]).unwrap();
    vec![B[0] * u[0] + B[2] * u[1], B[1] * u[0] + B[3] * u[1]]
}

fn linear_meta_grad(root: &CustomRoot<f64>, theta: &[f64]) -> Vec<f64> {
    try_grad(
        |x: &[Reverse<f64>]| {
            let phi = root.apply(&[Arg::Const(&[0.0, 0.0]), Arg::Tracked(x)], linear_forward)?;
            Ok::<_, ImplicitError>(phi[0] * phi[0] + phi[1] * phi[1])
        },
        theta,
    )
    .unwrap()
}

/// f(φ, θ) = ½‖φ − θ‖² + ½λ‖φ‖², minimised at φ* = θ / (1 + λ).
struct Proximal {
    lambda: f64,
}

impl Objective<f64> for Proximal {
    fn value<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> T {
        let half = T::from_const(0.5);
        let lambda = T::from_const(self.lambda);
        a[0].iter()
            .zip(a[1])
            .fold(T::from_const(0.0), |acc, (&p, &t)| {
                acc + half * (p - t) * (p - t) + half * lambda * p * p
            })
    }
}

/// T(φ, θ) = ½φ + ¼θ, with fixed point φ* = θ / 2.
struct Contraction;

impl FixedPointMap<f64> for Contraction {
    fn map<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> Vec<T> {
        a[0].iter()
            .zip(a[1])
            .map(|(&p, &t)| T::from_const(0.5) * p + T::from_const(0.25) * t)
            .collect()
    }
}

/// R(φ, θ) = φ − θ/2.
struct HalfTheta;

impl Optimality<f64> for HalfTheta {
    fn residual<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> Vec<T> {
        a[0].iter()
            .zip(a[1])
            .map(|(&p, &t)| p - T::from_const(0.5) * t)
            .collect()
    }
}

/// Drops the last component of the residual.
struct Truncated;

impl Optimality<f64> for Truncated {
    fn residual<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> Vec<T> {
        let mut r = HalfTheta.residual(a);
        r.pop();
        r
    }
}

/// R(φ, a, b) = φ − a·b.
struct Product;

impl Optimality<f64> for Product {
    fn residual<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> Vec<T> {
        vec![a[0][0] - a[1][0] * a[2][0]]
    }
}

/// Counts solves and delegates to CG on the normal equations.
struct Counting {
    inner: NormalCg<f64>,
    calls: Rc<Cell<usize>>,
}

impl LinearSolver<f64> for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn solve(
        &self,
        op: &dyn LinearOperator<f64>,
        b: &[f64],
    ) -> Result<LinearSolution<f64>, ImplicitError> {
        self.calls.set(self.calls.get() + 1);
        self.inner.solve(op, b)
    }
}

// ── Gradients ──

#[test]
fn linear_condition_matches_closed_form_with_every_solver() {
    init();
    let theta = [0.7, -1.3];
    let expected = linear_expected(&theta);

    let solvers: Vec<Rc<dyn LinearSolver<f64>>> = vec![
        Rc::new(solve_cg(50, 1e-12)),
        Rc::new(solve_normal_cg(50, 1e-12)),
        Rc::new(solve_inv(false, 0, 1.0)),
    ];

    for solver in &solvers {
        let root = CustomRoot::builder(2)
            .optimality(Linear)
            .argnums(&[1])
            .solver_rc(Rc::clone(solver))
            .build()
            .unwrap();
        let g = linear_meta_grad(&root, &theta);
        for (gi, ei) in g.iter().zip(&expected) {
            assert_relative_eq!(*gi, *ei, epsilon = 1e-8);
        }
    }
}

#[test]
fn half_theta_matches_closed_form_with_every_solver() {
    init();
    let theta = [0.6, -1.4, 2.2];
    let solvers: Vec<Rc<dyn LinearSolver<f64>>> = vec![
        Rc::new(solve_cg(20, 1e-12)),
        Rc::new(solve_normal_cg(20, 1e-12)),
        Rc::new(solve_inv(true, 10, 1.0)),
    ];

    for solver in &solvers {
        let root = CustomRoot::builder(2)
            .optimality(HalfTheta)
            .argnums(&[1])
            .solver_rc(Rc::clone(solver))
            .build()
            .unwrap();
        let g = try_grad(
            |x: &[Reverse<f64>]| {
                let phi = root.apply(&[Arg::Const(&[0.0; 3]), Arg::Tracked(x)], |a| {
                    Ok::<_, ImplicitError>(a[1].iter().map(|t| 0.5 * t).collect())
                })?;
                Ok::<_, ImplicitError>(
                    phi.iter().fold(Reverse::constant(0.0), |acc, &p| acc + p * p),
                )
            },
            &theta,
        )
        .unwrap();
        // ‖θ/2‖² → θ/2
        for (gi, ti) in g.iter().zip(&theta) {
            assert_relative_eq!(*gi, 0.5 * ti, epsilon = 1e-5);
        }
    }
}

#[test]
fn default_solver_is_normal_cg() {
    init();
    let root = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .build()
        .unwrap();
    let theta = [1.0, 2.0];
    let g = linear_meta_grad(&root, &theta);
    let expected = linear_expected(&theta);
    assert_relative_eq!(g[0], expected[0], epsilon = 1e-6);
    assert_relative_eq!(g[1], expected[1], epsilon = 1e-6);
}

#[test]
fn derived_condition_from_objective() {
    init();
    let lambda = 1.0;
    let root = CustomRoot::builder(2)
        .objective(Proximal { lambda })
        .argnums(&[1])
        .solver(solve_cg(20, 1e-12))
        .build()
        .unwrap();

    let g = try_grad(
        |x: &[Reverse<f64>]| {
            let phi = root.apply(&[Arg::Const(&[0.0, 0.0]), Arg::Tracked(x)], |a| {
                // gradient descent to the minimiser
                let mut phi = a[0].to_vec();
                for _ in 0..200 {
                    for i in 0..phi.len() {
                        let g = (phi[i] - a[1][i]) + lambda * phi[i];
                        phi[i] -= 0.3 * g;
                    }
                }
                Ok::<_, ImplicitError>(phi)
            })?;
            Ok::<_, ImplicitError>(phi[0] + 2.0 * phi[1])
        },
        &[1.0, -2.0],
    )
    .unwrap();

    assert_relative_eq!(g[0], 0.5, epsilon = 1e-5);
    assert_relative_eq!(g[1], 1.0, epsilon = 1e-5);
}

#[test]
fn fixed_point_condition() {
    init();
    let root = CustomRoot::builder(2)
        .fixed_point(Contraction)
        .argnums(&[1])
        .build()
        .unwrap();

    let g = try_grad(
        |x: &[Reverse<f64>]| {
            let phi = root.apply(&[Arg::Const(&[0.0]), Arg::Tracked(x)], |a| {
                let mut phi = a[0][0];
                for _ in 0..100 {
                    phi = 0.5 * phi + 0.25 * a[1][0];
                }
                Ok::<_, ImplicitError>(vec![phi])
            })?;
            Ok::<_, ImplicitError>(phi[0] * phi[0])
        },
        &[4.0],
    )
    .unwrap();

    // φ* = θ/2, d/dθ (θ/2)² = θ/2
    assert_relative_eq!(g[0], 2.0, epsilon = 1e-6);
}

#[test]
fn one_solve_for_several_meta_groups() {
    init();
    let calls = Rc::new(Cell::new(0));
    let root = CustomRoot::builder(3)
        .optimality(Product)
        .argnums(&[1, 2])
        .solver(Counting {
            inner: NormalCg::new(CgConfig::default()),
            calls: Rc::clone(&calls),
        })
        .build()
        .unwrap();

    let g = try_grad(
        |x: &[Reverse<f64>]| {
            let phi = root.apply(
                &[Arg::Const(&[0.0]), Arg::Tracked(&x[..1]), Arg::Tracked(&x[1..])],
                |a| Ok::<_, ImplicitError>(vec![a[1][0] * a[2][0]]),
            )?;
            Ok::<_, ImplicitError>(phi[0] * phi[0])
        },
        &[2.0, 3.0],
    )
    .unwrap();

    assert_eq!(calls.get(), 1);
    // L = (ab)², dL/da = 2ab·b, dL/db = 2ab·a
    assert_relative_eq!(g[0], 36.0, epsilon = 1e-8);
    assert_relative_eq!(g[1], 24.0, epsilon = 1e-8);
}

#[test]
fn tracked_non_meta_argument_gets_no_implicit_gradient() {
    init();
    let root = CustomRoot::builder(3)
        .optimality(Product)
        .argnums(&[1])
        .build()
        .unwrap();

    let g = try_grad(
        |x: &[Reverse<f64>]| {
            let phi = root.apply(
                &[Arg::Const(&[0.0]), Arg::Tracked(&x[..1]), Arg::Tracked(&x[1..])],
                |a| Ok::<_, ImplicitError>(vec![a[1][0] * a[2][0]]),
            )?;
            Ok::<_, ImplicitError>(phi[0] + x[1])
        },
        &[2.0, 3.0],
    )
    .unwrap();

    assert_relative_eq!(g[0], 3.0, epsilon = 1e-8);
    // only the direct path
    assert_eq!(g[1], 1.0);
}

#[test]
fn constant_meta_arguments_need_no_tape() {
    let root = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .build()
        .unwrap();
    let theta = [Reverse::constant(1.0), Reverse::constant(0.0)];
    let phi = root
        .apply(&[Arg::Const(&[0.0, 0.0]), Arg::Tracked(&theta)], linear_forward)
        .unwrap();
    assert!(phi.iter().all(|p| !p.is_tracked()));
    let direct = linear_forward(&[&[0.0, 0.0], &[1.0, 0.0]]).unwrap();
    assert_eq!(phi[0].value(), direct[0]);
    assert_eq!(phi[1].value(), direct[1]);
}

#[test]
fn root_is_reusable_across_calls() {
    init();
    let root = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .solver(solve_cg(50, 1e-12))
        .build()
        .unwrap();
    for theta in [[1.0, 0.0], [0.0, 1.0], [-2.0, 3.0]] {
        let g = linear_meta_grad(&root, &theta);
        let expected = linear_expected(&theta);
        assert_relative_eq!(g[0], expected[0], epsilon = 1e-8);
        assert_relative_eq!(g[1], expected[1], epsilon = 1e-8);
    }
}

// ── Auxiliary outputs ──

#[test]
fn aux_value_passes_through() {
    init();
    let root = CustomRoot::builder(2)
        .fixed_point(Contraction)
        .argnums(&[1])
        .has_aux(true)
        .build()
        .unwrap();

    let mut steps = 0;
    let g = try_grad(
        |x: &[Reverse<f64>]| {
            let (phi, n) = root.apply_with_aux(&[Arg::Const(&[0.0]), Arg::Tracked(x)], |a| {
                let mut phi = a[0][0];
                let mut n = 0;
                while (phi - 0.5 * a[1][0]).abs() > 1e-14 {
                    phi = 0.5 * phi + 0.25 * a[1][0];
                    n += 1;
                }
                Ok::<_, ImplicitError>((vec![phi], n))
            })?;
            steps = n;
            Ok::<_, ImplicitError>(phi[0])
        },
        &[1.0],
    )
    .unwrap();

    assert!(steps > 0);
    assert_relative_eq!(g[0], 0.5, epsilon = 1e-8);
}

#[test]
fn aux_declaration_must_match_call() {
    let with_aux = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .has_aux(true)
        .build()
        .unwrap();
    let args = [Arg::Const(&[0.0, 0.0][..]), Arg::Const(&[1.0, 1.0][..])];
    let err = with_aux.apply(&args, linear_forward).unwrap_err();
    assert!(matches!(err, ImplicitError::AuxMismatch));

    let without = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .build()
        .unwrap();
    let err = without
        .apply_with_aux(&args, |a| Ok::<_, ImplicitError>((linear_forward(a)?, ())))
        .unwrap_err();
    assert!(matches!(err, ImplicitError::AuxMismatch));
}

// ── Errors ──

#[derive(Debug)]
enum InnerError {
    Diverged(usize),
    Implicit(ImplicitError),
}

impl From<ImplicitError> for InnerError {
    fn from(e: ImplicitError) -> Self {
        InnerError::Implicit(e)
    }
}

impl From<AdError> for InnerError {
    fn from(e: AdError) -> Self {
        InnerError::Implicit(e.into())
    }
}

#[test]
fn forward_errors_are_returned_unchanged() {
    let root = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .build()
        .unwrap();
    let err = try_grad(
        |x: &[Reverse<f64>]| {
            let phi = root.apply(&[Arg::Const(&[0.0, 0.0]), Arg::Tracked(x)], |_| {
                Err(InnerError::Diverged(7))
            })?;
            Ok::<_, InnerError>(phi[0])
        },
        &[1.0, 1.0],
    )
    .unwrap_err();
    assert!(matches!(err, InnerError::Diverged(7)));
}

#[test]
fn call_shape_errors() {
    let root = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .build()
        .unwrap();

    let err = root
        .apply(&[Arg::Const(&[0.0, 0.0][..])], linear_forward)
        .unwrap_err();
    assert!(matches!(
        err,
        ImplicitError::ArityMismatch { expected: 2, got: 1 }
    ));

    let err = root
        .apply(&[Arg::Const(&[0.0, 0.0][..]), Arg::Const(&[1.0, 1.0][..])], |_| {
            Ok::<_, ImplicitError>(vec![1.0])
        })
        .unwrap_err();
    assert!(matches!(
        err,
        ImplicitError::SolutionShape { expected: 2, got: 1 }
    ));
}

#[test]
fn build_validates_configuration() {
    let root = CustomRoot::<f64>::builder(3)
        .optimality(Product)
        .argnums(&[2, 1])
        .build()
        .unwrap();
    let shown = format!("{root:?}");
    assert!(shown.contains("solver: \"normal_cg\""));
    assert!(shown.contains("argnums: [2, 1]"));

    let err = CustomRoot::<f64>::builder(2).argnums(&[1]).build().unwrap_err();
    assert!(matches!(err, ImplicitError::ConditionSource { supplied: 0 }));

    let err = CustomRoot::builder(2)
        .optimality(Linear)
        .objective(Proximal { lambda: 0.0 })
        .argnums(&[1])
        .build()
        .unwrap_err();
    assert!(matches!(err, ImplicitError::ConditionSource { supplied: 2 }));

    let err = CustomRoot::builder(2).optimality(Linear).build().unwrap_err();
    assert!(matches!(err, ImplicitError::NoMetaArguments));

    let err = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[5])
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        ImplicitError::ArgnumOutOfRange { index: 5, num_args: 2 }
    ));

    let err = CustomRoot::builder(3)
        .optimality(Product)
        .argnums(&[1, 1])
        .build()
        .unwrap_err();
    assert!(matches!(err, ImplicitError::DuplicateArgnum(1)));

    let err = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[0])
        .build()
        .unwrap_err();
    assert!(matches!(err, ImplicitError::InnerIsMeta(0)));

    let err = CustomRoot::builder(2)
        .optimality(Linear)
        .argnums(&[1])
        .solver(solve_inv(true, 10, -1.0))
        .build()
        .unwrap_err();
    assert!(matches!(err, ImplicitError::InvalidSolverConfig(_)));
}

#[test]
fn bad_residual_length_surfaces_in_backward() {
    init();
    let root = CustomRoot::builder(2)
        .optimality(Truncated)
        .argnums(&[1])
        .build()
        .unwrap();

    let mut forward_ok = false;
    let err = try_grad(
        |x: &[Reverse<f64>]| {
            let phi = root.apply(&[Arg::Const(&[0.0, 0.0]), Arg::Tracked(x)], |a| {
                Ok::<_, ImplicitError>(a[1].iter().map(|t| 0.5 * t).collect())
            })?;
            forward_ok = true;
            Ok::<_, ImplicitError>(phi[0] + phi[1])
        },
        &[1.0, 2.0],
    )
    .unwrap_err();

    // The forward call never evaluates the condition fallibly.
    assert!(forward_ok);
    match err {
        ImplicitError::Ad(AdError::CustomBackward { op, source }) => {
            assert_eq!(op, "custom_root");
            assert!(source.to_string().contains("residual has length 1"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
