//! End-to-end meta-gradients for a proximal linear-regression inner problem.
//!
//! Inner: φ* = argmin ½‖φ − θ‖² + 1/(2n) Σ (xᵢ·φ − yᵢ)², found by gradient
//! descent. Outer: L(φ*) = (1/n) Σ xᵢ·φ*.

use approx::assert_relative_eq;
use metagrad::{try_grad, Reverse, Scalar, Tensor};
use metagrad_implicit::linalg::lu_solve;
use metagrad_implicit::{CgConfig, ImplicitError, ImplicitModule, InvConfig, Objective, SolverConfig};

const D: usize = 3;
const N: usize = 8;
const LR: f64 = 0.2;
const STEPS: usize = 100;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Task {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Task {
    fn data(&self) -> [&[f64]; 2] {
        [&self.x, &self.y]
    }
}

fn task() -> Task {
    let x = (0..N * D)
        .map(|k| (1.3 * (k / D) as f64 + 0.7 * (k % D) as f64 + 0.1).sin())
        .collect();
    let y = (0..N).map(|i| (0.5 * i as f64).cos()).collect();
    Task { x, y }
}

/// Arguments: `[φ, θ, x (n×d row-major), y]`.
struct InnerLoss;

impl Objective<f64> for InnerLoss {
    fn value<T: Scalar<Float = f64>>(&self, a: &[&[T]]) -> T {
        let (phi, theta, x, y) = (a[0], a[1], a[2], a[3]);
        let half = T::from_const(0.5);
        let mut prox = T::from_const(0.0);
        for k in 0..D {
            let d = phi[k] - theta[k];
            prox = prox + half * d * d;
        }
        let mut sq = T::from_const(0.0);
        for i in 0..N {
            let mut pred = T::from_const(0.0);
            for k in 0..D {
                pred = pred + x[i * D + k] * phi[k];
            }
            let r = pred - y[i];
            sq = sq + r * r;
        }
        prox + half * sq / T::from_const(N as f64)
    }
}

/// Plain gradient descent on the inner loss.
fn descend(phi: &mut [f64], theta: &[f64], x: &[f64], y: &[f64]) {
    for _ in 0..STEPS {
        let mut g: Vec<f64> = phi.iter().zip(theta).map(|(p, t)| p - t).collect();
        for i in 0..N {
            let row = &x[i * D..(i + 1) * D];
            let r: f64 = row.iter().zip(phi.iter()).map(|(a, b)| a * b).sum::<f64>() - y[i];
            for k in 0..D {
                g[k] += r * row[k] / N as f64;
            }
        }
        for k in 0..D {
            phi[k] -= LR * g[k];
        }
    }
}

fn outer_value(phi: &[f64], x: &[f64]) -> f64 {
    (0..N * D).map(|k| x[k] * phi[k % D]).sum::<f64>() / N as f64
}

fn outer_loss(phi: &[Reverse<f64>], x: &[f64]) -> Reverse<f64> {
    let mut total = Reverse::constant(0.0);
    for k in 0..N * D {
        total = total + phi[k % D] * x[k];
    }
    total / N as f64
}

fn module(solver: SolverConfig<f64>) -> ImplicitModule<f64> {
    let mut m = ImplicitModule::builder()
        .objective(InnerLoss)
        .solver_config(solver)
        .build()
        .unwrap();
    m.register_parameter("w", Tensor::zeros(vec![D])).unwrap();
    m.register_meta_parameter("w0", &[D]).unwrap();
    m
}

fn meta_grad(m: &mut ImplicitModule<f64>, theta: &[f64], task: &Task) -> Vec<f64> {
    try_grad(
        |t: &[Reverse<f64>]| {
            let phi = m.solve(t, &task.data(), |phi, theta, data| {
                descend(phi, theta, data[0], data[1]);
                Ok::<_, ImplicitError>(())
            })?;
            Ok::<_, ImplicitError>(outer_loss(&phi, &task.x))
        },
        theta,
    )
    .unwrap()
}

/// ∇θ L = H⁻¹ x̄ with H = I + XᵀX / n.
fn closed_form(task: &Task) -> Vec<f64> {
    let mut h = vec![0.0; D * D];
    for r in 0..D {
        h[r * D + r] = 1.0;
        for c in 0..D {
            for i in 0..N {
                h[r * D + c] += task.x[i * D + r] * task.x[i * D + c] / N as f64;
            }
        }
    }
    let mean: Vec<f64> = (0..D)
        .map(|k| (0..N).map(|i| task.x[i * D + k]).sum::<f64>() / N as f64)
        .collect();
    lu_solve(&h, &mean).unwrap()
}

const THETA: [f64; D] = [0.3, -0.5, 1.1];

#[test]
fn meta_gradient_matches_closed_form() {
    init();
    let task = task();
    let mut m = module(SolverConfig::NormalCg(CgConfig::default()));
    let g = meta_grad(&mut m, &THETA, &task);
    let expected = closed_form(&task);
    for k in 0..D {
        assert_relative_eq!(g[k], expected[k], epsilon = 1e-6);
    }
}

#[test]
fn normal_cg_and_neumann_agree() {
    init();
    let task = task();
    let cg = meta_grad(
        &mut module(SolverConfig::NormalCg(CgConfig::default())),
        &THETA,
        &task,
    );
    let neumann = meta_grad(
        &mut module(SolverConfig::Inv(InvConfig {
            alpha: 0.2,
            max_terms: 100,
            ..InvConfig::default()
        })),
        &THETA,
        &task,
    );
    for k in 0..D {
        assert_relative_eq!(cg[k], neumann[k], epsilon = 1e-3);
    }
}

#[test]
fn meta_gradient_matches_finite_differences() {
    init();
    let task = task();
    let mut m = module(SolverConfig::default());
    let g = meta_grad(&mut m, &THETA, &task);

    let h = 1e-5;
    let loss_at = |theta: &[f64]| {
        let mut phi = vec![0.0; D];
        descend(&mut phi, theta, &task.x, &task.y);
        outer_value(&phi, &task.x)
    };
    for k in 0..D {
        let mut plus = THETA;
        let mut minus = THETA;
        plus[k] += h;
        minus[k] -= h;
        let fd = (loss_at(&plus) - loss_at(&minus)) / (2.0 * h);
        assert_relative_eq!(g[k], fd, epsilon = 1e-2);
    }
}

#[test]
fn solve_leaves_module_at_a_root() {
    init();
    let task = task();
    let mut m = module(SolverConfig::default());
    let before = m
        .objective_value(&THETA, &task.data())
        .unwrap();

    meta_grad(&mut m, &THETA, &task);
    assert!(m.is_solved());

    let after = m.objective_value(&THETA, &task.data()).unwrap();
    assert!(after < before);
    let r = m.residual(&THETA, &task.data()).unwrap();
    assert!(r.iter().all(|ri| ri.abs() < 1e-8), "{r:?}");

    // warm-started re-solve gives the same gradient
    let again = meta_grad(&mut m, &THETA, &task);
    let expected = closed_form(&task);
    for k in 0..D {
        assert_relative_eq!(again[k], expected[k], epsilon = 1e-6);
    }
}
