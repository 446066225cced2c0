use approx::assert_relative_eq;
use metagrad::{grad, hvp_groups, Dual, Reverse, Scalar};

/// f(x) = x0² x1 + x1³, H = [[2x1, 2x0], [2x0, 6x1]].
fn cubic<T: Scalar>(x: &[T]) -> T {
    x[0] * x[0] * x[1] + x[1] * x[1] * x[1]
}

#[test]
fn hessian_vector_product() {
    let x = [1.5, -0.5];
    let v = [2.0, 1.0];
    let (f, dir_deriv, hv) = hvp_groups(|a| cubic(a[0]), &[&x], 0, &v, &[0]).unwrap();

    assert_relative_eq!(f, cubic(&x), max_relative = 1e-12);
    // ∇f = (2 x0 x1, x0² + 3 x1²)
    let g = [2.0 * x[0] * x[1], x[0] * x[0] + 3.0 * x[1] * x[1]];
    assert_relative_eq!(dir_deriv, g[0] * v[0] + g[1] * v[1], max_relative = 1e-12);
    let h = [[2.0 * x[1], 2.0 * x[0]], [2.0 * x[0], 6.0 * x[1]]];
    for i in 0..2 {
        assert_relative_eq!(
            hv[0][i],
            h[i][0] * v[0] + h[i][1] * v[1],
            max_relative = 1e-12
        );
    }
}

#[test]
fn mixed_second_derivative() {
    // f(φ, θ) = Σ φ_i² θ_i; ∂/∂θ (∇φ f · v) = 2 φ ⊙ v
    let phi = [1.0, 2.0, -1.0];
    let theta = [0.5, 0.25, 3.0];
    let v = [1.0, -1.0, 2.0];
    let (_, _, out) = hvp_groups(
        |a| {
            a[0].iter()
                .zip(a[1])
                .fold(Dual::constant(Reverse::constant(0.0)), |acc, (&p, &t)| {
                    acc + p * p * t
                })
        },
        &[&phi, &theta],
        0,
        &v,
        &[1, 0],
    )
    .unwrap();

    for i in 0..3 {
        assert_relative_eq!(out[0][i], 2.0 * phi[i] * v[i], max_relative = 1e-12);
        // H_φφ = diag(2θ)
        assert_relative_eq!(out[1][i], 2.0 * theta[i] * v[i], max_relative = 1e-12);
    }
}

#[test]
fn hvp_matches_finite_difference_of_gradient() {
    fn f<T: Scalar>(x: &[T]) -> T {
        (x[0] * x[1]).sin() + x[0].exp() * x[1]
    }
    let x = [0.3, 0.7];
    let v = [0.6, -0.8];
    let (_, _, hv) = hvp_groups(|a| f(a[0]), &[&x], 0, &v, &[0]).unwrap();

    let h = 1e-6;
    let xp = [x[0] + h * v[0], x[1] + h * v[1]];
    let xm = [x[0] - h * v[0], x[1] - h * v[1]];
    let gp = grad(|z: &[Reverse<f64>]| f(z), &xp).unwrap();
    let gm = grad(|z: &[Reverse<f64>]| f(z), &xm).unwrap();
    for i in 0..2 {
        let fd = (gp[i] - gm[i]) / (2.0 * h);
        assert_relative_eq!(hv[0][i], fd, max_relative = 1e-6);
    }
}

#[test]
fn untouched_direction_gives_zero() {
    // f depends on group 1 only; the tangent lives on group 0
    let (_, d, out) = hvp_groups(
        |a| a[1][0] * a[1][0],
        &[&[1.0], &[3.0]],
        0,
        &[1.0],
        &[0, 1],
    )
    .unwrap();
    assert_eq!(d, 0.0);
    assert_eq!(out, vec![vec![0.0], vec![0.0]]);
}
