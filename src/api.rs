use crate::dual::Dual;
use crate::error::AdError;
use crate::float::Float;
use crate::reverse::Reverse;
use crate::tape::{Tape, TapeGuard, TapeThreadLocal, CONSTANT};

/// Compute the gradient of a scalar function `f : R^n → R` using reverse mode.
///
/// Fails only when a custom node recorded by `f` fails in its reverse rule.
///
/// ```
/// let g = metagrad::grad(|x: &[metagrad::Reverse<f64>]| {
///     x[0] * x[0] + x[1] * x[1]
/// }, &[3.0, 4.0]).unwrap();
/// assert!((g[0] - 6.0).abs() < 1e-10);
/// assert!((g[1] - 8.0).abs() < 1e-10);
/// ```
pub fn grad<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[Reverse<F>]) -> Reverse<F>,
    x: &[F],
) -> Result<Vec<F>, AdError> {
    try_grad(|x| Ok::<_, AdError>(f(x)), x)
}

/// [`grad`] for a fallible function. Errors returned by `f` reach the caller
/// unchanged; reverse-sweep failures are converted through `E: From<AdError>`.
pub fn try_grad<F, E>(
    f: impl FnOnce(&[Reverse<F>]) -> Result<Reverse<F>, E>,
    x: &[F],
) -> Result<Vec<F>, E>
where
    F: Float + TapeThreadLocal,
    E: From<AdError>,
{
    let n = x.len();
    let mut tape = Tape::with_capacity(n * 10);
    let inputs = new_inputs(&mut tape, x);

    let _guard = TapeGuard::new(&mut tape);
    let output = f(&inputs)?;

    let adjoints = tape.reverse(output.index)?;
    Ok(adjoints[..n].to_vec())
}

/// Jacobian-vector product (forward mode): `(f(x), J·v)`.
///
/// Evaluates `f` at `x` and computes the directional derivative in direction `v`.
pub fn jvp<F: Float + crate::Scalar>(
    f: impl FnOnce(&[Dual<F>]) -> Vec<Dual<F>>,
    x: &[F],
    v: &[F],
) -> Result<(Vec<F>, Vec<F>), AdError> {
    check_len("tangent", x.len(), v.len())?;
    let inputs: Vec<Dual<F>> = x
        .iter()
        .zip(v.iter())
        .map(|(&xi, &vi)| Dual::new(xi, vi))
        .collect();
    let outputs = f(&inputs);
    let values = outputs.iter().map(|d| d.re).collect();
    let tangents = outputs.iter().map(|d| d.eps).collect();
    Ok((values, tangents))
}

/// Vector-Jacobian product (reverse mode): `(f(x), wᵀ·J)`.
///
/// Evaluates `f` at `x` and computes the adjoint product with weights `w`.
pub fn vjp<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[Reverse<F>]) -> Vec<Reverse<F>>,
    x: &[F],
    w: &[F],
) -> Result<(Vec<F>, Vec<F>), AdError> {
    let (values, mut grads) = vjp_groups(|args| f(args[0]), &[x], &[0], w)?;
    Ok((values, grads.swap_remove(0)))
}

/// Gradient of a scalar function of several argument groups with respect to
/// the groups listed in `wrt`.
///
/// Groups not listed in `wrt` are passed as constants and cost nothing on the
/// tape. The result holds one gradient per entry of `wrt`, in that order.
///
/// ```
/// use metagrad::{grad_groups, Reverse};
///
/// let g = grad_groups(
///     |a: &[&[Reverse<f64>]]| a[0][0] * a[1][0],
///     &[&[3.0], &[4.0]],
///     &[1],
/// )
/// .unwrap();
/// assert_eq!(g, vec![vec![3.0]]);
/// ```
pub fn grad_groups<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[&[Reverse<F>]]) -> Reverse<F>,
    args: &[&[F]],
    wrt: &[usize],
) -> Result<Vec<Vec<F>>, AdError> {
    let (_, grads) = vjp_groups(|a| vec![f(a)], args, wrt, &[F::one()])?;
    Ok(grads)
}

/// Vector-Jacobian product of a multi-output function of several argument
/// groups: one reverse sweep seeded with `w`, adjoints returned for every
/// group in `wrt`.
pub fn vjp_groups<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[&[Reverse<F>]]) -> Vec<Reverse<F>>,
    args: &[&[F]],
    wrt: &[usize],
    w: &[F],
) -> Result<(Vec<F>, Vec<Vec<F>>), AdError> {
    let tracked = tracked_mask(args.len(), wrt)?;
    let mut tape = Tape::with_capacity(args.iter().map(|a| a.len()).sum::<usize>() * 10);
    let groups: Vec<Vec<Reverse<F>>> = args
        .iter()
        .zip(&tracked)
        .map(|(arg, &t)| {
            if t {
                new_inputs(&mut tape, arg)
            } else {
                arg.iter().map(|&v| Reverse::constant(v)).collect()
            }
        })
        .collect();
    let views: Vec<&[Reverse<F>]> = groups.iter().map(Vec::as_slice).collect();

    let _guard = TapeGuard::new(&mut tape);
    let outputs = f(&views);
    check_len("output weights", outputs.len(), w.len())?;

    let values: Vec<F> = outputs.iter().map(|r| r.value).collect();
    let seeds: Vec<(u32, F)> = outputs
        .iter()
        .zip(w.iter())
        .filter(|(r, _)| r.index != CONSTANT)
        .map(|(r, &wi)| (r.index, wi))
        .collect();
    let adjoints = tape.reverse_seeded(&seeds)?;

    Ok((values, collect_adjoints(&groups, wrt, &adjoints)))
}

/// Forward-mode product with a tangent `v` placed on the single group `wrt`;
/// every other group is held constant. Returns `(f(args), J_wrt·v)`.
pub fn jvp_group<F: Float + crate::Scalar>(
    f: impl FnOnce(&[&[Dual<F>]]) -> Vec<Dual<F>>,
    args: &[&[F]],
    wrt: usize,
    v: &[F],
) -> Result<(Vec<F>, Vec<F>), AdError> {
    let target = args.get(wrt).ok_or(AdError::ArgOutOfRange {
        index: wrt,
        len: args.len(),
    })?;
    check_len("tangent", target.len(), v.len())?;

    let groups: Vec<Vec<Dual<F>>> = args
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            if i == wrt {
                arg.iter().zip(v).map(|(&x, &t)| Dual::new(x, t)).collect()
            } else {
                arg.iter().map(|&x| Dual::constant(x)).collect()
            }
        })
        .collect();
    let views: Vec<&[Dual<F>]> = groups.iter().map(Vec::as_slice).collect();

    let outputs = f(&views);
    let values = outputs.iter().map(|d| d.re).collect();
    let tangents = outputs.iter().map(|d| d.eps).collect();
    Ok((values, tangents))
}

/// Forward-over-reverse second-order product.
///
/// Evaluates the scalar `f` with tangent `v` on group `dir` and records the
/// tangent computation on a tape; reversing from the tangent gives
/// `∂/∂args[g] (∇_dir f · v)` for every `g` in `wrt`. With `g == dir` this is
/// the Hessian-vector product `H·v`; with another group it is the mixed
/// second derivative applied to `v`.
///
/// Returns `(f(args), ∇_dir f · v, products)`.
pub fn hvp_groups<F: Float + TapeThreadLocal>(
    f: impl FnOnce(&[&[Dual<Reverse<F>>]]) -> Dual<Reverse<F>>,
    args: &[&[F]],
    dir: usize,
    v: &[F],
    wrt: &[usize],
) -> Result<(F, F, Vec<Vec<F>>), AdError> {
    let tracked = tracked_mask(args.len(), wrt)?;
    let target = args.get(dir).ok_or(AdError::ArgOutOfRange {
        index: dir,
        len: args.len(),
    })?;
    check_len("tangent", target.len(), v.len())?;

    let mut tape = Tape::with_capacity(args.iter().map(|a| a.len()).sum::<usize>() * 20);
    let primals: Vec<Vec<Reverse<F>>> = args
        .iter()
        .zip(&tracked)
        .map(|(arg, &t)| {
            if t {
                new_inputs(&mut tape, arg)
            } else {
                arg.iter().map(|&x| Reverse::constant(x)).collect()
            }
        })
        .collect();
    let groups: Vec<Vec<Dual<Reverse<F>>>> = primals
        .iter()
        .enumerate()
        .map(|(i, group)| {
            group
                .iter()
                .enumerate()
                .map(|(j, &re)| {
                    let eps = if i == dir { v[j] } else { F::zero() };
                    Dual::new(re, Reverse::constant(eps))
                })
                .collect()
        })
        .collect();
    let views: Vec<&[Dual<Reverse<F>>]> = groups.iter().map(Vec::as_slice).collect();

    let _guard = TapeGuard::new(&mut tape);
    let y = f(&views);

    let adjoints = tape.reverse(y.eps.index)?;
    Ok((
        y.re.value,
        y.eps.value,
        collect_adjoints(&primals, wrt, &adjoints),
    ))
}

fn new_inputs<F: Float>(tape: &mut Tape<F>, x: &[F]) -> Vec<Reverse<F>> {
    x.iter()
        .map(|&val| {
            let (idx, v) = tape.new_variable(val);
            Reverse::from_tape(v, idx)
        })
        .collect()
}

fn tracked_mask(num_groups: usize, wrt: &[usize]) -> Result<Vec<bool>, AdError> {
    let mut tracked = vec![false; num_groups];
    for &g in wrt {
        *tracked.get_mut(g).ok_or(AdError::ArgOutOfRange {
            index: g,
            len: num_groups,
        })? = true;
    }
    Ok(tracked)
}

fn collect_adjoints<F: Float>(
    groups: &[Vec<Reverse<F>>],
    wrt: &[usize],
    adjoints: &[F],
) -> Vec<Vec<F>> {
    wrt.iter()
        .map(|&g| {
            groups[g]
                .iter()
                .map(|r| {
                    if r.index == CONSTANT {
                        F::zero()
                    } else {
                        adjoints[r.index as usize]
                    }
                })
                .collect()
        })
        .collect()
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), AdError> {
    if expected == got {
        Ok(())
    } else {
        Err(AdError::ShapeMismatch {
            what,
            expected,
            got,
        })
    }
}
