//! Named operations: workloads requested by name rather than by formula.
//!
//! Parameters are positional. Pricing kernels are elementwise: every
//! parameter is a scalar or an array, and arrays must agree in length.

use std::borrow::Cow;

use rand::Rng;
use rand::rngs::SmallRng;
use sheetbatch_common::{ErrorKind, TaggedValue};

use super::cpu::grid;
use super::operand::Operand;
use super::stats::{mean, norm_cdf, std_normal};

/// Largest sample count `RANDN` produces; larger requests yield `#NUM!`.
pub const MAX_SAMPLES: usize = 1 << 24;

/// Largest step count of one simulated path; larger requests yield `#NUM!`.
pub const MAX_STEPS: usize = 1 << 16;

const NAMED_OPS: &[&str] = &[
    "RANDN",
    "BLACK-SCHOLES-CALL",
    "BLACK-SCHOLES-PUT",
    "MC-WIENER-CALL-PRICE",
    "POWER-TRANSFORM",
    "RANDOM",
    "RAND",
];

pub(super) fn named_op(
    rng: &mut SmallRng,
    mc_paths: usize,
    op: &str,
    args: &[Operand<'_>],
) -> TaggedValue {
    if let Some(kind) = args.iter().find_map(|a| a.error()) {
        return TaggedValue::error(kind);
    }
    let result = match (op, args) {
        ("RANDN", [mean, sd, count]) => randn(rng, mean, sd, count),
        ("BLACK-SCHOLES-CALL", [s, t, k, r, sigma]) => {
            elementwise(&[s, t, k, r, sigma], |p| Ok(black_scholes(p, true)))
        }
        ("BLACK-SCHOLES-PUT", [s, t, k, r, sigma]) => {
            elementwise(&[s, t, k, r, sigma], |p| Ok(black_scholes(p, false)))
        }
        ("MC-WIENER-CALL-PRICE", [s, t, r, sigma, steps, k, style]) => {
            elementwise(&[s, t, r, sigma, steps, k, style], |p| {
                wiener_call(rng, mc_paths, p)
            })
        }
        ("POWER-TRANSFORM", [data, lambda]) => power_transform(data, lambda),
        ("RANDOM" | "RAND", []) => Ok(TaggedValue::number(rng.r#gen::<f64>())),
        _ if NAMED_OPS.contains(&op) => Err(ErrorKind::Value),
        _ => Err(ErrorKind::UnknownNamedOp),
    };
    result.unwrap_or_else(TaggedValue::error)
}

fn scalar(op: &Operand<'_>) -> Result<f64, ErrorKind> {
    op.number().ok_or(ErrorKind::Value)
}

fn randn(
    rng: &mut SmallRng,
    mean: &Operand<'_>,
    sd: &Operand<'_>,
    count: &Operand<'_>,
) -> Result<TaggedValue, ErrorKind> {
    let (mu, sigma) = (scalar(mean)?, scalar(sd)?);
    let count = scalar(count)?.trunc();
    if count.is_nan() || count < 1.0 || sigma < 0.0 {
        return Err(ErrorKind::Value);
    }
    if count > MAX_SAMPLES as f64 {
        return Err(ErrorKind::Num);
    }
    let rows = count as u32;
    let samples = (0..rows).map(|_| mu + sigma * std_normal(rng)).collect();
    TaggedValue::float_array(rows, 1, samples).map_err(|_| ErrorKind::Value)
}

/// Apply `kernel` per element; length-1 parameters broadcast. The result
/// takes the shape of the first array parameter.
fn elementwise(
    params: &[&Operand<'_>],
    mut kernel: impl FnMut(&[f64]) -> Result<f64, ErrorKind>,
) -> Result<TaggedValue, ErrorKind> {
    let grids: Vec<(usize, usize, Cow<'_, [f64]>)> = params
        .iter()
        .map(|p| grid(p).ok_or(ErrorKind::Value))
        .collect::<Result<_, _>>()?;
    let (rows, cols) = grids
        .iter()
        .find(|(_, _, data)| data.len() > 1)
        .map_or((1, 1), |(r, c, _)| (*r, *c));
    let len = rows * cols;
    if grids.iter().any(|(_, _, d)| d.len() != 1 && d.len() != len) {
        return Err(ErrorKind::Value);
    }

    let mut point = vec![0.0; grids.len()];
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        for (slot, (_, _, data)) in point.iter_mut().zip(&grids) {
            *slot = if data.len() == 1 { data[0] } else { data[i] };
        }
        out.push(match kernel(&point) {
            Ok(v) if v.is_finite() => v,
            Ok(_) => return Err(ErrorKind::Num),
            Err(kind) => return Err(kind),
        });
    }
    if len == 1 {
        return Ok(TaggedValue::number(out[0]));
    }
    TaggedValue::float_array(rows as u32, cols as u32, out).map_err(|_| ErrorKind::Value)
}

/// `p` is `[S, T, K, r, sigma]`.
fn black_scholes(p: &[f64], call: bool) -> f64 {
    let (s, t, k, r, sigma) = (p[0], p[1], p[2], p[3], p[4]);
    let vol = sigma * t.sqrt();
    let d1 = ((s / k).ln() + (r + 0.5 * sigma * sigma) * t) / vol;
    let d2 = d1 - vol;
    let discount = k * (-r * t).exp();
    if call {
        s * norm_cdf(d1) - discount * norm_cdf(d2)
    } else {
        discount * norm_cdf(-d2) - s * norm_cdf(-d1)
    }
}

/// European call priced by simulating `paths` geometric Brownian motions
/// of `steps` steps each. `p` is `[S, T, r, sigma, steps, K, style]`; only
/// style 0 (European) is supported.
fn wiener_call(rng: &mut SmallRng, paths: usize, p: &[f64]) -> Result<f64, ErrorKind> {
    let (s0, t, r, sigma, steps, k, style) = (p[0], p[1], p[2], p[3], p[4], p[5], p[6]);
    if style != 0.0 || steps.is_nan() || steps < 1.0 || t < 0.0 || sigma < 0.0 {
        return Err(ErrorKind::Value);
    }
    if steps > MAX_STEPS as f64 {
        return Err(ErrorKind::Num);
    }
    let steps = steps as usize;
    let dt = t / steps as f64;
    let drift = (r - 0.5 * sigma * sigma) * dt;
    let shock = sigma * dt.sqrt();

    let mut payoff = 0.0;
    for _ in 0..paths {
        let mut log_s = s0.ln();
        for _ in 0..steps {
            log_s += drift + shock * std_normal(rng);
        }
        payoff += (log_s.exp() - k).max(0.0);
    }
    Ok((-r * t).exp() * payoff / paths as f64)
}

/// Box-Cox transform normalized by the geometric mean of the data.
fn power_transform(data: &Operand<'_>, lambda: &Operand<'_>) -> Result<TaggedValue, ErrorKind> {
    let lambda = scalar(lambda)?;
    let (rows, cols, values) = grid(data).ok_or(ErrorKind::Value)?;
    if values.iter().any(|a| *a <= 0.0 || !a.is_finite()) {
        return Err(ErrorKind::Num);
    }
    let logs: Vec<f64> = values.iter().map(|a| a.ln()).collect();
    let gm = mean(&logs).ok_or(ErrorKind::Value)?.exp();
    let out: Vec<f64> = if lambda == 0.0 {
        logs.iter().map(|l| gm * l).collect()
    } else {
        let scale = lambda * gm.powf(lambda - 1.0);
        values
            .iter()
            .map(|a| (a.powf(lambda) - 1.0) / scale)
            .collect()
    };
    if out.len() == 1 {
        return Ok(TaggedValue::number(out[0]));
    }
    TaggedValue::float_array(rows as u32, cols as u32, out).map_err(|_| ErrorKind::Value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BatchRequest, Column, ComputeBackend, CpuBackend};
    use crate::repository::RangeRepository;
    use sheetbatch_common::Payload;

    fn named(op: &str, args: Vec<TaggedValue>) -> TaggedValue {
        let repo = RangeRepository::new();
        let columns: Vec<Column> = args.into_iter().map(|v| vec![v]).collect();
        let mut backend = CpuBackend::seeded(7).with_mc_paths(20_000);
        backend
            .compute_named(BatchRequest::new(op, &columns, 1, &repo))
            .remove(0)
    }

    fn n(x: f64) -> TaggedValue {
        TaggedValue::number(x)
    }

    #[test]
    fn black_scholes_reference_prices() {
        // S=100, T=1, K=100, r=5%, sigma=20%
        let args = || vec![n(100.0), n(1.0), n(100.0), n(0.05), n(0.2)];
        let call = named("BLACK-SCHOLES-CALL", args()).as_number().unwrap();
        let put = named("black-scholes-put", args()).as_number().unwrap();
        assert!((call - 10.4506).abs() < 1e-3, "call {call}");
        assert!((put - 5.5735).abs() < 1e-3, "put {put}");
        // put-call parity
        let parity = 100.0 - 100.0 * (-0.05f64).exp();
        assert!((call - put - parity).abs() < 1e-6);
    }

    #[test]
    fn black_scholes_broadcasts_arrays() {
        let spots = TaggedValue::float_array(2, 1, vec![90.0, 110.0]).unwrap();
        let out = named(
            "BLACK-SCHOLES-CALL",
            vec![spots, n(1.0), n(100.0), n(0.05), n(0.2)],
        );
        match out.payload() {
            Payload::FloatArray(v) => assert!(v[0] < v[1]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wiener_price_converges_to_closed_form() {
        let mc = named(
            "MC-WIENER-CALL-PRICE",
            vec![n(100.0), n(1.0), n(0.05), n(0.2), n(4.0), n(100.0), n(0.0)],
        )
        .as_number()
        .unwrap();
        assert!((mc - 10.4506).abs() < 0.5, "mc {mc}");

        let american = named(
            "MC-WIENER-CALL-PRICE",
            vec![n(100.0), n(1.0), n(0.05), n(0.2), n(4.0), n(100.0), n(1.0)],
        );
        assert_eq!(american.as_error(), Some(ErrorKind::Value));
    }

    #[test]
    fn randn_shapes_and_validates_count() {
        let out = named("RANDN", vec![n(0.0), n(1.0), n(5.0)]);
        assert_eq!((out.rows(), out.cols()), (5, 1));
        assert_eq!(
            named("RANDN", vec![n(0.0), n(1.0), n(0.0)]).as_error(),
            Some(ErrorKind::Value)
        );
    }

    #[test]
    fn oversized_sample_and_step_counts_are_refused() {
        assert_eq!(
            named("RANDN", vec![n(0.0), n(1.0), n(1e13)]).as_error(),
            Some(ErrorKind::Num)
        );
        assert_eq!(
            named("RANDN", vec![n(0.0), n(1.0), n(f64::NAN)]).as_error(),
            Some(ErrorKind::Value)
        );
        let edge = named("RANDN", vec![n(0.0), n(1.0), n(MAX_SAMPLES as f64 + 1.0)]);
        assert_eq!(edge.as_error(), Some(ErrorKind::Num));

        let steps = (MAX_STEPS + 1) as f64;
        let out = named(
            "MC-WIENER-CALL-PRICE",
            vec![n(100.0), n(1.0), n(0.05), n(0.2), n(steps), n(100.0), n(0.0)],
        );
        assert_eq!(out.as_error(), Some(ErrorKind::Num));
    }

    #[test]
    fn power_transform_log_case_and_domain() {
        let data = TaggedValue::float_array(2, 1, vec![1.0, 4.0]).unwrap();
        // gm = 2; lambda 0 gives gm * ln(a)
        let out = named("POWER-TRANSFORM", vec![data.clone(), n(0.0)]);
        match out.payload() {
            Payload::FloatArray(v) => {
                assert!(v[0].abs() < 1e-12);
                assert!((v[1] - 2.0 * 4f64.ln()).abs() < 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
        // lambda 1 gives a - 1
        let linear = named("POWER-TRANSFORM", vec![data, n(1.0)]);
        assert_eq!(linear.payload(), &Payload::FloatArray(vec![0.0, 3.0]));

        let bad = TaggedValue::float_array(2, 1, vec![1.0, -4.0]).unwrap();
        assert_eq!(
            named("POWER-TRANSFORM", vec![bad, n(0.5)]).as_error(),
            Some(ErrorKind::Num)
        );
    }

    #[test]
    fn random_has_no_parameters() {
        let x = named("RANDOM", vec![]).as_number().unwrap();
        assert!((0.0..1.0).contains(&x));
        assert_eq!(
            named("RANDOM", vec![n(1.0)]).as_error(),
            Some(ErrorKind::Value)
        );
    }

    #[test]
    fn unknown_name_yields_marker() {
        assert_eq!(
            named("STUTZER", vec![n(1.0)]).as_error(),
            Some(ErrorKind::UnknownNamedOp)
        );
    }
}
