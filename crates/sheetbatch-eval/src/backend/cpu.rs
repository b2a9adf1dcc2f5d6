//! Reference CPU backend.
//!
//! Each batched call is evaluated instance by instance; the batching pays
//! off in the engine (one gather, one call, one scatter per group) rather
//! than here. Kernels never panic: bad operands become error values.
//!
//! A numeric array cannot carry per-element error markers. Where a scalar
//! result that is not finite becomes `#NUM!`, the same element of an array
//! result becomes NaN, which the results store reports as `#N/A`.

use std::borrow::Cow;
use std::cmp::Ordering;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sheetbatch_common::{ErrorKind, Payload, TaggedValue, format_number};

use super::named;
use super::operand::Operand;
use super::stats::{mean, variance};
use super::{BatchRequest, Column, ComputeBackend};
use crate::engine::EngineConfig;
use crate::repository::{SortKey, search_sorted};

pub const DEFAULT_MC_PATHS: usize = 10_000;

/// Operations the formula path implements, for arity checking.
const FORMULA_OPS: &[&str] = &[
    "+", "-", "*", "/", "^", "<", ">", "RAND", "SUM", "AVERAGE", "POWER", "TRANSPOSE", "MMULT",
    "VLOOKUP", "SUMPRODUCT", "IFERROR", "CONCATENATE", "VAR.P", "VARP", "VAR.S", "VAR",
];

pub struct CpuBackend {
    rng: SmallRng,
    mc_paths: usize,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
            mc_paths: DEFAULT_MC_PATHS,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            mc_paths: DEFAULT_MC_PATHS,
        }
    }

    /// Seed and Monte-Carlo path count taken from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let backend = match config.rng_seed {
            Some(seed) => Self::seeded(seed),
            None => Self::new(),
        };
        backend.with_mc_paths(config.mc_paths)
    }

    pub fn with_mc_paths(mut self, paths: usize) -> Self {
        self.mc_paths = paths.max(1);
        self
    }

    /// Resolve every argument of every instance and run `kernel` on it.
    fn run_instances(
        &mut self,
        request: &BatchRequest<'_>,
        mut kernel: impl FnMut(&mut Self, &[Operand<'_>]) -> TaggedValue,
    ) -> Column {
        let mut out = Vec::with_capacity(request.instances);
        for n in 0..request.instances {
            let mut operands = Vec::with_capacity(request.arity());
            let mut failed = None;
            for column in request.args {
                let resolved = column
                    .get(n)
                    .ok_or(ErrorKind::Value)
                    .and_then(|value| Operand::resolve(value, request.ranges));
                match resolved {
                    Ok(op) => operands.push(op),
                    Err(kind) => {
                        failed = Some(kind);
                        break;
                    }
                }
            }
            out.push(match failed {
                Some(kind) => TaggedValue::error(kind),
                None => kernel(self, &operands),
            });
        }
        out
    }

    fn formula_op(&mut self, op: &str, args: &[Operand<'_>]) -> TaggedValue {
        match (op, args) {
            ("+", [a, b]) => arithmetic(Arith::Add, a, b),
            ("-", [a, b]) => arithmetic(Arith::Sub, a, b),
            ("*", [a, b]) => arithmetic(Arith::Mul, a, b),
            ("/", [a, b]) => arithmetic(Arith::Div, a, b),
            ("^" | "POWER", [a, b]) => arithmetic(Arith::Pow, a, b),
            ("<", [a, b]) => compare(a, b, Ordering::Less),
            (">", [a, b]) => compare(a, b, Ordering::Greater),
            ("RAND", []) => TaggedValue::number(self.rng.r#gen::<f64>()),
            ("SUM", _) => match collect_numbers(args) {
                Ok(nums) => TaggedValue::number(nums.iter().sum()),
                Err(kind) => TaggedValue::error(kind),
            },
            ("AVERAGE", _) => match collect_numbers(args) {
                Ok(nums) => mean(&nums).map_or(TaggedValue::error(ErrorKind::Div), TaggedValue::number),
                Err(kind) => TaggedValue::error(kind),
            },
            ("VAR.P" | "VARP", _) => var(args, 0),
            ("VAR.S" | "VAR", _) => var(args, 1),
            ("TRANSPOSE", [a]) => transpose(a),
            ("MMULT", [a, b]) => mmult(a, b),
            ("VLOOKUP", [needle, table, col]) => vlookup(needle, table, col, None),
            ("VLOOKUP", [needle, table, col, mode]) => vlookup(needle, table, col, Some(mode)),
            ("SUMPRODUCT", [_, ..]) => sumproduct(args),
            ("IFERROR", [value, fallback]) => iferror(value, fallback),
            ("CONCATENATE", _) => concatenate(args),
            _ if FORMULA_OPS.contains(&op) => TaggedValue::error(ErrorKind::Value),
            _ => TaggedValue::error(ErrorKind::UnknownFormulaOp),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn compute_batched(&mut self, request: BatchRequest<'_>) -> Column {
        let op = request.op.to_ascii_uppercase();
        self.run_instances(&request, |backend, args| backend.formula_op(&op, args))
    }

    fn compute_named(&mut self, request: BatchRequest<'_>) -> Column {
        let op = request.op.to_ascii_uppercase();
        self.run_instances(&request, |backend, args| {
            let paths = backend.mc_paths;
            named::named_op(&mut backend.rng, paths, &op, args)
        })
    }
}

/* ─────────────────────────── kernels ─────────────────────────── */

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl Arith {
    fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            Arith::Add => x + y,
            Arith::Sub => x - y,
            Arith::Mul => x * y,
            Arith::Div => x / y,
            Arith::Pow => x.powf(y),
        }
    }
}

/// `(rows, cols, data)` of a numeric operand; scalars are coerced.
pub(super) fn grid<'o>(operand: &'o Operand<'_>) -> Option<(usize, usize, Cow<'o, [f64]>)> {
    if let Some(v) = operand.floats() {
        return Some((operand.rows(), operand.cols(), Cow::Borrowed(v)));
    }
    operand.number().map(|n| (1, 1, Cow::Owned(vec![n])))
}

fn first_error(args: &[&Operand<'_>]) -> Option<ErrorKind> {
    args.iter().find_map(|a| a.error())
}

/// Non-finite elements are normalized to NaN.
fn float_result(rows: usize, cols: usize, mut data: Vec<f64>) -> TaggedValue {
    for x in data.iter_mut().filter(|x| x.is_infinite()) {
        *x = f64::NAN;
    }
    TaggedValue::float_array(rows as u32, cols as u32, data)
        .unwrap_or_else(|_| TaggedValue::error(ErrorKind::Value))
}

fn arithmetic(op: Arith, a: &Operand<'_>, b: &Operand<'_>) -> TaggedValue {
    if let Some(kind) = first_error(&[a, b]) {
        return TaggedValue::error(kind);
    }
    if a.is_scalar() && b.is_scalar() {
        let (Some(x), Some(y)) = (a.number(), b.number()) else {
            return TaggedValue::error(ErrorKind::Value);
        };
        if matches!(op, Arith::Div) && y == 0.0 {
            return TaggedValue::error(ErrorKind::Div);
        }
        let r = op.apply(x, y);
        if !r.is_finite() {
            return TaggedValue::error(ErrorKind::Num);
        }
        return TaggedValue::number(r);
    }

    let (Some((ar, ac, xs)), Some((br, bc, ys))) = (grid(a), grid(b)) else {
        return TaggedValue::error(ErrorKind::Value);
    };
    if xs.len() == 1 {
        let x = xs[0];
        return float_result(br, bc, ys.iter().map(|y| op.apply(x, *y)).collect());
    }
    if ys.len() == 1 {
        let y = ys[0];
        return float_result(ar, ac, xs.iter().map(|x| op.apply(*x, y)).collect());
    }

    // elementwise over the larger shape; cells outside the overlap are NaN
    let (rows, cols) = (ar.max(br), ac.max(bc));
    let mut out = Vec::with_capacity(rows * cols);
    for c in 0..cols {
        for r in 0..rows {
            if r < ar.min(br) && c < ac.min(bc) {
                out.push(op.apply(xs[c * ar + r], ys[c * br + r]));
            } else {
                out.push(f64::NAN);
            }
        }
    }
    float_result(rows, cols, out)
}

fn scalar_key(value: &TaggedValue) -> Option<SortKey<'_>> {
    match value.payload() {
        Payload::Float(n) => Some(SortKey::Number(*n)),
        Payload::Empty => Some(SortKey::Number(0.0)),
        Payload::Text(s) => Some(SortKey::Text(s)),
        _ => None,
    }
}

fn compare(a: &Operand<'_>, b: &Operand<'_>, want: Ordering) -> TaggedValue {
    if let Some(kind) = first_error(&[a, b]) {
        return TaggedValue::error(kind);
    }
    if !(a.is_scalar() && b.is_scalar()) {
        return TaggedValue::error(ErrorKind::Value);
    }
    let (Some(x), Some(y)) = (scalar_key(a.original()), scalar_key(b.original())) else {
        return TaggedValue::error(ErrorKind::Value);
    };
    let holds = x.cmp_ordinal(&y) == want;
    TaggedValue::text(if holds { "TRUE" } else { "FALSE" })
}

/// Numbers from every argument. Text inside arrays is skipped, direct text
/// must be numeric, errors propagate.
fn collect_numbers(args: &[Operand<'_>]) -> Result<Vec<f64>, ErrorKind> {
    let mut nums = Vec::new();
    for arg in args {
        if let Some(kind) = arg.error() {
            return Err(kind);
        }
        if let Some(v) = arg.floats() {
            nums.extend_from_slice(v);
            continue;
        }
        if !arg.is_scalar() {
            continue;
        }
        match arg.original().payload() {
            Payload::Empty => {}
            _ => nums.push(arg.number().ok_or(ErrorKind::Value)?),
        }
    }
    Ok(nums)
}

fn var(args: &[Operand<'_>], ddof: usize) -> TaggedValue {
    match collect_numbers(args) {
        Ok(nums) => variance(&nums, ddof).map_or(TaggedValue::error(ErrorKind::Div), TaggedValue::number),
        Err(kind) => TaggedValue::error(kind),
    }
}

fn transpose(a: &Operand<'_>) -> TaggedValue {
    if let Some(kind) = a.error() {
        return TaggedValue::error(kind);
    }
    if a.is_scalar() {
        return a.original().clone();
    }
    let (rows, cols) = (a.rows(), a.cols());
    // output is cols × rows; output (r, c) is input (c, r)
    let order: Vec<usize> = (0..rows)
        .flat_map(|c_out| (0..cols).map(move |r_out| r_out * rows + c_out))
        .collect();
    let built = if let Some(v) = a.floats() {
        TaggedValue::float_array(cols as u32, rows as u32, order.iter().map(|i| v[*i]).collect())
    } else if let Some(v) = a.texts() {
        TaggedValue::text_array(
            cols as u32,
            rows as u32,
            order.iter().map(|i| v[*i].clone()).collect(),
        )
    } else {
        return TaggedValue::error(ErrorKind::Value);
    };
    built.unwrap_or_else(|_| TaggedValue::error(ErrorKind::Value))
}

fn mmult(a: &Operand<'_>, b: &Operand<'_>) -> TaggedValue {
    if let Some(kind) = first_error(&[a, b]) {
        return TaggedValue::error(kind);
    }
    let (Some((ar, ac, x)), Some((br, bc, y))) = (grid(a), grid(b)) else {
        return TaggedValue::error(ErrorKind::Value);
    };
    if ac != br {
        return TaggedValue::error(ErrorKind::Value);
    }
    let mut out = vec![0.0; ar * bc];
    for j in 0..bc {
        for i in 0..ar {
            out[j * ar + i] = (0..ac).map(|k| x[k * ar + i] * y[j * br + k]).sum();
        }
    }
    float_result(ar, bc, out)
}

fn vlookup(
    needle: &Operand<'_>,
    table: &Operand<'_>,
    col: &Operand<'_>,
    mode: Option<&Operand<'_>>,
) -> TaggedValue {
    if let Some(kind) = first_error(&[needle, table, col]) {
        return TaggedValue::error(kind);
    }
    let Some(col) = col.number().map(f64::trunc) else {
        return TaggedValue::error(ErrorKind::Value);
    };
    if col < 1.0 {
        return TaggedValue::error(ErrorKind::Value);
    }
    if col as usize > table.cols() {
        return TaggedValue::error(ErrorKind::Ref);
    }
    let exact = match mode.map(|m| m.original().payload()) {
        None => false,
        Some(Payload::Text(s)) => s.eq_ignore_ascii_case("FALSE"),
        Some(Payload::Float(n)) => *n == 0.0,
        Some(Payload::Empty) => true,
        Some(_) => false,
    };

    let numeric_table = table.floats().is_some();
    let rendered;
    let key = match needle.original().payload() {
        Payload::Float(n) if numeric_table => SortKey::Number(*n),
        Payload::Float(n) => {
            rendered = format_number(*n);
            SortKey::Text(&rendered)
        }
        Payload::Text(s) if numeric_table => match s.trim().parse::<f64>() {
            Ok(n) => SortKey::Number(n),
            Err(_) => SortKey::Text(s),
        },
        Payload::Text(s) => SortKey::Text(s),
        Payload::Empty if numeric_table => SortKey::Number(0.0),
        Payload::Empty => SortKey::Text(""),
        _ => return TaggedValue::error(ErrorKind::Value),
    };

    let order = table.first_column_order();
    let found = search_sorted(
        &order,
        |r| {
            table
                .first_column_key(r)
                .unwrap_or(SortKey::Number(f64::NAN))
        },
        key,
    );
    let row = match found {
        Ok(pos) => order[pos] as usize,
        Err(_) if exact => return TaggedValue::error(ErrorKind::Na),
        Err(0) => return TaggedValue::error(ErrorKind::Na),
        Err(pos) => order[pos - 1] as usize,
    };

    match table.at(row, col as usize - 1) {
        Some(hit) => match hit.as_text().and_then(|s| s.trim().parse::<f64>().ok()) {
            Some(n) => TaggedValue::number(n),
            None => hit,
        },
        None => TaggedValue::error(ErrorKind::Ref),
    }
}

fn sumproduct(args: &[Operand<'_>]) -> TaggedValue {
    if let Some(kind) = args.iter().find_map(|a| a.error()) {
        return TaggedValue::error(kind);
    }
    let grids: Option<Vec<_>> = args.iter().map(grid).collect();
    let Some(grids) = grids else {
        return TaggedValue::error(ErrorKind::Value);
    };
    let (rows, cols) = (grids[0].0, grids[0].1);
    if grids.iter().any(|(r, c, _)| *r != rows || *c != cols) {
        return TaggedValue::error(ErrorKind::Value);
    }
    let total = (0..rows * cols)
        .map(|i| grids.iter().map(|(_, _, data)| data[i]).product::<f64>())
        .sum();
    TaggedValue::number(total)
}

fn iferror(value: &Operand<'_>, fallback: &Operand<'_>) -> TaggedValue {
    if value.error().is_some() {
        fallback.original().clone()
    } else {
        value.original().clone()
    }
}

fn concatenate(args: &[Operand<'_>]) -> TaggedValue {
    let mut out = String::new();
    for arg in args {
        if let Some(kind) = arg.error() {
            return TaggedValue::error(kind);
        }
        if !arg.is_scalar() {
            return TaggedValue::error(ErrorKind::Value);
        }
        match arg.original().payload() {
            Payload::Float(n) => out.push_str(&format_number(*n)),
            Payload::Text(s) => out.push_str(s),
            _ => {}
        }
    }
    TaggedValue::text(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RangeRepository;

    fn call(op: &str, args: Vec<TaggedValue>) -> TaggedValue {
        let repo = RangeRepository::new();
        let columns: Vec<Column> = args.into_iter().map(|v| vec![v]).collect();
        let mut backend = CpuBackend::seeded(1);
        let mut out = backend.compute_batched(BatchRequest::new(op, &columns, 1, &repo));
        out.remove(0)
    }

    fn n(x: f64) -> TaggedValue {
        TaggedValue::number(x)
    }

    fn col(values: &[f64]) -> TaggedValue {
        TaggedValue::float_array(values.len() as u32, 1, values.to_vec()).unwrap()
    }

    #[test]
    fn scalar_arithmetic() {
        assert_eq!(call("+", vec![n(2.0), n(3.0)]), n(5.0));
        assert_eq!(call("^", vec![n(2.0), n(10.0)]), n(1024.0));
        assert_eq!(call("-", vec![TaggedValue::text("7"), n(2.0)]), n(5.0));
        assert_eq!(
            call("/", vec![n(1.0), n(0.0)]).as_error(),
            Some(ErrorKind::Div)
        );
        assert_eq!(
            call("*", vec![TaggedValue::text("x"), n(2.0)]).as_error(),
            Some(ErrorKind::Value)
        );
    }

    #[test]
    fn array_arithmetic_uses_overlap() {
        let a = col(&[1.0, 2.0, 3.0]);
        let b = col(&[10.0, 20.0]);
        let out = call("+", vec![a.clone(), b]);
        match out.payload() {
            Payload::FloatArray(v) => {
                assert_eq!(&v[..2], &[11.0, 22.0]);
                assert!(v[2].is_nan());
            }
            other => panic!("unexpected {other:?}"),
        }
        let scaled = call("*", vec![n(2.0), a]);
        assert_eq!(scaled.payload(), &Payload::FloatArray(vec![2.0, 4.0, 6.0]));
    }

    #[test]
    fn overflow_is_num_for_scalars_and_nan_inside_arrays() {
        assert_eq!(
            call("*", vec![n(1e308), n(10.0)]).as_error(),
            Some(ErrorKind::Num)
        );
        let out = call("*", vec![col(&[1e308, 1.0]), n(10.0)]);
        match out.payload() {
            Payload::FloatArray(v) => {
                assert!(v[0].is_nan());
                assert_eq!(v[1], 10.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comparisons_yield_text_booleans() {
        assert_eq!(call("<", vec![n(1.0), n(2.0)]).as_text(), Some("TRUE"));
        assert_eq!(call(">", vec![n(1.0), n(2.0)]).as_text(), Some("FALSE"));
        assert_eq!(
            call(">", vec![TaggedValue::text("b"), TaggedValue::text("a")]).as_text(),
            Some("TRUE")
        );
    }

    #[test]
    fn aggregates() {
        assert_eq!(call("SUM", vec![col(&[1.0, 2.0]), n(3.0)]), n(6.0));
        assert_eq!(call("AVERAGE", vec![col(&[1.0, 2.0, 6.0])]), n(3.0));
        assert_eq!(
            call("AVERAGE", vec![]).as_error(),
            Some(ErrorKind::Div)
        );
        assert_eq!(call("VAR.P", vec![col(&[1.0, 3.0])]), n(1.0));
        assert_eq!(call("VAR", vec![col(&[1.0, 3.0])]), n(2.0));
    }

    #[test]
    fn transpose_and_mmult() {
        // 2x3 column-major: rows (1 2 3) / (4 5 6)
        let m = TaggedValue::float_array(2, 3, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        let t = call("TRANSPOSE", vec![m.clone()]);
        assert_eq!((t.rows(), t.cols()), (3, 2));
        assert_eq!(
            t.payload(),
            &Payload::FloatArray(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        );
        let p = call("MMULT", vec![m.clone(), t]);
        // [[14, 32], [32, 77]]
        assert_eq!(p.payload(), &Payload::FloatArray(vec![14.0, 32.0, 32.0, 77.0]));
        assert_eq!(
            call("MMULT", vec![m.clone(), m]).as_error(),
            Some(ErrorKind::Value)
        );
    }

    #[test]
    fn sumproduct_checks_shapes() {
        assert_eq!(
            call("SUMPRODUCT", vec![col(&[1.0, 2.0]), col(&[3.0, 4.0])]),
            n(11.0)
        );
        assert_eq!(
            call("SUMPRODUCT", vec![col(&[1.0, 2.0]), col(&[3.0])]).as_error(),
            Some(ErrorKind::Value)
        );
    }

    #[test]
    fn iferror_and_concatenate() {
        let err = TaggedValue::error(ErrorKind::Na);
        assert_eq!(call("IFERROR", vec![err, n(0.0)]), n(0.0));
        assert_eq!(call("IFERROR", vec![n(4.0), n(0.0)]), n(4.0));
        assert_eq!(
            call(
                "CONCATENATE",
                vec![TaggedValue::text("a"), TaggedValue::empty(), n(1.0)]
            )
            .as_text(),
            Some("a1")
        );
    }

    #[test]
    fn unknown_and_misused_operations() {
        assert_eq!(
            call("FROBNICATE", vec![n(1.0)]).as_error(),
            Some(ErrorKind::UnknownFormulaOp)
        );
        assert_eq!(
            call("TRANSPOSE", vec![n(1.0), n(2.0)]).as_error(),
            Some(ErrorKind::Value)
        );
    }

    #[test]
    fn errors_propagate_through_arithmetic() {
        let err = TaggedValue::error(ErrorKind::Ref);
        assert_eq!(call("+", vec![err, n(1.0)]).as_error(), Some(ErrorKind::Ref));
    }

    #[test]
    fn seeded_rand_is_reproducible() {
        let a = call("RAND", vec![]);
        let b = call("RAND", vec![]);
        assert_eq!(a, b);
        let x = a.as_number().unwrap();
        assert!((0.0..1.0).contains(&x));
    }
}
