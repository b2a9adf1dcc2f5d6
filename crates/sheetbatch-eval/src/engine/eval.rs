use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use sheetbatch_common::{CellRef, ErrorKind, RangeKey, RangeSpan, TaggedValue};
use sheetbatch_parse::{Token, TokenKind};

use super::EngineConfig;
use super::formulas::{FormulaTable, is_range_endpoint, range_endpoints};
use super::scheduler::Scheduler;
use crate::backend::{BatchRequest, Column, ComputeBackend, ExclusiveBackend};
use crate::error::{EngineError, GroupError};
use crate::repository::{RangeEntry, RangeRepository, RangeValues, text_cell};
use crate::spill;
use crate::workbook::{RunOutput, RunStats, SheetResults, WorkbookInput};

pub struct Engine<B: ComputeBackend> {
    config: EngineConfig,
    backend: ExclusiveBackend<B>,
    ranges: RangeRepository,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
}

/// Formulas of one level sharing a signature.
#[derive(Debug)]
struct Group<'t> {
    signature: &'t str,
    cells: Vec<CellRef>,
}

impl<B: ComputeBackend> Engine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        // Fall back to sequential evaluation if thread pool creation fails
        let thread_pool = build_pool(&config).ok().flatten();
        Self::assemble(backend, config, thread_pool)
    }

    /// Like [`Engine::new`], but a thread pool that cannot be built is an
    /// error instead of a silent switch to sequential evaluation.
    pub fn try_new(backend: B, config: EngineConfig) -> Result<Self, EngineError> {
        let thread_pool = build_pool(&config)?;
        Ok(Self::assemble(backend, config, thread_pool))
    }

    fn assemble(
        backend: B,
        config: EngineConfig,
        thread_pool: Option<Arc<rayon::ThreadPool>>,
    ) -> Self {
        Self {
            config,
            backend: ExclusiveBackend::new(backend),
            ranges: RangeRepository::new(),
            thread_pool,
        }
    }

    /// Create an Engine with a custom thread pool (for shared thread pool scenarios)
    pub fn with_thread_pool(
        backend: B,
        config: EngineConfig,
        thread_pool: Arc<rayon::ThreadPool>,
    ) -> Self {
        Self::assemble(backend, config, Some(thread_pool))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &ExclusiveBackend<B> {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend.into_inner()
    }

    /// Ranges memoized by the most recent run.
    pub fn ranges(&self) -> &RangeRepository {
        &self.ranges
    }

    pub fn thread_pool(&self) -> Option<&Arc<rayon::ThreadPool>> {
        self.thread_pool.as_ref()
    }

    /// Run a named operation outside of any workbook.
    pub fn compute_named(&self, op: &str, args: &[Column], instances: usize) -> Column {
        self.backend
            .compute_named(BatchRequest::new(op, args, instances, &self.ranges))
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.thread_pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Evaluate every formula of `input`.
    pub fn run(&mut self, input: &WorkbookInput) -> Result<RunOutput, EngineError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("run", sheets = input.sheets.len()).entered();
        let start = Instant::now();
        let calls_before = self.backend.calls();
        let parallel = self.thread_pool.is_some();

        self.ranges.clear();
        let locale = self.config.locale;
        let formulas = {
            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!("parse", formulas = input.formula_count()).entered();
            self.install(|| FormulaTable::parse(input, &locale, parallel))
        };
        let schedule = {
            #[cfg(feature = "tracing")]
            let _span = tracing::info_span!("schedule").entered();
            self.install(|| {
                Scheduler::new(&formulas, input)
                    .with_parallel(parallel)
                    .create_schedule()
            })?
        };

        let mut output = RunOutput::for_input(input);
        let broken = TaggedValue::error(ErrorKind::Error);
        for cell in &schedule.malformed {
            #[cfg(feature = "tracing")]
            if let Some(super::ParsedFormula::Malformed(err)) = formulas.get(cell.sheet, &cell.address) {
                tracing::warn!(sheet = cell.sheet, cell = %cell.address, error = %err, "malformed formula");
            }
            output.sheets[cell.sheet].store(&cell.address, &broken);
        }

        #[cfg(feature = "tracing")]
        let _calc_span = tracing::info_span!("calculate", levels = schedule.layers.len()).entered();
        let mut groups_run = 0;
        for layer in &schedule.layers {
            #[cfg(feature = "tracing")]
            let _layer_span =
                tracing::debug_span!("level", level = layer.level, cells = layer.cells.len())
                    .entered();
            let groups = group_by_signature(&formulas, &layer.cells);
            groups_run += groups.len();
            let ctx = GroupContext {
                formulas: &formulas,
                input,
                output: &output,
                ranges: &self.ranges,
                backend: &self.backend,
                threshold: self.config.range_memo_threshold,
                parallel,
            };
            match &self.thread_pool {
                Some(pool) if groups.len() > 1 => {
                    pool.install(|| groups.par_iter().for_each(|g| ctx.evaluate(g)))
                }
                Some(pool) => pool.install(|| groups.iter().for_each(|g| ctx.evaluate(g))),
                None => groups.iter().for_each(|g| ctx.evaluate(g)),
            }
        }

        output.stats = RunStats {
            passes: schedule.passes,
            levels: schedule.layers.len(),
            groups: groups_run,
            formulas: formulas.len(),
            malformed: schedule.malformed.len(),
            backend_calls: self.backend.calls() - calls_before,
            memoized_ranges: self.ranges.len(),
            elapsed: start.elapsed(),
        };
        #[cfg(feature = "tracing")]
        tracing::info!(
            formulas = output.stats.formulas,
            levels = output.stats.levels,
            groups = output.stats.groups,
            backend_calls = output.stats.backend_calls,
            elapsed_ms = output.stats.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(output)
    }
}

/// Thread pool per the config; `None` when parallel evaluation is off.
fn build_pool(config: &EngineConfig) -> Result<Option<Arc<rayon::ThreadPool>>, EngineError> {
    if !config.enable_parallel {
        return Ok(None);
    }
    let mut builder = ThreadPoolBuilder::new();
    if let Some(max_threads) = config.max_threads {
        builder = builder.num_threads(max_threads);
    }
    Ok(Some(Arc::new(builder.build()?)))
}

/// Group `cells` by signature, groups in order of first appearance.
fn group_by_signature<'t>(formulas: &'t FormulaTable, cells: &[CellRef]) -> Vec<Group<'t>> {
    let mut index: FxHashMap<&'t str, usize> = FxHashMap::default();
    let mut groups: Vec<Group<'t>> = Vec::new();
    for cell in cells {
        let Some(signature) = formulas.signature(cell) else {
            continue;
        };
        let slot = *index.entry(signature).or_insert_with(|| {
            groups.push(Group {
                signature,
                cells: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].cells.push(cell.clone());
    }
    groups
}

/// Everything a signature group reads or writes during one level.
struct GroupContext<'a, B: ComputeBackend> {
    formulas: &'a FormulaTable,
    input: &'a WorkbookInput,
    output: &'a RunOutput,
    ranges: &'a RangeRepository,
    backend: &'a ExclusiveBackend<B>,
    threshold: usize,
    parallel: bool,
}

impl<B: ComputeBackend> GroupContext<'_, B> {
    fn evaluate(&self, group: &Group<'_>) {
        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "group",
            signature = group.signature,
            instances = group.cells.len()
        )
        .entered();
        match self.compute(group) {
            Ok(column) => self.scatter(group, &column),
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(signature = group.signature, error = %err, "signature group failed");
                let broken = TaggedValue::error(ErrorKind::Error);
                for cell in &group.cells {
                    self.results(cell).store(&cell.address, &broken);
                }
            }
        }
    }

    fn results(&self, cell: &CellRef) -> &SheetResults {
        &self.output.sheets[cell.sheet]
    }

    /// Walk the shared token sequence once, one column per operand.
    fn compute(&self, group: &Group<'_>) -> Result<Column, GroupError> {
        let instances: Vec<&[Token]> = group
            .cells
            .iter()
            .map(|c| {
                self.formulas
                    .tokens(c)
                    .ok_or_else(|| GroupError::MissingTokens(c.address.clone()))
            })
            .collect::<Result<_, _>>()?;
        let Some(shared) = instances.first().copied() else {
            return Ok(Vec::new());
        };
        if instances.iter().any(|t| t.len() != shared.len()) {
            return Err(GroupError::RaggedInstances);
        }

        let n = instances.len();
        let mut sheets: Vec<Option<usize>> = group.cells.iter().map(|c| Some(c.sheet)).collect();
        let mut stack: Vec<Column> = Vec::new();

        for (k, token) in shared.iter().enumerate() {
            match &token.kind {
                TokenKind::Constant(_) | TokenKind::Text(_) => {
                    stack.push(instances.iter().map(|t| literal(&t[k])).collect());
                }
                TokenKind::CellRef(_) if is_range_endpoint(shared, k) => {}
                TokenKind::CellRef(_) => {
                    let column = (0..n)
                        .map(|i| match instances[i][k].address() {
                            Some(addr) => self.lookup(sheets[i], addr),
                            None => TaggedValue::error(ErrorKind::Ref),
                        })
                        .collect();
                    stack.push(column);
                }
                TokenKind::Range => {
                    let column = (0..n)
                        .map(|i| self.range_value(sheets[i], instances[i], k))
                        .collect();
                    stack.push(column);
                }
                TokenKind::SheetScopeStart(_) => {
                    for (i, tokens) in instances.iter().enumerate() {
                        if let TokenKind::SheetScopeStart(name) = &tokens[k].kind {
                            sheets[i] = self.input.sheet_index(name);
                        }
                    }
                }
                TokenKind::SheetScopeEnd => {
                    for (slot, cell) in sheets.iter_mut().zip(&group.cells) {
                        *slot = Some(cell.sheet);
                    }
                }
                _ => {
                    let Some((op, arity)) = token.operation() else {
                        continue;
                    };
                    if stack.len() < arity {
                        return Err(GroupError::StackUnderflow {
                            op: op.to_string(),
                            needed: arity,
                            available: stack.len(),
                        });
                    }
                    let args = stack.split_off(stack.len() - arity);
                    let result = self
                        .backend
                        .compute_batched(BatchRequest::new(op, &args, n, self.ranges));
                    if result.len() != n {
                        return Err(GroupError::ColumnLength {
                            op: op.to_string(),
                            expected: n,
                            got: result.len(),
                        });
                    }
                    stack.push(result);
                }
            }
        }

        match (stack.pop(), stack.len()) {
            (Some(column), 0) => Ok(column),
            (None, _) => Err(GroupError::Unbalanced(0)),
            (Some(_), rest) => Err(GroupError::Unbalanced(rest + 1)),
        }
    }

    /// Value of a referenced cell: constants, then computed results. Cells
    /// of an array-formula area read the spilled result first.
    fn lookup(&self, sheet: Option<usize>, addr: &str) -> TaggedValue {
        let Some(sheet) = sheet else {
            return TaggedValue::error(ErrorKind::Ref);
        };
        let Some(input) = self.input.sheets.get(sheet) else {
            return TaggedValue::error(ErrorKind::Ref);
        };
        let spilled = self.formulas.spill_anchor(sheet, addr).is_some();
        if spilled {
            if let Some(value) = self.computed(sheet, addr) {
                return value;
            }
        }
        if let Some(n) = input.constants.get(addr) {
            return TaggedValue::number(*n);
        }
        if let Some(s) = input.text_constants.get(addr) {
            return TaggedValue::from_stored_text(s);
        }
        if spilled {
            return TaggedValue::empty();
        }
        self.computed(sheet, addr).unwrap_or_else(TaggedValue::empty)
    }

    fn computed(&self, sheet: usize, addr: &str) -> Option<TaggedValue> {
        let results = &self.output.sheets[sheet];
        if let Some(n) = results.numbers.get(addr) {
            return Some(TaggedValue::number(*n));
        }
        let s = results.texts.get(addr)?;
        Some(match s.trim().parse::<f64>() {
            Ok(n) => TaggedValue::number(n),
            Err(_) => TaggedValue::from_stored_text(&s),
        })
    }

    /// Operand for the `Range` token at `k`: a repository reference for
    /// large or already memoized ranges, a dense array otherwise.
    fn range_value(&self, sheet: Option<usize>, tokens: &[Token], k: usize) -> TaggedValue {
        let (Some(sheet), Some((start, end))) = (sheet, range_endpoints(tokens, k)) else {
            return TaggedValue::error(ErrorKind::Ref);
        };
        let Ok(span) = RangeSpan::parse(&format!("{start}:{end}")) else {
            return TaggedValue::error(ErrorKind::Ref);
        };
        let key = RangeKey::new(
            &self.input.sheets[sheet].name,
            &span.start.to_string(),
            &span.end.to_string(),
        );

        if let Some(entry) = self.ranges.get(&key) {
            return TaggedValue::memoized(key, entry.rows(), entry.cols(), entry.kind());
        }
        if span.len() > self.threshold {
            let entry = self
                .ranges
                .get_or_create(key.clone(), || self.materialize(sheet, &span));
            return TaggedValue::memoized(key, entry.rows(), entry.cols(), entry.kind());
        }
        self.materialize(sheet, &span).to_value()
    }

    /// Column-major copy of `span`. Text kind when the first cell holds
    /// text, float kind otherwise with non-numeric cells read as 0.
    fn materialize(&self, sheet: usize, span: &RangeSpan) -> RangeEntry {
        let cells: Vec<TaggedValue> = span
            .cells()
            .map(|addr| self.lookup(Some(sheet), &addr.to_string()))
            .collect();
        let textual = cells
            .first()
            .is_some_and(|v| v.as_text().is_some() || v.as_error().is_some());
        let values = if textual {
            RangeValues::Text(cells.iter().map(text_cell).collect())
        } else {
            RangeValues::Float(cells.iter().map(|v| v.as_number().unwrap_or(0.0)).collect())
        };
        RangeEntry::new(span.rows(), span.cols(), values)
    }

    fn scatter(&self, group: &Group<'_>, column: &Column) {
        let write = |(cell, value): (&CellRef, &TaggedValue)| {
            let area = self.input.sheets[cell.sheet]
                .array_formulas
                .get(&cell.address);
            spill::scatter(value, &cell.address, area, self.ranges, self.results(cell));
        };
        if self.parallel && group.cells.len() > 1 {
            group.cells.par_iter().zip(column.par_iter()).for_each(write);
        } else {
            group.cells.iter().zip(column.iter()).for_each(write);
        }
    }
}

fn literal(token: &Token) -> TaggedValue {
    match &token.kind {
        TokenKind::Constant(n) => TaggedValue::number(*n),
        TokenKind::Text(s) => TaggedValue::text(s.clone()),
        _ => TaggedValue::error(ErrorKind::Value),
    }
}
