//! Common test helpers
use crate::backend::{BatchRequest, Column, ComputeBackend, CpuBackend};
use crate::engine::{Engine, EngineConfig, FormulaTable, Schedule, Scheduler};
use crate::error::SchedulingError;
use crate::workbook::{RunOutput, WorkbookInput};
use sheetbatch_common::TaggedValue;
use sheetbatch_parse::Locale;

pub fn config(parallel: bool) -> EngineConfig {
    EngineConfig {
        enable_parallel: parallel,
        max_threads: Some(2),
        rng_seed: Some(42),
        ..EngineConfig::default()
    }
}

pub fn run(input: &WorkbookInput) -> RunOutput {
    let mut engine = Engine::new(CpuBackend::seeded(42), config(true));
    engine.run(input).unwrap()
}

pub fn run_sequential(input: &WorkbookInput) -> RunOutput {
    let mut engine = Engine::new(CpuBackend::seeded(42), config(false));
    engine.run(input).unwrap()
}

pub fn schedule(input: &WorkbookInput) -> Result<Schedule, SchedulingError> {
    let formulas = FormulaTable::parse(input, &Locale::invariant(), false);
    Scheduler::new(&formulas, input)
        .with_parallel(false)
        .create_schedule()
}

pub fn number(output: &RunOutput, sheet: &str, addr: &str) -> f64 {
    output
        .value(sheet, addr)
        .and_then(|v| v.as_number())
        .unwrap_or_else(|| panic!("{sheet}!{addr} is not a number: {:?}", output.value(sheet, addr)))
}

pub fn text(output: &RunOutput, sheet: &str, addr: &str) -> String {
    let sheet_results = output.sheet(sheet).expect("sheet exists");
    sheet_results
        .texts
        .get(addr)
        .map(|s| s.clone())
        .unwrap_or_else(|| panic!("{sheet}!{addr} has no text result"))
}

/// Wraps the CPU backend and records every operation it receives.
#[derive(Default)]
pub struct RecordingBackend {
    pub inner: CpuBackend,
    pub ops: Vec<(String, usize)>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            inner: CpuBackend::seeded(1),
            ops: Vec::new(),
        }
    }
}

impl ComputeBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn compute_batched(&mut self, request: BatchRequest<'_>) -> Column {
        self.ops.push((request.op.to_string(), request.instances));
        self.inner.compute_batched(request)
    }

    fn compute_named(&mut self, request: BatchRequest<'_>) -> Column {
        self.ops.push((request.op.to_string(), request.instances));
        self.inner.compute_named(request)
    }
}

/// Returns one value too few for every call.
pub struct ShortBackend;

impl ComputeBackend for ShortBackend {
    fn name(&self) -> &str {
        "short"
    }

    fn compute_batched(&mut self, request: BatchRequest<'_>) -> Column {
        vec![TaggedValue::number(0.0); request.instances.saturating_sub(1)]
    }

    fn compute_named(&mut self, request: BatchRequest<'_>) -> Column {
        self.compute_batched(request)
    }
}
