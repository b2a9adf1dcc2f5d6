//! Sheetbatch level-scheduled batch engine
//!
//! Parses every formula of a workbook, assigns each one a calculation level
//! and evaluates the levels in order, one backend call per operation per
//! signature group.

pub mod eval;
pub mod formulas;
pub mod scheduler;

#[cfg(test)]
mod tests;

pub use eval::Engine;
pub use formulas::{FormulaTable, ParsedFormula};
pub use scheduler::{Layer, Schedule, Scheduler};

use sheetbatch_parse::Locale;

use crate::backend::DEFAULT_MC_PATHS;

/// Ranges with more cells than this are memoized in the range repository.
pub const DEFAULT_RANGE_MEMO_THRESHOLD: usize = 64;

/// Configuration for the evaluation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enable_parallel: bool,
    pub max_threads: Option<usize>,
    pub range_memo_threshold: usize,
    /// Seed for the CPU backend's generator; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Paths simulated per Monte-Carlo price.
    pub mc_paths: usize,
    pub locale: Locale,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_parallel: true,
            max_threads: None,
            range_memo_threshold: DEFAULT_RANGE_MEMO_THRESHOLD,
            rng_seed: None,
            mc_paths: DEFAULT_MC_PATHS,
            locale: Locale::invariant(),
        }
    }
}
