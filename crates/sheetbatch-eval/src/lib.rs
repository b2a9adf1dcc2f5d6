//! Batched formula evaluation for sheetbatch.
//!
//! The pipeline is: parse every formula ([`engine::FormulaTable`]), assign
//! calculation levels ([`engine::Scheduler`]), then evaluate level by level,
//! batching formulas that share a signature into single calls on a
//! [`backend::ComputeBackend`]. Results are written into a [`RunOutput`]
//! following the spill rules in [`spill`].

pub mod backend;
pub mod engine;
pub mod error;
pub mod repository;
pub mod spill;
pub mod workbook;

pub use backend::{BatchRequest, Column, ComputeBackend, CpuBackend, ExclusiveBackend};
pub use engine::{Engine, EngineConfig, Schedule, Scheduler};
pub use error::{EngineError, SchedulingError};
pub use repository::{RangeEntry, RangeRepository, RangeValues};
pub use workbook::{RunOutput, RunStats, SheetInput, SheetResults, WorkbookInput};
