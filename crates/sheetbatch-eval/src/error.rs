use thiserror::Error;

/// Scheduling failed to assign a level to every well-formed formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    /// Formulas that never became satisfiable, named `Sheet!A1` and sorted.
    #[error("circular reference among {} cell(s): {}", cells.len(), cells.join(", "))]
    Cycle { cells: Vec<String> },
}

/// Fatal errors of a full evaluation run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error("failed to build evaluation thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a signature group could not be evaluated. Only that group's cells
/// are affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum GroupError {
    #[error("formula tokens missing for {0}")]
    MissingTokens(String),
    #[error("instance token sequences differ in length")]
    RaggedInstances,
    #[error("operation '{op}' needs {needed} operand column(s), {available} available")]
    StackUnderflow {
        op: String,
        needed: usize,
        available: usize,
    },
    #[error("backend returned {got} value(s) for '{op}', expected {expected}")]
    ColumnLength {
        op: String,
        expected: usize,
        got: usize,
    },
    #[error("expression left {0} column(s) on the stack")]
    Unbalanced(usize),
}
