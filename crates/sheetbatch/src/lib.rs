//! Process-level pieces of the `sheetbatch` binary: token checks, workbook
//! jobs, the IPC message handler and logging setup.

pub mod auth;
pub mod handler;
pub mod job;
pub mod logging;

pub use auth::Mode;
pub use handler::ComputeHandler;
