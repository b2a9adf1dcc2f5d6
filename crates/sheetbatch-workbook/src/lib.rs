//! Workbook files for sheetbatch.
//!
//! Workbooks are JSON documents listing every sheet's cells; see
//! [`json`] for the layout. Loading produces a [`WorkbookInput`] ready for
//! the engine, saving writes constants alongside computed results.
//!
//! [`WorkbookInput`]: sheetbatch_eval::WorkbookInput

pub mod error;
pub mod json;

pub use error::IoError;
pub use json::{load_workbook, read_workbook, save_workbook, write_workbook};
