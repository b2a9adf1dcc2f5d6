//! Shared building blocks for the sheetbatch workspace: the tagged value
//! model, error markers and A1 addressing.

pub mod address;
pub mod error;
pub mod value;

pub use address::*;
pub use error::*;
pub use value::*;
