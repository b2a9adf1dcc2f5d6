//! Formula tokenizer/parser for sheetbatch.
//!
//! Formulas are turned into postfix [`Token`] sequences by a shunting-yard
//! state machine ([`parse`]); [`signature`] condenses a sequence into the
//! structural key used to batch formulas together.

pub mod parser;
pub mod signature;
pub mod token;

pub use parser::{Locale, ParseError, ParseErrorKind, parse, parse_with_locale};
pub use signature::signature;
pub use token::{Associativity, Token, TokenKind};
