use std::borrow::Cow;
use std::fmt::{self, Display};

pub const PREC_COMPARISON: u8 = 1;
pub const PREC_ADDITIVE: u8 = 2;
pub const PREC_MULTIPLICATIVE: u8 = 3;
pub const PREC_POWER: u8 = 4;
pub const PREC_UNARY: u8 = 5;
pub const PREC_SHEET_SCOPE: u8 = 9;
pub const PREC_RANGE: u8 = 10;

/// Represents operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

/// What a token stands for in the postfix sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Constant(f64),
    /// Quoted string, or a bare word that is neither a function, a sheet
    /// name nor a cell reference.
    Text(String),
    CellRef(String),
    /// Combines the two preceding `CellRef` tokens into a range.
    Range,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    LessThan,
    GreaterThan,
    Function {
        name: String,
        args: usize,
    },
    /// Redirects lookups to the named sheet until the matching
    /// `SheetScopeEnd`.
    SheetScopeStart(String),
    SheetScopeEnd,
}

/// A postfix token. Immutable once produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub precedence: u8,
}

impl Token {
    pub fn new(kind: TokenKind, precedence: u8) -> Self {
        Token { kind, precedence }
    }

    pub fn operand(kind: TokenKind) -> Self {
        Token::new(kind, 0)
    }

    /// Structural tag used to build formula signatures.
    ///
    /// Operands collapse to a class tag (`*-c`, `*-s`, `*-d`) so formulas
    /// that differ only in constants or cell addresses share a signature.
    pub fn operator_tag(&self) -> Cow<'_, str> {
        match &self.kind {
            TokenKind::Constant(_) => Cow::Borrowed("*-c"),
            TokenKind::Text(_) => Cow::Borrowed("*-s"),
            TokenKind::CellRef(_) => Cow::Borrowed("*-d"),
            TokenKind::Range => Cow::Borrowed(":"),
            TokenKind::Add => Cow::Borrowed("+"),
            TokenKind::Sub => Cow::Borrowed("-"),
            TokenKind::Mul => Cow::Borrowed("*"),
            TokenKind::Div => Cow::Borrowed("/"),
            TokenKind::Pow => Cow::Borrowed("^"),
            TokenKind::LessThan => Cow::Borrowed("<"),
            TokenKind::GreaterThan => Cow::Borrowed(">"),
            TokenKind::Function { name, args } => Cow::Owned(format!("{name}/{args}")),
            TokenKind::SheetScopeStart(_) => Cow::Borrowed("!["),
            TokenKind::SheetScopeEnd => Cow::Borrowed("]!"),
        }
    }

    /// Operation name handed to the compute backend, with its arity.
    pub fn operation(&self) -> Option<(&str, usize)> {
        match &self.kind {
            TokenKind::Add => Some(("+", 2)),
            TokenKind::Sub => Some(("-", 2)),
            TokenKind::Mul => Some(("*", 2)),
            TokenKind::Div => Some(("/", 2)),
            TokenKind::Pow => Some(("^", 2)),
            TokenKind::LessThan => Some(("<", 2)),
            TokenKind::GreaterThan => Some((">", 2)),
            TokenKind::Function { name, args } => Some((name.as_str(), *args)),
            _ => None,
        }
    }

    pub fn associativity(&self) -> Associativity {
        match self.kind {
            TokenKind::Pow => Associativity::Right,
            _ => Associativity::Left,
        }
    }

    pub fn address(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::CellRef(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.operation().is_some() && !matches!(self.kind, TokenKind::Function { .. })
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Constant(n) => write!(f, "{n}"),
            TokenKind::Text(s) => write!(f, "\"{s}\""),
            TokenKind::CellRef(addr) => f.write_str(addr),
            TokenKind::SheetScopeStart(name) => write!(f, "{name}!["),
            _ => f.write_str(&self.operator_tag()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_tags_collapse_values() {
        assert_eq!(Token::operand(TokenKind::Constant(1.0)).operator_tag(), "*-c");
        assert_eq!(Token::operand(TokenKind::Constant(9.0)).operator_tag(), "*-c");
        assert_eq!(
            Token::operand(TokenKind::CellRef("B7".into())).operator_tag(),
            "*-d"
        );
        assert_eq!(
            Token::operand(TokenKind::Text("x".into())).operator_tag(),
            "*-s"
        );
    }

    #[test]
    fn function_tag_carries_arity() {
        let t = Token::operand(TokenKind::Function {
            name: "SUM".into(),
            args: 3,
        });
        assert_eq!(t.operator_tag(), "SUM/3");
        assert_eq!(t.operation(), Some(("SUM", 3)));
        assert!(!t.is_operator());
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(
            Token::new(TokenKind::Pow, PREC_POWER).associativity(),
            Associativity::Right
        );
        assert_eq!(
            Token::new(TokenKind::Sub, PREC_ADDITIVE).associativity(),
            Associativity::Left
        );
    }
}
