//! Spreadsheet-style error markers carried inside tagged values.
//!
//! - **`ErrorKind`**: the closed set of markers a cell result can hold
//! - `Display` renders the marker exactly as it is stored in result maps
//! - `ErrorKind::parse` recognises a stored marker again
//!
//! Two markers are internal to the compute path: `#@@CU_1` is produced when a
//! formula names an operation the backend does not know, `#@@CU_2` when a
//! named-operation request does.

use std::fmt;

/// All recognised error markers.
///
/// **Note:** names are CamelCase (idiomatic Rust) while `Display`
/// renders them as the spreadsheet shows them (`#DIV/0!`, …).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Null,
    Ref,
    Name,
    Value,
    Div,
    Na,
    Num,
    Error,
    Circ,
    /// Formula path: the operator or function is not implemented.
    UnknownFormulaOp,
    /// Named-operation path: the operation name is not implemented.
    UnknownNamedOp,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 11] = [
        Self::Null,
        Self::Ref,
        Self::Name,
        Self::Value,
        Self::Div,
        Self::Na,
        Self::Num,
        Self::Error,
        Self::Circ,
        Self::UnknownFormulaOp,
        Self::UnknownNamedOp,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "#NULL!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Value => "#VALUE!",
            Self::Div => "#DIV/0!",
            Self::Na => "#N/A",
            Self::Num => "#NUM!",
            Self::Error => "#ERROR!",
            Self::Circ => "#CIRC!",
            Self::UnknownFormulaOp => "#@@CU_1",
            Self::UnknownNamedOp => "#@@CU_2",
        }
    }

    /// Recognise a stored marker. Matching ignores ASCII case and
    /// surrounding whitespace; anything else is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if !s.starts_with('#') {
            return None;
        }
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_roundtrip_through_parse() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::parse(&kind.to_string()), Some(kind));
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(ErrorKind::parse(" #n/a "), Some(ErrorKind::Na));
        assert_eq!(ErrorKind::parse("#div/0!"), Some(ErrorKind::Div));
    }

    #[test]
    fn parse_rejects_plain_text() {
        assert_eq!(ErrorKind::parse("N/A"), None);
        assert_eq!(ErrorKind::parse("#BOGUS"), None);
        assert_eq!(ErrorKind::parse(""), None);
    }
}
