use std::borrow::Cow;

use crate::token::{Token, TokenKind};

/// Structural signature of a postfix sequence.
///
/// Each token contributes its operator tag followed by `|`. The two
/// endpoints in front of a `Range` contribute their literal addresses
/// instead, so formulas over different ranges never share a batch while
/// formulas that differ only in single-cell addresses or constants do.
pub fn signature(tokens: &[Token]) -> String {
    let mut parts: Vec<Cow<'_, str>> = tokens.iter().map(Token::operator_tag).collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Range || i < 2 {
            continue;
        }
        for j in [i - 2, i - 1] {
            if let Some(addr) = tokens[j].address() {
                parts[j] = Cow::Borrowed(addr);
            }
        }
    }

    let mut out = String::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        out.push_str(&part);
        out.push('|');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn sig(formula: &str) -> String {
        signature(&parse(formula).unwrap())
    }

    #[test]
    fn cell_and_constant_differences_share_signature() {
        assert_eq!(sig("=A1+A2"), "*-d|*-d|+|");
        assert_eq!(sig("=A1+A2"), sig("=B7+C9"));
        assert_eq!(sig("=A1*2"), sig("=B1*3"));
    }

    #[test]
    fn literal_ranges_are_part_of_signature() {
        assert_eq!(sig("=SUM(A1:A10)"), "A1|A10|:|SUM/1|");
        assert_ne!(sig("=SUM(A1:A10)"), sig("=SUM(B1:B10)"));
    }

    #[test]
    fn arity_and_scope_distinguish_structure() {
        assert_ne!(sig("=SUM(A1)"), sig("=SUM(A1,A2)"));
        assert_ne!(sig("=Other!A1+1"), sig("=A1+1"));
        assert_eq!(sig("=Other!A1+1"), sig("=Third!B4+7"));
    }
}
