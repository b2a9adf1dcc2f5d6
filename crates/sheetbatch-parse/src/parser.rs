//! Shunting-yard parser producing postfix token sequences.
//!
//! The parser is a single pass over the conditioned formula text with an
//! operator stack and an argument-count stack (one count per open
//! parenthesis). Range and sheet-scope markers are structural: a `Range`
//! token follows its second endpoint directly and a `SheetScopeEnd` follows
//! the scoped operand (or its range), so neither ever waits on the operator
//! stack.
//!
//! Error positions are character offsets into the conditioned text, i.e.
//! after whitespace, `$` markers and the leading `=` have been removed.

use std::error::Error;
use std::fmt;

use sheetbatch_common::is_cell_address;

use crate::token::{
    Associativity, PREC_ADDITIVE, PREC_COMPARISON, PREC_MULTIPLICATIVE, PREC_POWER, PREC_RANGE,
    PREC_SHEET_SCOPE, PREC_UNARY, Token, TokenKind,
};

/// Separators used when reading numbers and argument lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    pub decimal_separator: char,
    pub argument_separator: char,
}

impl Locale {
    pub const fn invariant() -> Self {
        Locale {
            decimal_separator: '.',
            argument_separator: ',',
        }
    }

    pub const fn new(decimal_separator: char, argument_separator: char) -> Self {
        Locale {
            decimal_separator,
            argument_separator,
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::invariant()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    Empty,
    UnmatchedParen,
    UnterminatedString,
    UnknownLexeme(char),
    UnsupportedOperator(String),
    MalformedNumber(String),
    /// A range endpoint that is not a single-cell reference.
    BadRangeOperand,
    BadSheetReference(String),
    /// The postfix sequence does not reduce to exactly one value.
    MalformedExpression,
}

/// A parse failure with the character offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub pos: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParseError at {}: ", self.pos)?;
        match &self.kind {
            ParseErrorKind::Empty => write!(f, "empty formula"),
            ParseErrorKind::UnmatchedParen => write!(f, "unmatched parenthesis"),
            ParseErrorKind::UnterminatedString => write!(f, "unterminated string literal"),
            ParseErrorKind::UnknownLexeme(c) => write!(f, "unrecognised character '{c}'"),
            ParseErrorKind::UnsupportedOperator(op) => write!(f, "unsupported operator '{op}'"),
            ParseErrorKind::MalformedNumber(n) => write!(f, "malformed number '{n}'"),
            ParseErrorKind::BadRangeOperand => {
                write!(f, "range endpoints must be cell references")
            }
            ParseErrorKind::BadSheetReference(s) => write!(f, "bad reference to sheet '{s}'"),
            ParseErrorKind::MalformedExpression => write!(f, "malformed expression"),
        }
    }
}

impl Error for ParseError {}

/// Parse with the invariant locale (`.` decimals, `,` arguments).
pub fn parse(formula: &str) -> Result<Vec<Token>, ParseError> {
    parse_with_locale(formula, &Locale::invariant())
}

pub fn parse_with_locale(formula: &str, locale: &Locale) -> Result<Vec<Token>, ParseError> {
    let chars = condition(formula);
    if chars.is_empty() {
        return Err(ParseError {
            kind: ParseErrorKind::Empty,
            pos: 0,
        });
    }
    let tokens = Parser::new(&chars, locale).run()?;
    validate(&tokens, chars.len())?;
    Ok(tokens)
}

/// Strip whitespace and `$` outside quotes, drop `_xlfn.` prefixes, then the
/// leading `=` and any leading `+`.
fn condition(formula: &str) -> Vec<char> {
    let src: Vec<char> = formula.chars().collect();
    let mut out = Vec::with_capacity(src.len());
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < src.len() {
        let c = src[i];
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                if src.get(i + 1) == Some(&q) {
                    out.push(q);
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '$' => {}
            c if c.is_whitespace() => {}
            '_' if starts_with_ignore_case(&src[i..], "_xlfn.") => {
                i += "_xlfn.".len();
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    let mut start = 0;
    if out.first() == Some(&'=') {
        start = 1;
    }
    while out.get(start) == Some(&'+') {
        start += 1;
    }
    out.drain(..start);
    out
}

fn starts_with_ignore_case(chars: &[char], prefix: &str) -> bool {
    let mut it = chars.iter();
    prefix
        .chars()
        .all(|p| it.next().is_some_and(|c| c.eq_ignore_ascii_case(&p)))
}

enum StackEntry {
    Operator(Token),
    LeftParen,
    Function(String),
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
    locale: &'a Locale,
    output: Vec<Token>,
    stack: Vec<StackEntry>,
    arg_counts: Vec<usize>,
    expect_operand: bool,
}

impl<'a> Parser<'a> {
    fn new(chars: &'a [char], locale: &'a Locale) -> Self {
        Parser {
            chars,
            pos: 0,
            locale,
            output: Vec::new(),
            stack: Vec::new(),
            arg_counts: Vec::new(),
            expect_operand: true,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.peek() {
            match c {
                '"' => self.string_literal()?,
                '\'' => self.quoted_sheet()?,
                '(' => self.open_paren(),
                ')' => self.close_paren()?,
                c if self.is_separator(c) => self.separator()?,
                c if c.is_ascii_digit() || c == self.locale.decimal_separator => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                '+' | '-' | '*' | '/' | '^' | '<' | '>' => self.operator(c)?,
                '%' => self.percent()?,
                ':' => return Err(self.error(ParseErrorKind::BadRangeOperand)),
                '=' | '&' => {
                    return Err(self.error(ParseErrorKind::UnsupportedOperator(c.to_string())));
                }
                other => return Err(self.error(ParseErrorKind::UnknownLexeme(other))),
            }
        }

        while let Some(entry) = self.stack.pop() {
            match entry {
                StackEntry::Operator(token) => self.output.push(token),
                StackEntry::LeftParen | StackEntry::Function(_) => {
                    return Err(self.error(ParseErrorKind::UnmatchedParen));
                }
            }
        }
        Ok(self.output)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            kind,
            pos: self.pos,
        }
    }

    fn error_at(&self, kind: ParseErrorKind, pos: usize) -> ParseError {
        ParseError { kind, pos }
    }

    fn is_separator(&self, c: char) -> bool {
        c == self.locale.argument_separator || c == ';'
    }

    fn push_operand(&mut self, kind: TokenKind) {
        self.output.push(Token::operand(kind));
        self.expect_operand = false;
    }

    fn push_operator(&mut self, token: Token) {
        while let Some(StackEntry::Operator(top)) = self.stack.last() {
            let pops = top.precedence > token.precedence
                || (top.precedence == token.precedence
                    && token.associativity() == Associativity::Left);
            if !pops {
                break;
            }
            if let Some(StackEntry::Operator(top)) = self.stack.pop() {
                self.output.push(top);
            }
        }
        self.stack.push(StackEntry::Operator(token));
    }

    fn string_literal(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                Some('"') if self.chars.get(self.pos + 1) == Some(&'"') => {
                    text.push('"');
                    self.pos += 2;
                }
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
                None => {
                    return Err(self.error_at(ParseErrorKind::UnterminatedString, start));
                }
            }
        }
        self.push_operand(TokenKind::Text(text));
        Ok(())
    }

    fn quoted_sheet(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut name = String::new();
        loop {
            match self.peek() {
                Some('\'') if self.chars.get(self.pos + 1) == Some(&'\'') => {
                    name.push('\'');
                    self.pos += 2;
                }
                Some('\'') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    name.push(c);
                    self.pos += 1;
                }
                None => {
                    return Err(self.error_at(ParseErrorKind::BadSheetReference(name), start));
                }
            }
        }
        if self.peek() != Some('!') {
            return Err(self.error_at(ParseErrorKind::BadSheetReference(name), start));
        }
        self.pos += 1;
        self.scoped_reference(name.to_uppercase(), start)
    }

    fn read_word(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .to_uppercase()
    }

    fn word(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let word = self.read_word();
        match self.peek() {
            Some('(') => {
                self.stack.push(StackEntry::Function(word));
                Ok(())
            }
            Some('!') => {
                self.pos += 1;
                self.scoped_reference(word, start)
            }
            _ if is_cell_address(&word) => self.cell_reference(word),
            _ => {
                self.push_operand(TokenKind::Text(word));
                Ok(())
            }
        }
    }

    /// Emit a cell reference, plus the second endpoint and the range marker
    /// when a `:` follows.
    fn cell_reference(&mut self, address: String) -> Result<(), ParseError> {
        self.push_operand(TokenKind::CellRef(address));
        if self.peek() != Some(':') {
            return Ok(());
        }
        let colon = self.pos;
        self.pos += 1;
        let second = self.read_word();
        if !is_cell_address(&second) || matches!(self.peek(), Some('(') | Some('!')) {
            return Err(self.error_at(ParseErrorKind::BadRangeOperand, colon));
        }
        self.output.push(Token::operand(TokenKind::CellRef(second)));
        self.output.push(Token::new(TokenKind::Range, PREC_RANGE));
        Ok(())
    }

    fn scoped_reference(&mut self, sheet: String, start: usize) -> Result<(), ParseError> {
        self.output
            .push(Token::operand(TokenKind::SheetScopeStart(sheet.clone())));
        let address = self.read_word();
        if !is_cell_address(&address) || matches!(self.peek(), Some('(') | Some('!')) {
            return Err(self.error_at(ParseErrorKind::BadSheetReference(sheet), start));
        }
        self.cell_reference(address)?;
        self.output
            .push(Token::new(TokenKind::SheetScopeEnd, PREC_SHEET_SCOPE));
        Ok(())
    }

    fn number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let decimal = self.locale.decimal_separator;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == decimal {
                self.pos += 1;
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut look = self.pos + 1;
            if matches!(self.chars.get(look), Some('+') | Some('-')) {
                look += 1;
            }
            if self.chars.get(look).is_some_and(|c| c.is_ascii_digit()) {
                self.pos = look;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        if self.peek().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(self.error_at(ParseErrorKind::MalformedNumber(raw), start));
        }
        let normalized = raw.replace(decimal, ".");
        let value = normalized
            .parse::<f64>()
            .map_err(|_| self.error_at(ParseErrorKind::MalformedNumber(raw.clone()), start))?;
        self.push_operand(TokenKind::Constant(value));
        Ok(())
    }

    fn open_paren(&mut self) {
        self.pos += 1;
        self.stack.push(StackEntry::LeftParen);
        let count = if self.peek() == Some(')') { 0 } else { 1 };
        self.arg_counts.push(count);
        self.expect_operand = true;
    }

    fn close_paren(&mut self) -> Result<(), ParseError> {
        let at = self.pos;
        self.pos += 1;
        loop {
            match self.stack.pop() {
                Some(StackEntry::Operator(token)) => self.output.push(token),
                Some(StackEntry::LeftParen) => break,
                Some(StackEntry::Function(_)) | None => {
                    return Err(self.error_at(ParseErrorKind::UnmatchedParen, at));
                }
            }
        }
        let args = self.arg_counts.pop().unwrap_or(0);
        if matches!(self.stack.last(), Some(StackEntry::Function(_))) {
            if let Some(StackEntry::Function(name)) = self.stack.pop() {
                self.output
                    .push(Token::operand(TokenKind::Function { name, args }));
            }
        }
        self.expect_operand = false;
        Ok(())
    }

    fn separator(&mut self) -> Result<(), ParseError> {
        let at = self.pos;
        self.pos += 1;
        loop {
            match self.stack.last() {
                Some(StackEntry::Operator(_)) => {
                    if let Some(StackEntry::Operator(token)) = self.stack.pop() {
                        self.output.push(token);
                    }
                }
                Some(StackEntry::LeftParen) => break,
                _ => return Err(self.error_at(ParseErrorKind::MalformedExpression, at)),
            }
        }
        if let Some(count) = self.arg_counts.last_mut() {
            *count += 1;
        }
        self.expect_operand = true;
        Ok(())
    }

    fn operator(&mut self, c: char) -> Result<(), ParseError> {
        let at = self.pos;
        self.pos += 1;
        if self.expect_operand {
            return match c {
                // Unary minus: multiply the operand by -1 ahead of every
                // binary operator.
                '-' => {
                    self.output.push(Token::operand(TokenKind::Constant(-1.0)));
                    self.stack
                        .push(StackEntry::Operator(Token::new(TokenKind::Mul, PREC_UNARY)));
                    Ok(())
                }
                '+' => Ok(()),
                _ => Err(self.error_at(ParseErrorKind::MalformedExpression, at)),
            };
        }
        if matches!(c, '<' | '>') {
            if let Some(next @ ('=' | '>')) = self.peek() {
                return Err(
                    self.error_at(ParseErrorKind::UnsupportedOperator(format!("{c}{next}")), at)
                );
            }
        }
        let token = match c {
            '+' => Token::new(TokenKind::Add, PREC_ADDITIVE),
            '-' => Token::new(TokenKind::Sub, PREC_ADDITIVE),
            '*' => Token::new(TokenKind::Mul, PREC_MULTIPLICATIVE),
            '/' => Token::new(TokenKind::Div, PREC_MULTIPLICATIVE),
            '^' => Token::new(TokenKind::Pow, PREC_POWER),
            '<' => Token::new(TokenKind::LessThan, PREC_COMPARISON),
            _ => Token::new(TokenKind::GreaterThan, PREC_COMPARISON),
        };
        self.push_operator(token);
        self.expect_operand = true;
        Ok(())
    }

    /// Postfix percent scales the operand just emitted.
    fn percent(&mut self) -> Result<(), ParseError> {
        if self.expect_operand {
            return Err(self.error(ParseErrorKind::MalformedExpression));
        }
        self.pos += 1;
        self.output.push(Token::operand(TokenKind::Constant(0.01)));
        self.output
            .push(Token::new(TokenKind::Mul, PREC_MULTIPLICATIVE));
        Ok(())
    }
}

/// Simulate evaluation depth: every operator must find its operands and
/// exactly one value must remain.
fn validate(tokens: &[Token], end: usize) -> Result<(), ParseError> {
    let malformed = || ParseError {
        kind: ParseErrorKind::MalformedExpression,
        pos: end,
    };
    let mut depth = 0usize;
    for token in tokens {
        let (pops, pushes) = match &token.kind {
            TokenKind::Constant(_) | TokenKind::Text(_) | TokenKind::CellRef(_) => (0, 1),
            TokenKind::SheetScopeStart(_) | TokenKind::SheetScopeEnd => (0, 0),
            TokenKind::Function { args, .. } => (*args, 1),
            _ => (2, 1),
        };
        if depth < pops {
            return Err(malformed());
        }
        depth = depth - pops + pushes;
    }
    if depth != 1 {
        return Err(malformed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(formula: &str) -> Vec<String> {
        parse(formula)
            .unwrap()
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    fn err_kind(formula: &str) -> ParseErrorKind {
        parse(formula).unwrap_err().kind
    }

    #[test]
    fn simple_addition_is_postfix() {
        assert_eq!(tags("=A1+A2"), vec!["A1", "A2", "+"]);
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(tags("=1+2*3"), vec!["1", "2", "3", "*", "+"]);
        assert_eq!(tags("=1-2-3"), vec!["1", "2", "-", "3", "-"]);
        assert_eq!(tags("=2^3^2"), vec!["2", "3", "2", "^", "^"]);
        assert_eq!(tags("=(1+2)*3"), vec!["1", "2", "+", "3", "*"]);
    }

    #[test]
    fn conditioning_strips_noise() {
        assert_eq!(tags("= $A$1 + _xlfn.SUM( B2 )"), vec!["A1", "B2", "SUM/1", "+"]);
        assert_eq!(tags("=++A1"), vec!["A1"]);
    }

    #[test]
    fn whitespace_inside_strings_is_kept() {
        let tokens = parse("=CONCATENATE(\"a b\", \"say \"\"hi\"\"\")").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Text("a b".into()));
        assert_eq!(tokens[1].kind, TokenKind::Text("say \"hi\"".into()));
    }

    #[test]
    fn unary_minus_binds_tighter_than_power() {
        assert_eq!(tags("=-2^2"), vec!["-1", "2", "*", "2", "^"]);
        assert_eq!(tags("=3*-A1"), vec!["3", "-1", "A1", "*", "*"]);
    }

    #[test]
    fn percent_scales_operand() {
        assert_eq!(tags("=50%"), vec!["50", "0.01", "*"]);
    }

    #[test]
    fn function_argument_counts() {
        assert_eq!(tags("=RAND()"), vec!["RAND/0"]);
        assert_eq!(tags("=SUM(1,2,3)"), vec!["1", "2", "3", "SUM/3"]);
        assert_eq!(tags("=SUM(1;2)"), vec!["1", "2", "SUM/2"]);
        assert_eq!(
            tags("=IFERROR(SUM(A1,2),0)"),
            vec!["A1", "2", "SUM/2", "0", "IFERROR/2"]
        );
    }

    #[test]
    fn range_marker_follows_second_endpoint() {
        assert_eq!(tags("=SUM(a1:b10)"), vec!["A1", "B10", ":", "SUM/1"]);
    }

    #[test]
    fn sheet_scope_wraps_operand() {
        assert_eq!(tags("=Data!B2*2"), vec!["DATA![", "B2", "]!", "2", "*"]);
        assert_eq!(
            tags("=SUM('my data'!A1:A3)"),
            vec!["MY DATA![", "A1", "A3", ":", "]!", "SUM/1"]
        );
    }

    #[test]
    fn bare_words_become_text() {
        let tokens = parse("=VLOOKUP(A1,B1:C4,2,false)").unwrap();
        assert_eq!(tokens[5].kind, TokenKind::Text("FALSE".into()));
    }

    #[test]
    fn locale_decimal_comma() {
        let tokens = parse_with_locale("=1,5+2", &Locale::new(',', ';')).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Constant(1.5));
    }

    #[test]
    fn exponent_numbers() {
        let tokens = parse("=1.5E3-2e-1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Constant(1500.0));
        assert_eq!(tokens[1].kind, TokenKind::Constant(0.2));
    }

    #[test]
    fn errors_are_typed() {
        assert_eq!(err_kind("="), ParseErrorKind::Empty);
        assert_eq!(err_kind("=(1+2"), ParseErrorKind::UnmatchedParen);
        assert_eq!(err_kind("=1+2)"), ParseErrorKind::UnmatchedParen);
        assert_eq!(err_kind("=\"abc"), ParseErrorKind::UnterminatedString);
        assert_eq!(err_kind("=1#2"), ParseErrorKind::UnknownLexeme('#'));
        assert_eq!(
            err_kind("=A1&B1"),
            ParseErrorKind::UnsupportedOperator("&".into())
        );
        assert_eq!(
            err_kind("=A1<=B1"),
            ParseErrorKind::UnsupportedOperator("<=".into())
        );
        assert_eq!(
            err_kind("=1.2.3"),
            ParseErrorKind::MalformedNumber("1.2.3".into())
        );
        assert_eq!(err_kind("=SUM(A1:FOO)"), ParseErrorKind::BadRangeOperand);
        assert_eq!(
            err_kind("=Sheet2!XYZ"),
            ParseErrorKind::BadSheetReference("SHEET2".into())
        );
        assert_eq!(err_kind("=A1+"), ParseErrorKind::MalformedExpression);
        assert_eq!(err_kind("=SUM(1,)"), ParseErrorKind::MalformedExpression);
    }

    #[test]
    fn error_position_points_at_problem() {
        let err = parse("=1+2)").unwrap_err();
        assert_eq!(err.pos, 3);
    }
}
