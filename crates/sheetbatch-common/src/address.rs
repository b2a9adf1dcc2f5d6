//! A1-style addressing shared by the parser, scheduler and engine.
//!
//! Rows and columns are 1-based with the same limits as the spreadsheet
//! grid: 1,048,576 rows × 16,384 columns (`A`..=`XFD`). Ranges enumerate
//! their cells column-major, so the cell at `(row, col)` of a range sits at
//! index `(col - start_col) * rows + (row - start_row)`.

use std::error::Error;
use std::fmt;
use std::str::FromStr;

pub const MAX_ROW: u32 = 1_048_576;
pub const MAX_COL: u32 = 16_384;

/// Errors returned when parsing addresses from text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AddressError {
    Empty,
    /// Column letters missing, too long, or past `XFD`.
    BadColumn(String),
    /// Row digits missing, zero, or past the last row.
    BadRow(String),
    /// Range text without exactly one `:` separator.
    BadRange(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Empty => write!(f, "empty address"),
            AddressError::BadColumn(s) => write!(f, "invalid column in address '{s}'"),
            AddressError::BadRow(s) => write!(f, "invalid row in address '{s}'"),
            AddressError::BadRange(s) => write!(f, "invalid range '{s}'"),
        }
    }
}

impl Error for AddressError {}

/// Convert a 1-based column index to its letters (1 → `A`, 28 → `AB`).
pub fn column_to_letters(col: u32) -> String {
    let mut buf = Vec::new();
    let mut col = col.max(1) - 1;
    loop {
        buf.push(b'A' + (col % 26) as u8);
        col /= 26;
        if col == 0 {
            break;
        }
        col -= 1;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

/// Convert column letters (any ASCII case) to a 1-based index.
pub fn letters_to_column(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for ch in s.bytes() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let val = (ch.to_ascii_uppercase() - b'A') as u32 + 1;
        col = col.checked_mul(26)?.checked_add(val)?;
    }
    Some(col)
}

/// True when `s` is a single-cell reference: one to three letters up to
/// `XFD` followed by a row number in `1..=1_048_576`.
pub fn is_cell_address(s: &str) -> bool {
    CellAddress::parse(s).is_ok()
}

/// 1-based grid coordinate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let split = s
            .bytes()
            .position(|b| !b.is_ascii_alphabetic())
            .unwrap_or(s.len());
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || letters.len() > 3 {
            return Err(AddressError::BadColumn(s.to_string()));
        }
        let col = letters_to_column(letters)
            .filter(|c| *c <= MAX_COL)
            .ok_or_else(|| AddressError::BadColumn(s.to_string()))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::BadRow(s.to_string()));
        }
        let row = digits
            .parse::<u32>()
            .ok()
            .filter(|r| (1..=MAX_ROW).contains(r))
            .ok_or_else(|| AddressError::BadRow(s.to_string()))?;
        Ok(Self { row, col })
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_to_letters(self.col), self.row)
    }
}

impl FromStr for CellAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rectangular block of cells, normalised so `start` is the top-left corner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RangeSpan {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl RangeSpan {
    pub fn new(a: CellAddress, b: CellAddress) -> Self {
        Self {
            start: CellAddress::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellAddress::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Parse `"A1:B3"`. A lone cell address is a 1×1 span.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let mut parts = s.split(':');
        let first = parts.next().ok_or(AddressError::Empty)?;
        let second = parts.next();
        if parts.next().is_some() {
            return Err(AddressError::BadRange(s.to_string()));
        }
        let a = CellAddress::parse(first)?;
        let b = match second {
            Some(text) => CellAddress::parse(text)?,
            None => a,
        };
        Ok(Self::new(a, b))
    }

    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    pub fn len(&self) -> usize {
        self.rows() as usize * self.cols() as usize
    }

    pub fn contains(&self, addr: CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&addr.row)
            && (self.start.col..=self.end.col).contains(&addr.col)
    }

    /// Cells in column-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (self.start.col..=self.end.col).flat_map(move |col| {
            (self.start.row..=self.end.row).map(move |row| CellAddress::new(row, col))
        })
    }

    /// Cell at a 0-based `(row, col)` offset from the top-left corner.
    pub fn offset(&self, row: u32, col: u32) -> CellAddress {
        CellAddress::new(self.start.row + row, self.start.col + col)
    }
}

impl fmt::Display for RangeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// A formula cell: sheet index plus its A1 address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub sheet: usize,
    pub address: String,
}

impl CellRef {
    pub fn new(sheet: usize, address: impl Into<String>) -> Self {
        Self {
            sheet,
            address: address.into(),
        }
    }
}

/// Identity of a memoized range: `SHEETNAME!START:END`, sheet upper-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeKey(String);

impl RangeKey {
    pub fn new(sheet: &str, start: &str, end: &str) -> Self {
        Self(format!(
            "{}!{}:{}",
            sheet.to_ascii_uppercase(),
            start.to_ascii_uppercase(),
            end.to_ascii_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
