use rayon::prelude::*;
use rustc_hash::FxHashMap;
use sheetbatch_common::CellRef;
use sheetbatch_parse::{Locale, ParseError, Token, TokenKind, parse_with_locale, signature};

use crate::workbook::WorkbookInput;

/// Parse outcome of one formula cell.
#[derive(Debug, Clone)]
pub enum ParsedFormula {
    Tokens { tokens: Vec<Token>, signature: String },
    Malformed(ParseError),
}

/// Parsed formulas of a workbook, indexed like its sheets.
#[derive(Debug, Default)]
pub struct FormulaTable {
    sheets: Vec<FxHashMap<String, ParsedFormula>>,
    /// Non-anchor cells of array-formula areas, mapped to their anchor.
    spill_anchors: Vec<FxHashMap<String, String>>,
}

fn parse_one(text: &str, locale: &Locale) -> ParsedFormula {
    match parse_with_locale(text, locale) {
        Ok(tokens) => {
            let signature = signature(&tokens);
            ParsedFormula::Tokens { tokens, signature }
        }
        Err(err) => ParsedFormula::Malformed(err),
    }
}

impl FormulaTable {
    pub fn parse(input: &WorkbookInput, locale: &Locale, parallel: bool) -> Self {
        let sheets = input
            .sheets
            .iter()
            .map(|sheet| {
                if parallel {
                    sheet
                        .formulas
                        .par_iter()
                        .map(|(addr, text)| (addr.clone(), parse_one(text, locale)))
                        .collect()
                } else {
                    sheet
                        .formulas
                        .iter()
                        .map(|(addr, text)| (addr.clone(), parse_one(text, locale)))
                        .collect()
                }
            })
            .collect();
        let spill_anchors = input
            .sheets
            .iter()
            .map(|sheet| {
                let mut owners = FxHashMap::default();
                for (anchor, area) in &sheet.array_formulas {
                    if !sheet.formulas.contains_key(anchor) {
                        continue;
                    }
                    for cell in area.cells().map(|c| c.to_string()) {
                        if cell != *anchor && !sheet.formulas.contains_key(&cell) {
                            owners.insert(cell, anchor.clone());
                        }
                    }
                }
                owners
            })
            .collect();
        Self {
            sheets,
            spill_anchors,
        }
    }

    pub fn get(&self, sheet: usize, addr: &str) -> Option<&ParsedFormula> {
        self.sheets.get(sheet)?.get(addr)
    }

    pub fn tokens(&self, cell: &CellRef) -> Option<&[Token]> {
        match self.get(cell.sheet, &cell.address)? {
            ParsedFormula::Tokens { tokens, .. } => Some(tokens),
            ParsedFormula::Malformed(_) => None,
        }
    }

    pub fn signature(&self, cell: &CellRef) -> Option<&str> {
        match self.get(cell.sheet, &cell.address)? {
            ParsedFormula::Tokens { signature, .. } => Some(signature),
            ParsedFormula::Malformed(_) => None,
        }
    }

    /// Anchor of the array formula whose area covers `addr`, for cells
    /// other than the anchor itself.
    pub fn spill_anchor(&self, sheet: usize, addr: &str) -> Option<&str> {
        self.spill_anchors.get(sheet)?.get(addr).map(String::as_str)
    }

    pub fn is_formula(&self, sheet: usize, addr: &str) -> bool {
        self.get(sheet, addr).is_some()
    }

    /// Every formula cell, sheet by sheet.
    pub fn cells(&self) -> impl Iterator<Item = (CellRef, &ParsedFormula)> + '_ {
        self.sheets.iter().enumerate().flat_map(|(sheet, formulas)| {
            formulas
                .iter()
                .map(move |(addr, parsed)| (CellRef::new(sheet, addr.clone()), parsed))
        })
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn len(&self) -> usize {
        self.sheets.iter().map(FxHashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether the `CellRef` at `k` is one of the two endpoints of a range.
pub(crate) fn is_range_endpoint(tokens: &[Token], k: usize) -> bool {
    let is_range = |i: usize| matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::Range));
    let is_cell = |i: usize| matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::CellRef(_)));
    is_range(k + 1) || (is_cell(k + 1) && is_range(k + 2))
}

/// Endpoint addresses of the `Range` token at `k`.
pub(crate) fn range_endpoints(tokens: &[Token], k: usize) -> Option<(&str, &str)> {
    if k < 2 {
        return None;
    }
    Some((tokens[k - 2].address()?, tokens[k - 1].address()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::SheetInput;

    #[test]
    fn table_separates_malformed_formulas() {
        let wb = WorkbookInput::new().with_sheet(
            SheetInput::new("S")
                .with_formula("A1", "=B1+1")
                .with_formula("A2", "=(B1+"),
        );
        let table = FormulaTable::parse(&wb, &Locale::invariant(), true);
        assert_eq!(table.len(), 2);
        assert!(table.tokens(&CellRef::new(0, "A1")).is_some());
        assert!(matches!(
            table.get(0, "A2"),
            Some(ParsedFormula::Malformed(_))
        ));
        assert_eq!(table.signature(&CellRef::new(0, "A1")), Some("*-d|*-c|+|"));
    }

    #[test]
    fn area_cells_point_at_their_anchor() {
        let area = sheetbatch_common::RangeSpan::parse("A1:A3").unwrap();
        let wb = WorkbookInput::new().with_sheet(
            SheetInput::new("S")
                .with_array_formula(area, "=TRANSPOSE(B1:D1)")
                .with_formula("A3", "=1"),
        );
        let table = FormulaTable::parse(&wb, &Locale::invariant(), false);
        assert_eq!(table.spill_anchor(0, "A2"), Some("A1"));
        assert_eq!(table.spill_anchor(0, "A1"), None);
        assert_eq!(table.spill_anchor(0, "A3"), None);
        assert_eq!(table.spill_anchor(0, "B1"), None);
    }

    #[test]
    fn endpoints_are_detected() {
        let tokens = sheetbatch_parse::parse("=SUM(A1:A3)+B1").unwrap();
        assert!(is_range_endpoint(&tokens, 0));
        assert!(is_range_endpoint(&tokens, 1));
        assert_eq!(range_endpoints(&tokens, 2), Some(("A1", "A3")));
        let b1 = tokens
            .iter()
            .position(|t| t.address() == Some("B1"))
            .unwrap();
        assert!(!is_range_endpoint(&tokens, b1));
    }
}
