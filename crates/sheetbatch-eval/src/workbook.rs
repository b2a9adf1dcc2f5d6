//! Engine-facing workbook model: what a run reads and what it produces.
//!
//! Addresses are upper-case A1 strings without `$` markers. The builder
//! methods on [`SheetInput`] normalise them; code filling the public maps
//! directly is expected to do the same.

use std::time::Duration;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use sheetbatch_common::{ErrorKind, Payload, RangeSpan, TaggedValue};

#[derive(Debug, Clone, Default)]
pub struct SheetInput {
    pub name: String,
    /// Formula text by address, leading `=` optional.
    pub formulas: FxHashMap<String, String>,
    pub constants: FxHashMap<String, f64>,
    pub text_constants: FxHashMap<String, String>,
    /// Array-formula areas keyed by their anchor cell.
    pub array_formulas: FxHashMap<String, RangeSpan>,
}

fn normalize(addr: &str) -> String {
    addr.trim().replace('$', "").to_ascii_uppercase()
}

impl SheetInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_formula(mut self, addr: &str, formula: impl Into<String>) -> Self {
        self.formulas.insert(normalize(addr), formula.into());
        self
    }

    pub fn with_number(mut self, addr: &str, value: f64) -> Self {
        self.constants.insert(normalize(addr), value);
        self
    }

    pub fn with_text(mut self, addr: &str, value: impl Into<String>) -> Self {
        self.text_constants.insert(normalize(addr), value.into());
        self
    }

    /// Register `formula` at the top-left cell of `area` as an array formula.
    pub fn with_array_formula(mut self, area: RangeSpan, formula: impl Into<String>) -> Self {
        let anchor = area.start.to_string();
        self.formulas.insert(anchor.clone(), formula.into());
        self.array_formulas.insert(anchor, area);
        self
    }

    pub fn is_formula(&self, addr: &str) -> bool {
        self.formulas.contains_key(addr)
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkbookInput {
    pub sheets: Vec<SheetInput>,
}

impl WorkbookInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, sheet: SheetInput) -> Self {
        self.sheets.push(sheet);
        self
    }

    /// Case-insensitive sheet lookup.
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        let wanted = name.to_uppercase();
        self.sheets
            .iter()
            .position(|s| s.name.to_uppercase() == wanted)
    }

    pub fn formula_count(&self) -> usize {
        self.sheets.iter().map(|s| s.formulas.len()).sum()
    }
}

/// Computed values of one sheet. Written concurrently during scatter.
#[derive(Debug, Default)]
pub struct SheetResults {
    pub name: String,
    pub numbers: DashMap<String, f64>,
    /// Text results and error markers.
    pub texts: DashMap<String, String>,
}

impl SheetResults {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Store a scalar result. NaN becomes `#N/A`, infinities `#DIV/0!`,
    /// Empty is stored as 0. Arrays store their first element.
    pub fn store(&self, addr: &str, value: &TaggedValue) {
        match value.payload() {
            Payload::Float(n) => self.store_number(addr, *n),
            Payload::Text(s) => self.store_text(addr, s.clone()),
            Payload::Error(kind) => self.store_text(addr, kind.to_string()),
            Payload::Empty => self.store_number(addr, 0.0),
            Payload::FloatArray(v) => match v.first() {
                Some(n) => self.store_number(addr, *n),
                None => self.store_text(addr, ErrorKind::Value.to_string()),
            },
            Payload::TextArray(v) => match v.first() {
                Some(s) => self.store_text(addr, s.clone()),
                None => self.store_text(addr, ErrorKind::Value.to_string()),
            },
            Payload::RangeRef { .. } => self.store_text(addr, ErrorKind::Ref.to_string()),
        }
    }

    fn store_number(&self, addr: &str, n: f64) {
        if n.is_nan() {
            self.store_text(addr, ErrorKind::Na.to_string());
        } else if n.is_infinite() {
            self.store_text(addr, ErrorKind::Div.to_string());
        } else {
            self.texts.remove(addr);
            self.numbers.insert(addr.to_string(), n);
        }
    }

    fn store_text(&self, addr: &str, s: String) {
        self.numbers.remove(addr);
        self.texts.insert(addr.to_string(), s);
    }

    /// Stored result at `addr`; error markers come back as errors.
    pub fn value(&self, addr: &str) -> Option<TaggedValue> {
        if let Some(n) = self.numbers.get(addr) {
            return Some(TaggedValue::number(*n));
        }
        self.texts
            .get(addr)
            .map(|s| TaggedValue::from_stored_text(s.value()))
    }

    pub fn len(&self) -> usize {
        self.numbers.len() + self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub passes: usize,
    pub levels: usize,
    pub groups: usize,
    pub formulas: usize,
    pub malformed: usize,
    pub backend_calls: usize,
    pub memoized_ranges: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct RunOutput {
    pub sheets: Vec<SheetResults>,
    pub stats: RunStats,
}

impl RunOutput {
    pub fn for_input(input: &WorkbookInput) -> Self {
        Self {
            sheets: input
                .sheets
                .iter()
                .map(|s| SheetResults::new(s.name.clone()))
                .collect(),
            stats: RunStats::default(),
        }
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetResults> {
        self.sheets
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, sheet: &str, addr: &str) -> Option<TaggedValue> {
        self.sheet(sheet)?.value(&normalize(addr))
    }
}
