use std::collections::BTreeMap;

use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use sheetbatch_common::{CellRef, RangeSpan};
use sheetbatch_parse::TokenKind;

use super::formulas::{FormulaTable, ParsedFormula, is_range_endpoint, range_endpoints};
use crate::error::SchedulingError;
use crate::workbook::WorkbookInput;

pub struct Scheduler<'a> {
    formulas: &'a FormulaTable,
    input: &'a WorkbookInput,
    parallel: bool,
}

/// All formulas of one calculation level.
#[derive(Debug, Clone)]
pub struct Layer {
    pub level: usize,
    pub cells: Vec<CellRef>,
}

#[derive(Debug, Default)]
pub struct Schedule {
    /// Ascending by level.
    pub layers: Vec<Layer>,
    /// Committed level per sheet and address.
    pub levels: Vec<FxHashMap<String, usize>>,
    /// Formulas that failed to parse. They are never scheduled.
    pub malformed: Vec<CellRef>,
    /// Fixpoint passes run, including the final one that committed nothing.
    pub passes: usize,
}

impl Schedule {
    pub fn level_of(&self, cell: &CellRef) -> Option<usize> {
        self.levels.get(cell.sheet)?.get(&cell.address).copied()
    }

    pub fn max_level(&self) -> usize {
        self.layers.last().map_or(0, |l| l.level)
    }
}

/// Committed levels of previous passes; read-only within a pass.
type Snapshot = Vec<FxHashMap<String, usize>>;

impl<'a> Scheduler<'a> {
    pub fn new(formulas: &'a FormulaTable, input: &'a WorkbookInput) -> Self {
        Self {
            formulas,
            input,
            parallel: true,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn create_schedule(&self) -> Result<Schedule, SchedulingError> {
        // 1. Split well-formed formulas from malformed ones
        let mut pending = Vec::new();
        let mut malformed = Vec::new();
        for (cell, parsed) in self.formulas.cells() {
            match parsed {
                ParsedFormula::Tokens { .. } => pending.push(cell),
                ParsedFormula::Malformed(_) => malformed.push(cell),
            }
        }
        pending.sort();
        malformed.sort();

        // 2. Fixpoint: each pass levels what its snapshot allows, then commits
        let mut levels: Snapshot = vec![FxHashMap::default(); self.formulas.sheet_count()];
        let mut passes = 0;
        while !pending.is_empty() {
            passes += 1;
            let committed = self.run_pass(&pending, &levels);
            if committed.is_empty() {
                break;
            }
            for (cell, level) in committed {
                levels[cell.sheet].insert(cell.address, level);
            }
            pending.retain(|c| !levels[c.sheet].contains_key(&c.address));
        }

        if !pending.is_empty() {
            let mut cells: Vec<String> = pending.iter().map(|c| self.display_name(c)).collect();
            cells.sort();
            return Err(SchedulingError::Cycle { cells });
        }

        // 3. Group committed formulas into ascending layers
        let layers = self.build_layers(&levels);
        Ok(Schedule {
            layers,
            levels,
            malformed,
            passes,
        })
    }

    fn run_pass(&self, pending: &[CellRef], snapshot: &Snapshot) -> Vec<(CellRef, usize)> {
        let memo = DashMap::new();
        let scan = |cell: &CellRef| {
            self.level_for(cell, snapshot, &memo)
                .map(|level| (cell.clone(), level))
        };
        if self.parallel {
            pending.par_iter().filter_map(scan).collect()
        } else {
            pending.iter().filter_map(scan).collect()
        }
    }

    /// Level of `cell` given `snapshot`, or `None` while a dependency is
    /// still unleveled.
    fn level_for(
        &self,
        cell: &CellRef,
        snapshot: &Snapshot,
        memo: &DashMap<String, usize>,
    ) -> Option<usize> {
        let tokens = self.formulas.tokens(cell)?;
        let mut level = 1;
        let mut sheet = Some(cell.sheet);
        for (k, token) in tokens.iter().enumerate() {
            match &token.kind {
                TokenKind::SheetScopeStart(name) => sheet = self.input.sheet_index(name),
                TokenKind::SheetScopeEnd => sheet = Some(cell.sheet),
                TokenKind::CellRef(addr) if !is_range_endpoint(tokens, k) => {
                    if let Some(s) = sheet {
                        level = level.max(self.reference_level(s, addr, snapshot)?);
                    }
                }
                TokenKind::Range => {
                    if let (Some(s), Some((a, b))) = (sheet, range_endpoints(tokens, k)) {
                        level = level.max(self.range_level(s, a, b, snapshot, memo)?);
                    }
                }
                _ => {}
            }
        }
        Some(level)
    }

    /// Cells inside an array-formula area take the level of its anchor.
    fn reference_level(&self, sheet: usize, addr: &str, snapshot: &Snapshot) -> Option<usize> {
        let addr = self.formulas.spill_anchor(sheet, addr).unwrap_or(addr);
        match self.formulas.get(sheet, addr) {
            Some(ParsedFormula::Tokens { .. }) => snapshot[sheet].get(addr).map(|l| l + 1),
            // malformed formulas sit at level 0
            Some(ParsedFormula::Malformed(_)) | None => Some(1),
        }
    }

    fn range_level(
        &self,
        sheet: usize,
        start: &str,
        end: &str,
        snapshot: &Snapshot,
        memo: &DashMap<String, usize>,
    ) -> Option<usize> {
        let key = format!("{sheet}!{start}:{end}");
        if let Some(level) = memo.get(&key) {
            return Some(*level);
        }
        let Ok(span) = RangeSpan::parse(&format!("{start}:{end}")) else {
            return Some(1);
        };
        let mut level = 1;
        for addr in span.cells() {
            level = level.max(self.reference_level(sheet, &addr.to_string(), snapshot)?);
        }
        memo.insert(key, level);
        Some(level)
    }

    fn build_layers(&self, levels: &Snapshot) -> Vec<Layer> {
        let mut by_level: BTreeMap<usize, Vec<CellRef>> = BTreeMap::new();
        for (sheet, cells) in levels.iter().enumerate() {
            for (addr, level) in cells {
                by_level
                    .entry(*level)
                    .or_default()
                    .push(CellRef::new(sheet, addr.clone()));
            }
        }
        by_level
            .into_iter()
            .map(|(level, mut cells)| {
                cells.sort();
                Layer { level, cells }
            })
            .collect()
    }

    fn display_name(&self, cell: &CellRef) -> String {
        let sheet = self
            .input
            .sheets
            .get(cell.sheet)
            .map_or("?", |s| s.name.as_str());
        format!("{sheet}!{}", cell.address)
    }
}
