//! Large ranges are materialized once per run and shared by key.
use super::common::{config, number};
use crate::backend::CpuBackend;
use crate::engine::Engine;
use crate::workbook::{SheetInput, WorkbookInput};
use sheetbatch_common::RangeKey;

fn hundred_constants() -> SheetInput {
    let mut sheet = SheetInput::new("Data");
    for row in 1..=100 {
        sheet = sheet.with_number(&format!("A{row}"), row as f64);
    }
    sheet
}

#[test]
fn test_large_range_is_memoized_once() {
    let wb = WorkbookInput::new().with_sheet(
        hundred_constants()
            .with_formula("B1", "=SUM(A1:A100)")
            .with_formula("B2", "=AVERAGE(A1:A100)"),
    );
    let mut engine = Engine::new(CpuBackend::seeded(1), config(true));
    let out = engine.run(&wb).unwrap();
    assert_eq!(number(&out, "Data", "B1"), 5050.0);
    assert_eq!(number(&out, "Data", "B2"), 50.5);

    assert_eq!(out.stats.memoized_ranges, 1);
    let key = RangeKey::new("Data", "A1", "A100");
    let entry = engine.ranges().get(&key).expect("range memoized");
    assert_eq!(entry.rows(), 100);
    assert_eq!(entry.cols(), 1);
}

#[test]
fn test_small_range_stays_dense() {
    let wb = WorkbookInput::new().with_sheet(
        hundred_constants().with_formula("B1", "=SUM(A1:A10)"),
    );
    let mut engine = Engine::new(CpuBackend::seeded(1), config(false));
    let out = engine.run(&wb).unwrap();
    assert_eq!(number(&out, "Data", "B1"), 55.0);
    assert!(engine.ranges().is_empty());
}

#[test]
fn test_threshold_is_configurable() {
    let wb = WorkbookInput::new().with_sheet(
        hundred_constants().with_formula("B1", "=SUM(A1:A10)"),
    );
    let mut cfg = config(false);
    cfg.range_memo_threshold = 5;
    let mut engine = Engine::new(CpuBackend::seeded(1), cfg);
    let out = engine.run(&wb).unwrap();
    assert_eq!(number(&out, "Data", "B1"), 55.0);
    assert_eq!(engine.ranges().len(), 1);
}

#[test]
fn test_memoized_lookup_table() {
    let mut sheet = SheetInput::new("Data");
    for row in 1..=100 {
        // keys in descending order so the sorted index matters
        sheet = sheet
            .with_number(&format!("A{row}"), (101 - row) as f64)
            .with_number(&format!("B{row}"), row as f64 * 10.0);
    }
    let wb = WorkbookInput::new().with_sheet(
        sheet
            .with_formula("D1", "=VLOOKUP(90,A1:B100,2,FALSE)")
            .with_formula("D2", "=VLOOKUP(90.5,A1:B100,2)")
            .with_formula("D3", "=VLOOKUP(90.5,A1:B100,2,FALSE)"),
    );
    let mut engine = Engine::new(CpuBackend::seeded(1), config(true));
    let out = engine.run(&wb).unwrap();
    // key 90 sits in row 11
    assert_eq!(number(&out, "Data", "D1"), 110.0);
    assert_eq!(number(&out, "Data", "D2"), 110.0);
    assert_eq!(
        out.value("Data", "D3").and_then(|v| v.as_error()),
        Some(sheetbatch_common::ErrorKind::Na)
    );
    assert_eq!(engine.ranges().len(), 1);
}

#[test]
fn test_repository_is_cleared_between_runs() {
    let wb = WorkbookInput::new().with_sheet(
        hundred_constants().with_formula("B1", "=SUM(A1:A100)"),
    );
    let mut engine = Engine::new(CpuBackend::seeded(1), config(false));
    engine.run(&wb).unwrap();
    assert_eq!(engine.ranges().len(), 1);

    let small = WorkbookInput::new()
        .with_sheet(SheetInput::new("Data").with_formula("A1", "=1"));
    engine.run(&small).unwrap();
    assert!(engine.ranges().is_empty());
}
