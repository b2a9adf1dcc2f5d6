//! Tests for cycle detection using the Scheduler.
use super::common::{config, schedule};
use crate::backend::CpuBackend;
use crate::engine::Engine;
use crate::error::{EngineError, SchedulingError};
use crate::workbook::{SheetInput, WorkbookInput};

#[test]
fn test_two_node_cycle_detection() {
    // A1 -> B1 -> A1
    let wb = WorkbookInput::new().with_sheet(
        SheetInput::new("Sheet1")
            .with_formula("A1", "=B1")
            .with_formula("B1", "=A1"),
    );
    let err = schedule(&wb).unwrap_err();
    assert_eq!(
        err,
        SchedulingError::Cycle {
            cells: vec!["Sheet1!A1".to_string(), "Sheet1!B1".to_string()]
        }
    );
}

#[test]
fn test_self_reference_is_a_cycle() {
    let wb =
        WorkbookInput::new().with_sheet(SheetInput::new("Sheet1").with_formula("A1", "=A1+1"));
    let SchedulingError::Cycle { cells } = schedule(&wb).unwrap_err();
    assert_eq!(cells, vec!["Sheet1!A1"]);
}

#[test]
fn test_cycle_names_only_unresolved_cells() {
    // C1 is fine, D1 depends on the cycle through a range
    let wb = WorkbookInput::new().with_sheet(
        SheetInput::new("Sheet1")
            .with_formula("A1", "=B1")
            .with_formula("B1", "=A1")
            .with_formula("C1", "=1")
            .with_formula("D1", "=SUM(A1:C1)"),
    );
    let SchedulingError::Cycle { cells } = schedule(&wb).unwrap_err();
    assert_eq!(cells, vec!["Sheet1!A1", "Sheet1!B1", "Sheet1!D1"]);
}

#[test]
fn test_cross_sheet_cycle() {
    let wb = WorkbookInput::new()
        .with_sheet(SheetInput::new("One").with_formula("A1", "=Two!A1"))
        .with_sheet(SheetInput::new("Two").with_formula("A1", "=One!A1"));
    let SchedulingError::Cycle { cells } = schedule(&wb).unwrap_err();
    assert_eq!(cells, vec!["One!A1", "Two!A1"]);
}

#[test]
fn test_engine_surfaces_cycle_error() {
    let wb = WorkbookInput::new().with_sheet(
        SheetInput::new("Sheet1")
            .with_formula("A1", "=B1*2")
            .with_formula("B1", "=A1*2"),
    );
    let mut engine = Engine::new(CpuBackend::seeded(1), config(false));
    let err = engine.run(&wb).unwrap_err();
    assert!(matches!(err, EngineError::Scheduling(SchedulingError::Cycle { .. })));
    assert!(err.to_string().contains("Sheet1!A1"));
}
