//! Writing a formula result into its destination cells.

use sheetbatch_common::{ErrorKind, RangeSpan, TaggedValue};

use crate::repository::RangeRepository;
use crate::workbook::SheetResults;

/// Column-major index into an `rows × cols` result for the destination cell
/// at column offset `col` and row offset `row`. `None` means the cell lies
/// outside what the result can fill and receives `#N/A`.
pub fn source_index(rows: usize, cols: usize, col: usize, row: usize) -> Option<usize> {
    if rows * cols == 1 {
        return Some(0);
    }
    if cols == 1 {
        return (row < rows).then_some(row);
    }
    if rows == 1 {
        return (col < cols).then_some(col);
    }
    (row < rows && col < cols).then_some(col * rows + row)
}

/// Scatter `value` computed for the formula at `anchor`. With an `area` the
/// whole array-formula area is filled; otherwise only the anchor cell.
pub fn scatter(
    value: &TaggedValue,
    anchor: &str,
    area: Option<&RangeSpan>,
    ranges: &RangeRepository,
    results: &SheetResults,
) {
    let entry = ranges.resolve(value);
    let element = |index: usize| match &entry {
        Some(entry) => entry.get(index),
        None => value.element(index),
    };
    let (rows, cols) = match &entry {
        Some(entry) => (entry.rows() as usize, entry.cols() as usize),
        None => (value.rows() as usize, value.cols() as usize),
    };

    let area = match area {
        Some(area) if area.len() > 1 => area,
        _ => {
            let single = if value.is_scalar() {
                Some(value.clone())
            } else {
                element(0)
            };
            results.store(
                anchor,
                &single.unwrap_or_else(|| TaggedValue::error(ErrorKind::Ref)),
            );
            return;
        }
    };

    for col in 0..area.cols() {
        for row in 0..area.rows() {
            let dest = area.offset(row, col);
            let cell = source_index(rows, cols, col as usize, row as usize)
                .and_then(element)
                .unwrap_or_else(|| TaggedValue::error(ErrorKind::Na));
            results.store(&dest.to_string(), &cell);
        }
    }
}
