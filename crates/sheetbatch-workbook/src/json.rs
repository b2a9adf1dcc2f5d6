//! JSON workbook layout:
//!
//! ```json
//! { "version": 1,
//!   "sheets": [ { "name": "Sheet1",
//!                 "cells": [ { "address": "A1", "value": 2 },
//!                            { "address": "B1", "formula": "=A1*2" },
//!                            { "address": "C1", "formula": "=TRANSPOSE(A1:A3)",
//!                              "array": "C1:E1" } ] } ] }
//! ```
//!
//! A cell carrying a formula is a formula cell; its `value` is the last
//! computed result and is ignored on load. The same holds for plain values
//! inside another cell's `array` area: they are results of that array
//! formula and never become constants.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sheetbatch_common::{CellAddress, RangeSpan};
use sheetbatch_eval::{RunOutput, SheetInput, WorkbookInput};

use crate::IoError;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct JsonWorkbook {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    sheets: Vec<JsonSheet>,
}

fn default_version() -> u32 {
    FORMAT_VERSION
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct JsonSheet {
    name: String,
    #[serde(default)]
    cells: Vec<JsonCell>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct JsonCell {
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    array: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum JsonValue {
    Number(f64),
    Text(String),
}

/// Load a workbook file.
pub fn load_workbook(path: impl AsRef<Path>) -> Result<WorkbookInput, IoError> {
    let file = File::open(path)?;
    read_workbook(BufReader::new(file))
}

pub fn read_workbook(reader: impl Read) -> Result<WorkbookInput, IoError> {
    let data: JsonWorkbook = serde_json::from_reader(reader)?;
    if data.version != FORMAT_VERSION {
        return Err(IoError::UnsupportedVersion(data.version));
    }

    let mut input = WorkbookInput::new();
    for sheet in data.sheets {
        if input.sheet_index(&sheet.name).is_some() {
            return Err(IoError::DuplicateSheet(sheet.name));
        }
        let converted = to_sheet_input(&sheet)?;
        input = input.with_sheet(converted);
    }
    Ok(input)
}

fn to_sheet_input(js: &JsonSheet) -> Result<SheetInput, IoError> {
    let mut sheet = SheetInput::new(js.name.clone());
    for cell in &js.cells {
        let cleaned = cell.address.trim().replace('$', "").to_ascii_uppercase();
        let addr = CellAddress::parse(&cleaned).map_err(|_| IoError::InvalidAddress {
            sheet: js.name.clone(),
            address: cell.address.clone(),
        })?;
        let key = addr.to_string();

        match (&cell.formula, &cell.array) {
            (Some(formula), Some(area)) => {
                let span = RangeSpan::parse(&area.trim().replace('$', "").to_ascii_uppercase())
                    .ok()
                    .filter(|span| span.start == addr)
                    .ok_or_else(|| IoError::InvalidArea {
                        sheet: js.name.clone(),
                        address: key.clone(),
                        area: area.clone(),
                    })?;
                sheet = sheet.with_array_formula(span, formula.clone());
            }
            (Some(formula), None) => {
                sheet = sheet.with_formula(&key, formula.clone());
            }
            (None, _) => match &cell.value {
                Some(JsonValue::Number(n)) => sheet = sheet.with_number(&key, *n),
                Some(JsonValue::Text(s)) => sheet = sheet.with_text(&key, s.clone()),
                None => {}
            },
        }
    }

    let spilled: Vec<String> = sheet
        .array_formulas
        .iter()
        .flat_map(|(anchor, area)| {
            area.cells()
                .map(|c| c.to_string())
                .filter(move |c| c != anchor)
        })
        .collect();
    for addr in &spilled {
        sheet.constants.remove(addr);
        sheet.text_constants.remove(addr);
    }
    Ok(sheet)
}

/// Save `input` with the results of `output` next to each formula.
pub fn save_workbook(
    path: impl AsRef<Path>,
    input: &WorkbookInput,
    output: &RunOutput,
) -> Result<(), IoError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_workbook(&mut writer, input, output)?;
    writer.flush()?;
    Ok(())
}

pub fn write_workbook(
    writer: impl Write,
    input: &WorkbookInput,
    output: &RunOutput,
) -> Result<(), IoError> {
    let data = JsonWorkbook {
        version: FORMAT_VERSION,
        sheets: input
            .sheets
            .iter()
            .map(|sheet| to_json_sheet(sheet, output))
            .collect(),
    };
    serde_json::to_writer_pretty(writer, &data)?;
    Ok(())
}

fn to_json_sheet(sheet: &SheetInput, output: &RunOutput) -> JsonSheet {
    // row-major order for readable output
    let mut cells: BTreeMap<(u32, u32), JsonCell> = BTreeMap::new();
    let mut put = |addr: &str, cell: JsonCell| {
        let pos = CellAddress::parse(addr).map_or((u32::MAX, u32::MAX), |a| (a.row, a.col));
        cells.insert(pos, cell);
    };

    for (addr, n) in &sheet.constants {
        put(addr, value_cell(addr, Some(JsonValue::Number(*n))));
    }
    for (addr, s) in &sheet.text_constants {
        put(addr, value_cell(addr, Some(JsonValue::Text(s.clone()))));
    }

    if let Some(results) = output.sheet(&sheet.name) {
        for entry in results.numbers.iter() {
            put(entry.key(), value_cell(entry.key(), Some(JsonValue::Number(*entry.value()))));
        }
        for entry in results.texts.iter() {
            put(entry.key(), value_cell(entry.key(), Some(JsonValue::Text(entry.value().clone()))));
        }
    }

    for (addr, formula) in &sheet.formulas {
        let value = output
            .sheet(&sheet.name)
            .and_then(|r| r.value(addr))
            .map(|v| match v.as_number() {
                Some(n) => JsonValue::Number(n),
                None => JsonValue::Text(v.to_string()),
            });
        put(
            addr,
            JsonCell {
                address: addr.clone(),
                value,
                formula: Some(formula.clone()),
                array: sheet.array_formulas.get(addr).map(|a| a.to_string()),
            },
        );
    }

    JsonSheet {
        name: sheet.name.clone(),
        cells: cells.into_values().collect(),
    }
}

fn value_cell(addr: &str, value: Option<JsonValue>) -> JsonCell {
    JsonCell {
        address: addr.to_string(),
        value,
        formula: None,
        array: None,
    }
}
