/*!
 * Line-by-line text import and export.
 *
 * Import turns every non-empty line into a row under a `rawText` header.
 * Export writes one line per data row: the right-most present engine cell
 * (column C onward) when one exists, the source text otherwise.
 * Embedded newlines are flattened to spaces so row and line counts match.
 */

use std::io::Write;
use std::path::Path;

use crate::errors::StoreError;

use super::{write_atomically, Cell, Store, DEFAULT_SHEET_NAME, SOURCE_HEADER};

pub fn read(path: &Path) -> Result<Store, StoreError> {
    let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(&bytes);
    if had_errors {
        return Err(StoreError::decode(path, "invalid UTF-8"));
    }
    Ok(parse(&text))
}

/// Build a store from text, one row per non-empty line
pub fn parse(text: &str) -> Store {
    let mut rows: Vec<Vec<Cell>> = vec![vec![Some(SOURCE_HEADER.to_string())]];
    rows.extend(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| vec![Some(line.to_string())]),
    );
    Store::from_rows(DEFAULT_SHEET_NAME, rows)
}

/// Text of one data row as it is exported
pub fn render_row(row: &[Cell]) -> Option<String> {
    row.iter()
        .skip(2)
        .rev()
        .find_map(|cell| cell.as_deref())
        .or_else(|| row.first().and_then(|cell| cell.as_deref()))
        .map(|text| text.replace(['\r', '\n'], " "))
}

pub fn write(store: &Store, path: &Path) -> Result<(), StoreError> {
    write_atomically(path, |out| {
        for row in store.raw_rows().iter().skip(1) {
            if let Some(line) = render_row(row) {
                writeln!(out, "{}", line).map_err(|e| StoreError::io(path, e))?;
            }
        }
        Ok(())
    })
}
