/*!
 * CSV import and export.
 *
 * Empty fields read back as absent cells, since CSV cannot tell the two apart.
 */

use std::path::Path;

use crate::errors::StoreError;

use super::{write_atomically, Cell, Store, DEFAULT_SHEET_NAME};

/// Read a UTF-8 CSV file (BOM tolerated) into a store
pub fn read(path: &Path) -> Result<Store, StoreError> {
    let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(&bytes);
    if had_errors {
        return Err(StoreError::decode(path, "invalid UTF-8"));
    }
    parse(&text).map_err(|e| StoreError::decode(path, e))
}

/// Parse CSV text into a store
pub fn parse(text: &str) -> Result<Store, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect(),
        );
    }
    Ok(Store::from_rows(DEFAULT_SHEET_NAME, rows))
}

/// Write the store as UTF-8 CSV, padding every row to the full width
pub fn write(store: &Store, path: &Path) -> Result<(), StoreError> {
    let width = store.column_count();
    write_atomically(path, |out| {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(out);
        for row in store.raw_rows() {
            let fields = (0..width).map(|i| row.get(i).cloned().flatten().unwrap_or_default());
            writer
                .write_record(fields)
                .map_err(|e| StoreError::io(path, e))?;
        }
        writer.flush().map_err(|e| StoreError::io(path, e))
    })
}
