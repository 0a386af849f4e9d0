/*!
 * Tabular store: the working set and persistent translation cache.
 *
 * A store is a single sheet whose first row holds headers. Column A carries
 * the source text and acts as the key, column B the extraction metadata, and
 * every further column the output of one engine identity. A key → row index
 * gives O(1) lookups once `initialize_cache` has run.
 *
 * - `address`: cell address arithmetic
 * - `csv_io`: CSV import/export
 * - `xlsx`: Office Open XML workbook import/export
 * - `ods`: OpenDocument spreadsheet import/export
 * - `text`: line-by-line text import/export
 * - `package`: zip and markup helpers
 */

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, warn};

use crate::errors::StoreError;

pub mod address;
pub mod csv_io;
pub mod ods;
mod package;
pub mod text;
pub mod xlsx;

pub use address::{column_index, column_letter, CellAddress, ColumnRef};

/// Sheet name used when the source format has none
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Header of the source-text column
pub const SOURCE_HEADER: &str = "rawText";

/// Header of the metadata column
pub const METADATA_HEADER: &str = "metadata";

/// A cell: `None` means nothing was ever written, `Some("")` is an explicit empty string
pub type Cell = Option<String>;

/// Supported on-disk formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Csv,
    Xlsx,
    Xls,
    Ods,
    Text,
}

impl StoreFormat {
    /// Pick the format from a path's extension
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(Self::Csv),
            "xlsx" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            "ods" => Ok(Self::Ods),
            "txt" => Ok(Self::Text),
            other => Err(StoreError::UnsupportedFormat(format!(
                "'{}' ({})",
                other,
                path.display()
            ))),
        }
    }
}

/// Write through a temporary sibling file and rename it into place
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<(), StoreError>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    let temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StoreError::io(path, e))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer.flush().map_err(|e| StoreError::io(path, e))?;
    }
    temp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Uniquely keyed, column-extensible table
#[derive(Debug, Clone)]
pub struct Store {
    sheet_name: String,
    rows: Vec<Vec<Cell>>,
    index: HashMap<String, usize>,
    index_built: bool,
    last_entry: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a value can serve as a key
fn is_valid_key(value: &str) -> bool {
    !value.trim().is_empty()
}

fn cell_key(cell: Option<&Cell>) -> Option<&str> {
    match cell {
        Some(Some(value)) if is_valid_key(value) => Some(value.as_str()),
        _ => None,
    }
}

/// Overlay `incoming` onto `existing`, preferring non-absent values and
/// letting `incoming` win when both are present
fn merge_cells(existing: &mut Vec<Cell>, incoming: &[Cell]) {
    if existing.len() < incoming.len() {
        existing.resize(incoming.len(), None);
    }
    for (slot, value) in existing.iter_mut().zip(incoming.iter()) {
        if value.is_some() {
            *slot = value.clone();
        }
    }
}

impl Store {
    /// Create an empty store with no header row
    pub fn new() -> Self {
        Self {
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            rows: Vec::new(),
            index: HashMap::new(),
            index_built: false,
            last_entry: 1,
        }
    }

    /// Create a store whose first row holds the given headers
    pub fn with_headers(headers: &[&str]) -> Self {
        let mut store = Self::new();
        store
            .rows
            .push(headers.iter().map(|h| Some(h.to_string())).collect());
        store
    }

    /// The working-set layout: source text and metadata columns
    pub fn working_set() -> Self {
        Self::with_headers(&[SOURCE_HEADER, METADATA_HEADER])
    }

    /// Build a store from raw rows (row 0 = headers) as read from disk
    pub fn from_rows(sheet_name: impl Into<String>, mut rows: Vec<Vec<Cell>>) -> Self {
        while rows
            .last()
            .is_some_and(|row| row.iter().all(|cell| cell.is_none()))
        {
            rows.pop();
        }
        for row in rows.iter_mut() {
            while row.last().is_some_and(|cell| cell.is_none()) {
                row.pop();
            }
        }
        Self {
            sheet_name: sheet_name.into(),
            rows,
            index: HashMap::new(),
            index_built: false,
            last_entry: 1,
        }
    }

    /// Rename the sheet
    pub fn with_sheet_name(mut self, sheet_name: impl Into<String>) -> Self {
        self.sheet_name = sheet_name.into();
        self
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    /// Number of rows, header row included
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Width of the widest row
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|row| row.len()).max().unwrap_or(0)
    }

    /// Whether the key index is current
    pub fn is_indexed(&self) -> bool {
        self.index_built
    }

    /// Number of keys in the index
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Row that the last `add_to_cache` wrote (the current bottom)
    pub fn last_entry(&self) -> usize {
        self.last_entry
    }

    /// Raw row access for the exporters
    pub(crate) fn raw_rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Iterate `(row number, key)` over data rows in ascending order
    pub fn keys(&self) -> impl Iterator<Item = (usize, &str)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, row)| cell_key(row.first()).map(|key| (i + 1, key)))
    }

    fn check_row(&self, row: usize) -> Result<(), StoreError> {
        if row == 0 {
            return Err(StoreError::InvalidAddress("row 0".to_string()));
        }
        Ok(())
    }

    /// Append a row at the bottom; the first row of an empty store becomes the header row
    pub fn append_row(&mut self, values: Vec<Cell>) -> Result<usize, StoreError> {
        if self.rows.is_empty() {
            self.rows.push(values);
            return Ok(1);
        }

        let key = match values.first() {
            Some(Some(value)) if is_valid_key(value) => value.clone(),
            Some(Some(value)) => return Err(StoreError::InvalidKey(value.clone())),
            _ => return Err(StoreError::InvalidKey(String::new())),
        };
        if self.search_first_column(&key).is_some() {
            return Err(StoreError::DuplicateKey(key));
        }

        self.rows.push(values);
        let row = self.rows.len();
        if self.index_built {
            self.index.insert(key, row);
            self.last_entry = row;
        }
        Ok(row)
    }

    /// Write a cell. Rows grow only through `append_row`/`add_to_cache`.
    pub fn set_cell(
        &mut self,
        row: usize,
        column: impl Into<ColumnRef>,
        value: Cell,
    ) -> Result<(), StoreError> {
        self.check_row(row)?;
        let column = column.into().resolve()?;
        if row > self.rows.len() && !(row == 1 && self.rows.is_empty()) {
            return Err(StoreError::InvalidAddress(CellAddress::new(column, row).to_string()));
        }
        if self.rows.is_empty() {
            self.rows.push(Vec::new());
        }

        if column == 1 && row > 1 {
            let new_key = match &value {
                Some(v) if is_valid_key(v) => v.clone(),
                Some(v) => return Err(StoreError::InvalidKey(v.clone())),
                None => return Err(StoreError::InvalidKey(String::new())),
            };
            let old_key = self.rows[row - 1].first().cloned().flatten();
            if old_key.as_deref() != Some(new_key.as_str()) {
                if let Some(existing) = self.search_first_column(&new_key) {
                    if existing != row {
                        return Err(StoreError::DuplicateKey(new_key));
                    }
                }
                if self.index_built {
                    if let Some(old) = old_key {
                        self.index.remove(&old);
                    }
                    self.index.insert(new_key, row);
                }
            }
        }

        let cells = &mut self.rows[row - 1];
        if cells.len() < column {
            cells.resize(column, None);
        }
        cells[column - 1] = value;
        Ok(())
    }

    /// Read a cell; cells outside the written area are absent
    pub fn get_cell(&self, row: usize, column: impl Into<ColumnRef>) -> Result<Option<&str>, StoreError> {
        self.check_row(row)?;
        let column = column.into().resolve()?;
        Ok(self
            .rows
            .get(row - 1)
            .and_then(|cells| cells.get(column - 1))
            .and_then(|cell| cell.as_deref()))
    }

    /// A dense copy of a row, padded with absent cells to the table width
    pub fn get_row(&self, row: usize) -> Result<Vec<Cell>, StoreError> {
        self.check_row(row)?;
        let width = self.column_count();
        let mut cells = self.rows.get(row - 1).cloned().unwrap_or_default();
        cells.resize(width, None);
        Ok(cells)
    }

    /// A dense copy of a column, one cell per row
    pub fn get_column(&self, column: impl Into<ColumnRef>) -> Result<Vec<Cell>, StoreError> {
        let column = column.into().resolve()?;
        Ok(self
            .rows
            .iter()
            .map(|cells| cells.get(column - 1).cloned().flatten())
            .collect())
    }

    /// Header row as text, absent headers as `None`
    pub fn headers(&self) -> Vec<Cell> {
        self.rows.first().cloned().unwrap_or_default()
    }

    /// Column letter of an exact (case-sensitive) header match
    pub fn search_headers(&self, term: &str) -> Option<String> {
        self.header_position(term).map(column_letter)
    }

    fn header_position(&self, term: &str) -> Option<usize> {
        self.rows
            .first()?
            .iter()
            .position(|cell| cell.as_deref() == Some(term))
            .map(|i| i + 1)
    }

    /// Row number of an exact (case-sensitive) key match
    pub fn search_first_column(&self, term: &str) -> Option<usize> {
        if self.index_built {
            return self.index.get(term).copied();
        }
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.first().and_then(|c| c.as_deref()) == Some(term))
            .map(|(i, _)| i + 1)
    }

    /// First cell (row-major) whose whole value equals `term`
    pub fn search_anywhere(&self, term: &str, case_sensitive: bool) -> Option<CellAddress> {
        let needle = if case_sensitive { term.to_string() } else { term.to_lowercase() };
        for (r, row) in self.rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let Some(value) = cell.as_deref() else { continue };
                let hit = if case_sensitive {
                    value == needle
                } else {
                    value.to_lowercase() == needle
                };
                if hit {
                    return Some(CellAddress::new(c + 1, r + 1));
                }
            }
        }
        None
    }

    /// Column index for a header, appending the header when it is missing
    pub fn ensure_header(&mut self, header: &str) -> Result<usize, StoreError> {
        if self.rows.is_empty() {
            return Err(StoreError::MalformedStore("store has no header row".to_string()));
        }
        if let Some(position) = self.header_position(header) {
            return Ok(position);
        }
        let headers = &mut self.rows[0];
        while headers.last().is_some_and(|cell| cell.is_none()) {
            headers.pop();
        }
        let width = self.rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let headers = &mut self.rows[0];
        headers.resize(width, None);
        headers.push(Some(header.to_string()));
        debug!("Created column {} for '{}'", column_letter(headers.len()), header);
        Ok(headers.len())
    }

    /// Scan the first column and rebuild the key index
    pub fn initialize_cache(&mut self) -> Result<(), StoreError> {
        self.index_built = false;
        self.index.clear();
        if self.rows.is_empty() {
            return Err(StoreError::MalformedStore("store has no header row".to_string()));
        }

        let mut index = HashMap::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate().skip(1) {
            let row_number = i + 1;
            let Some(key) = cell_key(row.first()) else {
                return Err(StoreError::CacheCorrupt(format!(
                    "empty key at {}",
                    CellAddress::new(1, row_number)
                )));
            };
            if let Some(previous) = index.insert(key.to_string(), row_number) {
                return Err(StoreError::CacheCorrupt(format!(
                    "duplicate key at rows {} and {}",
                    previous, row_number
                )));
            }
        }

        self.index = index;
        self.index_built = true;
        self.last_entry = if self.rows.len() <= 1 { 1 } else { self.rows.len() };
        self.verify_index()
    }

    /// Check `size(index) + 1 == non-empty cells in column A`
    pub fn verify_index(&self) -> Result<(), StoreError> {
        if !self.index_built {
            return Ok(());
        }
        let non_empty = self
            .rows
            .iter()
            .filter(|row| cell_key(row.first()).is_some())
            .count();
        if self.index.len() + 1 != non_empty {
            return Err(StoreError::CacheCorrupt(format!(
                "index holds {} keys but column A has {} non-empty cells",
                self.index.len(),
                non_empty
            )));
        }
        Ok(())
    }

    /// Return the row for `key`, appending a new row when it is not present
    pub fn add_to_cache(&mut self, key: &str) -> Result<usize, StoreError> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        if !self.index_built {
            self.initialize_cache()?;
        }
        if let Some(row) = self.index.get(key) {
            return Ok(*row);
        }

        let row = self.last_entry + 1;
        if row != self.rows.len() + 1 {
            return Err(StoreError::CacheCorrupt(format!(
                "bottom row is {} but next entry would be {}",
                self.rows.len(),
                row
            )));
        }
        self.rows.push(vec![Some(key.to_string())]);
        self.index.insert(key.to_string(), row);
        self.last_entry = row;
        Ok(row)
    }

    /// Deduplicate rows by the first column, optionally moving `core_header` there first
    pub fn rebuild_cache(&mut self, core_header: Option<&str>) -> Result<(), StoreError> {
        if self.rows.is_empty() {
            return Err(StoreError::MalformedStore("store has no header row".to_string()));
        }
        if let Some(core) = core_header {
            let position = self.header_position(core).ok_or_else(|| {
                StoreError::MalformedStore(format!("missing core header '{}'", core))
            })?;
            if position != 1 {
                for row in self.rows.iter_mut() {
                    if row.len() < position {
                        row.resize(position, None);
                    }
                    let cell = row.remove(position - 1);
                    row.insert(0, cell);
                }
            }
        }

        let mut rows = vec![self.rows[0].clone()];
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut dropped = 0usize;
        for row in self.rows.iter().skip(1) {
            let Some(key) = cell_key(row.first()) else {
                dropped += 1;
                continue;
            };
            match seen.get(key) {
                Some(&at) => merge_cells(&mut rows[at], row),
                None => {
                    seen.insert(key.to_string(), rows.len());
                    rows.push(row.clone());
                }
            }
        }
        if dropped > 0 {
            warn!("Dropped {} rows with an empty key while rebuilding", dropped);
        }

        self.rows = rows;
        self.initialize_cache()
    }

    /// Union rows keyed by the core header and union columns by header name
    pub fn merge_with(&mut self, other: &Store, core_header: Option<&str>) -> Result<(), StoreError> {
        if self.sheet_name != other.sheet_name {
            return Err(StoreError::SheetMismatch {
                left: self.sheet_name.clone(),
                right: other.sheet_name.clone(),
            });
        }
        if self.rows.is_empty() || other.rows.is_empty() {
            return Err(StoreError::MalformedStore("store has no header row".to_string()));
        }

        let core = match core_header {
            Some(core) => core.to_string(),
            None => self.rows[0]
                .first()
                .cloned()
                .flatten()
                .ok_or_else(|| StoreError::MalformedStore("first header is empty".to_string()))?,
        };
        let missing = |store: &Store| StoreError::MalformedStore(format!(
            "sheet '{}' lacks core header '{}'",
            store.sheet_name, core
        ));
        let self_core = self.header_position(&core).ok_or_else(|| missing(self))?;
        let other_core = other.header_position(&core).ok_or_else(|| missing(other))?;

        let mut headers: Vec<Cell> = vec![Some(core.clone())];
        let self_map = Self::map_columns(self, self_core, &mut headers);
        let other_map = Self::map_columns(other, other_core, &mut headers);

        let mut rows: Vec<Vec<Cell>> = vec![headers];
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (store, map, core_at) in [(&*self, &self_map, self_core), (other, &other_map, other_core)] {
            for row in store.rows.iter().skip(1) {
                let Some(key) = cell_key(row.get(core_at - 1)) else { continue };
                let mut mapped: Vec<Cell> = vec![None; rows[0].len()];
                for (i, cell) in row.iter().enumerate() {
                    if let Some(target) = map.get(i) {
                        mapped[*target] = cell.clone();
                    }
                }
                match seen.get(key) {
                    Some(&at) => merge_cells(&mut rows[at], &mapped),
                    None => {
                        seen.insert(key.to_string(), rows.len());
                        rows.push(mapped);
                    }
                }
            }
        }

        self.rows = Store::from_rows(self.sheet_name.clone(), rows).rows;
        self.initialize_cache()
    }

    /// Map every column of `store` to a position in the merged header list
    fn map_columns(store: &Store, core_at: usize, headers: &mut Vec<Cell>) -> Vec<usize> {
        let width = store.column_count();
        let source_headers = store.get_row(1).unwrap_or_default();
        (0..width)
            .map(|i| {
                if i + 1 == core_at {
                    return 0;
                }
                match source_headers.get(i).cloned().flatten() {
                    Some(name) => match headers.iter().position(|h| h.as_deref() == Some(name.as_str())) {
                        Some(position) => position,
                        None => {
                            headers.push(Some(name));
                            headers.len() - 1
                        }
                    },
                    None => {
                        headers.push(None);
                        headers.len() - 1
                    }
                }
            })
            .collect()
    }

    /// Write the store to disk, choosing the format by extension
    pub fn export(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        match StoreFormat::from_path(path)? {
            StoreFormat::Csv => csv_io::write(self, path),
            StoreFormat::Xlsx => xlsx::write(self, path),
            StoreFormat::Ods => ods::write(self, path),
            StoreFormat::Text => text::write(self, path),
            StoreFormat::Xls => Err(StoreError::UnsupportedFormat(format!(
                "legacy .xls workbooks cannot be written ({})",
                path.display()
            ))),
        }
    }

    /// Read a store from disk, choosing the format by extension
    pub fn import(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let format = StoreFormat::from_path(path)?;
        if !path.is_file() {
            return Err(StoreError::io(path, "file does not exist"));
        }
        let store = match format {
            StoreFormat::Csv => csv_io::read(path)?,
            StoreFormat::Xlsx => xlsx::read(path)?,
            StoreFormat::Ods => ods::read(path)?,
            StoreFormat::Text => text::read(path)?,
            StoreFormat::Xls => {
                return Err(StoreError::UnsupportedFormat(format!(
                    "legacy .xls workbooks cannot be read; save as .xlsx or .ods ({})",
                    path.display()
                )));
            }
        };
        debug!(
            "Imported {} rows x {} columns from {}",
            store.row_count(),
            store.column_count(),
            path.display()
        );
        Ok(store)
    }
}
