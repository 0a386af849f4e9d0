/*!
 * Spreadsheet cell addressing.
 *
 * Rows and columns are 1-based. A printable address such as `AB12` is split
 * once into its column-letter prefix and row-number suffix.
 */

use std::fmt;
use std::str::FromStr;

use crate::errors::StoreError;

/// A column given either by its letters (`"C"`) or its 1-based index (`3`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    /// Column letters, case-insensitive
    Letter(String),
    /// 1-based column index
    Index(usize),
}

impl ColumnRef {
    /// Resolve to a 1-based column index
    pub fn resolve(&self) -> Result<usize, StoreError> {
        match self {
            Self::Letter(letters) => column_index(letters),
            Self::Index(0) => Err(StoreError::InvalidAddress("column 0".to_string())),
            Self::Index(index) => Ok(*index),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(letters: &str) -> Self {
        Self::Letter(letters.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(letters: String) -> Self {
        Self::Letter(letters)
    }
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Convert a 1-based column index into letters (1 -> A, 27 -> AA)
pub fn column_letter(index: usize) -> String {
    let mut remaining = index;
    let mut letters = Vec::new();
    while remaining > 0 {
        let offset = ((remaining - 1) % 26) as u8;
        letters.push((b'A' + offset) as char);
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Convert column letters into a 1-based index (A -> 1, AA -> 27)
pub fn column_index(letters: &str) -> Result<usize, StoreError> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(StoreError::InvalidAddress(letters.to_string()));
    }
    letters.to_ascii_uppercase().bytes().try_fold(0usize, |acc, b| {
        acc.checked_mul(26)
            .and_then(|v| v.checked_add((b - b'A' + 1) as usize))
            .ok_or_else(|| StoreError::InvalidAddress(letters.to_string()))
    })
}

/// A single cell position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAddress {
    /// 1-based column
    pub column: usize,
    /// 1-based row
    pub row: usize,
}

impl CellAddress {
    pub fn new(column: usize, row: usize) -> Self {
        Self { column, row }
    }

    /// Column letters of this address
    pub fn column_letter(&self) -> String {
        column_letter(self.column)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letter(self.column), self.row)
    }
}

impl FromStr for CellAddress {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (letters, row) = split_address(s)?;
        Ok(Self::new(column_index(letters)?, row))
    }
}

/// Split `"AB12"` into `("AB", 12)`. `$` anchors are ignored.
pub fn split_address(address: &str) -> Result<(&str, usize), StoreError> {
    let trimmed = address.trim().trim_start_matches('$');
    let split_at = trimmed
        .find(|c: char| !c.is_ascii_alphabetic())
        .ok_or_else(|| StoreError::InvalidAddress(address.to_string()))?;
    let (letters, digits) = trimmed.split_at(split_at);
    let row: usize = digits
        .trim_start_matches('$')
        .parse()
        .map_err(|_| StoreError::InvalidAddress(address.to_string()))?;
    if letters.is_empty() || row == 0 {
        return Err(StoreError::InvalidAddress(address.to_string()));
    }
    Ok((letters, row))
}
