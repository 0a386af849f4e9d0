/*!
 * Character-name, pre-translation and post-translation dictionaries.
 *
 * All three are loaded from tabular files whose first row is headers.
 * Column A holds the text to find and column B its replacement; the
 * character-name table may carry a gender in column C.
 */

use std::fmt;
use std::path::Path;

use log::{debug, warn};

use crate::errors::AppError;
use crate::file_utils::{ErrorHandler, FileManager};
use crate::store::{csv_io, Store, StoreFormat};

/// A decoded cell from a settings-like table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl SettingValue {
    /// Decode raw text; empty (or `none`) means absent
    pub fn decode(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return None;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Some(Self::Bool(true));
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Some(Self::Bool(false));
        }
        if let Ok(number) = trimmed.parse::<i64>() {
            return Some(Self::Int(number));
        }
        Some(Self::Text(raw.to_string()))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Text(value) => write!(f, "{}", value),
        }
    }
}

/// Load a table from CSV, XLSX or ODS. CSV honours the given encoding.
pub fn read_table(path: &Path, encoding: &str, handler: ErrorHandler) -> Result<Store, AppError> {
    if !FileManager::file_exists(path) {
        return Err(AppError::Io(format!("file not found: {}", path.display())));
    }
    match StoreFormat::from_path(path)? {
        StoreFormat::Csv => {
            let text = FileManager::read_text(path, encoding, handler)?;
            csv_io::parse(&text)
                .map_err(|e| AppError::MalformedStore(format!("{}: {}", path.display(), e)))
        }
        _ => Ok(Store::import(path)?),
    }
}

/// Data rows of a table as raw `(column A, column B, column C)` text; empty cells are absent
fn raw_rows(table: &Store) -> Vec<(Option<String>, Option<String>, Option<String>)> {
    (2..=table.row_count())
        .filter_map(|row| table.get_row(row).ok())
        .map(|cells| {
            let raw = |i: usize| cells.get(i).cloned().flatten().filter(|text| !text.is_empty());
            (raw(0), raw(1), raw(2))
        })
        .collect()
}

/// One character-name entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterName {
    /// Name as written in the script (e.g. `[＠クロエ]`)
    pub alias: String,
    /// Name to substitute (e.g. `Chloe`)
    pub translated: String,
    /// Optional gender; loaded but not forwarded to engines
    pub gender: Option<String>,
}

/// Ordered character-name map
#[derive(Debug, Clone, Default)]
pub struct CharacterNames {
    entries: Vec<CharacterName>,
}

impl CharacterNames {
    pub fn new(entries: Vec<CharacterName>) -> Self {
        Self { entries }
    }

    /// Build from `(alias, translated)` pairs
    pub fn from_pairs<A: Into<String>, T: Into<String>>(pairs: impl IntoIterator<Item = (A, T)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(alias, translated)| CharacterName {
                    alias: alias.into(),
                    translated: translated.into(),
                    gender: None,
                })
                .collect(),
        )
    }

    /// Load from a table: alias, translated name, optional gender
    pub fn load(path: &Path, encoding: &str) -> Result<Self, AppError> {
        let table = read_table(path, encoding, ErrorHandler::Strict)?;
        let mut entries = Vec::new();
        for (alias, translated, gender) in raw_rows(&table) {
            let Some(alias) = alias else { continue };
            let Some(translated) = translated else {
                warn!("Character name '{}' has no translation, skipping", alias);
                continue;
            };
            entries.push(CharacterName { alias, translated, gender });
        }
        debug!("Loaded {} character names from {}", entries.len(), path.display());
        Ok(Self::new(entries))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[CharacterName] {
        &self.entries
    }

    /// Replace every alias with its translated name, in table order
    pub fn apply(&self, text: &str) -> String {
        let mut result = text.to_string();
        for entry in &self.entries {
            if result.contains(&entry.alias) {
                result = result.replace(&entry.alias, &entry.translated);
            }
        }
        result
    }

    /// Whether the line opens with a known name, raw or already substituted
    pub fn starts_with_known_name(&self, line: &str) -> bool {
        self.entries.iter().any(|entry| {
            line.starts_with(&entry.alias)
                || (!entry.translated.is_empty() && line.starts_with(&entry.translated))
        })
    }

    /// The character whose translated name opens `text` (longest match wins)
    pub fn speaker_of(&self, text: &str) -> Option<&CharacterName> {
        self.entries
            .iter()
            .filter(|entry| !entry.translated.is_empty() && text.starts_with(&entry.translated))
            .max_by_key(|entry| entry.translated.len())
    }

    /// `alias=translated` lines for prompt templates
    pub fn render_for_prompt(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}={}\n", entry.alias, entry.translated))
            .collect()
    }
}

/// Ordered find/replace map used before and after translation
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<(String, String)>,
}

impl Dictionary {
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            entries: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Load from a table; an absent replacement deletes the matched text
    pub fn load(path: &Path, encoding: &str) -> Result<Self, AppError> {
        let table = read_table(path, encoding, ErrorHandler::Strict)?;
        let entries: Vec<(String, String)> = raw_rows(&table)
            .into_iter()
            .filter_map(|(find, replace, _)| find.map(|find| (find, replace.unwrap_or_default())))
            .collect();
        debug!("Loaded {} dictionary entries from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Apply every entry in order; the flag reports whether anything changed
    pub fn apply(&self, text: &str) -> (String, bool) {
        let mut result = text.to_string();
        let mut touched = false;
        for (find, replace) in &self.entries {
            if result.contains(find.as_str()) {
                result = result.replace(find.as_str(), replace);
                touched = true;
            }
        }
        (result, touched)
    }
}
