/*!
 * Scenario text → paragraph-grouped translation units.
 *
 * Character names are substituted over the whole buffer before the lines are
 * split. Each emitted unit then passes through the pre-translation dictionary
 * and is recorded with `"<lineCount>!<dictionaryTouched>"` metadata.
 */

use log::{debug, warn};

use crate::dictionary::{CharacterNames, Dictionary};
use crate::errors::StoreError;
use crate::store::{Store, METADATA_HEADER};

use super::definitions::{ParagraphDelimiter, ParseDefinitions};

/// One paragraph ready for the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Key: post name substitution, post pre-dictionary
    pub text: String,
    /// Source lines that produced the unit
    pub line_count: usize,
    /// Whether the pre-translation dictionary changed the unit
    pub dictionary_touched: bool,
}

impl Unit {
    pub fn metadata(&self) -> String {
        format!("{}!{}", self.line_count, self.dictionary_touched)
    }
}

/// Split `"<lineCount>!<dictionaryTouched>"`
pub fn parse_metadata(metadata: &str) -> Option<(usize, bool)> {
    let (count, touched) = metadata.trim().split_once('!')?;
    let count = count.parse().ok()?;
    let touched = match touched.to_ascii_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => return None,
    };
    Some((count, touched))
}

/// Outcome of an extraction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Units emitted, duplicates included
    pub units: usize,
    /// Rows added to the store
    pub new_rows: usize,
    /// Units the pre-translation dictionary touched
    pub touched: usize,
}

pub struct Extractor<'a> {
    definitions: &'a ParseDefinitions,
    names: &'a CharacterNames,
    pre: &'a Dictionary,
}

impl<'a> Extractor<'a> {
    pub fn new(definitions: &'a ParseDefinitions, names: &'a CharacterNames, pre: &'a Dictionary) -> Self {
        Self { definitions, names, pre }
    }

    /// Whether a trimmed line can join a paragraph
    fn is_valid(&self, line: &str) -> bool {
        let Some(first) = line.chars().next() else {
            return false;
        };
        if self.definitions.is_ignore_prefix(first) {
            return self.names.starts_with_known_name(line);
        }
        true
    }

    fn make_unit(&self, buffer: &str, line_count: usize) -> Option<Unit> {
        let (text, dictionary_touched) = self.pre.apply(buffer);
        if text.trim().is_empty() {
            warn!("Paragraph became empty after pre-translation substitution: {:?}", buffer);
            return None;
        }
        Some(Unit { text, line_count, dictionary_touched })
    }

    /// Split a scenario into units in source order, duplicates kept
    pub fn extract(&self, source: &str) -> Vec<Unit> {
        let substituted = self.names.apply(source);
        let max_lines = self.definitions.max_lines_per_paragraph.max(1);
        let one_per_line = self.definitions.paragraph_delimiter == ParagraphDelimiter::NewLine;

        let mut units = Vec::new();
        let mut buffer = String::new();
        let mut line_count = 0usize;

        for raw in substituted.lines() {
            let line = raw.trim();
            if !self.is_valid(line) {
                if !buffer.is_empty() {
                    units.extend(self.make_unit(&buffer, line_count));
                    buffer.clear();
                    line_count = 0;
                }
                continue;
            }

            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(line);
            line_count += 1;

            if line_count >= max_lines || one_per_line {
                units.extend(self.make_unit(&buffer, line_count));
                buffer.clear();
                line_count = 0;
            }
        }
        if !buffer.is_empty() {
            units.extend(self.make_unit(&buffer, line_count));
        }

        debug!("Extracted {} units", units.len());
        units
    }

    /// Units from a spreadsheet input: one per data row of column A
    pub fn extract_table(&self, table: &Store) -> Vec<Unit> {
        table
            .keys()
            .filter_map(|(_, key)| {
                let text = self.names.apply(key.trim());
                let line_count = text.lines().count().max(1);
                self.make_unit(&text, line_count)
            })
            .collect()
    }

    /// Insert units into the store; the first occurrence of a key keeps its metadata
    pub fn insert(units: &[Unit], store: &mut Store) -> Result<ExtractionSummary, StoreError> {
        let metadata_column = store.ensure_header(METADATA_HEADER)?;
        let mut summary = ExtractionSummary::default();
        for unit in units {
            summary.units += 1;
            if unit.dictionary_touched {
                summary.touched += 1;
            }
            let before = store.row_count();
            let row = store.add_to_cache(&unit.text)?;
            if store.row_count() > before {
                summary.new_rows += 1;
                store.set_cell(row, metadata_column, Some(unit.metadata()))?;
            } else if store.get_cell(row, metadata_column)?.is_none() {
                store.set_cell(row, metadata_column, Some(unit.metadata()))?;
            }
        }
        Ok(summary)
    }

    /// Extract a scenario straight into the store
    pub fn extract_into(&self, source: &str, store: &mut Store) -> Result<ExtractionSummary, StoreError> {
        let units = self.extract(source);
        Self::insert(&units, store)
    }
}
