//! Language resolution
//!
//! Languages are resolved against the 8-column language-codes table (the
//! bundled copy unless `-lcf` names another), with a handful of aliases and
//! an ISO 639 fallback for names the table does not list.

use std::path::Path;

use isolang::Language;
use log::{debug, warn};

use crate::dictionary::{read_table, SettingValue};
use crate::errors::AppError;
use crate::file_utils::ErrorHandler;
use crate::store::{csv_io, Store};

const BUILTIN_TABLE: &str = include_str!("../resources/languageCodes.csv");

/// Which side of the translation a language is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageSide {
    Source,
    Target,
}

/// Names and codes of a language used on the source side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageVariant {
    pub name: String,
    pub code_2: String,
    pub code_3: String,
}

/// A resolved language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageRecord {
    /// Full name, e.g. `English (American)`
    pub name: String,
    /// ISO 639-1
    pub code_2: String,
    /// ISO 639-2/T
    pub code_3: String,
    /// Whether the cloud API accepts this language
    pub cloud_supported: bool,
    /// Codes to use when this language is the source, if they differ
    pub source_variant: Option<LanguageVariant>,
}

impl LanguageRecord {
    fn from_isolang(language: Language) -> Self {
        Self {
            name: language.to_name().to_string(),
            code_2: language.to_639_1().unwrap_or_default().to_string(),
            code_3: language.to_639_3().to_string(),
            cloud_supported: false,
            source_variant: None,
        }
    }

    /// Name for prompts: the plain source-side name when one exists
    pub fn prompt_name(&self, side: LanguageSide) -> &str {
        match (side, &self.source_variant) {
            (LanguageSide::Source, Some(variant)) => &variant.name,
            _ => &self.name,
        }
    }

    /// ISO 639-1 code for the given side
    pub fn code_for(&self, side: LanguageSide) -> &str {
        match (side, &self.source_variant) {
            (LanguageSide::Source, Some(variant)) => &variant.code_2,
            _ => &self.code_2,
        }
    }
}

// Shorthands users type for languages the table lists under a longer name
const ALIASES: &[(&str, &str, bool)] = &[
    ("english", "English (American)", false),
    ("castilian", "Spanish", false),
    ("chinese", "Chinese (simplified)", false),
    ("portuguese", "Portuguese (European)", true),
];

/// The language-codes table
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    records: Vec<LanguageRecord>,
}

impl LanguageTable {
    /// The table bundled with the binary
    pub fn builtin() -> Result<Self, AppError> {
        let table = csv_io::parse(BUILTIN_TABLE)
            .map_err(|e| AppError::Config(format!("bundled language table: {}", e)))?;
        Ok(Self::from_store(&table))
    }

    /// Load a table from disk
    pub fn load(path: &Path, encoding: &str) -> Result<Self, AppError> {
        let table = read_table(path, encoding, ErrorHandler::Strict)?;
        let languages = Self::from_store(&table);
        debug!("Loaded {} languages from {}", languages.records.len(), path.display());
        Ok(languages)
    }

    fn from_store(table: &Store) -> Self {
        let mut records = Vec::new();
        for row in 2..=table.row_count() {
            let Ok(cells) = table.get_row(row) else { continue };
            let text = |i: usize| {
                cells
                    .get(i)
                    .cloned()
                    .flatten()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            let flag = |i: usize| {
                text(i)
                    .and_then(|s| SettingValue::decode(&s))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            };
            let Some(name) = text(0) else { continue };
            let source_variant = if flag(4) {
                match (text(5), text(6), text(7)) {
                    (Some(name), Some(code_2), code_3) => Some(LanguageVariant {
                        name,
                        code_2,
                        code_3: code_3.unwrap_or_default(),
                    }),
                    _ => {
                        warn!("Language '{}' declares a source variant without codes", name);
                        None
                    }
                }
            } else {
                None
            };
            records.push(LanguageRecord {
                name,
                code_2: text(1).unwrap_or_default(),
                code_3: text(2).unwrap_or_default(),
                cloud_supported: flag(3),
                source_variant,
            });
        }
        Self { records }
    }

    pub fn records(&self) -> &[LanguageRecord] {
        &self.records
    }

    fn find(&self, query: &str) -> Option<&LanguageRecord> {
        self.records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(query))
            .or_else(|| {
                self.records.iter().find(|r| {
                    r.code_2.eq_ignore_ascii_case(query) || r.code_3.eq_ignore_ascii_case(query)
                })
            })
    }

    /// Resolve a user-supplied language name or code
    pub fn resolve(&self, query: &str, side: LanguageSide) -> Result<LanguageRecord, AppError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(AppError::Config("empty language name".to_string()));
        }
        let lowered = trimmed.to_lowercase();
        let aliased = ALIASES
            .iter()
            .find(|(alias, _, source_only)| {
                *alias == lowered && (!source_only || side == LanguageSide::Source)
            })
            .map(|(_, name, _)| *name)
            .unwrap_or(trimmed);

        if let Some(record) = self.find(aliased) {
            return Ok(record.clone());
        }

        iso_lookup(aliased)
            .map(|language| {
                debug!("'{}' resolved through ISO 639 as {}", query, language.to_name());
                LanguageRecord::from_isolang(language)
            })
            .ok_or_else(|| AppError::Config(format!("unknown language '{}'", query)))
    }
}

/// ISO 639 lookup by code or English name; a parenthetical qualifier is ignored
fn iso_lookup(query: &str) -> Option<Language> {
    let lowered = query.trim().to_lowercase();
    let by_code = match lowered.len() {
        2 => Language::from_639_1(&lowered),
        3 => Language::from_639_3(&lowered),
        _ => None,
    };
    by_code.or_else(|| {
        let base = lowered.split('(').next().unwrap_or_default().trim();
        let mut chars = base.chars();
        let capitalized: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => return None,
        };
        Language::from_name(&capitalized)
    })
}

/// Check if two language codes name the same language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (iso_lookup(code1), iso_lookup(code2)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
