/*!
 * Parse-definitions file: declarative extraction rules.
 *
 * `key=value` per line, `#` starts a comment, blank lines are ignored.
 */

use std::path::Path;
use std::str::FromStr;

use log::debug;

use crate::dictionary::SettingValue;
use crate::errors::AppError;
use crate::file_utils::{ErrorHandler, FileManager};

/// Where paragraphs end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParagraphDelimiter {
    /// A blank line closes the paragraph
    #[default]
    EmptyLine,
    /// Every line is its own paragraph
    NewLine,
}

impl FromStr for ParagraphDelimiter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "emptyLine" => Ok(Self::EmptyLine),
            "newLine" => Ok(Self::NewLine),
            other => Err(AppError::Config(format!(
                "paragraphDelimiter must be emptyLine or newLine, got '{}'",
                other
            ))),
        }
    }
}

/// Reserved word-wrap behaviour; parsed and validated, never acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordWrapMode {
    #[default]
    None,
    Strict,
    Dynamic,
}

impl FromStr for WordWrapMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(Self::None),
            "strict" => Ok(Self::Strict),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(AppError::Config(format!(
                "wordWrapMode must be none, strict or dynamic, got '{}'",
                other
            ))),
        }
    }
}

/// Rules the extractor follows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDefinitions {
    pub paragraph_delimiter: ParagraphDelimiter,
    /// First non-whitespace characters that mark a line as non-dialogue
    pub ignore_prefixes: Vec<char>,
    pub max_lines_per_paragraph: usize,
    /// Informational only
    pub word_wrap: Option<usize>,
    pub word_wrap_mode: WordWrapMode,
}

impl Default for ParseDefinitions {
    fn default() -> Self {
        Self {
            paragraph_delimiter: ParagraphDelimiter::EmptyLine,
            ignore_prefixes: Vec::new(),
            max_lines_per_paragraph: 3,
            word_wrap: None,
            word_wrap_mode: WordWrapMode::None,
        }
    }
}

fn positive(key: &str, value: Option<SettingValue>) -> Result<Option<usize>, AppError> {
    match value {
        None => Ok(None),
        Some(SettingValue::Int(n)) if n > 0 => Ok(Some(n as usize)),
        Some(other) => Err(AppError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, other
        ))),
    }
}

impl ParseDefinitions {
    /// Read and parse a definitions file
    pub fn load(path: &Path, encoding: &str) -> Result<Self, AppError> {
        let text = FileManager::read_text(path, encoding, ErrorHandler::Strict)?;
        let definitions = Self::parse(&text)
            .map_err(|e| match e {
                AppError::Config(message) => AppError::Config(format!("{}: {}", path.display(), message)),
                other => other,
            })?;
        debug!("Parse definitions from {}: {:?}", path.display(), definitions);
        Ok(definitions)
    }

    /// Parse definitions text; unknown keys are rejected
    pub fn parse(text: &str) -> Result<Self, AppError> {
        let mut definitions = Self::default();

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                AppError::Config(format!("line {}: expected key=value, got '{}'", number + 1, line))
            })?;
            let key = key.trim();
            let value = SettingValue::decode(value.trim());

            match key {
                "paragraphDelimiter" => {
                    definitions.paragraph_delimiter = match value {
                        Some(v) => v.to_string().parse()?,
                        None => ParagraphDelimiter::default(),
                    };
                }
                "ignoreLinesThatStartWith" => {
                    definitions.ignore_prefixes = match value {
                        None => Vec::new(),
                        Some(v) => parse_prefixes(&v.to_string())?,
                    };
                }
                "maximumNumberOfLinesPerParagraph" => {
                    if let Some(n) = positive(key, value)? {
                        definitions.max_lines_per_paragraph = n;
                    }
                }
                "wordWrap" => definitions.word_wrap = positive(key, value)?,
                "wordWrapMode" => {
                    definitions.word_wrap_mode = match value {
                        Some(v) => v.to_string().parse()?,
                        None => WordWrapMode::None,
                    };
                }
                other => {
                    return Err(AppError::Config(format!(
                        "line {}: unknown parsing option '{}'",
                        number + 1,
                        other
                    )));
                }
            }
        }

        Ok(definitions)
    }

    /// Rules for line-by-line mode: one line, one unit
    pub fn line_by_line(mut self) -> Self {
        self.paragraph_delimiter = ParagraphDelimiter::NewLine;
        self.max_lines_per_paragraph = 1;
        self
    }

    pub fn is_ignore_prefix(&self, c: char) -> bool {
        self.ignore_prefixes.contains(&c)
    }
}

fn parse_prefixes(value: &str) -> Result<Vec<char>, AppError> {
    value
        .split_whitespace()
        .map(|token| {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(AppError::Config(format!(
                    "ignoreLinesThatStartWith takes single characters, got '{}'",
                    token
                ))),
            }
        })
        .collect()
}
