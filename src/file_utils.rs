use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};
use encoding_rs::Encoding;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::store::Store;

// @module: File, encoding and backup utilities

/// How undecodable bytes are treated when reading text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandler {
    /// Fail with an encoding error
    #[default]
    Strict,
    /// Substitute U+FFFD
    Replace,
    /// Drop the offending bytes
    Ignore,
}

impl FromStr for ErrorHandler {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "replace" => Ok(Self::Replace),
            "ignore" => Ok(Self::Ignore),
            other => Err(AppError::Config(format!(
                "unknown encoding error handler '{}' (expected strict, replace or ignore)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Strict => "strict",
            Self::Replace => "replace",
            Self::Ignore => "ignore",
        };
        write!(f, "{}", name)
    }
}

// Common spellings that are not WHATWG labels
const ENCODING_ALIASES: &[(&str, &str)] = &[
    ("utf-8-sig", "utf-8"),
    ("utf8", "utf-8"),
    ("cp932", "shift_jis"),
    ("ms932", "shift_jis"),
    ("mskanji", "shift_jis"),
    ("sjis", "shift_jis"),
    ("shift-jis", "shift_jis"),
    ("eucjp", "euc-jp"),
    ("cp936", "gbk"),
    ("cp949", "euc-kr"),
    ("cp950", "big5"),
    ("utf-16le", "utf-16le"),
    ("latin1", "windows-1252"),
];

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().is_file()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<(), AppError> {
        let path = path.as_ref();
        if !path.as_os_str().is_empty() && !path.exists() {
            fs::create_dir_all(path)
                .map_err(|e| AppError::Io(format!("cannot create {}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    /// Resolve an encoding label, accepting common non-WHATWG spellings
    pub fn encoding_for(label: &str) -> Result<&'static Encoding, AppError> {
        let normalized = label.trim().to_lowercase();
        let normalized = ENCODING_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or(normalized);

        Encoding::for_label(normalized.as_bytes())
            .or_else(|| Encoding::for_label(normalized.replace('_', "-").as_bytes()))
            .ok_or_else(|| AppError::Config(format!("unknown encoding '{}'", label)))
    }

    /// Decode bytes; a byte-order mark overrides the requested encoding
    pub fn decode(bytes: &[u8], label: &str, handler: ErrorHandler) -> Result<String, AppError> {
        let (encoding, body) = match Encoding::for_bom(bytes) {
            Some((encoding, bom_length)) => (encoding, &bytes[bom_length..]),
            None => (Self::encoding_for(label)?, bytes),
        };

        match handler {
            ErrorHandler::Strict => encoding
                .decode_without_bom_handling_and_without_replacement(body)
                .map(Cow::into_owned)
                .ok_or_else(|| {
                    AppError::Encoding(format!("input is not valid {}", encoding.name()))
                }),
            ErrorHandler::Replace => {
                let (text, _) = encoding.decode_without_bom_handling(body);
                Ok(text.into_owned())
            }
            ErrorHandler::Ignore => {
                let (text, had_errors) = encoding.decode_without_bom_handling(body);
                if had_errors {
                    Ok(text.chars().filter(|c| *c != char::REPLACEMENT_CHARACTER).collect())
                } else {
                    Ok(text.into_owned())
                }
            }
        }
    }

    /// Read a text file in the given encoding
    pub fn read_text<P: AsRef<Path>>(
        path: P,
        label: &str,
        handler: ErrorHandler,
    ) -> Result<String, AppError> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| AppError::Io(format!("cannot read {}: {}", path.display(), e)))?;
        Self::decode(&bytes, label, handler).map_err(|e| match e {
            AppError::Encoding(message) => {
                AppError::Encoding(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Encode console output; unmappable characters become numeric character references
    pub fn encode_for_console<'a>(text: &'a str, encoding: &'static Encoding) -> Cow<'a, [u8]> {
        let (bytes, _, _) = encoding.output_encoding().encode(text);
        bytes
    }

    /// Write a string through a temporary sibling file and rename it into place
    pub fn write_atomic<P: AsRef<Path>>(path: P, content: &str) -> Result<(), AppError> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        Self::ensure_dir(parent)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(content.as_bytes())?;
        temp.persist(path)
            .map_err(|e| AppError::Io(format!("cannot write {}: {}", path.display(), e.error)))?;
        Ok(())
    }

    // @generates: backups/YYYY-MM-DD/<stem>-YYYY-MM-DD.HH-MM-SS.<ext> beside the artifact
    pub fn backup_path<P: AsRef<Path>>(path: P, now: DateTime<Local>) -> PathBuf {
        let path = path.as_ref();
        let date = now.format("%Y-%m-%d").to_string();
        let stamp = now.format("%Y-%m-%d.%H-%M-%S").to_string();
        let stem = path.file_stem().unwrap_or_default().to_string_lossy();
        let file_name = match path.extension() {
            Some(ext) => format!("{}-{}.{}", stem, stamp, ext.to_string_lossy()),
            None => format!("{}-{}", stem, stamp),
        };
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        base.join("backups").join(date).join(file_name)
    }

    /// Copy an existing artifact into the backup layout before it is replaced
    pub fn backup_existing<P: AsRef<Path>>(path: P) -> Result<Option<PathBuf>, AppError> {
        let path = path.as_ref();
        if !Self::file_exists(path) {
            return Ok(None);
        }
        let backup = Self::backup_path(path, Local::now());
        if let Some(parent) = backup.parent() {
            Self::ensure_dir(parent)?;
        }
        fs::copy(path, &backup).map_err(|e| {
            AppError::Io(format!("cannot back up {} to {}: {}", path.display(), backup.display(), e))
        })?;
        debug!("Backed up {} to {}", path.display(), backup.display());
        Ok(Some(backup))
    }

    /// Export the store to a timestamped backup and then to the primary path.
    /// The primary is untouched when the backup fails.
    pub fn snapshot<P: AsRef<Path>>(store: &Store, primary: P) -> Result<PathBuf, AppError> {
        let primary = primary.as_ref();
        let backup = Self::backup_path(primary, Local::now());
        store.export(&backup)?;
        store.export(primary)?;
        debug!("Snapshot written to {} (backup {})", primary.display(), backup.display());
        Ok(backup)
    }

    // @generates: <stem>.translated.csv beside the input
    pub fn default_output_path<P: AsRef<Path>>(input: P) -> PathBuf {
        let input = input.as_ref();
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        input.with_file_name(format!("{}.translated.csv", stem))
    }

    // @generates: <output stem>.translated.txt beside the output
    pub fn line_by_line_path<P: AsRef<Path>>(output: P) -> PathBuf {
        let output = output.as_ref();
        let stem = output.file_stem().unwrap_or_default().to_string_lossy();
        let name = if stem.ends_with(".translated") {
            format!("{}.txt", stem)
        } else {
            format!("{}.translated.txt", stem)
        };
        output.with_file_name(name)
    }
}
