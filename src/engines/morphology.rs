/*!
 * Morphological analysis for the cutlet romanizer.
 *
 * Text is split into words by `vibrato`, a Viterbi tokenizer over
 * MeCab-format system dictionaries. Readings are taken from the IPADIC
 * feature layout, where the katakana reading is the eighth field.
 */

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;
use vibrato::dictionary::SystemDictionaryBuilder;
use vibrato::{Dictionary, Tokenizer};

use crate::errors::AppError;

const READING_FIELD: usize = 7;

/// One analyzed word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub surface: String,
    /// Katakana reading; `None` for symbols and unknown words
    pub reading: Option<String>,
}

/// Word segmenter backed by a system dictionary
pub struct Analyzer {
    tokenizer: Tokenizer,
    name: String,
}

impl Analyzer {
    pub fn new(dictionary: Dictionary, name: impl Into<String>) -> Self {
        Self {
            tokenizer: Tokenizer::new(dictionary),
            name: name.into(),
        }
    }

    /// Load a compiled (uncompressed) vibrato system dictionary
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if path.extension().is_some_and(|ext| ext == "zst") {
            return Err(AppError::Config(format!(
                "{} is zstd-compressed; decompress it before use",
                path.display()
            )));
        }
        let file = File::open(path).map_err(|e| AppError::Io(format!("{}: {}", path.display(), e)))?;
        let dictionary = Dictionary::read(BufReader::new(file))
            .map_err(|e| AppError::Config(format!("{}: not a system dictionary ({})", path.display(), e)))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.trim_end_matches(".dic").to_string())
            .unwrap_or_else(|| "dictionary".to_string());
        debug!("Loaded morphological dictionary {} from {}", name, path.display());
        Ok(Self::new(dictionary, name))
    }

    /// Compile a dictionary from MeCab sources: lexicon, matrix.def, char.def, unk.def
    pub fn from_sources<L, M, C, U>(
        name: impl Into<String>,
        lexicon: L,
        matrix: M,
        char_def: C,
        unk_def: U,
    ) -> Result<Self, AppError>
    where
        L: Read,
        M: Read,
        C: Read,
        U: Read,
    {
        let dictionary = SystemDictionaryBuilder::from_readers(lexicon, matrix, char_def, unk_def)
            .map_err(|e| AppError::Config(format!("invalid dictionary sources: {}", e)))?;
        Ok(Self::new(dictionary, name))
    }

    /// Dictionary name, part of the engine identity
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn words(&self, text: &str) -> Vec<Word> {
        if text.is_empty() {
            return Vec::new();
        }
        let mut worker = self.tokenizer.new_worker();
        worker.reset_sentence(text);
        worker.tokenize();
        (0..worker.num_tokens())
            .map(|i| {
                let token = worker.token(i);
                Word {
                    surface: token.surface().to_string(),
                    reading: reading_of(token.feature()),
                }
            })
            .collect()
    }
}

fn reading_of(feature: &str) -> Option<String> {
    feature
        .split(',')
        .nth(READING_FIELD)
        .map(str::trim)
        .filter(|reading| !reading.is_empty() && *reading != "*")
        .map(str::to_string)
}
