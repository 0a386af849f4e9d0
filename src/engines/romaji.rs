/*!
 * Local romanization engines.
 *
 * - `pykakasi`: the `kakasi` kanji dictionary over whole runs of text;
 *   schemes `hepburn`, `kunrei`, `passport`, `hira`, `kana`
 * - `cutlet`: words and readings from a morphological analyzer, romanized
 *   one word at a time; schemes `hepburn`, `kunrei`, `nihon`, with Japanese
 *   punctuation mapped to ASCII and sentence-initial capitalization
 *
 * Character names are substituted before conversion and the translated
 * spellings are cut out of the text, so only the gaps between them are
 * converted or respelled. A reverse map from each alias's romanized form
 * repairs names that slip through unsubstituted.
 */

use std::fmt;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use kakasi::IsJapanese;
use regex::Regex;

use crate::app_config::EngineKind;
use crate::dictionary::CharacterNames;
use crate::errors::EngineError;
use crate::translation::HistoryEntry;

use super::morphology::Analyzer;
use super::{EngineContext, EngineInfo, TranslationEngine};

/// Version of the bundled converter, part of the engine identity
pub const CONVERTER_VERSION: &str = "0.1";

static N_BEFORE_LABIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"n([bmp])").expect("valid regex"));
static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r" +([.,!?])").expect("valid regex"));

/// Romanization scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomajiScheme {
    Hepburn,
    Kunrei,
    Passport,
    Nihon,
    Hira,
    Kana,
}

const PYKAKASI_SCHEMES: &[RomajiScheme] = &[
    RomajiScheme::Hepburn,
    RomajiScheme::Kunrei,
    RomajiScheme::Passport,
    RomajiScheme::Hira,
    RomajiScheme::Kana,
];

const CUTLET_SCHEMES: &[RomajiScheme] = &[RomajiScheme::Hepburn, RomajiScheme::Kunrei, RomajiScheme::Nihon];

impl RomajiScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hepburn => "hepburn",
            Self::Kunrei => "kunrei",
            Self::Passport => "passport",
            Self::Nihon => "nihon",
            Self::Hira => "hira",
            Self::Kana => "kana",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let wanted = name.trim().to_lowercase();
        [
            Self::Hepburn,
            Self::Kunrei,
            Self::Passport,
            Self::Nihon,
            Self::Hira,
            Self::Kana,
        ]
        .into_iter()
        .find(|scheme| scheme.as_str() == wanted)
    }

    /// Schemes the given engine variant supports
    pub fn supported_by(kind: EngineKind) -> &'static [RomajiScheme] {
        match kind {
            EngineKind::Cutlet => CUTLET_SCHEMES,
            _ => PYKAKASI_SCHEMES,
        }
    }
}

impl fmt::Display for RomajiScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Hepburn spellings rewritten for kunrei-shiki; longer patterns first
const KUNREI_RULES: &[(&str, &str)] = &[
    ("tchi", "tti"),
    ("tcha", "ttya"),
    ("tchu", "ttyu"),
    ("tcho", "ttyo"),
    ("shi", "si"),
    ("sha", "sya"),
    ("shu", "syu"),
    ("sho", "syo"),
    ("chi", "ti"),
    ("cha", "tya"),
    ("chu", "tyu"),
    ("cho", "tyo"),
    ("tsu", "tu"),
    ("fu", "hu"),
    ("ji", "zi"),
    ("ja", "zya"),
    ("ju", "zyu"),
    ("jo", "zyo"),
];

fn apply_rules(text: &str, rules: &[(&str, &str)]) -> String {
    rules
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// Hepburn to kunrei-shiki
pub fn to_kunrei(hepburn: &str) -> String {
    apply_rules(hepburn, KUNREI_RULES).replace("wo", "o")
}

/// Hepburn to nihon-shiki (kunrei spelling that keeps `wo`)
pub fn to_nihon(hepburn: &str) -> String {
    apply_rules(hepburn, KUNREI_RULES)
}

/// Hepburn to passport spelling: long o shortened, `n` before b/m/p as `m`
pub fn to_passport(hepburn: &str) -> String {
    let shortened = hepburn.replace("ou", "o").replace("oo", "o");
    N_BEFORE_LABIAL.replace_all(&shortened, "m$1").into_owned()
}

/// Hiragana to katakana; everything else passes through
pub fn to_katakana(hiragana: &str) -> String {
    hiragana
        .chars()
        .map(|c| match c {
            '\u{3041}'..='\u{3096}' => char::from_u32(c as u32 + 0x60).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Japanese punctuation to ASCII
pub fn ascii_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '。' => out.push_str(". "),
            '、' => out.push_str(", "),
            '！' => out.push_str("! "),
            '？' => out.push_str("? "),
            '「' | '」' | '『' | '』' => out.push('"'),
            '…' => out.push_str("..."),
            '～' => out.push('~'),
            '　' => out.push(' '),
            _ => out.push(c),
        }
    }
    let out = SPACE_BEFORE_PUNCT.replace_all(&out, "$1");
    SPACE_RUNS.replace_all(out.trim(), " ").into_owned()
}

/// Uppercase the first letter of the text and of each sentence
pub fn capitalize_sentences(text: &str) -> String {
    capitalize_from(text, &mut true)
}

/// Sentence capitalization that carries `at_start` across calls
fn capitalize_from(text: &str, at_start: &mut bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if *at_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            *at_start = false;
            continue;
        }
        if matches!(c, '.' | '!' | '?' | '\n') {
            *at_start = true;
        }
        out.push(c);
    }
    out
}

/// Whether a space belongs between two romanized pieces
fn needs_space(left: &str, right: &str) -> bool {
    match (left.chars().last(), right.chars().next()) {
        (Some(l), Some(r)) => r.is_alphanumeric() && (l.is_alphanumeric() || matches!(l, '.' | ',' | '!' | '?')),
        _ => false,
    }
}

fn join_spaced(out: &mut String, piece: &str) {
    if needs_space(out, piece) {
        out.push(' ');
    }
    out.push_str(piece);
}

/// Span of the input, either a protected name or text to convert
enum Piece<'a> {
    Name(&'a str),
    Text(&'a str),
}

enum Converter {
    /// kakasi's kanji dictionary over the whole run of text
    Kakasi,
    /// Per-word readings from a morphological analyzer
    Morphological(Analyzer),
}

/// pykakasi- or cutlet-style romanizer
pub struct Romanizer {
    info: EngineInfo,
    scheme: RomajiScheme,
    converter: Converter,
    names: CharacterNames,
    /// Translated names, longest first
    protected: Vec<String>,
    reverse: Vec<(String, String)>,
}

impl Romanizer {
    /// Dictionary-based variant
    pub fn pykakasi(scheme: &str, context: &EngineContext) -> Self {
        Self::build(EngineKind::Pykakasi, Converter::Kakasi, CONVERTER_VERSION, scheme, context)
    }

    /// Analyzer-based variant; the dictionary name joins the identity
    pub fn cutlet(analyzer: Analyzer, scheme: &str, context: &EngineContext) -> Self {
        let model = analyzer.name().to_string();
        Self::build(EngineKind::Cutlet, Converter::Morphological(analyzer), &model, scheme, context)
    }

    fn build(kind: EngineKind, converter: Converter, model: &str, scheme: &str, context: &EngineContext) -> Self {
        let supported = RomajiScheme::supported_by(kind);
        let scheme = match RomajiScheme::parse(scheme).filter(|s| supported.contains(s)) {
            Some(scheme) => scheme,
            None => {
                let names: Vec<_> = supported.iter().map(|s| s.as_str()).collect();
                warn!(
                    "Romaji scheme '{}' is not supported by {} ({}), using hepburn",
                    scheme,
                    kind,
                    names.join(", ")
                );
                RomajiScheme::Hepburn
            }
        };

        let mut info = EngineInfo::new(
            kind.as_str(),
            context.source_language.clone(),
            context.target_language.clone(),
        );
        info.model = model.to_string();
        info.version = CONVERTER_VERSION.to_string();
        info.variant = Some(scheme.as_str().to_string());
        info.reachable = true;
        info.supports_batches = true;

        let mut protected: Vec<String> = context
            .character_names
            .entries()
            .iter()
            .map(|entry| entry.translated.clone())
            .filter(|translated| !translated.is_empty())
            .collect();
        protected.sort_by(|a, b| b.len().cmp(&a.len()));
        protected.dedup();

        let mut romanizer = Self {
            info,
            scheme,
            converter,
            names: context.character_names.clone(),
            protected,
            reverse: Vec::new(),
        };
        romanizer.reverse = romanizer.build_reverse_map();
        debug!(
            "Romanizer {} ready with {} name repairs",
            romanizer.info.identity(),
            romanizer.reverse.len()
        );
        romanizer
    }

    pub fn scheme(&self) -> RomajiScheme {
        self.scheme
    }

    fn is_cutlet(&self) -> bool {
        matches!(self.converter, Converter::Morphological(_))
    }

    fn is_latin(&self) -> bool {
        !matches!(self.scheme, RomajiScheme::Hira | RomajiScheme::Kana)
    }

    fn build_reverse_map(&self) -> Vec<(String, String)> {
        let mut reverse = Vec::new();
        for entry in self.names.entries() {
            let romanized = self.romanize(&entry.alias);
            let romanized = romanized.trim();
            if romanized.is_empty() || romanized == entry.translated {
                continue;
            }
            reverse.push((romanized.to_string(), entry.translated.clone()));
            if self.is_cutlet() {
                let capitalized = capitalize_sentences(romanized);
                if capitalized != romanized {
                    reverse.push((capitalized, entry.translated.clone()));
                }
            }
        }
        reverse.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        reverse
    }

    /// Scheme rewrite of a Hepburn spelling
    fn respell(&self, hepburn: &str) -> String {
        match self.scheme {
            RomajiScheme::Kunrei => to_kunrei(hepburn),
            RomajiScheme::Nihon => to_nihon(hepburn),
            RomajiScheme::Passport => to_passport(hepburn),
            _ => hepburn.to_string(),
        }
    }

    /// Convert in the configured scheme with no name handling
    fn romanize(&self, text: &str) -> String {
        match &self.converter {
            Converter::Kakasi => {
                let converted = kakasi::convert(text);
                match self.scheme {
                    RomajiScheme::Hira => converted.hiragana,
                    RomajiScheme::Kana => to_katakana(&converted.hiragana),
                    _ => self.respell(&converted.romaji),
                }
            }
            Converter::Morphological(analyzer) => {
                let mut out = String::new();
                for word in analyzer.words(text) {
                    if word.surface.trim().is_empty() {
                        if !out.is_empty() && !out.ends_with(' ') {
                            out.push(' ');
                        }
                        continue;
                    }
                    let romanized = match &word.reading {
                        Some(reading) => self.respell(&kakasi::convert(reading).romaji),
                        None if kakasi::is_japanese(&word.surface) == IsJapanese::False => word.surface.clone(),
                        None => self.respell(&kakasi::convert(&word.surface).romaji),
                    };
                    join_spaced(&mut out, &romanized);
                }
                ascii_punctuation(&out)
            }
        }
    }

    /// Split on translated names so their spelling never reaches a converter
    fn split_names<'a>(&self, text: &'a str) -> Vec<Piece<'a>> {
        let mut pieces = Vec::new();
        let mut gap_start = 0;
        let mut i = 0;
        while i < text.len() {
            let rest = &text[i..];
            match self.protected.iter().find(|name| rest.starts_with(name.as_str())) {
                Some(name) => {
                    if gap_start < i {
                        pieces.push(Piece::Text(&text[gap_start..i]));
                    }
                    pieces.push(Piece::Name(&text[i..i + name.len()]));
                    i += name.len();
                    gap_start = i;
                }
                None => i += rest.chars().next().map_or(1, char::len_utf8),
            }
        }
        if gap_start < text.len() {
            pieces.push(Piece::Text(&text[gap_start..]));
        }
        pieces
    }

    /// Names first, then conversion around them, then repair and cutlet styling
    pub fn convert(&self, text: &str) -> String {
        let substituted = self.names.apply(text);
        let latin = self.is_latin();
        let mut out = String::with_capacity(substituted.len());
        let mut at_sentence_start = true;

        for piece in self.split_names(&substituted) {
            match piece {
                Piece::Name(name) => {
                    if latin {
                        join_spaced(&mut out, name);
                    } else {
                        out.push_str(name);
                    }
                    at_sentence_start = false;
                }
                Piece::Text(gap) => {
                    let mut converted = self.romanize(gap);
                    for (romanized, translated) in &self.reverse {
                        if converted.contains(romanized.as_str()) {
                            converted = converted.replace(romanized.as_str(), translated);
                        }
                    }
                    if self.is_cutlet() {
                        converted = capitalize_from(&converted, &mut at_sentence_start);
                    }
                    if latin {
                        join_spaced(&mut out, &converted);
                    } else {
                        out.push_str(&converted);
                    }
                }
            }
        }
        out
    }
}

#[async_trait]
impl TranslationEngine for Romanizer {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    async fn translate(
        &self,
        text: &str,
        speaker: Option<&str>,
        _history: &[HistoryEntry],
    ) -> Result<String, EngineError> {
        let input = self.pre_process_text(text);
        Ok(self.post_process_text(&self.convert(&input), text, speaker))
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, EngineError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.translate(text, None, &[]).await?);
        }
        Ok(results)
    }
}
