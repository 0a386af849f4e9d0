//! Application configuration
//!
//! The single configuration record passed to every constructor. It is
//! filled from an optional JSON settings file and then overridden by
//! command-line flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engines::profiles::{InstructionFormat, ModelProfile};
use crate::errors::AppError;
use crate::file_utils::{ErrorHandler, FileManager};

/// Environment variable consulted for the cloud API key
pub const API_KEY_ENV: &str = "DEEPL_API_KEY";

/// Engine selector given as the first positional argument
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    // @engine: extraction and export only
    #[default]
    #[serde(rename = "parseOnly")]
    ParseOnly,
    // @engine: LLM server
    #[serde(rename = "koboldcpp")]
    Koboldcpp,
    // @engine: NMT server with model/version endpoints
    #[serde(rename = "py3translationserver")]
    Py3TranslationServer,
    // @engine: NMT server without model/version endpoints
    #[serde(rename = "sugoi")]
    Sugoi,
    #[serde(rename = "deepl_api_free")]
    DeeplApiFree,
    #[serde(rename = "deepl_api_pro")]
    DeeplApiPro,
    #[serde(rename = "deepl_web")]
    DeeplWeb,
    // @engine: dictionary romanization
    #[serde(rename = "pykakasi")]
    Pykakasi,
    // @engine: richer romanization variant
    #[serde(rename = "cutlet")]
    Cutlet,
}

impl EngineKind {
    pub const ALL: [EngineKind; 9] = [
        Self::ParseOnly,
        Self::Koboldcpp,
        Self::Py3TranslationServer,
        Self::Sugoi,
        Self::DeeplApiFree,
        Self::DeeplApiPro,
        Self::DeeplWeb,
        Self::Pykakasi,
        Self::Cutlet,
    ];

    // @returns: Selector string as typed on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseOnly => "parseOnly",
            Self::Koboldcpp => "koboldcpp",
            Self::Py3TranslationServer => "py3translationserver",
            Self::Sugoi => "sugoi",
            Self::DeeplApiFree => "deepl_api_free",
            Self::DeeplApiPro => "deepl_api_pro",
            Self::DeeplWeb => "deepl_web",
            Self::Pykakasi => "pykakasi",
            Self::Cutlet => "cutlet",
        }
    }

    // @returns: Whether the engine talks to a local server over -a/-p
    pub fn uses_local_server(&self) -> bool {
        matches!(self, Self::Koboldcpp | Self::Py3TranslationServer | Self::Sugoi)
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, Self::DeeplApiFree | Self::DeeplApiPro | Self::DeeplWeb)
    }

    // @returns: Port used when -p is not given
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Koboldcpp => Some(5001),
            Self::Py3TranslationServer | Self::Sugoi => Some(14366),
            _ => None,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|kind| kind.as_str().to_lowercase() == wanted)
            .copied()
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|k| k.as_str()).collect();
                AppError::Config(format!("invalid engine '{}', expected one of: {}", s, known.join(", ")))
            })
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Engine selector
    #[serde(default)]
    pub engine: EngineKind,

    // @field: Scenario or spreadsheet to translate
    #[serde(default)]
    pub file_to_translate: Option<PathBuf>,

    #[serde(default = "default_encoding")]
    pub file_to_translate_encoding: String,

    /// Primary artifact; defaults to `<stem>.translated.csv` beside the input
    #[serde(default)]
    pub output_file: Option<PathBuf>,

    #[serde(default)]
    pub parsing_definitions: Option<PathBuf>,

    #[serde(default = "default_encoding")]
    pub parsing_definitions_encoding: String,

    /// Source language name or code
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Target language name or code
    #[serde(default = "default_target_language")]
    pub target_language: String,

    #[serde(default)]
    pub character_names: Option<PathBuf>,

    #[serde(default = "default_encoding")]
    pub character_names_encoding: String,

    #[serde(default)]
    pub pre_dictionary: Option<PathBuf>,

    #[serde(default = "default_encoding")]
    pub pre_dictionary_encoding: String,

    #[serde(default)]
    pub post_dictionary: Option<PathBuf>,

    #[serde(default = "default_encoding")]
    pub post_dictionary_encoding: String,

    /// Language-codes table; the bundled copy is used when absent
    #[serde(default)]
    pub language_codes_file: Option<PathBuf>,

    #[serde(default = "default_encoding")]
    pub language_codes_file_encoding: String,

    #[serde(default)]
    pub line_by_line_mode: bool,

    #[serde(default)]
    pub resume: bool,

    /// Protocol and host of local servers
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default)]
    pub port: Option<u16>,

    /// Handler for undecodable bytes in the scenario input
    #[serde(default)]
    pub input_error_handling: ErrorHandler,

    /// Handler for characters the console encoding cannot represent
    #[serde(default = "default_output_error_handling")]
    pub output_error_handling: ErrorHandler,

    #[serde(default = "default_encoding")]
    pub console_encoding: String,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub debug: bool,

    // @field: Prompt template for LLM engines
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,

    // @field: Memory preamble for LLM engines
    #[serde(default)]
    pub memory_file: Option<PathBuf>,

    /// Overrides format inference from the model name
    #[serde(default)]
    pub instruction_format: Option<InstructionFormat>,

    /// Rows per batched request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// History ring capacity
    #[serde(default = "default_history_length")]
    pub history_length: usize,

    /// Rows between snapshots
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: usize,

    /// Read timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Applied to the read timeout of the first request only
    #[serde(default = "default_first_call_multiplier")]
    pub first_call_multiplier: u32,

    /// Generation cap for LLM engines
    #[serde(default = "default_max_length")]
    pub max_length: u32,

    /// Sampler fields passed through to the LLM server
    #[serde(default)]
    pub sampler: Map<String, Value>,

    /// Profiles tried before the built-in ones
    #[serde(default)]
    pub llm_profiles: Vec<ModelProfile>,

    #[serde(default = "default_romaji_scheme")]
    pub romaji_scheme: String,

    /// Compiled system dictionary for the cutlet analyzer
    #[serde(default)]
    pub cutlet_dictionary: Option<PathBuf>,

    /// Cross-run cache store
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    #[serde(default)]
    pub no_cache: bool,

    /// Ignore existing results and cached values
    #[serde(default)]
    pub re_translate: bool,

    /// Cloud API key; only ever read from the settings file or the environment
    #[serde(default, skip_serializing)]
    pub deepl_api_key: Option<String>,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_output_error_handling() -> ErrorHandler {
    ErrorHandler::Replace
}

fn default_source_language() -> String {
    "Japanese".to_string()
}

fn default_target_language() -> String {
    "English".to_string()
}

fn default_address() -> String {
    "http://localhost".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_history_length() -> usize {
    6
}

fn default_snapshot_interval() -> usize {
    50
}

fn default_timeout_secs() -> u64 {
    360
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_first_call_multiplier() -> u32 {
    4
}

fn default_max_length() -> u32 {
    150
}

fn default_romaji_scheme() -> String {
    "hepburn".to_string()
}

fn default_cache_file() -> PathBuf {
    PathBuf::from("backups").join("cache.csv")
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineKind::default(),
            file_to_translate: None,
            file_to_translate_encoding: default_encoding(),
            output_file: None,
            parsing_definitions: None,
            parsing_definitions_encoding: default_encoding(),
            source_language: default_source_language(),
            target_language: default_target_language(),
            character_names: None,
            character_names_encoding: default_encoding(),
            pre_dictionary: None,
            pre_dictionary_encoding: default_encoding(),
            post_dictionary: None,
            post_dictionary_encoding: default_encoding(),
            language_codes_file: None,
            language_codes_file_encoding: default_encoding(),
            line_by_line_mode: false,
            resume: false,
            address: default_address(),
            port: None,
            input_error_handling: ErrorHandler::default(),
            output_error_handling: default_output_error_handling(),
            console_encoding: default_encoding(),
            verbose: false,
            debug: false,
            prompt_file: None,
            memory_file: None,
            instruction_format: None,
            batch_size: default_batch_size(),
            history_length: default_history_length(),
            snapshot_interval: default_snapshot_interval(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            first_call_multiplier: default_first_call_multiplier(),
            max_length: default_max_length(),
            sampler: Map::new(),
            llm_profiles: Vec::new(),
            romaji_scheme: default_romaji_scheme(),
            cutlet_dictionary: None,
            cache_file: default_cache_file(),
            no_cache: false,
            re_translate: false,
            deepl_api_key: None,
        }
    }
}

impl Config {
    /// Read a JSON settings file
    pub fn from_settings_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        let text = FileManager::read_text(path, "utf-8", ErrorHandler::Strict)?;
        serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))
    }

    /// API key from the settings file, else from the environment
    pub fn api_key(&self) -> Option<String> {
        self.deepl_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()))
    }

    /// Base URL of a local server: address plus the explicit or default port
    pub fn server_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        match self.port.or(self.engine.default_port()) {
            Some(port) => format!("{}:{}", address, port),
            None => address,
        }
    }

    /// Primary artifact path
    pub fn output_path(&self) -> Option<PathBuf> {
        self.output_file
            .clone()
            .or_else(|| self.file_to_translate.as_ref().map(FileManager::default_output_path))
    }

    /// Log level implied by -vb/-d
    pub fn log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Trace
        } else if self.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<(), AppError> {
        if self.file_to_translate.is_none() {
            return Err(AppError::Config("no file to translate given (-f)".to_string()));
        }
        if self.batch_size == 0 {
            return Err(AppError::Config("batch size must be a positive integer".to_string()));
        }
        if self.snapshot_interval == 0 {
            return Err(AppError::Config("snapshot interval must be a positive integer".to_string()));
        }
        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(AppError::Config("timeouts must be positive".to_string()));
        }
        if self.first_call_multiplier == 0 {
            return Err(AppError::Config("first-call multiplier must be at least 1".to_string()));
        }
        for label in [
            &self.file_to_translate_encoding,
            &self.parsing_definitions_encoding,
            &self.character_names_encoding,
            &self.pre_dictionary_encoding,
            &self.post_dictionary_encoding,
            &self.language_codes_file_encoding,
            &self.console_encoding,
        ] {
            FileManager::encoding_for(label)?;
        }

        match self.engine {
            EngineKind::DeeplApiFree | EngineKind::DeeplApiPro if self.api_key().is_none() => {
                Err(AppError::Config(format!(
                    "{} needs an API key in the settings file (deeplApiKey) or {}",
                    self.engine, API_KEY_ENV
                )))
            }
            EngineKind::DeeplWeb => Err(AppError::Config(
                "deepl_web has no backend in this build; use deepl_api_free or deepl_api_pro".to_string(),
            )),
            EngineKind::Cutlet if self.cutlet_dictionary.is_none() => Err(AppError::Config(
                "cutlet needs a system dictionary (-cd/--cutletDictionary)".to_string(),
            )),
            EngineKind::Koboldcpp if self.prompt_file.is_none() => Err(AppError::Config(
                "koboldcpp needs a prompt template (-pf/--promptFile)".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
