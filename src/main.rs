// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::RwLock;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, error, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use once_cell::sync::Lazy;

use vntl::app_config::{Config, EngineKind, LogLevel};
use vntl::app_controller::Controller;
use vntl::engines::profiles::InstructionFormat;
use vntl::file_utils::{ErrorHandler, FileManager};

/// vntl - visual novel translation orchestrator
///
/// Extracts dialogue from a scenario file into a deduplicated spreadsheet and
/// fills one column per translation engine.
#[derive(Parser, Debug)]
#[command(name = "vntl")]
#[command(version)]
#[command(disable_version_flag = true)]
#[command(about = "Visual novel script translation orchestrator")]
#[command(long_about = "vntl extracts dialogue paragraphs from visual novel scripts and translates them with a local or cloud engine.

EXAMPLES:
    vntl parseOnly -f script.txt                          # Extract to script.translated.csv
    vntl koboldcpp -f script.txt -pf prompt.txt -cn names.csv
    vntl py3translationserver -f script.txt -a http://192.168.0.2 -p 14366
    vntl deepl_api_free -f script.xlsx -tl German -r      # Resume an earlier run
    vntl pykakasi -f script.txt -rs kunrei -lbl

ENGINES:
    parseOnly, koboldcpp, py3translationserver, sugoi, deepl_api_free,
    deepl_api_pro, deepl_web, pykakasi, cutlet

Single-dash multi-letter flags (-fe, -pfile, -cn, ...) are accepted as aliases of their long forms.
The DeepL API key is read from the settings file (deeplApiKey) or DEEPL_API_KEY.")]
struct CommandLineOptions {
    /// Engine selector
    #[arg(value_name = "ENGINE")]
    engine: String,

    /// Print version information
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,

    /// JSON settings file; flags override its values
    #[arg(long = "settingsFile", value_name = "FILE")]
    settings_file: Option<PathBuf>,

    /// Scenario text or spreadsheet to translate
    #[arg(short = 'f', long = "fileToTranslate", value_name = "FILE")]
    file_to_translate: Option<PathBuf>,

    #[arg(long = "fileToTranslateEncoding", value_name = "ENCODING")]
    file_to_translate_encoding: Option<String>,

    /// Primary artifact (.csv, .xlsx, .ods or .txt)
    #[arg(short = 'o', long = "outputFile", value_name = "FILE")]
    output_file: Option<PathBuf>,

    #[arg(long = "parsingDefinitions", value_name = "FILE")]
    parsing_definitions: Option<PathBuf>,

    #[arg(long = "parsingDefinitionsEncoding", value_name = "ENCODING")]
    parsing_definitions_encoding: Option<String>,

    /// Source language name or code (default Japanese)
    #[arg(long = "sourceLanguage", value_name = "LANGUAGE")]
    source_language: Option<String>,

    /// Target language name or code (default English)
    #[arg(long = "targetLanguage", value_name = "LANGUAGE")]
    target_language: Option<String>,

    #[arg(long = "characterNames", value_name = "FILE")]
    character_names: Option<PathBuf>,

    #[arg(long = "characterNamesEncoding", value_name = "ENCODING")]
    character_names_encoding: Option<String>,

    #[arg(long = "preDictionary", value_name = "FILE")]
    pre_dictionary: Option<PathBuf>,

    #[arg(long = "preDictionaryEncoding", value_name = "ENCODING")]
    pre_dictionary_encoding: Option<String>,

    #[arg(long = "postDictionary", value_name = "FILE")]
    post_dictionary: Option<PathBuf>,

    #[arg(long = "postDictionaryEncoding", value_name = "ENCODING")]
    post_dictionary_encoding: Option<String>,

    #[arg(long = "languageCodesFile", value_name = "FILE")]
    language_codes_file: Option<PathBuf>,

    #[arg(long = "languageCodesFileEncoding", value_name = "ENCODING")]
    language_codes_file_encoding: Option<String>,

    /// One unit per input line; also writes a .txt rendition
    #[arg(long = "lineByLineMode")]
    line_by_line_mode: bool,

    /// Merge with an existing output instead of replacing it
    #[arg(short = 'r', long = "resume")]
    resume: bool,

    /// Protocol and host of a local server
    #[arg(short = 'a', long = "address")]
    address: Option<String>,

    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// strict, replace or ignore
    #[arg(long = "inputErrorHandling", value_name = "HANDLER")]
    input_error_handling: Option<String>,

    /// strict, replace or ignore
    #[arg(long = "outputErrorHandling", value_name = "HANDLER")]
    output_error_handling: Option<String>,

    #[arg(long = "consoleEncoding", value_name = "ENCODING")]
    console_encoding: Option<String>,

    #[arg(long = "verbose")]
    verbose: bool,

    #[arg(short = 'd', long = "debug")]
    debug: bool,

    #[arg(long = "promptFile", value_name = "FILE")]
    prompt_file: Option<PathBuf>,

    #[arg(long = "memoryFile", value_name = "FILE")]
    memory_file: Option<PathBuf>,

    /// instruct, chat or autocomplete
    #[arg(long = "instructionFormat", value_name = "FORMAT")]
    instruction_format: Option<String>,

    #[arg(long = "batchSize")]
    batch_size: Option<usize>,

    #[arg(long = "historyLength")]
    history_length: Option<usize>,

    /// Rows between snapshots
    #[arg(long = "snapshotInterval")]
    snapshot_interval: Option<usize>,

    /// Read timeout in seconds
    #[arg(long = "timeout", value_name = "SECONDS")]
    timeout: Option<u64>,

    #[arg(long = "romajiScheme", value_name = "SCHEME")]
    romaji_scheme: Option<String>,

    /// Compiled system dictionary for cutlet
    #[arg(long = "cutletDictionary", value_name = "FILE")]
    cutlet_dictionary: Option<PathBuf>,

    #[arg(long = "cacheFile", value_name = "FILE")]
    cache_file: Option<PathBuf>,

    #[arg(long = "noCache")]
    no_cache: bool,

    /// Ignore existing results and cached values
    #[arg(long = "reTranslate")]
    re_translate: bool,
}

// Single-dash spellings that clap cannot express as shorts
const LEGACY_FLAGS: &[(&str, &str)] = &[
    ("-fe", "--fileToTranslateEncoding"),
    ("-pfile", "--parsingDefinitions"),
    ("-pfe", "--parsingDefinitionsEncoding"),
    ("-sl", "--sourceLanguage"),
    ("-tl", "--targetLanguage"),
    ("-cn", "--characterNames"),
    ("-cne", "--characterNamesEncoding"),
    ("-pred", "--preDictionary"),
    ("-prede", "--preDictionaryEncoding"),
    ("-postd", "--postDictionary"),
    ("-postde", "--postDictionaryEncoding"),
    ("-lcf", "--languageCodesFile"),
    ("-lcfe", "--languageCodesFileEncoding"),
    ("-lbl", "--lineByLineMode"),
    ("-ieh", "--inputErrorHandling"),
    ("-eh", "--outputErrorHandling"),
    ("-ce", "--consoleEncoding"),
    ("-vb", "--verbose"),
    ("-sf", "--settingsFile"),
    ("-pf", "--promptFile"),
    ("-mf", "--memoryFile"),
    ("-if", "--instructionFormat"),
    ("-bs", "--batchSize"),
    ("-hl", "--historyLength"),
    ("-si", "--snapshotInterval"),
    ("-to", "--timeout"),
    ("-rs", "--romajiScheme"),
    ("-cd", "--cutletDictionary"),
    ("-cf", "--cacheFile"),
    ("-nc", "--noCache"),
    ("-rt", "--reTranslate"),
];

/// Rewrite legacy single-dash flags to their long forms
fn normalize_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    args.into_iter()
        .map(|arg| {
            if !arg.starts_with('-') || arg.starts_with("--") {
                return arg;
            }
            let (flag, value) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value)),
                None => (arg.as_str(), None),
            };
            match LEGACY_FLAGS.iter().find(|(short, _)| *short == flag) {
                Some((_, long)) => match value {
                    Some(value) => format!("{}={}", long, value),
                    None => (*long).to_string(),
                },
                None => arg,
            }
        })
        .collect()
}

/// Encoding and handler the logger writes with
struct ConsoleSettings {
    encoding: &'static Encoding,
    handler: ErrorHandler,
}

static CONSOLE: Lazy<RwLock<ConsoleSettings>> = Lazy::new(|| {
    RwLock::new(ConsoleSettings {
        encoding: UTF_8,
        handler: ErrorHandler::Replace,
    })
});

// @struct: Colored stderr logger that transcodes into the console encoding
struct ConsoleLogger;

impl ConsoleLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(ConsoleLogger))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color and tag for a level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("\x1B[1;31m", "error"),
            Level::Warn => ("\x1B[1;33m", "warn "),
            Level::Info => ("\x1B[1;32m", "info "),
            Level::Debug => ("\x1B[1;36m", "debug"),
            Level::Trace => ("\x1B[1;35m", "trace"),
        }
    }

    fn encode(line: &str) -> Vec<u8> {
        let Ok(console) = CONSOLE.read() else {
            return line.as_bytes().to_vec();
        };
        if console.encoding == UTF_8 {
            return line.as_bytes().to_vec();
        }
        match console.handler {
            ErrorHandler::Ignore => {
                let kept: String = line
                    .chars()
                    .filter(|c| {
                        let mut buf = [0u8; 4];
                        !console.encoding.encode(c.encode_utf8(&mut buf)).2
                    })
                    .collect();
                FileManager::encode_for_console(&kept, console.encoding).into_owned()
            }
            _ => FileManager::encode_for_console(line, console.encoding).into_owned(),
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = chrono::Local::now().format("%H:%M:%S.%3f");
        let (color, tag) = Self::style_for_level(record.level());
        let line = format!("{}{} {} {}\x1B[0m\n", color, now, tag, record.args());
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(&Self::encode(&line));
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

/// Settings file first, then every flag that was given
fn build_config(options: &CommandLineOptions) -> Result<Config> {
    let mut config = match &options.settings_file {
        Some(path) => Config::from_settings_file(path)
            .with_context(|| format!("failed to load settings file {}", path.display()))?,
        None => Config::default(),
    };
    config.engine = options.engine.parse::<EngineKind>()?;

    macro_rules! override_with {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = &options.$field {
                config.$field = value.clone();
            })*
        };
    }
    override_with!(
        file_to_translate_encoding,
        parsing_definitions_encoding,
        source_language,
        target_language,
        character_names_encoding,
        pre_dictionary_encoding,
        post_dictionary_encoding,
        language_codes_file_encoding,
        address,
        console_encoding,
        batch_size,
        history_length,
        snapshot_interval,
        romaji_scheme,
        cache_file,
    );

    let paths = [
        (&options.file_to_translate, &mut config.file_to_translate),
        (&options.output_file, &mut config.output_file),
        (&options.parsing_definitions, &mut config.parsing_definitions),
        (&options.character_names, &mut config.character_names),
        (&options.pre_dictionary, &mut config.pre_dictionary),
        (&options.post_dictionary, &mut config.post_dictionary),
        (&options.language_codes_file, &mut config.language_codes_file),
        (&options.prompt_file, &mut config.prompt_file),
        (&options.memory_file, &mut config.memory_file),
        (&options.cutlet_dictionary, &mut config.cutlet_dictionary),
    ];
    for (flag, field) in paths {
        if flag.is_some() {
            *field = flag.clone();
        }
    }

    if options.port.is_some() {
        config.port = options.port;
    }
    if let Some(timeout) = options.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(handler) = &options.input_error_handling {
        config.input_error_handling = handler.parse::<ErrorHandler>()?;
    }
    if let Some(handler) = &options.output_error_handling {
        config.output_error_handling = handler.parse::<ErrorHandler>()?;
    }
    if let Some(format) = &options.instruction_format {
        config.instruction_format = Some(format.parse::<InstructionFormat>()?);
    }

    config.line_by_line_mode |= options.line_by_line_mode;
    config.resume |= options.resume;
    config.verbose |= options.verbose;
    config.debug |= options.debug;
    config.no_cache |= options.no_cache;
    config.re_translate |= options.re_translate;
    Ok(config)
}

fn configure_console(config: &Config) -> Result<()> {
    let encoding = FileManager::encoding_for(&config.console_encoding)?;
    if let Ok(mut console) = CONSOLE.write() {
        console.encoding = encoding;
        console.handler = config.output_error_handling;
    }
    log::set_max_level(level_filter(config.log_level()));
    Ok(())
}

async fn run(options: CommandLineOptions) -> Result<()> {
    let config = build_config(&options)?;
    configure_console(&config)?;
    debug!("Engine: {}, input: {:?}", config.engine, config.file_to_translate);
    config.validate().context("configuration validation failed")?;

    let controller = Controller::with_config(config).with_progress(true);
    let cancel = controller.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current row");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    controller.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    if ConsoleLogger::init(LevelFilter::Info).is_err() {
        eprintln!("failed to install the logger");
    }

    let options = match CommandLineOptions::try_parse_from(normalize_args(std::env::args())) {
        Ok(options) => options,
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let message = e.to_string();
            let reason = message.lines().next().unwrap_or("invalid arguments");
            error!("{}", reason.trim_start_matches("error: "));
            return ExitCode::FAILURE;
        }
    };

    match run(options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
