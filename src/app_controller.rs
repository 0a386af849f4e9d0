use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};

use crate::app_config::Config;
use crate::dictionary::{CharacterNames, Dictionary};
use crate::engines::{create_engine, EngineContext, TranslationEngine};
use crate::errors::{AppError, EngineError};
use crate::file_utils::FileManager;
use crate::language_utils::{LanguageRecord, LanguageSide, LanguageTable};
use crate::parsing::{parse_metadata, ExtractionSummary, Extractor, ParseDefinitions, Unit};
use crate::store::{Store, StoreFormat, METADATA_HEADER};
use crate::translation::{HistoryEntry, HistoryRing, TranslationCache};

// @module: Orchestrator driving extraction, dispatch and snapshots

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Primary artifact written
    pub output: PathBuf,
    /// Column the engine wrote to; `None` for parseOnly
    pub identity: Option<String>,
    pub extraction: ExtractionSummary,
    /// Data rows in the store
    pub rows_total: usize,
    /// Rows filled this run, cache hits included
    pub translated: usize,
    pub cache_hits: usize,
    /// Rows left absent after an engine failure
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Dictionaries and parse rules loaded once per run
struct Resources {
    definitions: ParseDefinitions,
    names: CharacterNames,
    pre: Dictionary,
    post: Dictionary,
}

/// A row waiting for a translation
struct WorkItem {
    row: usize,
    source: String,
    speaker: Option<String>,
    touched: bool,
    cached: Option<String>,
}

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
    // @field: Set by the signal handler; checked between rows
    cancel: Arc<AtomicBool>,
    show_progress: bool,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            show_progress: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flag that stops the run cleanly at the next row boundary
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Draw a progress bar while translating
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Resolve source and target languages against the language-codes table
    pub fn resolve_languages(&self) -> Result<(LanguageRecord, LanguageRecord), AppError> {
        let table = match &self.config.language_codes_file {
            Some(path) => LanguageTable::load(path, &self.config.language_codes_file_encoding)?,
            None => LanguageTable::builtin()?,
        };
        let source = table.resolve(&self.config.source_language, LanguageSide::Source)?;
        let target = table.resolve(&self.config.target_language, LanguageSide::Target)?;
        debug!("Translating {} ({}) -> {} ({})", source.name, source.code_2, target.name, target.code_2);
        Ok((source, target))
    }

    fn load_names(&self) -> Result<CharacterNames, AppError> {
        match &self.config.character_names {
            Some(path) => CharacterNames::load(path, &self.config.character_names_encoding),
            None => Ok(CharacterNames::default()),
        }
    }

    fn read_optional(path: Option<&PathBuf>) -> Result<Option<String>, AppError> {
        path.map(|path| FileManager::read_text(path, "utf-8", crate::file_utils::ErrorHandler::Strict))
            .transpose()
    }

    /// Languages, names, prompt and memory for engine construction
    pub fn engine_context(&self) -> Result<EngineContext, AppError> {
        let (source, target) = self.resolve_languages()?;
        let mut context = EngineContext::new(source, target);
        context.character_names = self.load_names()?;
        context.prompt = Self::read_optional(self.config.prompt_file.as_ref())?;
        context.memory = Self::read_optional(self.config.memory_file.as_ref())?;
        Ok(context)
    }

    fn load_resources(&self) -> Result<Resources, AppError> {
        let definitions = match &self.config.parsing_definitions {
            Some(path) => ParseDefinitions::load(path, &self.config.parsing_definitions_encoding)?,
            None => ParseDefinitions::default(),
        };
        let definitions = if self.config.line_by_line_mode {
            definitions.line_by_line()
        } else {
            definitions
        };
        let load = |path: &Option<PathBuf>, encoding: &str| match path {
            Some(path) => Dictionary::load(path, encoding),
            None => Ok(Dictionary::default()),
        };
        Ok(Resources {
            definitions,
            names: self.load_names()?,
            pre: load(&self.config.pre_dictionary, &self.config.pre_dictionary_encoding)?,
            post: load(&self.config.post_dictionary, &self.config.post_dictionary_encoding)?,
        })
    }

    /// Run the whole workflow: construct the engine, then extract and translate
    pub async fn run(&self) -> Result<RunSummary, AppError> {
        self.config.validate()?;
        let context = self.engine_context()?;
        let engine = create_engine(&self.config, &context).await?;
        self.run_with_engine(engine.as_deref()).await
    }

    /// Extract, then translate with an already constructed engine
    pub async fn run_with_engine(&self, engine: Option<&dyn TranslationEngine>) -> Result<RunSummary, AppError> {
        let started = Instant::now();
        if let Some(engine) = engine {
            if !engine.info().reachable {
                return Err(AppError::EngineUnreachable(format!(
                    "{} did not answer its probe",
                    engine.info().identity()
                )));
            }
        }

        let input = self
            .config
            .file_to_translate
            .clone()
            .ok_or_else(|| AppError::Config("no file to translate given (-f)".to_string()))?;
        let output = self
            .config
            .output_path()
            .ok_or_else(|| AppError::Config("no output path".to_string()))?;

        let resources = self.load_resources()?;
        let units = self.extract_units(&input, &resources)?;
        let (store, extraction) = self.build_store(&units, &output)?;
        info!(
            "Extracted {} units ({} new rows, {} touched by the pre-translation dictionary)",
            extraction.units, extraction.new_rows, extraction.touched
        );

        let mut summary = RunSummary {
            output: output.clone(),
            extraction,
            rows_total: store.index_len(),
            ..RunSummary::default()
        };

        let store = match engine {
            None => {
                FileManager::snapshot(&store, &output)?;
                store
            }
            Some(engine) => {
                let identity = engine.info().identity();
                summary.identity = Some(identity.clone());
                let cache = self.open_cache(&output)?;
                let mut session = Session::new(self, engine, store, cache, &resources, &output, identity)?;
                let outcome = session.run(&mut summary).await;
                let (store, mut cache) = session.finish();
                FileManager::snapshot(&store, &output)?;
                cache.snapshot()?;
                let (hits, misses, rate) = cache.stats();
                debug!("Translation cache: {} hits, {} misses ({:.1}% hit rate)", hits, misses, rate * 100.0);
                outcome?;
                store
            }
        };

        if self.config.line_by_line_mode {
            self.write_line_by_line(&units, &store, summary.identity.as_deref(), &output)?;
        }

        summary.elapsed = started.elapsed();
        info!(
            "Done: {} rows, {} translated this run ({} from cache), {} skipped, {:.1}s -> {}",
            summary.rows_total,
            summary.translated,
            summary.cache_hits,
            summary.skipped,
            summary.elapsed.as_secs_f64(),
            output.display()
        );
        Ok(summary)
    }

    /// Scenario text or spreadsheet input to units
    fn extract_units(&self, input: &Path, resources: &Resources) -> Result<Vec<Unit>, AppError> {
        if !FileManager::file_exists(input) {
            return Err(AppError::Io(format!("file not found: {}", input.display())));
        }
        let extractor = Extractor::new(&resources.definitions, &resources.names, &resources.pre);
        let is_table = matches!(
            StoreFormat::from_path(input),
            Ok(StoreFormat::Csv | StoreFormat::Xlsx | StoreFormat::Xls | StoreFormat::Ods)
        );
        if is_table {
            let table = crate::dictionary::read_table(
                input,
                &self.config.file_to_translate_encoding,
                self.config.input_error_handling,
            )?;
            return Ok(extractor.extract_table(&table));
        }
        let text = FileManager::read_text(
            input,
            &self.config.file_to_translate_encoding,
            self.config.input_error_handling,
        )?;
        Ok(extractor.extract(&text))
    }

    /// Fresh working set, merged with the previous artifact on resume
    fn build_store(&self, units: &[Unit], output: &Path) -> Result<(Store, ExtractionSummary), AppError> {
        let mut store = Store::working_set();
        store.initialize_cache()?;
        let extraction = Extractor::insert(units, &mut store)?;

        if FileManager::file_exists(output) {
            if self.config.resume {
                let previous = load_indexed(output)?.with_sheet_name(store.sheet_name().to_string());
                store.merge_with(&previous, None)?;
                info!("Resuming from {} ({} rows)", output.display(), previous.index_len());
            } else if let Some(backup) = FileManager::backup_existing(output)? {
                info!("Existing output backed up to {}", backup.display());
            }
        }
        Ok((store, extraction))
    }

    fn open_cache(&self, output: &Path) -> Result<TranslationCache, AppError> {
        if self.config.no_cache {
            return Ok(TranslationCache::disabled());
        }
        let path = if self.config.cache_file.is_relative() {
            output
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(&self.config.cache_file)
        } else {
            self.config.cache_file.clone()
        };
        TranslationCache::load(path)
    }

    /// One line per unit: its translation, or the source when absent
    fn write_line_by_line(
        &self,
        units: &[Unit],
        store: &Store,
        identity: Option<&str>,
        output: &Path,
    ) -> Result<(), AppError> {
        let column = identity.and_then(|identity| store.search_headers(identity));
        let lines: Vec<String> = units
            .iter()
            .map(|unit| {
                column
                    .as_ref()
                    .and_then(|column| {
                        let row = store.search_first_column(&unit.text)?;
                        store.get_cell(row, column.as_str()).ok().flatten()
                    })
                    .unwrap_or(unit.text.as_str())
                    .replace('\n', " ")
            })
            .collect();
        let path = FileManager::line_by_line_path(output);
        let mut content = lines.join("\n");
        content.push('\n');
        FileManager::write_atomic(&path, &content)?;
        info!("Wrote {} lines to {}", lines.len(), path.display());
        Ok(())
    }
}

/// Import a store and build its index, rebuilding once on corruption
fn load_indexed(path: &Path) -> Result<Store, AppError> {
    let mut store = Store::import(path)?;
    if let Err(e) = store.initialize_cache() {
        warn!("{}: {}; rebuilding", path.display(), e);
        store.rebuild_cache(None)?;
        store.initialize_cache()?;
    }
    Ok(store)
}

/// Per-run translation state: the store, the cache and the history ring
struct Session<'a> {
    config: &'a Config,
    cancel: &'a AtomicBool,
    engine: &'a dyn TranslationEngine,
    store: Store,
    cache: TranslationCache,
    history: HistoryRing,
    names: &'a CharacterNames,
    post: &'a Dictionary,
    output: &'a Path,
    identity: String,
    column: usize,
    since_snapshot: usize,
    progress: ProgressBar,
}

impl<'a> Session<'a> {
    fn new(
        controller: &'a Controller,
        engine: &'a dyn TranslationEngine,
        mut store: Store,
        cache: TranslationCache,
        resources: &'a Resources,
        output: &'a Path,
        identity: String,
    ) -> Result<Self, AppError> {
        let column = store.ensure_header(&identity)?;
        let progress = if controller.show_progress {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        Ok(Self {
            config: &controller.config,
            cancel: &controller.cancel,
            engine,
            store,
            cache,
            history: HistoryRing::new(controller.config.history_length),
            names: &resources.names,
            post: &resources.post,
            output,
            identity,
            column,
            since_snapshot: 0,
            progress,
        })
    }

    fn finish(self) -> (Store, TranslationCache) {
        self.progress.finish_and_clear();
        (self.store, self.cache)
    }

    /// Rows without a value in the engine column, ascending
    fn pending(&self) -> Result<Vec<WorkItem>, AppError> {
        let metadata_column = self.store.search_headers(METADATA_HEADER);
        let read_cache = !self.config.re_translate;
        let mut items = Vec::new();
        for (row, source) in self.store.keys() {
            if !self.config.re_translate && self.store.get_cell(row, self.column)?.is_some() {
                continue;
            }
            let touched = metadata_column
                .as_ref()
                .and_then(|column| self.store.get_cell(row, column.as_str()).ok().flatten())
                .and_then(parse_metadata)
                .is_some_and(|(_, touched)| touched);
            let cached = if read_cache && !touched {
                self.cache.get(source, &self.identity)
            } else {
                None
            };
            items.push(WorkItem {
                row,
                source: source.to_string(),
                speaker: self.names.speaker_of(source).map(|name| name.translated.clone()),
                touched,
                cached,
            });
        }
        Ok(items)
    }

    async fn run(&mut self, summary: &mut RunSummary) -> Result<(), AppError> {
        let items = self.pending()?;
        info!(
            "{} of {} rows need {}",
            items.len(),
            self.store.index_len(),
            self.identity
        );
        self.progress.set_length(items.len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({percent}%) {msg} {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        self.progress.set_style(style.progress_chars("█▓▒░"));
        self.progress.set_message(self.identity.clone());

        let batch_size = if self.engine.info().supports_batches {
            self.config.batch_size.max(1)
        } else {
            1
        };

        let mut group: Vec<WorkItem> = Vec::new();
        let mut uncached = 0usize;
        for item in items {
            if item.cached.is_none() {
                uncached += 1;
            }
            group.push(item);
            if uncached >= batch_size {
                self.dispatch(std::mem::take(&mut group), summary).await?;
                uncached = 0;
            }
        }
        if !group.is_empty() {
            self.dispatch(group, summary).await?;
        }
        Ok(())
    }

    /// Translate a group, batched when the engine allows it
    async fn dispatch(&mut self, group: Vec<WorkItem>, summary: &mut RunSummary) -> Result<(), AppError> {
        let pending: Vec<String> = group
            .iter()
            .filter(|item| item.cached.is_none())
            .map(|item| item.source.clone())
            .collect();

        let batched = if pending.len() > 1 && self.engine.info().supports_batches {
            self.check_cancel().await?;
            match self.engine.translate_batch(&pending).await {
                Ok(results) if results.len() == pending.len() => Some(results),
                Ok(results) => {
                    warn!("Batch of {} returned {} results, retrying one by one", pending.len(), results.len());
                    None
                }
                Err(e) if e.is_recoverable() || matches!(e, EngineError::Unsupported(_)) => {
                    warn!("Batch of {} failed ({}), retrying one by one", pending.len(), e);
                    None
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        let mut results = batched.map(|results| results.into_iter());
        for item in group {
            self.check_cancel().await?;
            if let Some(cached) = item.cached.clone() {
                summary.cache_hits += 1;
                self.commit(&item, cached, false, summary)?;
                continue;
            }
            let translated = match results.as_mut().and_then(|results| results.next()) {
                Some(result) => Some(result),
                None => self.translate_one(&item).await?,
            };
            match translated {
                Some(result) => self.commit(&item, result, true, summary)?,
                None => {
                    summary.skipped += 1;
                    self.progress.inc(1);
                }
            }
        }
        Ok(())
    }

    /// Single-unit call; recoverable failures leave the row absent
    async fn translate_one(&mut self, item: &WorkItem) -> Result<Option<String>, AppError> {
        let history: &[HistoryEntry] = if self.engine.info().supports_history {
            self.history.entries()
        } else {
            &[]
        };
        match self.engine.translate(&item.source, item.speaker.as_deref(), history).await {
            Ok(result) => Ok(Some(result)),
            Err(e) if e.is_recoverable() => {
                self.progress.suspend(|| warn!("Row {} left untranslated: {}", item.row, e));
                Ok(None)
            }
            Err(e) => {
                error!("Row {}: {}", item.row, e);
                Err(e.into())
            }
        }
    }

    /// Write a result, feed the cache and history, snapshot when due
    fn commit(&mut self, item: &WorkItem, raw: String, fresh: bool, summary: &mut RunSummary) -> Result<(), AppError> {
        let (value, _) = self.post.apply(&raw);
        self.store.set_cell(item.row, self.column, Some(value.clone()))?;
        if fresh && !item.touched {
            self.cache.store(&item.source, &self.identity, &raw)?;
        }
        self.history
            .push(HistoryEntry::new(item.source.clone(), value, item.speaker.clone()));
        summary.translated += 1;
        self.progress.inc(1);

        self.since_snapshot += 1;
        if self.since_snapshot >= self.config.snapshot_interval {
            self.snapshot()?;
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Result<(), AppError> {
        FileManager::snapshot(&self.store, self.output)?;
        self.cache.snapshot()?;
        self.since_snapshot = 0;
        debug!("Snapshot of {} written", self.output.display());
        Ok(())
    }

    /// Yields first so a signal task on the same thread can set the flag
    async fn check_cancel(&self) -> Result<(), AppError> {
        tokio::task::yield_now().await;
        if self.cancel.load(Ordering::SeqCst) {
            warn!("Cancellation requested, stopping after the last completed row");
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}
