/*!
 * Cross-run translation cache.
 *
 * The cache is a second tabular store keyed by source text, with one column
 * per engine identity. It lets a new working set reuse translations a
 * previous run already paid for. Units whose pre-translation dictionary
 * fired never reach the cache.
 */

use std::cell::Cell;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::errors::{AppError, StoreError};
use crate::file_utils::FileManager;
use crate::store::{Store, SOURCE_HEADER};

/// Translation cache for storing and retrieving translations across runs
pub struct TranslationCache {
    /// Backing table: `rawText` then one column per engine identity
    store: Store,

    /// Where the cache is snapshotted, if anywhere
    path: Option<PathBuf>,

    hits: Cell<usize>,
    misses: Cell<usize>,

    /// Whether caching is enabled
    enabled: bool,

    /// Whether anything was written since load
    dirty: bool,
}

impl TranslationCache {
    /// Create an empty in-memory cache
    pub fn new(enabled: bool) -> Self {
        Self {
            store: Store::with_headers(&[SOURCE_HEADER]),
            path: None,
            hits: Cell::new(0),
            misses: Cell::new(0),
            enabled,
            dirty: false,
        }
    }

    /// A cache that never answers and never records
    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Load the cache file if it exists, repairing duplicate keys once
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        let mut cache = Self::new(true);
        cache.path = Some(path.to_path_buf());
        if !FileManager::file_exists(path) {
            debug!("No translation cache at {}, starting empty", path.display());
            return Ok(cache);
        }

        let mut store = Store::import(path)?;
        if store.headers().first().cloned().flatten().as_deref() != Some(SOURCE_HEADER) {
            return Err(AppError::MalformedStore(format!(
                "{}: first header of the cache must be '{}'",
                path.display(),
                SOURCE_HEADER
            )));
        }
        if let Err(e) = store.initialize_cache() {
            warn!("Rebuilding translation cache {}: {}", path.display(), e);
            store.rebuild_cache(Some(SOURCE_HEADER))?;
            store.initialize_cache()?;
        }
        debug!("Loaded {} cached sources from {}", store.index_len(), path.display());
        cache.store = store;
        Ok(cache)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get a translation from the cache
    pub fn get(&self, source_text: &str, identity: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let found = self.store.search_first_column(source_text).and_then(|row| {
            let column = self.store.search_headers(identity)?;
            self.store.get_cell(row, column).ok().flatten().map(str::to_string)
        });

        match found {
            Some(translation) => {
                self.hits.set(self.hits.get() + 1);
                debug!("Cache hit for '{}' ({})", truncate_text(source_text, 30), identity);
                Some(translation)
            }
            None => {
                self.misses.set(self.misses.get() + 1);
                None
            }
        }
    }

    /// Store a translation in the cache
    pub fn store(&mut self, source_text: &str, identity: &str, translation: &str) -> Result<(), StoreError> {
        if !self.enabled {
            return Ok(());
        }
        let column = self.store.ensure_header(identity)?;
        let row = self.store.add_to_cache(source_text)?;
        self.store.set_cell(row, column, Some(translation.to_string()))?;
        self.dirty = true;
        Ok(())
    }

    /// Get cache statistics: hits, misses and hit rate
    pub fn stats(&self) -> (usize, usize, f64) {
        let hits = self.hits.get();
        let misses = self.misses.get();
        let total = hits + misses;

        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        (hits, misses, hit_rate)
    }

    /// Number of cached sources
    pub fn len(&self) -> usize {
        self.store.index_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the cache to its file with a timestamped backup, if anything changed
    pub fn snapshot(&mut self) -> Result<(), AppError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.enabled || !self.dirty {
            return Ok(());
        }
        FileManager::snapshot(&self.store, path)?;
        self.dirty = false;
        Ok(())
    }
}

/// Truncate text for logging
fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
