/*!
 * # vntl - visual novel translation orchestrator
 *
 * A Rust library that turns visual novel scripts into translated spreadsheets.
 *
 * ## Features
 *
 * - Extract dialogue paragraphs from scenario text or spreadsheets
 * - Deduplicate them into a keyed tabular store (CSV, XLSX, ODS, text)
 * - Translate them with pluggable engines:
 *   - koboldcpp (local LLM, instruct/chat/autocomplete prompts)
 *   - py3translationserver and sugoi (local NMT servers)
 *   - DeepL API (free and pro)
 *   - pykakasi- and cutlet-style romanization
 * - Character-name, pre- and post-translation dictionaries
 * - Resumable runs with timestamped snapshots and a cross-run cache
 *
 * ## Architecture
 *
 * - `store`: the tabular store and its on-disk formats
 * - `parsing`: parse definitions and the extractor
 * - `dictionary`: character names and substitution dictionaries
 * - `engines`: the engine trait, its implementations and the factory
 * - `translation`: context history and the cross-run cache
 * - `app_controller`: the orchestrator
 * - `app_config`, `file_utils`, `language_utils`, `errors`: ambient plumbing
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod dictionary;
pub mod engines;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod parsing;
pub mod store;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::{Config, EngineKind};
pub use app_controller::{Controller, RunSummary};
pub use engines::{EngineInfo, TranslationEngine};
pub use errors::{AppError, EngineError, StoreError};
pub use language_utils::language_codes_match;
pub use store::Store;
