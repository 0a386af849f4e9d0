/*!
 * Translation state owned by the orchestrator.
 *
 * - `history`: the bounded context ring passed to history-aware engines
 * - `cache`: the cross-run cache keyed by source text and engine identity
 */

pub use self::cache::TranslationCache;
pub use self::history::{HistoryEntry, HistoryRing};

pub mod cache;
pub mod history;
