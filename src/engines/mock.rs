/*!
 * Mock engine implementations for testing.
 *
 * This module provides a scripted engine that simulates different behaviors:
 * - `MockEngine::working()` - Always succeeds with a tagged translation
 * - `MockEngine::batch_mismatch()` - Batches come back one result short
 * - `MockEngine::failing()` - Always fails with a recoverable error
 * - `MockEngine::intermittent(n)` - Every nth request fails
 *
 * Every call is recorded so tests can inspect what the orchestrator sent,
 * including the history passed to each single-unit call.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::language_utils::{LanguageRecord, LanguageSide};
use crate::translation::HistoryEntry;

use super::{check_batch, EngineInfo, TranslationEngine};

/// Behavior mode for the mock engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds
    Working,
    /// Single calls succeed; batches return one result fewer than sent
    BatchMismatch,
    /// Fails intermittently (every Nth request)
    Intermittent { fail_every: usize },
    /// Always fails with a protocol error
    Failing,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Single {
        text: String,
        speaker: Option<String>,
        history: Vec<HistoryEntry>,
    },
    Batch(Vec<String>),
}

/// Mock engine for testing orchestration behavior
#[derive(Clone)]
pub struct MockEngine {
    info: EngineInfo,
    behavior: MockBehavior,
    /// Request counter for intermittent failures
    request_count: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

fn placeholder_language(name: &str, code: &str) -> LanguageRecord {
    LanguageRecord {
        name: name.to_string(),
        code_2: code.to_string(),
        code_3: String::new(),
        cloud_supported: true,
        source_variant: None,
    }
}

impl MockEngine {
    /// Create a new mock engine with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        let mut info = EngineInfo::new(
            "mock",
            placeholder_language("Japanese", "ja"),
            placeholder_language("English", "en"),
        );
        info.model = "scripted".to_string();
        info.reachable = true;
        info.supports_batches = true;
        info.supports_history = true;
        Self {
            info,
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn batch_mismatch() -> Self {
        Self::new(MockBehavior::BatchMismatch)
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every })
    }

    /// Toggle batch support
    pub fn with_batches(mut self, supported: bool) -> Self {
        self.info.supports_batches = supported;
        self
    }

    /// Toggle history support
    pub fn with_history(mut self, supported: bool) -> Self {
        self.info.supports_history = supported;
        self
    }

    /// Mark the engine unreachable, as a failed probe would
    pub fn unreachable(mut self) -> Self {
        self.info.reachable = false;
        self
    }

    /// Change the model part of the identity
    pub fn with_model(mut self, model: &str) -> Self {
        self.info.model = model.to_string();
        self
    }

    /// The deterministic translation this engine produces
    pub fn expected(&self, text: &str) -> String {
        format!("[{}] {}", self.info.target_language.code_for(LanguageSide::Target), text)
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Number of requests made so far
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn should_fail(&self, count: usize) -> bool {
        match self.behavior {
            MockBehavior::Failing => true,
            MockBehavior::Intermittent { fail_every } => fail_every > 0 && count % fail_every == fail_every - 1,
            _ => false,
        }
    }
}

#[async_trait]
impl TranslationEngine for MockEngine {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    async fn translate(
        &self,
        text: &str,
        speaker: Option<&str>,
        history: &[HistoryEntry],
    ) -> Result<String, EngineError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.record(MockCall::Single {
            text: text.to_string(),
            speaker: speaker.map(str::to_string),
            history: history.to_vec(),
        });
        if self.should_fail(count) {
            return Err(EngineError::Protocol(format!("mock failure on request {}", count + 1)));
        }
        Ok(self.expected(text))
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, EngineError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.record(MockCall::Batch(texts.to_vec()));
        if self.should_fail(count) {
            return Err(EngineError::Protocol(format!("mock failure on request {}", count + 1)));
        }
        let mut results: Vec<String> = texts.iter().map(|t| self.expected(t)).collect();
        if self.behavior == MockBehavior::BatchMismatch {
            results.pop();
        }
        check_batch(texts.len(), results)
    }
}
