/*!
 * NMT server engines.
 *
 * py3translationserver and Sugoi speak the same protocol: a single `POST /`
 * carrying `{content: [...], message: "translate sentences"}` that answers
 * with a parallel JSON list. Only py3translationserver exposes the
 * `/api/v1/model` and `/api/v1/version` endpoints; Sugoi is probed with a
 * one-element batch instead.
 */

use async_trait::async_trait;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::app_config::EngineKind;
use crate::errors::{AppError, EngineError};
use crate::translation::HistoryEntry;

use super::{check_batch, EngineContext, EngineInfo, HttpTransport, TransportSettings, TranslationEngine};

const TRANSLATE_MESSAGE: &str = "translate sentences";
const PROBE_TEXT: &str = "こんにちは";

static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    content: &'a [String],
    message: &'a str,
}

/// py3translationserver or Sugoi
pub struct NmtServer {
    info: EngineInfo,
    transport: HttpTransport,
}

/// Endpoint answers may be a JSON string or bare text
fn text_of(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(map)) => map
            .get("result")
            .or_else(|| map.get("model"))
            .or_else(|| map.get("version"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => body.trim().to_string(),
    }
}

impl NmtServer {
    /// Probe the server and build the engine
    pub async fn connect(
        kind: EngineKind,
        base_url: &str,
        context: &EngineContext,
        settings: TransportSettings,
    ) -> Result<Self, AppError> {
        let transport = HttpTransport::new(base_url, settings)?;
        let mut engine = Self::unprobed(kind, transport, context);

        let probe = match kind {
            EngineKind::Sugoi => engine.probe_with_batch().await,
            _ => engine.probe_endpoints().await,
        };
        match probe {
            Ok(()) => {
                engine.info.reachable = true;
                info!("Connected to {} at {}", engine.info.identity(), engine.transport.base_url());
            }
            Err(e) => warn!("{} at {} did not answer: {}", kind, engine.transport.base_url(), e),
        }
        Ok(engine)
    }

    fn unprobed(kind: EngineKind, transport: HttpTransport, context: &EngineContext) -> Self {
        let mut info = EngineInfo::new(
            kind.as_str(),
            context.source_language.clone(),
            context.target_language.clone(),
        );
        info.supports_batches = true;
        Self { info, transport }
    }

    async fn probe_text(&self, path: &str) -> Result<String, EngineError> {
        let response = self.transport.send(self.transport.probe(path)).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        if !status.is_success() {
            return Err(EngineError::Protocol(format!("{} answered HTTP {}", path, status)));
        }
        Ok(text_of(&body))
    }

    async fn probe_endpoints(&mut self) -> Result<(), EngineError> {
        self.info.model = self.probe_text("/api/v1/model").await?;
        self.info.version = self.probe_text("/api/v1/version").await?;
        Ok(())
    }

    async fn probe_with_batch(&self) -> Result<(), EngineError> {
        let content = [PROBE_TEXT.to_string()];
        let request = TranslateRequest {
            content: &content,
            message: TRANSLATE_MESSAGE,
        };
        let results: Vec<String> = self
            .transport
            .send_json(self.transport.probe_post("/").json(&request))
            .await?;
        check_batch(1, results).map(|_| ())
    }
}

#[async_trait]
impl TranslationEngine for NmtServer {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn pre_process_text(&self, text: &str) -> String {
        let joined = text.trim().replace("\r\n", " ").replace('\n', " ");
        WHITESPACE_RUNS.replace_all(&joined, " ").into_owned()
    }

    fn post_process_text(&self, text: &str, _original: &str, _speaker: Option<&str>) -> String {
        let cleaned = text.replace("<unk>", "");
        WHITESPACE_RUNS.replace_all(cleaned.trim(), " ").into_owned()
    }

    async fn translate(
        &self,
        text: &str,
        _speaker: Option<&str>,
        _history: &[HistoryEntry],
    ) -> Result<String, EngineError> {
        let mut results = self.translate_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| EngineError::Protocol("empty result list".to_string()))
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, EngineError> {
        let content: Vec<String> = texts.iter().map(|t| self.pre_process_text(t)).collect();
        let request = TranslateRequest {
            content: &content,
            message: TRANSLATE_MESSAGE,
        };
        let results: Vec<String> = self
            .transport
            .send_json(self.transport.post("/").json(&request))
            .await?;
        let results = check_batch(texts.len(), results)?;
        Ok(results
            .iter()
            .zip(texts)
            .map(|(result, original)| self.post_process_text(result, original, None))
            .collect())
    }
}
