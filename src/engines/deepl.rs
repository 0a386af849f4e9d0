/*!
 * DeepL API engine.
 *
 * Construction checks the key against `/v2/usage`; translation posts whole
 * batches to `/v2/translate`. Authentication and quota failures come back
 * as typed errors and are never retried.
 */

use async_trait::async_trait;
use log::{info, warn};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::app_config::EngineKind;
use crate::errors::{AppError, EngineError};
use crate::language_utils::{LanguageRecord, LanguageSide};
use crate::translation::HistoryEntry;

use super::{
    check_batch, read_json, snippet, EngineContext, EngineInfo, HttpTransport, TransportSettings,
    TranslationEngine,
};

pub const FREE_API_URL: &str = "https://api-free.deepl.com";
pub const PRO_API_URL: &str = "https://api.deepl.com";

// DeepL-specific status for an exhausted character quota
const QUOTA_EXCEEDED: u16 = 456;

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a [String],
    source_lang: &'a str,
    target_lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    character_count: u64,
    #[serde(default)]
    character_limit: u64,
}

/// Source code: the plain source-side variant, uppercased
pub fn source_code(language: &LanguageRecord) -> String {
    language.code_for(LanguageSide::Source).to_uppercase()
}

/// Target code with the regional suffix the API expects
pub fn target_code(language: &LanguageRecord) -> String {
    let base = language.code_2.to_uppercase();
    let name = language.name.to_lowercase();
    let region = [
        ("(american)", "US"),
        ("(british)", "GB"),
        ("(brazilian)", "BR"),
        ("(european)", "PT"),
        ("(simplified)", "HANS"),
        ("(traditional)", "HANT"),
    ]
    .iter()
    .find(|(marker, _)| name.contains(marker))
    .map(|(_, region)| *region);
    match region {
        Some(region) => format!("{}-{}", base, region),
        None => base,
    }
}

/// DeepL free or pro API
pub struct DeepL {
    info: EngineInfo,
    transport: HttpTransport,
    api_key: String,
    source_lang: String,
    target_lang: String,
}

impl DeepL {
    /// Connect to the public endpoint for `kind`
    pub async fn connect(
        kind: EngineKind,
        api_key: String,
        context: &EngineContext,
        settings: TransportSettings,
    ) -> Result<Self, AppError> {
        let base_url = match kind {
            EngineKind::DeeplApiPro => PRO_API_URL,
            _ => FREE_API_URL,
        };
        Self::with_base_url(kind, api_key, base_url, context, settings).await
    }

    /// Connect to an explicit base URL
    pub async fn with_base_url(
        kind: EngineKind,
        api_key: String,
        base_url: &str,
        context: &EngineContext,
        settings: TransportSettings,
    ) -> Result<Self, AppError> {
        let mut info = EngineInfo::new(
            kind.as_str(),
            context.source_language.clone(),
            context.target_language.clone(),
        );
        info.supports_batches = true;
        info.prompt_optional = true;

        for language in [&info.source_language, &info.target_language] {
            if !language.cloud_supported {
                return Err(AppError::Config(format!("{} does not support {}", kind, language.name)));
            }
        }

        let mut engine = Self {
            source_lang: source_code(&info.source_language),
            target_lang: target_code(&info.target_language),
            info,
            transport: HttpTransport::new(base_url, settings)?,
            api_key,
        };

        match engine.usage().await {
            Ok(usage) => {
                engine.info.reachable = true;
                info!(
                    "Connected to {} ({} of {} characters used)",
                    kind, usage.character_count, usage.character_limit
                );
            }
            Err(e @ (EngineError::Authentication(_) | EngineError::QuotaExceeded(_))) => {
                return Err(e.into());
            }
            Err(e) => warn!("{} did not answer: {}", kind, e),
        }
        Ok(engine)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
    }

    /// Map the API's status codes onto engine errors
    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, EngineError> {
        let response = self.transport.send(self.authorize(request)).await?;
        match response.status() {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(EngineError::Authentication(
                "the API key was rejected".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(EngineError::QuotaExceeded(
                "too many requests".to_string(),
            )),
            status if status.as_u16() == QUOTA_EXCEEDED => Err(EngineError::QuotaExceeded(
                "character quota exhausted".to_string(),
            )),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(EngineError::Protocol(format!("HTTP {}: {}", status, snippet(&body))))
            }
            _ => read_json(response, self.transport.read_timeout_secs()).await,
        }
    }

    async fn usage(&self) -> Result<Usage, EngineError> {
        self.send(self.transport.probe("/v2/usage")).await
    }

    pub fn language_codes(&self) -> (&str, &str) {
        (&self.source_lang, &self.target_lang)
    }
}

#[async_trait]
impl TranslationEngine for DeepL {
    fn info(&self) -> &EngineInfo {
        &self.info
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
            .ok_or_else(|| EngineError::Protocol("empty translation list".to_string()))
    }

    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, EngineError> {
        let text: Vec<String> = texts.iter().map(|t| self.pre_process_text(t)).collect();
        let body = TranslateRequest {
            text: &text,
            source_lang: &self.source_lang,
            target_lang: &self.target_lang,
        };
        let response: TranslateResponse = self.send(self.transport.post("/v2/translate").json(&body)).await?;
        let results = response.translations.into_iter().map(|t| t.text).collect();
        let results = check_batch(texts.len(), results)?;
        Ok(results
            .iter()
            .zip(texts)
            .map(|(result, original)| self.post_process_text(result, original, None))
            .collect())
    }
}
