/*!
 * Translation engines.
 *
 * Every backend implements `TranslationEngine` and describes itself with an
 * `EngineInfo` capability record. The orchestrator only ever looks at the
 * capability flags, never at the concrete type.
 *
 * - `koboldcpp`: LLM server with instruct/chat/autocomplete prompting
 * - `profiles`: instruction-format wrappers, stop sequences and samplers
 * - `nmt`: py3translationserver and sugoi NMT servers
 * - `deepl`: the DeepL cloud API
 * - `romaji`: local romanization (pykakasi and cutlet variants)
 * - `morphology`: word segmentation and readings for cutlet
 * - `mock`: scripted engine for tests
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::app_config::{Config, EngineKind};
use crate::dictionary::CharacterNames;
use crate::errors::{AppError, EngineError};
use crate::language_utils::LanguageRecord;
use crate::translation::HistoryEntry;

pub mod deepl;
pub mod koboldcpp;
pub mod mock;
pub mod morphology;
pub mod nmt;
pub mod profiles;
pub mod romaji;

pub use deepl::DeepL;
pub use koboldcpp::KoboldCpp;
pub use mock::{MockBehavior, MockEngine};
pub use morphology::Analyzer;
pub use nmt::NmtServer;
pub use romaji::Romanizer;

/// Identity and capabilities of a constructed engine
#[derive(Debug, Clone)]
pub struct EngineInfo {
    /// Engine family, e.g. `koboldcpp`
    pub family: String,

    /// Model string reported by the backend (may be empty)
    pub model: String,

    /// Version string reported by the backend (may be empty)
    pub version: String,

    /// Extra identity component such as the romaji scheme
    pub variant: Option<String>,

    /// Result of the construction probe
    pub reachable: bool,

    pub supports_batches: bool,
    pub supports_history: bool,
    pub requires_prompt: bool,
    pub prompt_optional: bool,

    pub source_language: LanguageRecord,
    pub target_language: LanguageRecord,
}

impl EngineInfo {
    /// A record with every capability off
    pub fn new(family: impl Into<String>, source_language: LanguageRecord, target_language: LanguageRecord) -> Self {
        Self {
            family: family.into(),
            model: String::new(),
            version: String::new(),
            variant: None,
            reachable: false,
            supports_batches: false,
            supports_history: false,
            requires_prompt: false,
            prompt_optional: false,
            source_language,
            target_language,
        }
    }

    /// Column header naming this engine: `family[/model][/variant]`
    pub fn identity(&self) -> String {
        let mut parts = vec![self.family.as_str()];
        if !self.model.is_empty() {
            parts.push(&self.model);
        }
        if let Some(variant) = self.variant.as_deref().filter(|v| !v.is_empty()) {
            parts.push(variant);
        }
        parts.join("/")
    }
}

/// Uniform surface over every translation backend
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Identity and capability record
    fn info(&self) -> &EngineInfo;

    /// Hook run on the text before it is sent
    fn pre_process_text(&self, text: &str) -> String {
        text.trim().to_string()
    }

    /// Hook run on the backend's answer before it is returned
    fn post_process_text(&self, text: &str, _original: &str, _speaker: Option<&str>) -> String {
        text.trim().to_string()
    }

    /// Translate one unit; `history` is ignored unless `supports_history`
    async fn translate(
        &self,
        text: &str,
        speaker: Option<&str>,
        history: &[HistoryEntry],
    ) -> Result<String, EngineError>;

    /// Translate a batch; the result has exactly `texts.len()` entries
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, EngineError> {
        let _ = texts;
        Err(EngineError::Unsupported(format!(
            "{} does not translate batches",
            self.info().identity()
        )))
    }
}

/// Enforce the batch length contract
pub fn check_batch(expected: usize, results: Vec<String>) -> Result<Vec<String>, EngineError> {
    if results.len() != expected {
        return Err(EngineError::BatchMismatch {
            expected,
            received: results.len(),
        });
    }
    Ok(results)
}

/// Everything an engine needs besides the configuration record
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub source_language: LanguageRecord,
    pub target_language: LanguageRecord,
    pub character_names: CharacterNames,
    /// Prompt template text, already read from disk
    pub prompt: Option<String>,
    /// Memory preamble text, already read from disk
    pub memory: Option<String>,
}

impl EngineContext {
    pub fn new(source_language: LanguageRecord, target_language: LanguageRecord) -> Self {
        Self {
            source_language,
            target_language,
            character_names: CharacterNames::default(),
            prompt: None,
            memory: None,
        }
    }
}

/// Timeout settings shared by the HTTP engines
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub first_call_multiplier: u32,
}

impl TransportSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.timeout_secs),
            first_call_multiplier: config.first_call_multiplier.max(1),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// HTTP client for one backend. Requests are awaited one at a time.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    settings: TransportSettings,
    first_call: AtomicBool,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, settings: TransportSettings) -> Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| EngineError::Connection(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            settings,
            first_call: AtomicBool::new(true),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn read_timeout_secs(&self) -> u64 {
        self.settings.read_timeout.as_secs()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Read timeout for the next request; the first one is multiplied
    fn next_timeout(&self) -> Duration {
        if self.first_call.swap(false, Ordering::SeqCst) {
            let timeout = self.settings.read_timeout * self.settings.first_call_multiplier;
            debug!("First request to {} uses a {}s timeout", self.base_url, timeout.as_secs());
            timeout
        } else {
            self.settings.read_timeout
        }
    }

    /// GET used by construction probes, bounded by the connect timeout
    pub fn probe(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).timeout(self.settings.connect_timeout)
    }

    /// POST probe, for servers whose only endpoint is the translate call
    pub fn probe_post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).timeout(self.settings.connect_timeout)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).timeout(self.next_timeout())
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).timeout(self.next_timeout())
    }

    /// Send a request, classifying transport failures
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, EngineError> {
        request
            .send()
            .await
            .map_err(|e| EngineError::from_transport(e, self.settings.read_timeout.as_secs()))
    }

    /// Send and decode a JSON body; non-2xx is a protocol error
    pub async fn send_json<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, EngineError> {
        let response = self.send(request).await?;
        read_json(response, self.settings.read_timeout.as_secs()).await
    }
}

/// Decode a JSON response body, rejecting non-2xx statuses
pub async fn read_json<R: DeserializeOwned>(response: Response, timeout_secs: u64) -> Result<R, EngineError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| EngineError::from_transport(e, timeout_secs))?;
    if !status.is_success() {
        return Err(EngineError::Protocol(format!("HTTP {}: {}", status, snippet(&body))));
    }
    serde_json::from_str(&body)
        .map_err(|e| EngineError::Protocol(format!("unexpected response ({}): {}", e, snippet(&body))))
}

/// First 200 characters of a body for error messages
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Build the engine named by `config.engine`; `None` for parseOnly
pub async fn create_engine(
    config: &Config,
    context: &EngineContext,
) -> Result<Option<Box<dyn TranslationEngine>>, AppError> {
    let settings = TransportSettings::from_config(config);
    let engine: Box<dyn TranslationEngine> = match config.engine {
        EngineKind::ParseOnly => return Ok(None),
        EngineKind::Koboldcpp => Box::new(KoboldCpp::connect(config, context, settings).await?),
        EngineKind::Py3TranslationServer | EngineKind::Sugoi => {
            Box::new(NmtServer::connect(config.engine, &config.server_url(), context, settings).await?)
        }
        EngineKind::DeeplApiFree | EngineKind::DeeplApiPro => {
            let key = config.api_key().ok_or_else(|| {
                AppError::Config(format!("{} needs an API key", config.engine))
            })?;
            Box::new(DeepL::connect(config.engine, key, context, settings).await?)
        }
        EngineKind::DeeplWeb => {
            return Err(AppError::Config(
                "deepl_web has no backend in this build".to_string(),
            ));
        }
        EngineKind::Pykakasi => Box::new(Romanizer::pykakasi(&config.romaji_scheme, context)),
        EngineKind::Cutlet => {
            let path = config.cutlet_dictionary.as_ref().ok_or_else(|| {
                AppError::Config("cutlet needs a system dictionary (-cd/--cutletDictionary)".to_string())
            })?;
            Box::new(Romanizer::cutlet(Analyzer::open(path)?, &config.romaji_scheme, context))
        }
    };
    debug!("Constructed engine {}", engine.info().identity());
    Ok(Some(engine))
}
