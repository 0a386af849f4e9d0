/*!
 * KoboldCpp LLM server engine.
 *
 * Prompts are assembled from the user's template, the model profile's
 * wrappers and the history ring, then sent to `/api/v1/generate`. The
 * completion is cleaned of role labels, speaker prefixes and commentary
 * before it is returned.
 */

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use async_trait::async_trait;

use crate::app_config::Config;
use crate::dictionary::CharacterNames;
use crate::errors::{AppError, EngineError};
use crate::language_utils::LanguageSide;
use crate::translation::HistoryEntry;

use super::profiles::{InstructionFormat, ModelProfile, ProfileSet};
use super::{EngineContext, EngineInfo, HttpTransport, TransportSettings, TranslationEngine};

const FAMILY: &str = "koboldcpp";

static JUNK_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(translated text|translation)\s*:\s*").expect("valid regex")
});

static NOTE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\s*\(?\s*\bnote\s*:.*$").expect("valid regex"));

static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct ResultField {
    result: String,
}

#[derive(Debug, Deserialize)]
struct VersionField {
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    results: Vec<GenerateResult>,
}

#[derive(Debug, Deserialize)]
struct GenerateResult {
    text: String,
}

/// What the construction probe learned about the server
#[derive(Debug, Clone, Default)]
pub struct ServerProbe {
    pub model: String,
    pub version: String,
    pub max_context_length: Option<u32>,
}

/// KoboldCpp engine
pub struct KoboldCpp {
    info: EngineInfo,
    transport: HttpTransport,
    format: InstructionFormat,
    profile: ModelProfile,
    template: String,
    memory: Option<String>,
    names: CharacterNames,
    max_length: u32,
    max_context_length: Option<u32>,
    sampler: Map<String, Value>,
}

impl KoboldCpp {
    /// Probe the server and build the engine; an unreachable server yields
    /// an engine with `reachable == false`
    pub async fn connect(
        config: &Config,
        context: &EngineContext,
        settings: TransportSettings,
    ) -> Result<Self, AppError> {
        let transport = HttpTransport::new(config.server_url(), settings)?;
        let probe = match Self::probe(&transport).await {
            Ok(probe) => Some(probe),
            Err(e) => {
                warn!("{} at {} did not answer: {}", FAMILY, transport.base_url(), e);
                None
            }
        };
        Self::from_probe(config, context, transport, probe)
    }

    async fn probe(transport: &HttpTransport) -> Result<ServerProbe, EngineError> {
        let model: ResultField = transport.send_json(transport.probe("/api/v1/model")).await?;
        let version: VersionField = transport.send_json(transport.probe("/api/extra/version")).await?;
        let context: ValueField = transport
            .send_json(transport.probe("/api/extra/true_max_context_length"))
            .await?;
        let model = model
            .result
            .strip_prefix("koboldcpp/")
            .unwrap_or(&model.result)
            .to_string();
        Ok(ServerProbe {
            model,
            version: version.version,
            max_context_length: Some(context.value),
        })
    }

    /// Build from a finished probe; `None` marks the server unreachable
    pub fn from_probe(
        config: &Config,
        context: &EngineContext,
        transport: HttpTransport,
        probe: Option<ServerProbe>,
    ) -> Result<Self, AppError> {
        let template = context.prompt.clone().ok_or_else(|| {
            AppError::Config(format!("{} needs a prompt template (-pf/--promptFile)", FAMILY))
        })?;

        let reachable = probe.is_some();
        let probe = probe.unwrap_or_default();
        let format = config
            .instruction_format
            .unwrap_or_else(|| InstructionFormat::infer(&probe.model));
        let profile = ProfileSet::with_extra(&config.llm_profiles)
            .select(format, &probe.model)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("no model profile for format {}", format)))?;

        if !template.contains("{history}") {
            debug!("Prompt template has no {{history}} placeholder; history will not be sent");
        }

        let mut sampler = profile.sampler.clone();
        for (key, value) in &config.sampler {
            sampler.insert(key.clone(), value.clone());
        }

        let mut info = EngineInfo::new(
            FAMILY,
            context.source_language.clone(),
            context.target_language.clone(),
        );
        info.model = probe.model.clone();
        info.version = probe.version.clone();
        info.reachable = reachable;
        info.supports_history = true;
        info.requires_prompt = true;

        if reachable {
            info!(
                "Connected to {} {} (model {}, {} format, profile {})",
                FAMILY, info.version, info.model, format, profile.name
            );
        }

        Ok(Self {
            info,
            transport,
            format,
            profile,
            template,
            memory: context.memory.clone(),
            names: context.character_names.clone(),
            max_length: config.max_length,
            max_context_length: probe.max_context_length,
            sampler,
        })
    }

    pub fn format(&self) -> InstructionFormat {
        self.format
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    fn fill_placeholders(&self, text: &str) -> String {
        text.replace("{sourceLanguage}", self.info.source_language.prompt_name(LanguageSide::Source))
            .replace("{targetLanguage}", self.info.target_language.prompt_name(LanguageSide::Target))
            .replace("{characterNames}", &self.names.render_for_prompt())
    }

    fn wrap(&self, text: &str) -> String {
        format!("{}{}{}", self.profile.start, text, self.profile.end)
    }

    fn render_history(&self, history: &[HistoryEntry]) -> String {
        history
            .iter()
            .map(|entry| {
                let answer = match entry.speaker.as_deref() {
                    Some(speaker) if !entry.translation.starts_with(speaker) => {
                        format!("{}: {}", speaker, entry.translation)
                    }
                    _ => entry.translation.clone(),
                };
                format!("{}{}\n", self.wrap(&entry.source), answer)
            })
            .collect()
    }

    /// Full prompt for one input
    pub fn build_prompt(&self, text: &str, history: &[HistoryEntry]) -> String {
        let mut prompt = self.fill_placeholders(&self.template);
        if prompt.contains("{history}") {
            prompt = prompt.replace("{history}", &self.render_history(history));
        }
        prompt.push_str(&self.wrap(text));
        prompt
    }

    /// Stop sequences; chat prompts also stop at the next input label
    pub fn stop_sequences(&self) -> Vec<String> {
        let mut stops = self.profile.stop_sequences.clone();
        if self.format == InstructionFormat::Chat {
            let label = self.profile.start.trim().to_string();
            if !label.is_empty() && !stops.contains(&label) {
                stops.push(label);
            }
        }
        stops
    }

    /// JSON body for `/api/v1/generate`
    pub fn build_payload(&self, text: &str, history: &[HistoryEntry]) -> Value {
        let mut payload = Map::new();
        payload.insert("prompt".to_string(), json!(self.build_prompt(text, history)));
        if let Some(memory) = &self.memory {
            payload.insert("memory".to_string(), json!(self.fill_placeholders(memory)));
        }
        payload.insert("max_length".to_string(), json!(self.max_length));
        if let Some(max_context_length) = self.max_context_length {
            payload.insert("max_context_length".to_string(), json!(max_context_length));
        }
        payload.insert("trim_stop".to_string(), json!(true));
        payload.insert("stop_sequence".to_string(), json!(self.stop_sequences()));
        for (key, value) in &self.sampler {
            if key != "prompt" && key != "memory" {
                payload.insert(key.clone(), value.clone());
            }
        }
        Value::Object(payload)
    }

    fn strip_label<'t>(text: &'t str, label: &str) -> &'t str {
        if label.is_empty() {
            return text;
        }
        text.strip_prefix(label).map(str::trim_start).unwrap_or(text)
    }

    fn strip_speaker<'t>(&self, text: &'t str, speaker: Option<&str>) -> &'t str {
        let candidates = self
            .names
            .entries()
            .iter()
            .flat_map(|entry| [entry.translated.as_str(), entry.alias.as_str()])
            .chain(speaker);
        for name in candidates.filter(|name| !name.is_empty()) {
            if let Some(rest) = text.strip_prefix(name) {
                let rest = rest.trim_start();
                if let Some(rest) = rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')) {
                    return rest.trim_start();
                }
            }
        }
        text
    }
}

#[async_trait]
impl TranslationEngine for KoboldCpp {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn post_process_text(&self, text: &str, _original: &str, speaker: Option<&str>) -> String {
        let mut out = text.trim();
        for label in [self.profile.end.trim(), self.profile.start.trim(), "Output:", "Assistant:"] {
            out = Self::strip_label(out, label);
        }
        out = self.strip_speaker(out, speaker);

        let out = JUNK_PREFIX.replace(out, "");
        let out = match out.find('\n') {
            Some(end) => &out[..end],
            None => &out[..],
        };
        let out = NOTE_SUFFIX.replace(out, "");
        SPACE_RUNS.replace_all(out.trim(), " ").into_owned()
    }

    async fn translate(
        &self,
        text: &str,
        speaker: Option<&str>,
        history: &[HistoryEntry],
    ) -> Result<String, EngineError> {
        let input = self.pre_process_text(text);
        let payload = self.build_payload(&input, history);
        let request = self.transport.post("/api/v1/generate").json(&payload);
        let response: GenerateResponse = self.transport.send_json(request).await?;
        let raw = response
            .results
            .into_iter()
            .next()
            .map(|result| result.text)
            .ok_or_else(|| EngineError::Protocol("response has no results".to_string()))?;

        let translated = self.post_process_text(&raw, text, speaker);
        if translated.is_empty() {
            return Err(EngineError::Protocol(format!("empty completion for '{}'", input)));
        }
        Ok(translated)
    }
}
