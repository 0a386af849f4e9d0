/*!
 * Instruction-format profiles for LLM servers.
 *
 * A profile carries the start/end wrappers placed around each input, the
 * stop sequences and the sampler parameters for a family of models. The
 * built-in set covers llama/mixtral `[INST]` models, ChatML-style instruct
 * models, plain chat and raw autocomplete; settings files may add more,
 * which take priority over the built-ins.
 */

use std::fmt;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AppError;

/// How prompts are wrapped for the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionFormat {
    Instruct,
    Chat,
    Autocomplete,
}

impl InstructionFormat {
    /// Guess the format from the model name
    pub fn infer(model: &str) -> Self {
        let lowered = model.to_lowercase();
        if lowered.contains("instruct") {
            Self::Instruct
        } else if lowered.contains("chat") {
            Self::Chat
        } else {
            warn!(
                "Could not infer an instruction format from model '{}', using autocomplete",
                model
            );
            Self::Autocomplete
        }
    }
}

impl FromStr for InstructionFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instruct" => Ok(Self::Instruct),
            "chat" => Ok(Self::Chat),
            "autocomplete" => Ok(Self::Autocomplete),
            other => Err(AppError::Config(format!(
                "unknown instruction format '{}' (expected instruct, chat or autocomplete)",
                other
            ))),
        }
    }
}

impl fmt::Display for InstructionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instruct => "instruct",
            Self::Chat => "chat",
            Self::Autocomplete => "autocomplete",
        };
        write!(f, "{}", name)
    }
}

/// Wrappers, stop sequences and sampler settings for one family of models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProfile {
    /// Label used in logs
    pub name: String,

    /// Format this profile implements
    pub format: InstructionFormat,

    /// Lowercase substrings of the model name; empty means "any model"
    #[serde(default)]
    pub model_contains: Vec<String>,

    /// Text placed before each input
    #[serde(default)]
    pub start: String,

    /// Text placed after each input
    #[serde(default)]
    pub end: String,

    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// Sampler fields merged verbatim into the generate payload
    #[serde(default)]
    pub sampler: Map<String, Value>,
}

impl ModelProfile {
    fn builtin(
        name: &str,
        format: InstructionFormat,
        model_contains: &[&str],
        start: &str,
        end: &str,
        stop_sequences: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            format,
            model_contains: model_contains.iter().map(|s| s.to_string()).collect(),
            start: start.to_string(),
            end: end.to_string(),
            stop_sequences: stop_sequences.iter().map(|s| s.to_string()).collect(),
            sampler: Map::new(),
        }
    }

    fn matches(&self, format: InstructionFormat, model: &str) -> bool {
        self.format == format
            && self
                .model_contains
                .iter()
                .any(|needle| model.contains(&needle.to_lowercase()))
    }

    fn is_fallback_for(&self, format: InstructionFormat) -> bool {
        self.format == format && self.model_contains.is_empty()
    }
}

/// Ordered profile list; earlier entries win
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: Vec<ModelProfile>,
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileSet {
    pub fn builtin() -> Self {
        use InstructionFormat::*;
        Self {
            profiles: vec![
                ModelProfile::builtin(
                    "llama-instruct",
                    Instruct,
                    &["llama", "mixtral", "mistral"],
                    "\n[INST]",
                    "[/INST]\n",
                    &["[INST]", "</s>"],
                ),
                ModelProfile::builtin(
                    "chatml-instruct",
                    Instruct,
                    &[],
                    "<|im_start|>user\n",
                    "<|im_end|>\n<|im_start|>assistant\n",
                    &["<|im_end|>", "<|im_start|>"],
                ),
                ModelProfile::builtin("chat", Chat, &[], "Input: ", "\nOutput: ", &["\n\n"]),
                ModelProfile::builtin("autocomplete", Autocomplete, &[], "", "", &["\n\n"]),
            ],
        }
    }

    /// Built-ins with extra profiles placed in front
    pub fn with_extra(extra: &[ModelProfile]) -> Self {
        let mut set = Self::builtin();
        let mut profiles = extra.to_vec();
        profiles.append(&mut set.profiles);
        set.profiles = profiles;
        set
    }

    /// The first profile matching both format and model, else the format's fallback
    pub fn select(&self, format: InstructionFormat, model: &str) -> Option<&ModelProfile> {
        let lowered = model.to_lowercase();
        self.profiles
            .iter()
            .find(|p| p.matches(format, &lowered))
            .or_else(|| self.profiles.iter().find(|p| p.is_fallback_for(format)))
    }
}
