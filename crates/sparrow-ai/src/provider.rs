use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of chat-completion backends Sparrow can dispatch to.
///
/// Groq and Together speak the OpenAI wire protocol and are served by
/// `OpenAiClient` pointed at their respective API bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Groq,
    Together,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::Groq,
        Provider::Together,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Groq => "groq",
            Provider::Together => "together",
        }
    }

    /// Default chat model bound to each backend.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4-turbo",
            Provider::Anthropic => "claude-3-haiku-20240307",
            Provider::Groq => "llama3-70b-8192",
            Provider::Together => "meta-llama/Llama-3-70b-chat-hf",
        }
    }

    /// Default API base for the backend's chat-completions surface.
    pub fn default_api_base(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Together => "https://api.together.xyz/v1",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `ModelRefParseError` values.
pub enum ModelRefParseError {
    #[error("model reference '{0}' must use provider/model format")]
    MissingSeparator(String),
    #[error("unknown provider '{0}' (expected openai, anthropic, groq, or together)")]
    UnknownProvider(String),
    #[error("model reference '{0}' has an empty model segment")]
    EmptyModel(String),
}

impl FromStr for Provider {
    type Err = ModelRefParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "groq" => Ok(Provider::Groq),
            "together" => Ok(Provider::Together),
            other => Err(ModelRefParseError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Provider + model pair in `provider/model` notation.
pub struct ModelRef {
    pub provider: Provider,
    pub model: String,
}

impl ModelRef {
    pub fn parse(raw: &str) -> Result<Self, ModelRefParseError> {
        let trimmed = raw.trim();
        let Some((provider_raw, model_raw)) = trimmed.split_once('/') else {
            return Err(ModelRefParseError::MissingSeparator(trimmed.to_string()));
        };
        let provider = Provider::from_str(provider_raw)?;
        let model = model_raw.trim();
        if model.is_empty() {
            return Err(ModelRefParseError::EmptyModel(trimmed.to_string()));
        }
        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::{ModelRef, ModelRefParseError, Provider};

    #[test]
    fn unit_model_ref_parses_provider_and_model() {
        let parsed = ModelRef::parse("groq/llama3-70b-8192").expect("parse");
        assert_eq!(parsed.provider, Provider::Groq);
        assert_eq!(parsed.model, "llama3-70b-8192");
        assert_eq!(parsed.to_string(), "groq/llama3-70b-8192");
    }

    #[test]
    fn unit_model_ref_parse_surfaces_error_shapes() {
        assert!(matches!(
            ModelRef::parse("gpt-4-turbo"),
            Err(ModelRefParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            ModelRef::parse("mistral/some-model"),
            Err(ModelRefParseError::UnknownProvider(_))
        ));
        assert!(matches!(
            ModelRef::parse("openai/  "),
            Err(ModelRefParseError::EmptyModel(_))
        ));
    }

    #[test]
    fn together_model_segment_may_contain_slashes() {
        let parsed = ModelRef::parse("together/meta-llama/Llama-3-70b-chat-hf").expect("parse");
        assert_eq!(parsed.provider, Provider::Together);
        assert_eq!(parsed.model, "meta-llama/Llama-3-70b-chat-hf");
    }

    #[test]
    fn defaults_cover_every_provider() {
        for provider in Provider::ALL {
            assert!(!provider.default_model().is_empty());
            assert!(provider.default_api_base().starts_with("https://"));
        }
    }
}
