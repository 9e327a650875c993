use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 30_000;
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `VoiceProviderErrorCode` values.
pub enum VoiceProviderErrorCode {
    InvalidInput,
    InvalidResponse,
    AuthFailed,
    Timeout,
    RateLimited,
    BackendUnavailable,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `VoiceProviderError` used across Sparrow components.
pub struct VoiceProviderError {
    pub code: VoiceProviderErrorCode,
    pub provider: String,
    pub retryable: bool,
    pub message: String,
}

impl VoiceProviderError {
    fn invalid_input(provider: &str, message: impl Into<String>) -> Self {
        Self {
            code: VoiceProviderErrorCode::InvalidInput,
            provider: provider.to_string(),
            retryable: false,
            message: message.into(),
        }
    }

    fn invalid_response(provider: &str, message: impl Into<String>) -> Self {
        Self {
            code: VoiceProviderErrorCode::InvalidResponse,
            provider: provider.to_string(),
            retryable: false,
            message: message.into(),
        }
    }

    fn backend_unavailable(provider: &str, message: impl Into<String>) -> Self {
        Self {
            code: VoiceProviderErrorCode::BackendUnavailable,
            provider: provider.to_string(),
            retryable: true,
            message: message.into(),
        }
    }

    fn timeout(provider: &str, message: impl Into<String>) -> Self {
        Self {
            code: VoiceProviderErrorCode::Timeout,
            provider: provider.to_string(),
            retryable: true,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for VoiceProviderError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "voice provider error: provider={} code={:?} retryable={} message={}",
            self.provider, self.code, self.retryable, self.message
        )
    }
}

impl std::error::Error for VoiceProviderError {}

pub type VoiceProviderResult<T> = Result<T, VoiceProviderError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `SttRequest` used across Sparrow components.
pub struct SttRequest {
    pub audio_bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub timeout_ms: u64,
}

impl SttRequest {
    pub fn new(audio_bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            audio_bytes,
            file_name: file_name.into(),
            mime_type: "audio/mpeg".to_string(),
            timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `SttResponse` used across Sparrow components.
pub struct SttResponse {
    pub transcript: String,
    pub language: Option<String>,
    pub provider_metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `TtsRequest` used across Sparrow components.
pub struct TtsRequest {
    pub text: String,
    pub voice_id: Option<String>,
    pub mime_type: String,
    pub timeout_ms: u64,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_id: None,
            mime_type: "audio/mpeg".to_string(),
            timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `TtsResponse` used across Sparrow components.
pub struct TtsResponse {
    pub audio_bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
/// Trait contract for `SttProvider` behavior.
pub trait SttProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn transcribe(&self, request: SttRequest) -> VoiceProviderResult<SttResponse>;
}

#[async_trait]
/// Trait contract for `TtsProvider` behavior.
pub trait TtsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn synthesize(&self, request: TtsRequest) -> VoiceProviderResult<TtsResponse>;
}

#[derive(Debug, Clone, Default)]
/// In-process provider that echoes audio bytes as text; used by tests and
/// offline runs.
pub struct DeterministicVoiceProvider;

impl DeterministicVoiceProvider {
    const PROVIDER_NAME: &'static str = "deterministic-mock";
}

#[async_trait]
impl SttProvider for DeterministicVoiceProvider {
    fn provider_name(&self) -> &'static str {
        Self::PROVIDER_NAME
    }

    async fn transcribe(&self, request: SttRequest) -> VoiceProviderResult<SttResponse> {
        let provider = Self::PROVIDER_NAME;
        if request.audio_bytes.is_empty() {
            return Err(VoiceProviderError::invalid_input(
                provider,
                "audio_bytes must not be empty",
            ));
        }

        let transcript = String::from_utf8(request.audio_bytes).map_err(|_| {
            VoiceProviderError::invalid_input(provider, "audio bytes must decode as utf-8 text")
        })?;
        let trimmed = transcript.trim();
        if trimmed.is_empty() {
            return Err(VoiceProviderError::invalid_input(
                provider,
                "transcript is empty after normalization",
            ));
        }

        Ok(SttResponse {
            transcript: trimmed.to_string(),
            language: None,
            provider_metadata: json!({ "adapter": provider }),
        })
    }
}

#[async_trait]
impl TtsProvider for DeterministicVoiceProvider {
    fn provider_name(&self) -> &'static str {
        Self::PROVIDER_NAME
    }

    async fn synthesize(&self, request: TtsRequest) -> VoiceProviderResult<TtsResponse> {
        let provider = Self::PROVIDER_NAME;
        let text = request.text.trim();
        if text.is_empty() {
            return Err(VoiceProviderError::invalid_input(
                provider,
                "text must not be empty",
            ));
        }

        let voice_id = request.voice_id.as_deref().unwrap_or("default");
        let rendered = format!("voice={voice_id};text={text}");
        Ok(TtsResponse {
            audio_bytes: rendered.into_bytes(),
            mime_type: request.mime_type,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `OpenAiVoiceConfig` used across Sparrow components.
pub struct OpenAiVoiceConfig {
    pub api_base: String,
    pub api_key: String,
    pub stt_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub timeout_ms: u64,
}

impl Default for OpenAiVoiceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
/// Whisper transcription and speech synthesis over the OpenAI audio API.
pub struct OpenAiVoiceProvider {
    config: OpenAiVoiceConfig,
    client: Client,
}

impl OpenAiVoiceProvider {
    const PROVIDER_NAME: &'static str = "openai-voice";

    pub fn new(config: OpenAiVoiceConfig) -> VoiceProviderResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(VoiceProviderError {
                code: VoiceProviderErrorCode::AuthFailed,
                provider: Self::PROVIDER_NAME.to_string(),
                retryable: false,
                message: "api_key must not be empty".to_string(),
            });
        }
        if config.api_base.trim().is_empty() {
            return Err(VoiceProviderError::invalid_input(
                Self::PROVIDER_NAME,
                "api_base must not be empty",
            ));
        }

        let client = Client::builder().build().map_err(|error| {
            VoiceProviderError::backend_unavailable(
                Self::PROVIDER_NAME,
                format!("failed to initialize http client: {error}"),
            )
        })?;

        let mut normalized = config;
        normalized.api_base = normalized.api_base.trim().trim_end_matches('/').to_string();
        normalized.timeout_ms = normalized.timeout_ms.max(1);

        Ok(Self {
            config: normalized,
            client,
        })
    }

    fn map_request_error(&self, operation: &str, error: reqwest::Error) -> VoiceProviderError {
        if error.is_timeout() {
            return VoiceProviderError::timeout(
                Self::PROVIDER_NAME,
                format!("operation={operation} request timed out"),
            );
        }
        VoiceProviderError::backend_unavailable(
            Self::PROVIDER_NAME,
            format!("operation={operation} request failed: {error}"),
        )
    }
}

#[async_trait]
impl SttProvider for OpenAiVoiceProvider {
    fn provider_name(&self) -> &'static str {
        Self::PROVIDER_NAME
    }

    async fn transcribe(&self, request: SttRequest) -> VoiceProviderResult<SttResponse> {
        if request.audio_bytes.is_empty() {
            return Err(VoiceProviderError::invalid_input(
                Self::PROVIDER_NAME,
                "audio_bytes must not be empty",
            ));
        }

        let part = multipart::Part::bytes(request.audio_bytes)
            .file_name(request.file_name.clone())
            .mime_str(&request.mime_type)
            .map_err(|error| {
                VoiceProviderError::invalid_input(
                    Self::PROVIDER_NAME,
                    format!("invalid mime type '{}': {error}", request.mime_type),
                )
            })?;
        let form = multipart::Form::new()
            .text("model", self.config.stt_model.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.config.api_base))
            .bearer_auth(self.config.api_key.trim())
            .timeout(Duration::from_millis(request.timeout_ms.max(1)))
            .multipart(form)
            .send()
            .await
            .map_err(|error| self.map_request_error("stt", error))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(map_http_status_error(
                Self::PROVIDER_NAME,
                "stt",
                status,
                &body,
            ));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|error| {
            VoiceProviderError::invalid_response(
                Self::PROVIDER_NAME,
                format!("operation=stt invalid json response: {error}"),
            )
        })?;
        let transcript = parsed
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if transcript.is_empty() {
            return Err(VoiceProviderError::invalid_response(
                Self::PROVIDER_NAME,
                "operation=stt missing text field",
            ));
        }

        Ok(SttResponse {
            transcript,
            language: parsed
                .get("language")
                .and_then(Value::as_str)
                .map(str::to_string),
            provider_metadata: parsed,
        })
    }
}

#[async_trait]
impl TtsProvider for OpenAiVoiceProvider {
    fn provider_name(&self) -> &'static str {
        Self::PROVIDER_NAME
    }

    async fn synthesize(&self, request: TtsRequest) -> VoiceProviderResult<TtsResponse> {
        let text = request.text.trim();
        if text.is_empty() {
            return Err(VoiceProviderError::invalid_input(
                Self::PROVIDER_NAME,
                "text must not be empty",
            ));
        }

        let voice = request
            .voice_id
            .as_deref()
            .unwrap_or(self.config.tts_voice.as_str());
        let payload = json!({
            "model": self.config.tts_model,
            "voice": voice,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.config.api_base))
            .bearer_auth(self.config.api_key.trim())
            .timeout(Duration::from_millis(request.timeout_ms.max(1)))
            .json(&payload)
            .send()
            .await
            .map_err(|error| self.map_request_error("tts", error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_status_error(
                Self::PROVIDER_NAME,
                "tts",
                status,
                &body,
            ));
        }

        let audio_bytes = response
            .bytes()
            .await
            .map_err(|error| self.map_request_error("tts", error))?
            .to_vec();
        if audio_bytes.is_empty() {
            return Err(VoiceProviderError::invalid_response(
                Self::PROVIDER_NAME,
                "operation=tts empty audio payload",
            ));
        }

        Ok(TtsResponse {
            audio_bytes,
            mime_type: request.mime_type,
        })
    }
}

fn map_http_status_error(
    provider: &str,
    operation: &str,
    status: StatusCode,
    body: &str,
) -> VoiceProviderError {
    let truncated = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
    let (code, retryable) = match status.as_u16() {
        401 | 403 => (VoiceProviderErrorCode::AuthFailed, false),
        429 => (VoiceProviderErrorCode::RateLimited, true),
        500..=599 => (VoiceProviderErrorCode::BackendUnavailable, true),
        _ => (VoiceProviderErrorCode::Unknown, false),
    };
    VoiceProviderError {
        code,
        provider: provider.to_string(),
        retryable,
        message: format!("operation={operation} status={status} body={truncated}"),
    }
}
