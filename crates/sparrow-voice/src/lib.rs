//! Speech providers for Sparrow: transcription in, synthesized audio out.
mod voice_provider;

pub use voice_provider::{
    DeterministicVoiceProvider, OpenAiVoiceConfig, OpenAiVoiceProvider, SttProvider, SttRequest,
    SttResponse, TtsProvider, TtsRequest, TtsResponse, VoiceProviderError, VoiceProviderErrorCode,
    VoiceProviderResult,
};
