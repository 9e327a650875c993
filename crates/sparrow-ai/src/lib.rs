//! Multi-provider LLM clients and shared chat types for Sparrow.
mod anthropic;
mod fallback;
mod openai;
mod provider;
mod retry;
mod structured;
mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use fallback::{ClientRoute, FallbackClient, FallbackEventSink};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use provider::{ModelRef, ModelRefParseError, Provider};
pub use structured::complete_structured;
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, MediaSource, Message,
    MessageRole, SparrowAiError,
};
