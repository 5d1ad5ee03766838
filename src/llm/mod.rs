//! LLM 层：补全服务抽象与实现（Gemini / Mock），嵌入提供方（Gemini / OpenAI 兼容）

pub mod embedding;
pub mod gemini;
pub mod mock;
pub mod traits;

pub use embedding::{create_embedder, EmbeddingProvider, GeminiEmbedder, OpenAiEmbedder};
pub use gemini::{GeminiClient, TokenUsage};
pub use mock::{MockEmbedder, MockLlmClient, MockStep, RecordedRequest};
pub use traits::{
    CompletionRequest, CompletionResponse, CompletionService, FunctionCall, TextStream, ToolSchema,
};
