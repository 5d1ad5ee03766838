//! 嵌入 API：供检索与入库把文本编码为向量
//!
//! - GeminiEmbedder：POST {base}/models/{model}:embedContent（默认 text-embedding-004）
//! - OpenAiEmbedder：通过 async-openai 调用任意 OpenAI 兼容的 /embeddings 端点

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::LlmError;
use crate::llm::gemini::GEMINI_BASE_URL;

pub const GEMINI_EMBEDDING_MODEL: &str = "text-embedding-004";

/// 嵌入提供方
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::Malformed("empty input".to_string()));
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        response
            .data
            .first()
            .map(|e| e.embedding.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| LlmError::Malformed("no embedding returned".to_string()))
    }
}

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

#[derive(Serialize)]
struct EmbedContentRequest<'a> {
    content: EmbedContent<'a>,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

/// Gemini embedContent
pub struct GeminiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .unwrap_or_default();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/').to_string(),
            model: model.trim_start_matches("models/").to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::Malformed("empty input".to_string()));
        }
        let body = EmbedContentRequest {
            content: EmbedContent {
                parts: [EmbedPart { text }],
            },
        };
        let resp = self
            .client
            .post(format!("{}/models/{}:embedContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: EmbedContentResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        if parsed.embedding.values.is_empty() {
            return Err(LlmError::Malformed("no embedding returned".to_string()));
        }
        Ok(parsed.embedding.values)
    }
}

/// 按配置创建嵌入提供方：gemini / openai；缺少 Key 时返回 None，由调用方决定回退
pub fn create_embedder(
    provider: &str,
    base_url: Option<&str>,
    model: &str,
    api_key: Option<&str>,
) -> Option<Arc<dyn EmbeddingProvider>> {
    let env_key = match provider {
        "openai" => "OPENAI_API_KEY",
        _ => "GEMINI_API_KEY",
    };
    let key = api_key
        .map(String::from)
        .or_else(|| std::env::var(env_key).ok())
        .filter(|k| !k.trim().is_empty());
    let Some(key) = key else {
        tracing::debug!(provider, "embedding skipped: no {}", env_key);
        return None;
    };
    match provider {
        "openai" => Some(Arc::new(OpenAiEmbedder::new(base_url, model, Some(&key)))),
        _ => Some(Arc::new(GeminiEmbedder::new(base_url, model, Some(&key)))),
    }
}
