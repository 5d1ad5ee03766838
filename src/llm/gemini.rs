//! Gemini 补全客户端（REST）
//!
//! - 非流式：POST {base}/models/{model}:generateContent
//! - 流式：POST {base}/models/{model}:streamGenerateContent?alt=sse，逐个 `data:` 事件取 text part
//!
//! 请求体直接使用两角色线格式（contents 的 role 即 user / model），工具以 functionDeclarations 声明。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::LlmError;
use crate::llm::{
    CompletionRequest, CompletionResponse, CompletionService, FunctionCall, TextStream, ToolSchema,
};
use crate::memory::{WirePart, WireTurn};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_FLASH: &str = "gemini-2.5-flash";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclarations<'a> {
    function_declarations: &'a [ToolSchema],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: &'a [WireTurn],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionDeclarations<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(system: &str, contents: &'a [WireTurn], tools: &'a [ToolSchema], temperature: Option<f32>) -> Self {
        let system_instruction = (!system.trim().is_empty()).then(|| SystemInstruction {
            parts: vec![WirePart {
                text: system.to_string(),
            }],
        });
        let tools = if tools.is_empty() {
            Vec::new()
        } else {
            vec![FunctionDeclarations {
                function_declarations: tools,
            }]
        };
        Self {
            system_instruction,
            contents,
            tools,
            generation_config: temperature.map(|temperature| GenerationConfig { temperature }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter())
            .into_iter()
            .flatten()
    }

    /// 首个工具调用优先；否则拼接文本
    fn into_completion(self) -> CompletionResponse {
        let calls: Vec<&FunctionCall> = self.parts().filter_map(|p| p.function_call.as_ref()).collect();
        if let Some(first) = calls.first() {
            if calls.len() > 1 {
                tracing::warn!(count = calls.len(), "model declared several tool calls; keeping the first");
            }
            return CompletionResponse::ToolCall((*first).clone());
        }
        let text = self.text();
        if text.trim().is_empty() {
            CompletionResponse::Empty
        } else {
            CompletionResponse::Text(text)
        }
    }

    fn text(&self) -> String {
        self.parts().filter_map(|p| p.text.as_deref()).collect::<String>()
    }
}

/// Gemini 客户端
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    pub usage: TokenUsage,
}

impl GeminiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .unwrap_or_default();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/').to_string(),
            model: model.trim_start_matches("models/").to_string(),
            api_key,
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    async fn post(&self, url: String, body: &GenerateContentRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionService for GeminiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse, LlmError> {
        let body = GenerateContentRequest::new(
            request.system,
            request.history,
            request.tools,
            request.temperature,
        );
        let resp = self.post(self.endpoint("generateContent"), &body).await?;
        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        if let Some(usage) = &parsed.usage_metadata {
            self.usage
                .add(usage.prompt_token_count, usage.candidates_token_count);
        }
        Ok(parsed.into_completion())
    }

    async fn stream(&self, system: &str, history: &[WireTurn]) -> Result<TextStream, LlmError> {
        let body = GenerateContentRequest::new(system, history, &[], None);
        let resp = self
            .post(self.endpoint("streamGenerateContent?alt=sse"), &body)
            .await?;
        Ok(sse_fragments(resp.bytes_stream()))
    }
}

/// 解析一个 SSE 事件的 data：{json} → 其中的文本片段
fn parse_sse_data(data: &str) -> Option<String> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(event) => {
            let text = event.text();
            (!text.is_empty()).then_some(text)
        }
        Err(e) => {
            tracing::debug!(error = %e, "skip unparsable sse event");
            None
        }
    }
}

/// 字节流按 SSE 事件切分并解析为文本片段流
pub fn sse_fragments<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(bytes.eventsource().filter_map(|event| async move {
        match event {
            Ok(event) => parse_sse_data(&event.data).map(Ok),
            Err(e) => Some(Err(LlmError::Transport(e.to_string()))),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let history = vec![WireTurn::human("hi")];
        let tools = vec![ToolSchema {
            name: "web_search".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = GenerateContentRequest::new("be brief", &history, &tools, Some(0.0));
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(v["contents"][0]["role"], "user");
        assert_eq!(v["tools"][0]["functionDeclarations"][0]["name"], "web_search");
        assert_eq!(v["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let history = vec![WireTurn::human("hi")];
        let v = serde_json::to_value(GenerateContentRequest::new("", &history, &[], None)).unwrap();
        assert!(v.get("tools").is_none());
        assert!(v.get("systemInstruction").is_none());
        assert!(v.get("generationConfig").is_none());
    }

    #[test]
    fn test_response_function_call_wins() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "Let me look."},
                {"functionCall": {"name": "retrieve_documents", "args": {"query": "onboarding"}}}
            ]}}]
        }))
        .unwrap();
        match parsed.into_completion() {
            CompletionResponse::ToolCall(call) => {
                assert_eq!(call.name, "retrieve_documents");
                assert_eq!(call.args["query"], "onboarding");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_response_without_parts_is_empty() {
        let parsed: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(parsed.into_completion(), CompletionResponse::Empty);
    }

    #[tokio::test]
    async fn test_sse_fragments_split_across_chunks() {
        let e1 = r#"data: {"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#;
        let e2 = r#"data: {"candidates":[{"content":{"parts":[{"text":"lo"}]}}]}"#;
        let raw = format!("{e1}\n\n{e2}\n\n");
        let (a, b) = raw.as_bytes().split_at(30);
        let chunks: Vec<Result<Vec<u8>, String>> = vec![Ok(a.to_vec()), Ok(b.to_vec())];
        let out: Vec<String> = sse_fragments(stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_sse_multiline_data_is_joined() {
        let raw = "data: {\"candidates\":[{\"content\":{\"parts\":\ndata: [{\"text\":\"Hi\"}]}}]}\n\n";
        let chunks: Vec<Result<Vec<u8>, String>> = vec![Ok(raw.as_bytes().to_vec())];
        let out: Vec<String> = sse_fragments(stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec!["Hi"]);
    }

    #[tokio::test]
    async fn test_sse_transport_error_surfaces() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![Err("reset".into())];
        let out: Vec<Result<String, LlmError>> = sse_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(LlmError::Transport(_))));
    }
}
