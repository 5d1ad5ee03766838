//! 补全服务抽象
//!
//! 所有后端（Gemini / Mock）实现 CompletionService：complete（可声明工具，返回文本或工具调用）、
//! stream（流式文本片段，不允许工具调用）。历史一律是归一化后的两角色线格式。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::LlmError;
use crate::memory::WireTurn;

/// 流式文本片段
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 可调用工具的声明（functionDeclarations 的一项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 模型返回的原始工具调用（尚未校验）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// 补全结果：文本、工具调用，或两者皆无
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionResponse {
    Text(String),
    ToolCall(FunctionCall),
    Empty,
}

/// 一次补全请求
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub history: &'a [WireTurn],
    pub tools: &'a [ToolSchema],
    pub temperature: Option<f32>,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(system: &'a str, history: &'a [WireTurn]) -> Self {
        Self {
            system,
            history,
            tools: &[],
            temperature: None,
        }
    }

    pub fn with_tools(mut self, tools: &'a [ToolSchema]) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// 补全服务
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// 非流式补全
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse, LlmError>;

    /// 流式补全，返回文本片段流
    async fn stream(&self, system: &str, history: &[WireTurn]) -> Result<TextStream, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
