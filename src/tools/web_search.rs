//! 联网搜索适配器与 Tavily 实现
//!
//! 单次尝试、不重试；超时或失败映射为 ToolError{web_search_failed}。结果截断到 max_results。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::core::SearchError;
use crate::tools::{ToolError, ToolResult, WebHits, WebResult};

/// 默认返回条数
pub const DEFAULT_MAX_RESULTS: usize = 3;
pub const TAVILY_BASE_URL: &str = "https://api.tavily.com";

/// 搜索服务返回的原始结果
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub answer: Option<String>,
    pub results: Vec<WebResult>,
}

/// 外部搜索服务
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError>;
}

/// 未配置搜索服务时使用：始终失败
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSearch;

#[async_trait]
impl WebSearchProvider for DisabledSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<SearchResponse, SearchError> {
        Err(SearchError::Disabled)
    }
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    include_answer: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f32>,
}

/// Tavily Search API
pub struct TavilySearch {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TavilySearch {
    pub fn new(base_url: Option<&str>, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or(TAVILY_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError> {
        let resp = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&TavilyRequest {
                query,
                max_results,
                include_answer: true,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SearchError::Http {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let parsed: TavilyResponse = resp
            .json()
            .await
            .map_err(|e| SearchError::Malformed(e.to_string()))?;
        Ok(SearchResponse {
            answer: parsed.answer.filter(|a| !a.trim().is_empty()),
            results: parsed
                .results
                .into_iter()
                .map(|r| WebResult {
                    title: r.title,
                    url: r.url,
                    snippet: r.content,
                    score: r.score,
                })
                .collect(),
        })
    }
}

pub struct WebSearchAdapter {
    provider: Box<dyn WebSearchProvider>,
    max_results: usize,
    timeout: Duration,
}

impl WebSearchAdapter {
    pub fn new(provider: Box<dyn WebSearchProvider>) -> Self {
        Self {
            provider,
            max_results: DEFAULT_MAX_RESULTS,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// 搜索；始终返回 WebHits 或 ToolError
    pub async fn search(&self, query: &str) -> ToolResult {
        match timeout(self.timeout, self.provider.search(query, self.max_results)).await {
            Ok(Ok(mut resp)) => {
                resp.results.truncate(self.max_results);
                ToolResult::WebHits(WebHits {
                    query: query.to_string(),
                    answer: resp.answer,
                    results: resp.results,
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "web search failed");
                ToolResult::ToolError(ToolError::web_search_failed(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(secs = self.timeout.as_secs(), "web search timed out");
                ToolResult::ToolError(ToolError::web_search_failed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolErrorCode;

    struct Fixed(usize);

    #[async_trait]
    impl WebSearchProvider for Fixed {
        async fn search(&self, query: &str, _max: usize) -> Result<SearchResponse, SearchError> {
            Ok(SearchResponse {
                answer: Some(format!("answer for {query}")),
                results: (0..self.0)
                    .map(|i| WebResult {
                        title: format!("t{i}"),
                        url: format!("https://example.com/{i}"),
                        snippet: "s".into(),
                        score: None,
                    })
                    .collect(),
            })
        }
    }

    struct Slow;

    #[async_trait]
    impl WebSearchProvider for Slow {
        async fn search(&self, _: &str, _: usize) -> Result<SearchResponse, SearchError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(SearchResponse::default())
        }
    }

    #[tokio::test]
    async fn test_results_truncated() {
        let adapter = WebSearchAdapter::new(Box::new(Fixed(10)));
        let ToolResult::WebHits(hits) = adapter.search("weather in Lisbon").await else {
            panic!("expected web hits");
        };
        assert_eq!(hits.results.len(), DEFAULT_MAX_RESULTS);
        assert_eq!(hits.answer.as_deref(), Some("answer for weather in Lisbon"));
    }

    #[tokio::test]
    async fn test_disabled_provider_is_tool_error() {
        let adapter = WebSearchAdapter::new(Box::new(DisabledSearch));
        match adapter.search("q").await {
            ToolResult::ToolError(e) => assert_eq!(e.error_code, ToolErrorCode::WebSearchFailed),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_tool_error() {
        let adapter = WebSearchAdapter::new(Box::new(Slow)).with_timeout(1);
        assert!(adapter.search("q").await.is_error());
    }

    #[test]
    fn test_tavily_response_parses() {
        let parsed: TavilyResponse = serde_json::from_str(
            r#"{"query":"q","answer":"Sunny","results":[{"title":"T","url":"https://x","content":"c","score":0.7}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.answer.as_deref(), Some("Sunny"));
        assert_eq!(parsed.results[0].content, "c");
    }
}
