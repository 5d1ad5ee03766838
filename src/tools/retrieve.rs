//! 文档检索适配器
//!
//! embed(query) → similarity_search(namespace, vector, top_k)，保持向量库给出的排序，不重排。
//! 任何失败（空命名空间、嵌入失败、索引不可达、超时）都映射为 ToolError{vector_search_failed}。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use crate::core::{IndexError, LlmError};
use crate::llm::EmbeddingProvider;
use crate::memory::vector_index::keys;
use crate::memory::{ScoredPassage, VectorIndex};
use crate::tools::{DocumentHit, DocumentHits, ToolError, ToolResult};

/// 默认返回条数
pub const DEFAULT_TOP_K: usize = 4;
/// 缺少来源名时的占位
pub const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Error, Debug)]
enum RetrieveError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] LlmError),

    #[error("{0}")]
    Index(#[from] IndexError),
}

pub struct RetrieverAdapter {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    timeout: Duration,
}

impl RetrieverAdapter {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            top_k: DEFAULT_TOP_K,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// 检索；始终返回 DocumentHits 或 ToolError，不向上抛错
    pub async fn retrieve(&self, query: &str, namespace: &str) -> ToolResult {
        if namespace.trim().is_empty() {
            return ToolResult::ToolError(ToolError::vector_search_failed("missing namespace"));
        }
        match timeout(self.timeout, self.search(query, namespace)).await {
            Ok(Ok(hits)) => ToolResult::DocumentHits(DocumentHits {
                query: query.to_string(),
                hits,
            }),
            Ok(Err(e)) => {
                tracing::warn!(namespace, error = %e, "vector search failed");
                ToolResult::ToolError(ToolError::vector_search_failed(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(namespace, secs = self.timeout.as_secs(), "vector search timed out");
                ToolResult::ToolError(ToolError::vector_search_failed(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    async fn search(&self, query: &str, namespace: &str) -> Result<Vec<DocumentHit>, RetrieveError> {
        let vector = self.embedder.embed(query).await?;
        let passages = self.index.similarity_search(namespace, &vector, self.top_k).await?;
        Ok(passages
            .iter()
            .filter(|p| match p.meta_str(keys::NAMESPACE) {
                Some(ns) if ns != namespace => {
                    tracing::warn!(expected = namespace, got = ns, id = %p.id, "dropping cross-namespace hit");
                    false
                }
                _ => true,
            })
            .take(self.top_k)
            .map(to_hit)
            .collect())
    }
}

/// 由入库 metadata 推导归属；缺来源名降级为 "unknown"
fn to_hit(p: &ScoredPassage) -> DocumentHit {
    DocumentHit {
        text: p.meta_str(keys::TEXT).unwrap_or_default().to_string(),
        source_name: p
            .meta_str(keys::SOURCE_NAME)
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string(),
        source_id: p.meta_str(keys::SOURCE_ID).unwrap_or(&p.id).to_string(),
        chunk_index: p.meta_u32(keys::CHUNK_INDEX).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::memory::{IndexRecord, InMemoryVectorIndex};
    use crate::tools::ToolErrorCode;
    use async_trait::async_trait;
    use serde_json::json;

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn similarity_search(&self, _: &str, _: &[f32], _: usize) -> Result<Vec<ScoredPassage>, IndexError> {
            Err(IndexError::Unreachable("connection refused".into()))
        }
        async fn upsert(&self, _: &str, _: Vec<IndexRecord>) -> Result<usize, IndexError> {
            Ok(0)
        }
    }

    /// 忽略命名空间的错误实现，用来验证适配器自身的过滤
    struct LeakyIndex;

    #[async_trait]
    impl VectorIndex for LeakyIndex {
        async fn similarity_search(&self, _: &str, _: &[f32], _: usize) -> Result<Vec<ScoredPassage>, IndexError> {
            let meta = |ns: &str, name: &str| {
                json!({"namespace": ns, "sourceName": name, "text": name})
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            };
            Ok(vec![
                ScoredPassage { id: "1".into(), score: 0.9, metadata: meta("b", "other.pdf") },
                ScoredPassage { id: "2".into(), score: 0.8, metadata: meta("a", "mine.pdf") },
            ])
        }
        async fn upsert(&self, _: &str, _: Vec<IndexRecord>) -> Result<usize, IndexError> {
            Ok(0)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::Http { status: 429, body: "quota".into() })
        }
    }

    fn record(id: &str, text: &str, meta: serde_json::Value, values: Vec<f32>) -> IndexRecord {
        let mut metadata = meta.as_object().cloned().unwrap_or_default();
        metadata.insert("text".into(), json!(text));
        IndexRecord { id: id.into(), values, metadata }
    }

    #[tokio::test]
    async fn test_attribution_and_unknown_fallback() {
        let embedder = Arc::new(MockEmbedder::default());
        let index = Arc::new(InMemoryVectorIndex::new());
        let v = embedder.embed("onboarding laptop").await.unwrap();
        index
            .upsert(
                "ws",
                vec![
                    record("c1", "onboarding laptop", json!({"sourceName": "onboarding.pdf", "sourceId": "s1", "chunkIndex": 2}), v.clone()),
                    record("c2", "onboarding laptop", json!({}), v),
                ],
            )
            .await
            .unwrap();
        let adapter = RetrieverAdapter::new(embedder, index);
        let ToolResult::DocumentHits(hits) = adapter.retrieve("onboarding laptop", "ws").await else {
            panic!("expected hits");
        };
        assert_eq!(hits.hits.len(), 2);
        let named = hits.hits.iter().find(|h| h.source_name == "onboarding.pdf").unwrap();
        assert_eq!(named.source_id, "s1");
        assert_eq!(named.chunk_index, 2);
        let unnamed = hits.hits.iter().find(|h| h.source_name == UNKNOWN_SOURCE).unwrap();
        assert_eq!(unnamed.source_id, "c2");
    }

    #[tokio::test]
    async fn test_index_failure_becomes_tool_error() {
        let adapter = RetrieverAdapter::new(Arc::new(MockEmbedder::default()), Arc::new(DownIndex));
        match adapter.retrieve("q", "ws").await {
            ToolResult::ToolError(e) => assert_eq!(e.error_code, ToolErrorCode::VectorSearchFailed),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_becomes_tool_error() {
        let adapter = RetrieverAdapter::new(Arc::new(FailingEmbedder), Arc::new(InMemoryVectorIndex::new()));
        match adapter.retrieve("q", "ws").await {
            ToolResult::ToolError(e) => {
                assert_eq!(e.error_code, ToolErrorCode::VectorSearchFailed);
                assert!(e.message.starts_with("embedding failed: HTTP 429"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_namespace_rejected() {
        let adapter = RetrieverAdapter::new(Arc::new(MockEmbedder::default()), Arc::new(InMemoryVectorIndex::new()));
        assert!(adapter.retrieve("q", " ").await.is_error());
    }

    #[tokio::test]
    async fn test_cross_namespace_hits_dropped() {
        let adapter = RetrieverAdapter::new(Arc::new(MockEmbedder::default()), Arc::new(LeakyIndex));
        let ToolResult::DocumentHits(hits) = adapter.retrieve("q", "a").await else {
            panic!("expected hits");
        };
        assert_eq!(hits.source_names(), vec!["mine.pdf"]);
    }
}
