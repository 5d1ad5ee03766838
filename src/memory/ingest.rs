//! 文档入库：分块 → 嵌入 → 按命名空间写入向量索引
//!
//! 每条记录带 {namespace, sourceName, sourceId, chunkIndex, text} 元数据，检索时据此给出来源归属。

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::IngestError;
use crate::llm::EmbeddingProvider;
use crate::memory::vector_index::keys;
use crate::memory::{Chunker, IndexRecord, VectorIndex};

/// 一次入库的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub source_id: String,
    pub source_name: String,
    pub chunks: usize,
}

pub struct DocumentIngestor {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
}

impl DocumentIngestor {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
        }
    }

    /// 入库一份已抽取的纯文本文档，sourceId 每次新生成
    pub async fn ingest(
        &self,
        namespace: &str,
        source_name: &str,
        text: &str,
    ) -> Result<IngestReport, IngestError> {
        if namespace.trim().is_empty() {
            return Err(IngestError::MissingNamespace);
        }
        let chunks = self.chunker.chunk(text);
        if chunks.is_empty() {
            return Err(IngestError::EmptyDocument(source_name.to_string()));
        }

        let source_id = Uuid::new_v4().to_string();
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let values = self.embedder.embed(&chunk.text).await?;
            let mut metadata = Map::new();
            metadata.insert(keys::NAMESPACE.into(), Value::from(namespace));
            metadata.insert(keys::SOURCE_NAME.into(), Value::from(source_name));
            metadata.insert(keys::SOURCE_ID.into(), Value::from(source_id.as_str()));
            metadata.insert(keys::CHUNK_INDEX.into(), Value::from(chunk.index));
            metadata.insert(keys::TEXT.into(), Value::from(chunk.text.as_str()));
            records.push(IndexRecord {
                id: format!("{source_id}-{}", chunk.index),
                values,
                metadata,
            });
        }

        let written = self.index.upsert(namespace, records).await?;
        tracing::info!(namespace, source_name, source_id = %source_id, chunks = written, "document ingested");
        Ok(IngestReport {
            source_id,
            source_name: source_name.to_string(),
            chunks: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::memory::{ChunkingConfig, InMemoryVectorIndex};
    use crate::tools::{RetrieverAdapter, ToolResult};

    fn ingestor(index: Arc<InMemoryVectorIndex>) -> DocumentIngestor {
        DocumentIngestor::new(
            Chunker::new(ChunkingConfig::new(80, 20)),
            Arc::new(MockEmbedder::default()),
            index,
        )
    }

    #[tokio::test]
    async fn test_ingest_then_retrieve_with_attribution() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let ing = ingestor(index.clone());
        let text = "New hires receive a laptop on day one.\n\nThe onboarding buddy schedules a walkthrough of the codebase during the first week.";
        let report = ing.ingest("acme", "onboarding.pdf", text).await.unwrap();
        assert!(report.chunks >= 2);
        assert_eq!(index.len("acme"), report.chunks);

        let retriever = RetrieverAdapter::new(Arc::new(MockEmbedder::default()), index);
        let ToolResult::DocumentHits(hits) = retriever.retrieve("laptop day one", "acme").await else {
            panic!("expected hits");
        };
        assert_eq!(hits.hits[0].source_name, "onboarding.pdf");
        assert_eq!(hits.hits[0].source_id, report.source_id);
    }

    #[tokio::test]
    async fn test_ingest_rejects_empty_input() {
        let ing = ingestor(Arc::new(InMemoryVectorIndex::new()));
        assert!(matches!(
            ing.ingest("", "a.txt", "text").await,
            Err(IngestError::MissingNamespace)
        ));
        assert!(matches!(
            ing.ingest("ns", "a.txt", "  \n ").await,
            Err(IngestError::EmptyDocument(_))
        ));
    }
}
