//! 向量索引：按命名空间隔离的相似度检索
//!
//! VectorIndex 抽象外部向量库（Pinecone 等）；InMemoryVectorIndex 为进程内实现（余弦相似度），
//! 供本地运行与测试。入库约定：metadata 含 namespace / sourceName / sourceId / chunkIndex / text。

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::IndexError;

/// metadata 中的键名（入库约定）
pub mod keys {
    pub const NAMESPACE: &str = "namespace";
    pub const SOURCE_NAME: &str = "sourceName";
    pub const SOURCE_ID: &str = "sourceId";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TEXT: &str = "text";
}

/// 待写入的向量记录
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// 检索返回的段落（按相似度从高到低）
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub id: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

impl ScoredPassage {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// 数值型 metadata；Pinecone 会把整数存成浮点
    pub fn meta_u32(&self, key: &str) -> Option<u32> {
        let v = self.metadata.get(key)?;
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .and_then(|n| u32::try_from(n).ok())
    }
}

/// 向量索引服务
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 在指定命名空间内检索最相似的 top_k 条
    async fn similarity_search(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, IndexError>;

    /// 写入记录，返回写入条数
    async fn upsert(&self, namespace: &str, records: Vec<IndexRecord>) -> Result<usize, IndexError>;
}

/// 进程内向量索引：每个命名空间一个分区
#[derive(Default)]
pub struct InMemoryVectorIndex {
    partitions: RwLock<HashMap<String, Vec<IndexRecord>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命名空间内的记录数
    pub fn len(&self, namespace: &str) -> usize {
        self.partitions
            .read()
            .map(|p| p.get(namespace).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn similarity_search(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, IndexError> {
        let partitions = self
            .partitions
            .read()
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;
        let Some(records) = partitions.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<ScoredPassage> = records
            .iter()
            .map(|r| ScoredPassage {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn upsert(&self, namespace: &str, records: Vec<IndexRecord>) -> Result<usize, IndexError> {
        if records.iter().any(|r| r.values.is_empty()) {
            return Err(IndexError::InvalidRecord("empty vector".to_string()));
        }
        let mut partitions = self
            .partitions
            .write()
            .map_err(|e| IndexError::Unreachable(e.to_string()))?;
        let partition = partitions.entry(namespace.to_string()).or_default();
        let n = records.len();
        for record in records {
            partition.retain(|r| r.id != record.id);
            partition.push(record);
        }
        Ok(n)
    }
}

/// 余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
