//! 记忆层：会话历史（Turn / TurnLog）、历史归一化、文档分块与入库、命名空间向量索引

pub mod chunker;
pub mod conversation;
pub mod ingest;
pub mod normalize;
pub mod pinecone;
pub mod vector_index;

pub use chunker::{Chunker, ChunkingConfig, TextChunk};
pub use conversation::{Turn, TurnContent, TurnLog, TurnLogError, TurnRole};
pub use ingest::{DocumentIngestor, IngestReport};
pub use normalize::{normalize_history, ToWire, WirePart, WireRole, WireTurn};
pub use pinecone::PineconeIndex;
pub use vector_index::{cosine_similarity, IndexRecord, InMemoryVectorIndex, ScoredPassage, VectorIndex};
