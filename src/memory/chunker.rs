//! 文档分块
//!
//! 按分隔符优先级（段落 → 行 → 句末 → 空格）在目标长度内回退断开，块间保留重叠，UTF-8 安全。
//! 默认 1000 字符 / 重叠 200，与入库流水线一致。

/// 分块结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 在文档内的序号（从 0 开始，仅统计非空块）
    pub index: u32,
    pub text: String,
    /// 在原文中的字节偏移
    pub offset: usize,
}

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            ..Self::default()
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                "! ".to_string(),
                "? ".to_string(),
                "。".to_string(),
                " ".to_string(),
            ],
        }
    }
}

/// 文档分块器
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// 将文本分割为块
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut index = 0u32;

        while start < total {
            let target_end = (start + self.config.chunk_size).min(total);
            let end = if target_end < total {
                self.break_point(&chars[start..target_end])
                    .map(|n| start + n)
                    .unwrap_or(target_end)
            } else {
                target_end
            };

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    index,
                    text: trimmed.to_string(),
                    offset: chars[..start].iter().map(|c| c.len_utf8()).sum(),
                });
                index += 1;
            }

            if end >= total {
                break;
            }
            let overlap = self.config.chunk_overlap.min(end - start);
            let next = end - overlap;
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// 在窗口内找最靠后的高优先级分隔符，返回断点（字符数，含分隔符）
    fn break_point(&self, window: &[char]) -> Option<usize> {
        let slice: String = window.iter().collect();
        for sep in &self.config.separators {
            if let Some(pos) = slice.rfind(sep.as_str()) {
                let n = slice[..pos].chars().count() + sep.chars().count();
                // 断点太靠前会退化成碎片，交给下一级分隔符
                if n > self.config.chunk_overlap {
                    return Some(n);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_ingest_settings() {
        let config = ChunkingConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = Chunker::default().chunk("  hello world  ");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(Chunker::default().chunk("   \n\n ").is_empty());
    }

    #[test]
    fn test_long_text_overlaps_and_is_bounded() {
        let chunker = Chunker::new(ChunkingConfig::new(50, 10));
        let text = "Alpha beta gamma delta. ".repeat(20);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 5);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index as usize, i);
            assert!(c.text.chars().count() <= 50);
        }
        assert!(chunks.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn test_utf8_safe() {
        let chunker = Chunker::new(ChunkingConfig::new(8, 2));
        let text = "这是第一段话。这是第二句话。这是第三句话。";
        let chunks = chunker.chunk(text);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(text.get(c.offset..).is_some());
        }
    }
}
