//! 文档分块
//!
//! 按字符（而非字节）计长，块之间保留 overlap 个字符的重叠；
//! 在窗口的后半段内优先从段落、换行、句号、空格处断开。

use std::collections::HashMap;

/// 文档块
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// `{doc_id}#{序号}`
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SEPARATORS: &[&str] = &["\n\n", "\n", "। ", ". ", "? ", "! ", " "];

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1200, 200)
    }
}

impl Chunker {
    /// overlap 会被限制在 chunk_size 的一半以内，保证每块都向前推进
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size / 2),
        }
    }

    /// 切分文本；每块继承文档的 metadata
    pub fn chunk(&self, doc_id: &str, text: &str, metadata: &HashMap<String, String>) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end < total {
                self.break_point(&chars[start..hard_end])
                    .map(|offset| start + offset)
                    .unwrap_or(hard_end)
            } else {
                hard_end
            };

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(Chunk {
                    id: format!("{doc_id}#{}", chunks.len()),
                    text: piece.to_string(),
                    metadata: metadata.clone(),
                });
            }

            if end >= total {
                break;
            }
            let next = end.saturating_sub(self.chunk_overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// 窗口后半段内最后一个分隔符之后的位置（字符偏移）
    fn break_point(&self, window: &[char]) -> Option<usize> {
        let min = window.len() / 2;
        let window: String = window.iter().collect();
        SEPARATORS.iter().find_map(|sep| {
            window.rfind(sep).and_then(|byte_pos| {
                let offset = window[..byte_pos].chars().count() + sep.chars().count();
                (offset > min).then_some(offset)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> HashMap<String, String> {
        HashMap::from([("crop".to_string(), "wheat".to_string())])
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = Chunker::default().chunk("doc", "Sow wheat in November.", &meta());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc#0");
        assert_eq!(chunks[0].metadata["crop"], "wheat");
    }

    #[test]
    fn test_chunks_overlap_and_cover_text() {
        let text = "abcdefghij".repeat(30);
        let chunks = Chunker::new(100, 20).chunk("d", &text, &HashMap::new());
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100);
        }
        let tail: String = chunks[0].text.chars().skip(80).collect();
        assert!(chunks[1].text.starts_with(&tail));
        assert!(text.ends_with(&chunks.last().unwrap().text));
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let text = "गेहूं की बुवाई नवंबर में करें। ".repeat(50);
        let chunks = Chunker::new(64, 16).chunk("hi", &text, &HashMap::new());
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 64));
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(70));
        let chunks = Chunker::new(100, 0).chunk("p", &text, &HashMap::new());
        assert_eq!(chunks[0].text, "a".repeat(70));
        assert_eq!(chunks[1].text, "b".repeat(70));
    }
}
