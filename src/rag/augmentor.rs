//! 检索增强：嵌入问题 → 向量检索 → 拼接上下文
//!
//! 任一步失败都只记日志（RagUnavailable），本轮以无上下文继续。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::core::AgentError;
use crate::llm::EmbeddingProvider;
use crate::rag::chunker::Chunker;
use crate::rag::store::{MetadataFilter, RetrievedChunk, VectorStore};

const PREVIEW_CHARS: usize = 200;

/// 响应中返回给客户端的来源
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: String,
    pub similarity_score: f32,
    pub preview: String,
    pub metadata: HashMap<String, String>,
}

impl From<&RetrievedChunk> for Source {
    fn from(c: &RetrievedChunk) -> Self {
        let preview = if c.text.chars().count() > PREVIEW_CHARS {
            format!("{}...", c.text.chars().take(PREVIEW_CHARS).collect::<String>())
        } else {
            c.text.clone()
        };
        Self {
            id: c.id.clone(),
            similarity_score: c.similarity_score,
            preview,
            metadata: c.metadata.clone(),
        }
    }
}

/// 一次检索的结果：拼好的上下文与实际用到的块
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub context: String,
    pub sources: Vec<Source>,
}

impl Retrieval {
    pub fn has_context(&self) -> bool {
        !self.context.is_empty()
    }
}

pub struct RetrievalAugmentor {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    max_context_chars: usize,
}

impl RetrievalAugmentor {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>, max_context_chars: usize) -> Self {
        Self {
            embedder,
            store,
            max_context_chars,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn embed(&self, query: &str) -> Result<Vec<f32>, AgentError> {
        let v = self
            .embedder
            .embed(query)
            .await
            .map_err(AgentError::RagUnavailable)?;
        if v.is_empty() {
            return Err(AgentError::RagUnavailable("empty embedding".to_string()));
        }
        Ok(v)
    }

    pub async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, AgentError> {
        self.store
            .search(vector, top_k, filter)
            .await
            .map_err(AgentError::RagUnavailable)
    }

    /// 检索并拼接上下文；失败时降级为空结果
    pub async fn retrieve(&self, query: &str, top_k: usize, filter: Option<&MetadataFilter>) -> Retrieval {
        if top_k == 0 {
            return Retrieval::default();
        }
        let result: Result<Vec<RetrievedChunk>, AgentError> = async {
            let vector = self.embed(query).await?;
            self.search(&vector, top_k, filter).await
        }
        .await;

        match result {
            Ok(chunks) => {
                // 零分块与问题无关
                let relevant: Vec<RetrievedChunk> = chunks
                    .into_iter()
                    .filter(|c| c.similarity_score > 0.0)
                    .collect();
                let used = select_chunks(&relevant, self.max_context_chars);
                tracing::debug!(hits = relevant.len(), used = used.len(), "rag retrieval");
                Retrieval {
                    context: render_context(&used),
                    sources: used.into_iter().map(Source::from).collect(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "rag unavailable, continuing without context");
                Retrieval::default()
            }
        }
    }

    /// 索引目录下的 .txt / .md 文件，返回写入的块数；单个文件失败只记日志
    pub async fn index_dir(&self, dir: &Path, chunker: &Chunker) -> Result<usize, AgentError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| AgentError::Config(format!("knowledge_dir {}: {e}", dir.display())))?;
        let mut paths = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_doc = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"));
            if is_doc {
                paths.push(path);
            }
        }
        paths.sort();

        let mut indexed = 0;
        for path in paths {
            let doc_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("doc")
                .to_string();
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document");
                    continue;
                }
            };
            let metadata = HashMap::from([("source".to_string(), doc_id.clone())]);
            indexed += self.index_text(&doc_id, &text, &metadata, chunker).await;
        }
        tracing::info!(dir = %dir.display(), chunks = indexed, "knowledge base indexed");
        Ok(indexed)
    }

    /// 切块、嵌入并写入一篇文档，返回成功写入的块数
    pub async fn index_text(
        &self,
        doc_id: &str,
        text: &str,
        metadata: &HashMap<String, String>,
        chunker: &Chunker,
    ) -> usize {
        let mut indexed = 0;
        for chunk in chunker.chunk(doc_id, text, metadata) {
            let id = chunk.id.clone();
            let stored = match self.embedder.embed(&chunk.text).await {
                Ok(v) => self.store.upsert(chunk, v).await,
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => indexed += 1,
                Err(e) => tracing::warn!(chunk = %id, error = %e, "chunk not indexed"),
            }
        }
        indexed
    }
}

/// 按给定顺序（应为分数降序）选块；遇到第一个放不下的块即停止，块不截断
fn select_chunks(chunks: &[RetrievedChunk], max_chars: usize) -> Vec<&RetrievedChunk> {
    let mut used = Vec::new();
    let mut total = 0;
    for c in chunks {
        let len = block(used.len() + 1, &c.text).chars().count() + if used.is_empty() { 0 } else { 2 };
        if total + len > max_chars {
            break;
        }
        total += len;
        used.push(c);
    }
    used
}

fn block(n: usize, text: &str) -> String {
    format!("[Context {n}]\n{text}")
}

fn render_context(chunks: &[&RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| block(i + 1, &c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 按顺序拼接上下文，总长不超过 max_chars；第一个会溢出的块及其后的块都不用
pub fn assemble_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    render_context(&select_chunks(chunks, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use crate::rag::store::InMemoryVectorStore;
    use async_trait::async_trait;

    fn hit(id: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            id: id.to_string(),
            text: text.to_string(),
            similarity_score: score,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_assemble_stops_at_first_overflowing_chunk() {
        let chunks = vec![
            hit("a", &"x".repeat(40), 0.9),
            hit("b", &"y".repeat(200), 0.8),
            hit("c", &"z".repeat(20), 0.7),
        ];
        let ctx = assemble_context(&chunks, 100);
        assert!(ctx.contains(&"x".repeat(40)));
        assert!(!ctx.contains('y'));
        // c 本来放得下，但排在溢出块之后
        assert!(!ctx.contains('z'));
        assert!(ctx.chars().count() <= 100);
        assert!(ctx.starts_with("[Context 1]"));
        assert!(!ctx.contains("[Context 2]"));
    }

    #[test]
    fn test_assemble_empty_when_nothing_fits() {
        assert_eq!(assemble_context(&[hit("a", "long text", 1.0)], 5), "");
    }

    #[test]
    fn test_source_preview_truncated() {
        let s = Source::from(&hit("a", &"w".repeat(300), 0.5));
        assert_eq!(s.preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(s.preview.ends_with("..."));
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, String> {
            Err("embedding service down".to_string())
        }
    }

    #[tokio::test]
    async fn test_retrieve_degrades_on_failure() {
        let rag = RetrievalAugmentor::new(Arc::new(BrokenEmbedder), Arc::new(InMemoryVectorStore::new()), 1000);
        let r = rag.retrieve("wheat", 4, None).await;
        assert!(!r.has_context());
        assert!(r.sources.is_empty());
    }

    #[tokio::test]
    async fn test_index_and_retrieve() {
        let rag = RetrievalAugmentor::new(
            Arc::new(HashingEmbedder::new(128)),
            Arc::new(InMemoryVectorStore::new()),
            2000,
        );
        let chunker = Chunker::default();
        let meta = HashMap::new();
        rag.index_text("wheat", "Wheat sowing in Punjab is done in November after paddy harvest.", &meta, &chunker)
            .await;
        rag.index_text("cotton", "Cotton bollworm control uses pheromone traps.", &meta, &chunker)
            .await;

        let r = rag.retrieve("when is wheat sowing in Punjab", 1, None).await;
        assert!(r.has_context());
        assert_eq!(r.sources.len(), 1);
        assert_eq!(r.sources[0].id, "wheat#0");
    }

    #[tokio::test]
    async fn test_index_dir_reads_txt_and_md() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rice.md"), "Rice transplanting happens in June-July.").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "Drip irrigation saves water.").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let store = Arc::new(InMemoryVectorStore::new());
        let rag = RetrievalAugmentor::new(Arc::new(HashingEmbedder::default()), store.clone(), 2000);
        let n = rag.index_dir(dir.path(), &Chunker::default()).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.len().await, 2);
    }
}
