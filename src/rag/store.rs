//! 向量存储
//!
//! VectorStore 是检索的外部协作方接口；InMemoryVectorStore 为进程内实现（余弦相似度，
//! 可按 metadata 等值过滤）。结果按相似度降序，分数相同按 id 升序，保证可复现。

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::rag::chunker::Chunk;

/// metadata 等值过滤：所有键值都必须匹配
pub type MetadataFilter = HashMap<String, String>;

/// 一次检索命中的块（不写入会话）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub similarity_score: f32,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 写入或覆盖（按 chunk.id）
    async fn upsert(&self, chunk: Chunk, embedding: Vec<f32>) -> Result<(), String>;

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, String>;

    async fn len(&self) -> usize;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn matches_filter(metadata: &HashMap<String, String>, filter: Option<&MetadataFilter>) -> bool {
    filter.map_or(true, |f| {
        f.iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|m| m.eq_ignore_ascii_case(v)))
    })
}

/// 按分数降序、id 升序排序并截取前 top_k
pub fn rank(mut hits: Vec<RetrievedChunk>, top_k: usize) -> Vec<RetrievedChunk> {
    hits.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(top_k);
    hits
}

struct Entry {
    chunk: Chunk,
    embedding: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, chunk: Chunk, embedding: Vec<f32>) -> Result<(), String> {
        if embedding.is_empty() {
            return Err(format!("empty embedding for chunk {}", chunk.id));
        }
        let mut entries = self.entries.write().await;
        if let Some(first) = entries.first() {
            if first.embedding.len() != embedding.len() {
                return Err(format!(
                    "dimension mismatch: store has {}, got {}",
                    first.embedding.len(),
                    embedding.len()
                ));
            }
        }
        match entries.iter_mut().find(|e| e.chunk.id == chunk.id) {
            Some(existing) => {
                existing.chunk = chunk;
                existing.embedding = embedding;
            }
            None => entries.push(Entry { chunk, embedding }),
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievedChunk>, String> {
        if vector.is_empty() {
            return Err("empty query vector".to_string());
        }
        let entries = self.entries.read().await;
        let hits = entries
            .iter()
            .filter(|e| matches_filter(&e.chunk.metadata, filter))
            .map(|e| RetrievedChunk {
                id: e.chunk.id.clone(),
                text: e.chunk.text.clone(),
                similarity_score: cosine_similarity(vector, &e.embedding),
                metadata: e.chunk.metadata.clone(),
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, crop: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: format!("text {id}"),
            metadata: HashMap::from([("crop".to_string(), crop.to_string())]),
        }
    }

    #[test]
    fn test_cosine() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_search_orders_by_score_then_id() {
        let store = InMemoryVectorStore::new();
        store.upsert(chunk("c", "wheat"), vec![1.0, 0.0]).await.unwrap();
        store.upsert(chunk("a", "wheat"), vec![1.0, 0.0]).await.unwrap();
        store.upsert(chunk("b", "rice"), vec![0.6, 0.8]).await.unwrap();

        let hits = store.search(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);

        let top1 = store.search(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(top1[0].id, "a");
    }

    #[tokio::test]
    async fn test_metadata_filter() {
        let store = InMemoryVectorStore::new();
        store.upsert(chunk("a", "wheat"), vec![1.0, 0.0]).await.unwrap();
        store.upsert(chunk("b", "rice"), vec![1.0, 0.0]).await.unwrap();
        let filter = MetadataFilter::from([("crop".to_string(), "Rice".to_string())]);
        let hits = store.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_checks_dimensions() {
        let store = InMemoryVectorStore::new();
        store.upsert(chunk("a", "wheat"), vec![1.0, 0.0]).await.unwrap();
        store.upsert(chunk("a", "rice"), vec![0.0, 1.0]).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.upsert(chunk("b", "wheat"), vec![1.0]).await.is_err());
    }
}
