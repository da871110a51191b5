//! 嵌入 API：供检索增强使用
//!
//! - OpenAiEmbedder：调用 OpenAI 兼容的 /embeddings 端点
//! - HashingEmbedder：离线特征哈希（词袋），无需网络，用于本地运行与测试

use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

/// 嵌入提供方
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 将文本编码为向量；失败时返回错误字符串
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String>;
}

/// 使用 async-openai 调用 OpenAI 兼容的 embeddings API
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty text".to_string());
        }
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::String(text.to_string()))
            .build()
            .map_err(|e| e.to_string())?;
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;
        response
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| "embedding response has no data".to_string())
    }
}

/// 特征哈希嵌入：小写分词后按 FNV-1a 哈希落桶，L2 归一化
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn bucket(token: &str, dims: usize) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in token.as_bytes() {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % dims as u64) as usize
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 1)
        {
            v[Self::bucket(token, self.dims)] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
        if text.trim().is_empty() {
            return Err("empty text".to_string());
        }
        Ok(self.embed_text(text))
    }
}

/// 按配置创建嵌入提供方：provider = "openai" 且有 key 时走 API，否则退化为哈希嵌入
pub fn create_embedder_from_config(
    provider: &str,
    base_url: Option<&str>,
    model: &str,
    api_key: Option<&str>,
    dims: usize,
) -> Arc<dyn EmbeddingProvider> {
    match (provider, api_key.filter(|k| !k.is_empty())) {
        ("openai", Some(key)) => Arc::new(OpenAiEmbedder::new(base_url, model, key)),
        ("openai", None) => {
            tracing::warn!("embedding provider 'openai' has no API key; using hashing embedder");
            Arc::new(HashingEmbedder::new(dims))
        }
        _ => Arc::new(HashingEmbedder::new(dims)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashing_embedder_is_normalised_and_deterministic() {
        let e = HashingEmbedder::new(64);
        let a = e.embed("wheat sowing in Punjab").await.unwrap();
        let b = e.embed("Wheat sowing in PUNJAB").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_embedder_rejects_empty() {
        assert!(HashingEmbedder::default().embed("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_factory_falls_back_without_key() {
        // 无 key 时退化为本地 hashing，不访问网络
        let e = create_embedder_from_config("openai", None, "text-embedding-3-small", None, 32);
        assert_eq!(e.embed("paddy nursery").await.unwrap().len(), 32);
        let e = create_embedder_from_config("hashing", None, "", Some("k"), 48);
        assert_eq!(e.embed("paddy nursery").await.unwrap().len(), 48);
    }
}
