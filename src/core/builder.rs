//! Agent 构建器：由 AppConfig 构建编排器的全部组件
//!
//! 各组件都可以替换（测试中注入 ScriptedLlmClient、自定义工具等），未替换的按配置创建。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{AgentError, Orchestrator, OrchestratorSettings};
use crate::llm::{create_embedder_from_config, EmbeddingProvider, LlmClient, MockLlmClient, OpenAiClient};
use crate::rag::{Chunker, InMemoryVectorStore, RetrievalAugmentor, VectorStore};
use crate::session::SessionStore;
use crate::tools::{default_registry, ToolDispatcher, ToolRegistry};

pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<ToolRegistry>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    sessions: Option<Arc<SessionStore>>,
    rag: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: None,
            embedder: None,
            vector_store: None,
            sessions: None,
            rag: true,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换默认工具集
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// 完全不挂检索增强（/chat/speech 也不检索）
    pub fn without_rag(mut self) -> Self {
        self.rag = false;
        self
    }

    /// 按配置创建 LLM 客户端；openai 缺少 Key 时退化为离线 Mock
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let cfg = &self.config.llm;
        match cfg.provider.to_lowercase().as_str() {
            "mock" => {
                tracing::info!("Using offline mock LLM");
                Arc::new(MockLlmClient)
            }
            "openai" => match cfg.api_key() {
                Some(key) => {
                    tracing::info!(model = %cfg.model, base_url = ?cfg.base_url, "Using OpenAI-compatible LLM");
                    Arc::new(
                        OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, &key, cfg.request_timeout_secs)
                            .with_temperature(cfg.temperature)
                            .with_max_tokens(cfg.max_tokens),
                    )
                }
                None => {
                    tracing::warn!(env = %cfg.api_key_env, "API key not set, using offline mock LLM");
                    Arc::new(MockLlmClient)
                }
            },
            other => {
                tracing::warn!(provider = other, "unknown LLM provider, using offline mock LLM");
                Arc::new(MockLlmClient)
            }
        }
    }

    pub fn build_dispatcher(&mut self) -> ToolDispatcher {
        let registry = self
            .registry
            .take()
            .unwrap_or_else(|| default_registry(&self.config.tools));
        ToolDispatcher::new(registry, self.config.tools.timeout_secs).with_retry(self.config.tools.retry.clone())
    }

    /// 创建检索增强并索引 knowledge_dir（若配置）
    pub async fn build_rag(&mut self) -> Result<Option<RetrievalAugmentor>, AgentError> {
        if !self.rag {
            return Ok(None);
        }
        let cfg = &self.config.rag;
        let embedder = self.embedder.take().unwrap_or_else(|| {
            let key = std::env::var(&cfg.embedding_api_key_env).ok();
            create_embedder_from_config(
                &cfg.embedding_provider,
                cfg.embedding_base_url.as_deref(),
                &cfg.embedding_model,
                key.as_deref(),
                cfg.embedding_dims,
            )
        });
        let store = self
            .vector_store
            .take()
            .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new()));
        let rag = RetrievalAugmentor::new(embedder, store, cfg.max_context_chars);

        if let Some(dir) = &cfg.knowledge_dir {
            let chunker = Chunker::new(cfg.chunk_size, cfg.chunk_overlap);
            rag.index_dir(dir, &chunker).await?;
        }
        Ok(Some(rag))
    }

    pub async fn build(mut self) -> Result<Orchestrator, AgentError> {
        let llm = self.llm.take().unwrap_or_else(|| self.build_llm());
        let dispatcher = self.build_dispatcher();
        let rag = self.build_rag().await?;
        let sessions = self.sessions.take().unwrap_or_default();
        tracing::info!(
            model = llm.model_name(),
            tools = dispatcher.registry().len(),
            rag = rag.is_some(),
            "agent built"
        );
        Ok(Orchestrator::new(
            sessions,
            Arc::new(dispatcher),
            llm,
            rag.map(Arc::new),
            self.config.llm.retry.clone(),
            OrchestratorSettings::from(&self.config),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_falls_back_to_mock() {
        let mut cfg = AppConfig::default();
        cfg.llm.api_key_env = "KRISHI_TEST_KEY_THAT_IS_NOT_SET".to_string();
        let llm = AgentBuilder::new(cfg).build_llm();
        assert_eq!(llm.model_name(), "mock");
    }

    #[tokio::test]
    async fn test_build_with_defaults() {
        let agent = AgentBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .build()
            .await
            .unwrap();
        assert_eq!(agent.tool_names().len(), 6);
        assert!(agent.rag_available());
    }

    #[tokio::test]
    async fn test_missing_knowledge_dir_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.rag.knowledge_dir = Some("/nonexistent/krishi-knowledge".into());
        let err = AgentBuilder::new(cfg).build().await.err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
