//! LLM 层：客户端抽象与实现（OpenAI 兼容 / 离线 Mock / 脚本化）以及嵌入

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, HashingEmbedder, OpenAiEmbedder};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage, DEFAULT_BASE_URL};
pub use traits::{LlmClient, LlmError, Message, ModelReply, Role, ToolCall};
