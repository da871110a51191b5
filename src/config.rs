//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KRISHI__*` 覆盖（双下划线表示嵌套，如 `KRISHI__LLM__PROVIDER=mock`）。
//! API Key 不写进配置文件，只配置从哪个环境变量读取。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub session: SessionSection,
    pub tools: ToolsSection,
    pub rag: RagSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "KrishiVaani".to_string(),
        }
    }
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// [llm] 段：后端选择、模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai（任意 OpenAI 兼容端点）/ mock（离线关键词路由）
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "sonar-pro".to_string(),
            base_url: Some("https://api.perplexity.ai".to_string()),
            api_key_env: "PERPLEXITY_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: None,
            request_timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl LlmSection {
    /// 从 api_key_env 指定的环境变量读取 Key
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

/// [agent] 段：工具循环与回答
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单轮内带工具的模型调用上限 N
    pub max_tool_iterations: usize,
    /// 同一轮模型请求的工具最大并发
    pub max_parallel_tools: usize,
    /// 拼入 prompt 的历史 turn 数上限
    pub max_history_turns: usize,
    /// 等待会话锁的最长时间，超时返回 session_busy
    pub lock_wait_secs: u64,
    /// 语音模式回答的字符上限
    pub speech_max_answer_chars: usize,
    /// 用户问题的字符上限
    pub max_query_chars: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_iterations: 5,
            max_parallel_tools: 3,
            max_history_turns: 20,
            lock_wait_secs: 30,
            speech_max_answer_chars: 600,
            max_query_chars: 2000,
        }
    }
}

/// [session] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 空闲多久后过期（秒）
    pub ttl_secs: u64,
    /// 过期清理的间隔（秒）
    pub cleanup_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            cleanup_interval_secs: 300,
        }
    }
}

/// [tools] 段：外部咨询服务地址、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub weather_api_url: String,
    pub pest_api_url: String,
    pub market_api_url: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            weather_api_url: "http://localhost:8080".to_string(),
            pest_api_url: "http://localhost:8080".to_string(),
            market_api_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
            retry: RetryPolicy::new(2, 300),
        }
    }
}

/// [rag] 段：检索增强
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSection {
    /// /chat 是否默认检索（/chat/speech 总是检索）
    pub enabled: bool,
    pub top_k: usize,
    pub speech_top_k: usize,
    /// 拼入 prompt 的上下文字符上限
    pub max_context_chars: usize,
    /// 启动时索引的 .txt / .md 目录
    pub knowledge_dir: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// hashing / openai
    pub embedding_provider: String,
    pub embedding_model: String,
    pub embedding_base_url: Option<String>,
    pub embedding_api_key_env: String,
    /// hashing 嵌入的维度
    pub embedding_dims: usize,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 4,
            speech_top_k: 6,
            max_context_chars: 6000,
            knowledge_dir: None,
            chunk_size: 1200,
            chunk_overlap: 200,
            embedding_provider: "hashing".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_base_url: None,
            embedding_api_key_env: "OPENAI_API_KEY".to_string(),
            embedding_dims: 256,
        }
    }
}

/// 从 config 目录加载配置，环境变量 KRISHI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 KRISHI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KRISHI")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_tool_iterations, 5);
        assert_eq!(cfg.agent.max_parallel_tools, 3);
        assert_eq!(cfg.llm.retry.max_attempts, 3);
        assert_eq!(cfg.rag.top_k, 4);
        assert_eq!(cfg.rag.speech_top_k, 6);
        assert_eq!(cfg.server.port, 8000);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "mock"

[llm.retry]
max_attempts = 5

[agent]
max_parallel_tools = 2

[rag]
enabled = false
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.retry.max_attempts, 5);
        assert_eq!(cfg.llm.retry.base_delay_ms, 500);
        assert_eq!(cfg.agent.max_parallel_tools, 2);
        assert_eq!(cfg.agent.max_tool_iterations, 5);
        assert!(!cfg.rag.enabled);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(PathBuf::from("/nonexistent/krishi.toml"))).is_err());
    }
}
