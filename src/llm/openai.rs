//! OpenAI 兼容 Chat Completions 客户端（支持 function tools）
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）：OpenAI、Perplexity、DeepSeek 或自建代理。
//! 工具参数以 JSON 字符串返回；无法解析时原样保留为字符串，交给分发器校验并反馈给模型。
//! 重试统一由 RetryPolicy 负责，async_openai 自带的退避被关闭。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolChoiceOption, ChatCompletionTools,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionCall,
    FunctionObject, ToolChoiceOptions,
};
use async_openai::Client;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, Message, ModelReply, Role, ToolCall};
use crate::tools::ToolSpec;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// 429 未给出等待时间时的默认值
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/'))
            .with_api_key(api_key);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        // 只发一次请求，失败交给上层 RetryPolicy
        let single_attempt = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: Client::with_config(config)
                .with_http_client(http)
                .with_backoff(single_attempt),
            model: model.to_string(),
            temperature: 0.3,
            max_tokens: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.as_str())
            .messages(messages)
            .temperature(self.temperature);
        if let Some(max) = self.max_tokens {
            args.max_completion_tokens(max);
        }
        if !tools.is_empty() {
            args.tools(tools.iter().map(to_function_tool).collect::<Vec<_>>())
                .tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto));
        }
        args.build()
    }
}

fn to_request_message(m: &Message) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let message: ChatCompletionRequestMessage = match m.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(m.content.as_str())
            .build()?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(m.content.as_str())
            .build()?
            .into(),
        Role::Assistant if !m.tool_calls.is_empty() => ChatCompletionRequestAssistantMessageArgs::default()
            .tool_calls(m.tool_calls.iter().map(to_wire_tool_call).collect::<Vec<_>>())
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(m.content.as_str())
            .build()?
            .into(),
        Role::Tool => ChatCompletionRequestToolMessageArgs::default()
            .content(m.content.as_str())
            .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
            .build()?
            .into(),
    };
    Ok(message)
}

fn to_wire_tool_call(call: &ToolCall) -> ChatCompletionMessageToolCalls {
    ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
        id: call.id.clone(),
        function: FunctionCall {
            name: call.name.clone(),
            arguments: call.args.to_string(),
        },
    })
}

fn to_function_tool(spec: &ToolSpec) -> ChatCompletionTools {
    ChatCompletionTools::Function(ChatCompletionTool {
        function: FunctionObject {
            name: spec.name.clone(),
            description: Some(spec.description.clone()),
            parameters: Some(spec.parameters.clone()),
            strict: None,
        },
    })
}

fn from_wire_tool_call(call: ChatCompletionMessageToolCall) -> ToolCall {
    let arguments = call.function.arguments;
    let args = if arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&arguments).unwrap_or(Value::String(arguments))
    };
    ToolCall {
        id: call.id,
        name: call.function.name,
        args,
    }
}

/// 取第一个 choice；有 function tool_calls 时优先视为工具请求
fn parse_reply(resp: CreateChatCompletionResponse) -> Result<ModelReply, LlmError> {
    let message = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?
        .message;

    let calls: Vec<ToolCall> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| match c {
            ChatCompletionMessageToolCalls::Function(call) => Some(from_wire_tool_call(call)),
            ChatCompletionMessageToolCalls::Custom(custom) => {
                tracing::warn!(id = %custom.id, "ignoring custom tool call");
                None
            }
        })
        .collect();
    if !calls.is_empty() {
        return Ok(ModelReply::ToolCalls(calls));
    }

    Ok(ModelReply::Answer(message.content.unwrap_or_default()))
}

static RETRY_IN_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// 从 "Please try again in 1.5s" / "in 120ms" 中取出等待毫秒数
fn retry_after_hint(message: &str) -> Option<u64> {
    let re = RETRY_IN_RE
        .get_or_init(|| Regex::new(r"try again in (\d+(?:\.\d+)?)(ms|s)\b"))
        .as_ref()
        .ok()?;
    let caps = re.captures(message)?;
    let value: f64 = caps[1].parse().ok()?;
    let ms = if &caps[2] == "ms" { value } else { value * 1000.0 };
    Some(ms.ceil() as u64)
}

/// API 错误体没有 HTTP 状态码，按 type / code 还原
fn map_api_error(api: ApiError) -> LlmError {
    let kind = api.r#type.as_deref().unwrap_or_default();
    let code = api.code.as_deref().unwrap_or_default();

    if kind == "insufficient_quota" || code == "insufficient_quota" {
        return LlmError::Http {
            status: 429,
            body: api.message,
        };
    }
    if kind.contains("rate_limit") || code.contains("rate_limit") {
        return LlmError::RateLimited {
            retry_after_ms: retry_after_hint(&api.message).unwrap_or(DEFAULT_RETRY_AFTER_MS),
        };
    }

    let status = match (kind, code) {
        // 5xx 响应体不是 JSON，只剩原文
        ("", "") | ("server_error", _) => 500,
        ("authentication_error", _) | (_, "invalid_api_key") => 401,
        ("permission_error", _) => 403,
        ("not_found_error", _) | (_, "model_not_found") => 404,
        _ => 400,
    };
    LlmError::Http {
        status,
        body: api.message.chars().take(500).collect(),
    }
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(e) => match e.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => LlmError::RateLimited {
                retry_after_ms: DEFAULT_RETRY_AFTER_MS,
            },
            Some(status) => LlmError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => LlmError::Transport(e.to_string()),
        },
        OpenAIError::ApiError(api) => map_api_error(api),
        OpenAIError::JSONDeserialize(e, _) => LlmError::InvalidResponse(e.to_string()),
        other => LlmError::InvalidResponse(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, LlmError> {
        let request = self.build_request(messages, tools).map_err(map_openai_error)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        if let Some(u) = &response.usage {
            self.usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
        }
        let reply = parse_reply(response)?;
        tracing::debug!(
            model = %self.model,
            tool_calls = matches!(reply, ModelReply::ToolCalls(_)),
            "chat completion"
        );
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
