//! 无需 API 的模型客户端
//!
//! - MockLlmClient：按关键词路由到农业工具的离线模型，便于本地跑通完整的工具调用流程
//! - ScriptedLlmClient：按脚本依次返回回复，记录调用次数与请求，用于测试

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmError, Message, ModelReply, Role, ToolCall};
use crate::react::prompt::{PROFILE_CROP_PREFIX, PROFILE_LOCATION_PREFIX};
use crate::tools::ToolSpec;

const KNOWN_CROPS: &[&str] = &[
    "wheat", "rice", "paddy", "cotton", "sugarcane", "tomato", "maize", "mustard", "soybean",
    "potato", "onion", "gram",
];

/// 离线模型：第一次调用时根据问题关键词选择一个工具，拿到工具结果后拼出回答
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn profile_value(messages: &[Message], prefix: &str) -> Option<String> {
        messages
            .iter()
            .filter(|m| m.role == Role::System)
            .flat_map(|m| m.content.lines())
            .find_map(|line| line.trim().strip_prefix(prefix))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn detect_crop(query: &str) -> Option<String> {
        KNOWN_CROPS
            .iter()
            .find(|c| query.contains(*c))
            .map(|c| c.to_string())
    }

    fn choose_tool(query: &str, crop: Option<String>, location: Option<String>) -> (String, serde_json::Value) {
        let has_any = |words: &[&str]| words.iter().any(|w| query.contains(w));
        match (crop, location) {
            (Some(crop), loc) if has_any(&["sow", "harvest", "season", "calendar", "plant", "time"]) => {
                let mut args = json!({ "crop": crop });
                if let Some(l) = loc {
                    args["location"] = json!(l);
                }
                ("get_crop_calendar".to_string(), args)
            }
            (Some(crop), _) if has_any(&["fertilizer", "fertiliser", "npk", "urea", "nutrient"]) => {
                ("get_fertilizer_recommendation".to_string(), json!({ "crop": crop }))
            }
            (Some(crop), Some(loc)) if has_any(&["price", "mandi", "market", "rate", "sell"]) => (
                "get_market_prices".to_string(),
                json!({ "commodity": crop, "location": loc }),
            ),
            (_, Some(loc)) if has_any(&["weather", "rain", "temperature", "forecast"]) => {
                ("get_weather_advisory".to_string(), json!({ "location": loc }))
            }
            _ => (
                "general_agriculture_query".to_string(),
                json!({ "query": query }),
            ),
        }
    }

    fn compose_answer(tool_messages: &[&Message], query: &str) -> String {
        if tool_messages.is_empty() {
            return format!("Here is some general guidance for: {query}. Please consult your local KVK for field-specific advice.");
        }
        let mut out = String::from("Here is what I found:\n");
        for m in tool_messages {
            let preview: String = m.content.chars().take(300).collect();
            out.push_str(&format!(
                "- {}: {}\n",
                m.name.as_deref().unwrap_or("tool"),
                preview
            ));
        }
        out
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, LlmError> {
        let last_user_idx = messages.iter().rposition(|m| m.role == Role::User);
        let query = last_user_idx
            .map(|i| messages[i].content.to_lowercase())
            .unwrap_or_default();
        let tool_results: Vec<&Message> = messages
            .iter()
            .skip(last_user_idx.map(|i| i + 1).unwrap_or(0))
            .filter(|m| m.role == Role::Tool)
            .collect();

        if tools.is_empty() || !tool_results.is_empty() {
            return Ok(ModelReply::Answer(Self::compose_answer(&tool_results, &query)));
        }

        let crop = Self::profile_value(messages, PROFILE_CROP_PREFIX)
            .map(|c| c.to_lowercase())
            .or_else(|| Self::detect_crop(&query));
        let location = Self::profile_value(messages, PROFILE_LOCATION_PREFIX);
        let (name, args) = Self::choose_tool(&query, crop, location);

        if !tools.iter().any(|t| t.name == name) {
            return Ok(ModelReply::Answer(Self::compose_answer(&[], &query)));
        }
        Ok(ModelReply::ToolCalls(vec![ToolCall {
            id: format!("mock_{}", uuid::Uuid::new_v4().simple()),
            name,
            args,
        }]))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：按顺序返回预设回复；脚本耗尽后返回 fallback（若设置）
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    fallback: Option<Result<ModelReply, LlmError>>,
    synthesis: Option<ModelReply>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<ModelReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            synthesis: None,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 便捷构造：只返回一条最终回答
    pub fn answering(answer: &str) -> Self {
        Self::new(vec![Ok(ModelReply::Answer(answer.to_string()))])
    }

    /// 脚本耗尽后每次都返回该结果
    pub fn with_fallback(mut self, reply: Result<ModelReply, LlmError>) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// 不提供工具（强制总结）时返回该回复，不消耗脚本
    pub fn with_synthesis(mut self, reply: ModelReply) -> Self {
        self.synthesis = Some(reply);
        self
    }

    /// 每次调用前等待，用于并发 / 取消测试
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用收到的完整消息序列
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if tools.is_empty() {
            if let Some(reply) = &self.synthesis {
                return Ok(reply.clone());
            }
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(reply) => reply,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string()))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: String::new(),
            parameters: json!({}),
        }
    }

    #[tokio::test]
    async fn test_mock_routes_sowing_question_to_calendar() {
        let messages = vec![
            Message::system(format!("You are KrishiVaani.\n{PROFILE_CROP_PREFIX} wheat\n{PROFILE_LOCATION_PREFIX} Punjab")),
            Message::user("What is the best time to sow wheat in Punjab?"),
        ];
        let tools = vec![spec("get_crop_calendar"), spec("general_agriculture_query")];
        let reply = MockLlmClient.complete(&messages, &tools).await.unwrap();
        match reply {
            ModelReply::ToolCalls(calls) => {
                assert_eq!(calls[0].name, "get_crop_calendar");
                assert_eq!(calls[0].args["crop"], "wheat");
                assert_eq!(calls[0].args["location"], "Punjab");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_answers_after_tool_result() {
        let messages = vec![
            Message::user("when to sow wheat"),
            Message::tool("c1", "get_crop_calendar", r#"{"sowing":"October-November"}"#),
        ];
        let reply = MockLlmClient
            .complete(&messages, &[spec("get_crop_calendar")])
            .await
            .unwrap();
        match reply {
            ModelReply::Answer(text) => assert!(text.contains("October-November")),
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scripted_exhaustion_and_fallback() {
        let client = ScriptedLlmClient::answering("first")
            .with_fallback(Ok(ModelReply::Answer("again".to_string())));
        let tools = vec![spec("x")];
        assert_eq!(client.complete(&[], &tools).await.unwrap(), ModelReply::Answer("first".into()));
        assert_eq!(client.complete(&[], &tools).await.unwrap(), ModelReply::Answer("again".into()));
        assert_eq!(client.calls(), 2);
    }
}
