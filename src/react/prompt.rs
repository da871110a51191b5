//! Prompt 组装：系统提示 + 农户资料 + 检索上下文 + 历史 + 当前问题

use crate::llm::Message;
use crate::session::{Turn, TurnRole};

pub const PROFILE_LANGUAGE_PREFIX: &str = "Preferred language:";
pub const PROFILE_LOCATION_PREFIX: &str = "Farmer location:";
pub const PROFILE_CROP_PREFIX: &str = "Farmer crop:";

/// 历史中旧工具结果的截断长度
const HISTORY_TOOL_PREVIEW_CHARS: usize = 500;

pub const AGENT_SYSTEM_PROMPT: &str = "You are KrishiVaani, an expert agricultural advisor for Indian farmers.

Your role:
- Provide practical, actionable farming advice
- Use simple language that farmers can understand
- Consider local conditions, seasons, and traditional practices
- Recommend government schemes when relevant (PM-KISAN, crop insurance, etc.)
- Always prioritize sustainable and cost-effective solutions

Guidelines:
- If asked about weather, use the weather tool
- If asked about pests or diseases, use the pest information tool
- If asked about prices, use the market prices tool
- If asked about fertilizers, use the fertilizer recommendation tool
- If asked about timing/seasons, use the crop calendar tool
- For general queries, use the general agriculture query tool

Always be respectful and supportive. Many farmers face difficult conditions.
Respond in the same language as the user's question when possible.";

pub const SPEECH_SYSTEM_PROMPT: &str = "You are KrishiVaani, a helpful agricultural advisor for Indian farmers.
Provide practical, actionable farming advice in simple language.
Consider local conditions, seasons, and cost-effective solutions.
Keep responses concise and helpful; the answer will be read aloud, so avoid tables, lists and markdown.
Respond in the same language as the question.";

pub const SYNTHESIS_PROMPT: &str = "No more tools are available for this question. \
Using only the information gathered above, give the farmer your best final answer now.";

/// 请求中携带的农户资料
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FarmerProfile {
    pub language: Option<String>,
    pub location: Option<String>,
    pub crop: Option<String>,
}

impl FarmerProfile {
    fn render(&self) -> String {
        [
            (PROFILE_LANGUAGE_PREFIX, self.language.as_deref()),
            (PROFILE_LOCATION_PREFIX, self.location.as_deref()),
            (PROFILE_CROP_PREFIX, self.crop.as_deref()),
        ]
        .into_iter()
        .filter_map(|(prefix, v)| v.map(|v| format!("{prefix} {v}")))
        .collect::<Vec<_>>()
        .join("\n")
    }
}

/// 组装发给模型的消息序列
pub fn build_messages(
    system_prompt: &str,
    profile: &FarmerProfile,
    context: &str,
    history: &[Turn],
    query: &str,
) -> Vec<Message> {
    let mut system = system_prompt.to_string();
    let profile = profile.render();
    if !profile.is_empty() {
        system.push_str("\n\nFarmer profile:\n");
        system.push_str(&profile);
    }
    if !context.is_empty() {
        system.push_str(
            "\n\nRelevant information from the knowledge base (prefer it when it applies; \
             say so if it does not cover the question):\n",
        );
        system.push_str(context);
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().map(history_message));
    messages.push(Message::user(query));
    messages
}

/// 旧的工具结果不能作为 tool 消息重放（缺少对应的 tool_calls），改写成助手备注
fn history_message(turn: &Turn) -> Message {
    match turn.role {
        TurnRole::User => Message::user(turn.content.clone()),
        TurnRole::Assistant => Message::assistant(turn.content.clone()),
        TurnRole::Tool => {
            let preview: String = turn.content.chars().take(HISTORY_TOOL_PREVIEW_CHARS).collect();
            Message::assistant(format!(
                "(earlier result from {}: {preview})",
                turn.tool_name.as_deref().unwrap_or("tool")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use serde_json::json;

    #[test]
    fn test_messages_layout() {
        let profile = FarmerProfile {
            language: None,
            location: Some("Punjab".into()),
            crop: Some("wheat".into()),
        };
        let history = vec![
            Turn::user("q0"),
            Turn::tool_success("c0", "get_crop_calendar", json!({"crop": "wheat"}), "{\"season\":\"Rabi\"}".into()),
            Turn::assistant("a0"),
        ];
        let messages = build_messages(AGENT_SYSTEM_PROMPT, &profile, "[Context 1]\nsow early", &history, "q1");

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("Farmer location: Punjab"));
        assert!(messages[0].content.contains("Farmer crop: wheat"));
        assert!(!messages[0].content.contains(PROFILE_LANGUAGE_PREFIX));
        assert!(messages[0].content.contains("sow early"));
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(messages[2].content.contains("get_crop_calendar"));
        assert_eq!(messages[4].content, "q1");
    }

    #[test]
    fn test_no_context_section_without_context() {
        let messages = build_messages(SPEECH_SYSTEM_PROMPT, &FarmerProfile::default(), "", &[], "q");
        assert!(!messages[0].content.contains("knowledge base"));
        assert!(!messages[0].content.contains("Farmer profile"));
        assert_eq!(messages.len(), 2);
    }
}
