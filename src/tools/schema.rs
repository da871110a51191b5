//! 工具参数的 JSON Schema 生成与解析
//!
//! 每个工具的参数是一个带 `JsonSchema` 的结构体：schemars 生成给模型看的 schema，
//! serde 负责解析（同时也是最基本的校验：类型、必填、未知字段）。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 由参数结构体生成 JSON Schema（去掉 `$schema` / `title`，模型只需要对象结构）
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 将模型给出的参数解析为结构体；参数必须是 JSON 对象
pub fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, String> {
    if !args.is_object() {
        return Err(format!("arguments must be a JSON object, got {}", preview(args)));
    }
    serde_json::from_value(args.clone()).map_err(|e| e.to_string())
}

fn preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 80 {
        format!("{}...", s.chars().take(80).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    /// 测试用参数
    #[derive(Debug, Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct Args {
        /// 作物名
        crop: String,
        location: Option<String>,
    }

    #[test]
    fn test_schema_lists_required_fields() {
        let schema = schema_of::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["crop"].is_object());
        assert_eq!(schema["required"], json!(["crop"]));
        assert!(schema.get("$schema").is_none());
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args::<Args>(&json!({"crop": "wheat"})).is_ok());
        assert!(parse_args::<Args>(&json!({})).unwrap_err().contains("crop"));
        assert!(parse_args::<Args>(&json!({"crop": 5})).is_err());
        assert!(parse_args::<Args>(&json!({"crop": "wheat", "extra": 1})).is_err());
        assert!(parse_args::<Args>(&Value::String("not json".into())).is_err());
    }
}
