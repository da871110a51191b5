//! 工具注册表
//!
//! 所有工具实现 ToolHandler（name / description / parameters_schema / validate / execute），
//! 由 ToolRegistry 按名注册与查找；ToolDispatcher 在调用前校验参数，调用时加超时与重试。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// 提供给模型的工具规格（Chat Completions 的 function 定义）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

/// 工具处理器
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// 工具名称（模型 tool call 中的 function.name）
    fn name(&self) -> &str;

    /// 工具描述（供模型判断何时调用）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 校验参数；失败时处理函数不会被调用
    fn validate(&self, _args: &Value) -> Result<(), String> {
        Ok(())
    }

    /// 执行工具，返回给模型的文本（通常是 JSON）
    async fn execute(&self, args: Value) -> Result<String, String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// 工具注册表：启动时填充，之后只读（以 Arc 共享）
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名再次注册会覆盖旧的绑定
    pub fn register(&mut self, tool: impl ToolHandler + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn ToolHandler>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "tool re-registered, previous binding replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 按名称排序，保证发给模型的工具列表稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, &'static str);

    #[async_trait]
    impl ToolHandler for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "fixed"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(self.1.to_string())
        }
    }

    #[tokio::test]
    async fn test_register_overwrites_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Fixed("a", "first"));
        registry.register(Fixed("a", "second"));
        assert_eq!(registry.len(), 1);
        let out = registry.get("a").unwrap().execute(Value::Null).await.unwrap();
        assert_eq!(out, "second");
    }

    #[test]
    fn test_specs_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Fixed("zeta", ""));
        registry.register(Fixed("alpha", ""));
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(registry.get("missing").is_none());
    }
}
