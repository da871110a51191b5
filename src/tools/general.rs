//! 通用农业问题：不查任何数据源，只给模型一段作答框架

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parse_args, schema_of};
use crate::tools::ToolHandler;

const MAX_QUERY_CHARS: usize = 1000;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GeneralArgs {
    /// 用户的农业问题
    pub query: String,
}

impl GeneralArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let raw: GeneralArgs = parse_args(args)?;
        let query = raw.query.trim();
        if query.is_empty() {
            return Err("`query` must not be empty".to_string());
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(format!("`query` exceeds {MAX_QUERY_CHARS} characters"));
        }
        Ok(Self {
            query: query.to_string(),
        })
    }
}

#[derive(Debug, Default)]
pub struct GeneralQueryTool;

#[async_trait]
impl ToolHandler for GeneralQueryTool {
    fn name(&self) -> &str {
        "general_agriculture_query"
    }

    fn description(&self) -> &str {
        "Handle general agricultural queries that don't fit other specific tools. Use this for questions about farming techniques, government schemes, organic farming, irrigation methods, seed selection, etc."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<GeneralArgs>()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        GeneralArgs::parse(args).map(|_| ())
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = GeneralArgs::parse(&args)?;
        Ok(format!(
            "Please provide helpful agricultural advice for: {}. Include practical tips relevant to Indian farmers.",
            args.query
        ))
    }
}
