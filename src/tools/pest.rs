//! 病虫害信息工具：调用病虫害服务 `GET /api/pest`

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::http::AdvisoryHttpClient;
use crate::tools::sanitize::{sanitize_crop, sanitize_name, sanitize_optional};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::ToolHandler;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PestArgs {
    /// 害虫或病害名
    pub pest_name: String,
    /// 可选：受害作物
    pub crop: Option<String>,
}

impl PestArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let raw: PestArgs = parse_args(args)?;
        Ok(Self {
            pest_name: sanitize_name("pest_name", &raw.pest_name)?,
            crop: sanitize_optional("crop", raw.crop.as_deref(), sanitize_crop)?,
        })
    }
}

pub struct PestTool {
    client: AdvisoryHttpClient,
}

impl PestTool {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            client: AdvisoryHttpClient::new("pest", base_url, timeout_secs),
        }
    }
}

#[async_trait]
impl ToolHandler for PestTool {
    fn name(&self) -> &str {
        "get_pest_information"
    }

    fn description(&self) -> &str {
        "Get information about agricultural pests, diseases, and their management. Use this when the user asks about pest identification, pest control, disease management, or pesticide recommendations."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PestArgs>()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        PestArgs::parse(args).map(|_| ())
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = PestArgs::parse(&args)?;
        let mut query = vec![("pest", args.pest_name)];
        if let Some(crop) = args.crop {
            query.push(("crop", crop));
        }
        self.client.get_json("/api/pest", &query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_execute_sends_pest_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/pest"))
            .and(query_param("pest", "pink bollworm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"control": "pheromone traps"})))
            .mount(&server)
            .await;

        let tool = PestTool::new(&server.uri(), 5);
        let out = tool.execute(json!({"pest_name": "pink  bollworm"})).await.unwrap();
        assert!(out.contains("pheromone traps"));
    }

    #[test]
    fn test_validate_requires_pest_name() {
        let tool = PestTool::new("http://localhost:1", 1);
        assert!(tool.validate(&json!({"crop": "cotton"})).is_err());
    }
}
