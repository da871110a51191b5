//! 市场（mandi）价格工具：调用市场服务 `GET /api/market`

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::http::AdvisoryHttpClient;
use crate::tools::sanitize::{sanitize_crop, sanitize_name};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::ToolHandler;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MarketArgs {
    /// 作物 / 商品名，如 wheat、rice、tomato
    pub commodity: String,
    /// 市场所在地或邦名
    pub location: String,
}

impl MarketArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let raw: MarketArgs = parse_args(args)?;
        Ok(Self {
            commodity: sanitize_crop("commodity", &raw.commodity)?,
            location: sanitize_name("location", &raw.location)?,
        })
    }
}

pub struct MarketTool {
    client: AdvisoryHttpClient,
}

impl MarketTool {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            client: AdvisoryHttpClient::new("market", base_url, timeout_secs),
        }
    }
}

#[async_trait]
impl ToolHandler for MarketTool {
    fn name(&self) -> &str {
        "get_market_prices"
    }

    fn description(&self) -> &str {
        "Get current market prices (mandi prices) for agricultural commodities. Use this when the user asks about crop prices, mandi rates, selling prices, or market information."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<MarketArgs>()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        MarketArgs::parse(args).map(|_| ())
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = MarketArgs::parse(&args)?;
        self.client
            .get_json(
                "/api/market",
                &[("commodity", args.commodity), ("location", args.location)],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_execute_lowercases_commodity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/market"))
            .and(query_param("commodity", "onion"))
            .and(query_param("location", "Nashik"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"modal_price": 1800})))
            .mount(&server)
            .await;

        let tool = MarketTool::new(&server.uri(), 5);
        let out = tool
            .execute(json!({"commodity": "Onion", "location": "Nashik"}))
            .await
            .unwrap();
        assert!(out.contains("1800"));
    }

    #[test]
    fn test_validate_requires_both_fields() {
        let tool = MarketTool::new("http://localhost:1", 1);
        assert!(tool.validate(&json!({"commodity": "onion"})).is_err());
        assert!(tool.validate(&json!({"commodity": "onion", "location": "Nashik"})).is_ok());
    }
}
