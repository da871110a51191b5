//! 天气与农事建议工具：调用天气服务 `GET /api/weather`

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
pub struct WeatherArgs {
    /// 印度的城市或村庄名
    pub location: String,
    /// 可选：作物名，用于作物相关的建议
    pub crop: Option<String>,
}

impl WeatherArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let raw: WeatherArgs = parse_args(args)?;
        Ok(Self {
            location: sanitize_name("location", &raw.location)?,
            crop: sanitize_optional("crop", raw.crop.as_deref(), sanitize_crop)?,
        })
    }
}

pub struct WeatherTool {
    client: AdvisoryHttpClient,
}

impl WeatherTool {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            client: AdvisoryHttpClient::new("weather", base_url, timeout_secs),
        }
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    fn name(&self) -> &str {
        "get_weather_advisory"
    }

    fn description(&self) -> &str {
        "Get weather information and agricultural advisory for a location. Use this when the user asks about weather, climate, rainfall, temperature, or needs weather-based farming advice."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WeatherArgs>()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        WeatherArgs::parse(args).map(|_| ())
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = WeatherArgs::parse(&args)?;
        let mut query = vec![("location", args.location)];
        if let Some(crop) = args.crop {
            query.push(("crop", crop));
        }
        self.client.get_json("/api/weather", &query).await
    }
}
