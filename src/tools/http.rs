//! 外部咨询服务（天气 / 病虫害 / 市场价格）的共享 HTTP 客户端

use std::time::Duration;

use reqwest::Client;

/// 以 GET + 查询参数访问 `{base_url}{path}`，返回 JSON 文本
#[derive(Clone)]
pub struct AdvisoryHttpClient {
    http: Client,
    base_url: String,
    service: &'static str,
}

impl AdvisoryHttpClient {
    pub fn new(service: &'static str, base_url: &str, timeout_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 请求失败或非 2xx 时返回可反馈给模型的错误文本
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<String, String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| format!("{} service unavailable: {e}", self.service))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(service = self.service, status = status.as_u16(), "advisory service error");
            return Err(format!("{} service returned HTTP {}", self.service, status.as_u16()));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("{} service returned invalid JSON: {e}", self.service))?;
        Ok(value.to_string())
    }
}
