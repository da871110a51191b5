//! 工具层：注册表、分发器与农业咨询工具

pub mod calendar;
pub mod executor;
pub mod fertilizer;
pub mod general;
pub mod http;
pub mod market;
pub mod pest;
pub mod registry;
pub mod sanitize;
pub mod schema;
pub mod weather;

pub use calendar::CropCalendarTool;
pub use executor::{ToolDispatcher, ToolResult};
pub use fertilizer::FertilizerTool;
pub use general::GeneralQueryTool;
pub use market::MarketTool;
pub use pest::PestTool;
pub use registry::{ToolHandler, ToolRegistry, ToolSpec};
pub use weather::WeatherTool;

use crate::config::ToolsSection;

/// 默认工具集：天气 / 病虫害 / 市场价格走外部服务，施肥 / 日历 / 通用问题本地处理
pub fn default_registry(cfg: &ToolsSection) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(WeatherTool::new(&cfg.weather_api_url, cfg.timeout_secs));
    registry.register(PestTool::new(&cfg.pest_api_url, cfg.timeout_secs));
    registry.register(MarketTool::new(&cfg.market_api_url, cfg.timeout_secs));
    registry.register(FertilizerTool);
    registry.register(CropCalendarTool);
    registry.register(GeneralQueryTool);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_six_tools() {
        let registry = default_registry(&ToolsSection::default());
        assert_eq!(
            registry.tool_names(),
            vec![
                "general_agriculture_query",
                "get_crop_calendar",
                "get_fertilizer_recommendation",
                "get_market_prices",
                "get_pest_information",
                "get_weather_advisory",
            ]
        );
        for spec in registry.specs() {
            assert_eq!(spec.parameters["type"], "object", "{}", spec.name);
        }
    }
}
