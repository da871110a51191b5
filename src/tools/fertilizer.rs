//! 施肥建议工具：按作物查静态 NPK 推荐表

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::sanitize::{sanitize_crop, sanitize_name, sanitize_optional};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::ToolHandler;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FertilizerArgs {
    /// 作物名
    pub crop: String,
    /// 土壤类型，如 clay、sandy、loamy
    pub soil_type: Option<String>,
    /// 地区
    pub location: Option<String>,
}

impl FertilizerArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let raw: FertilizerArgs = parse_args(args)?;
        Ok(Self {
            crop: sanitize_crop("crop", &raw.crop)?,
            soil_type: sanitize_optional("soil_type", raw.soil_type.as_deref(), sanitize_name)?,
            location: sanitize_optional("location", raw.location.as_deref(), sanitize_name)?,
        })
    }
}

/// (作物, 基肥, 施用时机, 微量元素)
const RECOMMENDATIONS: &[(&str, &str, &str, &str)] = &[
    (
        "wheat",
        "NPK 120:60:40 kg/ha",
        "Apply 50% N + full P + full K at sowing, remaining N in 2 splits",
        "Zinc sulfate 25 kg/ha if deficient",
    ),
    (
        "rice",
        "NPK 120:60:60 kg/ha",
        "Apply 50% N + full P + full K at transplanting",
        "Zinc sulfate 25 kg/ha in zinc deficient soils",
    ),
    (
        "cotton",
        "NPK 150:60:60 kg/ha",
        "Apply in 3-4 splits during crop growth",
        "Boron and Magnesium sprays during flowering",
    ),
    (
        "sugarcane",
        "NPK 250:60:60 kg/ha",
        "Apply N in 3 splits, P and K at planting",
        "Iron and Zinc if deficient",
    ),
    (
        "tomato",
        "NPK 120:60:60 kg/ha",
        "Basal dose + top dressing at flowering",
        "Calcium for preventing blossom end rot",
    ),
];

pub fn recommend(args: &FertilizerArgs) -> Value {
    match RECOMMENDATIONS.iter().find(|(crop, ..)| *crop == args.crop) {
        Some((_, base, timing, micro)) => json!({
            "crop": args.crop,
            "recommendation": {
                "base": base,
                "timing": timing,
                "micronutrients": micro,
            },
            "soil_type": args.soil_type.as_deref().unwrap_or("general"),
            "location": args.location.as_deref().unwrap_or("India"),
            "note": "Get soil tested for precise recommendations. Contact your local KVK for detailed advice.",
        }),
        None => json!({
            "crop": args.crop,
            "recommendation": "General NPK 100:50:50 kg/ha as base. Adjust based on soil test.",
            "note": "For specific recommendations, please consult your local agricultural officer or KVK.",
        }),
    }
}

#[derive(Debug, Default)]
pub struct FertilizerTool;

#[async_trait]
impl ToolHandler for FertilizerTool {
    fn name(&self) -> &str {
        "get_fertilizer_recommendation"
    }

    fn description(&self) -> &str {
        "Get fertilizer recommendations for crops based on soil type and region. Use this when the user asks about fertilizers, nutrients, soil health, or crop nutrition."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FertilizerArgs>()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        FertilizerArgs::parse(args).map(|_| ())
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = FertilizerArgs::parse(&args)?;
        Ok(recommend(&args).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_crop_uses_table() {
        let out = FertilizerTool
            .execute(json!({"crop": "Wheat", "soil_type": "loamy"}))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["recommendation"]["base"], "NPK 120:60:40 kg/ha");
        assert_eq!(v["soil_type"], "loamy");
        assert_eq!(v["location"], "India");
    }

    #[tokio::test]
    async fn test_unknown_crop_gets_generic_advice() {
        let out = FertilizerTool.execute(json!({"crop": "millet"})).await.unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert!(v["recommendation"].as_str().unwrap().contains("100:50:50"));
    }
}
