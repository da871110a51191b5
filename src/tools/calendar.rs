//! 作物日历工具：播种 / 收获时间与农事安排（静态表）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::sanitize::{sanitize_crop, sanitize_name, sanitize_optional};
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::ToolHandler;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CalendarArgs {
    /// 作物名
    pub crop: String,
    /// 地区（用于区域日历）
    pub location: Option<String>,
}

impl CalendarArgs {
    fn parse(args: &Value) -> Result<Self, String> {
        let raw: CalendarArgs = parse_args(args)?;
        Ok(Self {
            crop: sanitize_crop("crop", &raw.crop)?,
            location: sanitize_optional("location", raw.location.as_deref(), sanitize_name)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct CropCalendar {
    season: &'static str,
    sowing: &'static str,
    harvesting: &'static str,
    duration: &'static str,
    activities: &'static [&'static str],
}

fn calendar_for(crop: &str) -> Option<CropCalendar> {
    let cal = match crop {
        "wheat" => CropCalendar {
            season: "Rabi",
            sowing: "October-November",
            harvesting: "March-April",
            duration: "120-150 days",
            activities: &[
                "Land preparation: September-October",
                "Sowing: October 15 - November 15",
                "First irrigation: 20-25 days after sowing",
                "Top dressing: 30-35 days after sowing",
                "Harvesting: March-April",
            ],
        },
        "rice" | "paddy" => CropCalendar {
            season: "Kharif",
            sowing: "June-July (transplanting)",
            harvesting: "October-November",
            duration: "120-150 days",
            activities: &[
                "Nursery: May-June",
                "Transplanting: June-July",
                "Weeding: 20-40 days after transplanting",
                "Top dressing: Tillering and panicle stages",
                "Harvesting: October-November",
            ],
        },
        "cotton" => CropCalendar {
            season: "Kharif",
            sowing: "April-May",
            harvesting: "October-January",
            duration: "150-180 days",
            activities: &[
                "Land preparation: March-April",
                "Sowing: April-May",
                "Thinning: 15-20 days after sowing",
                "First picking: October",
                "Multiple pickings till January",
            ],
        },
        _ => return None,
    };
    Some(cal)
}

pub fn lookup(args: &CalendarArgs) -> Value {
    match calendar_for(&args.crop) {
        Some(cal) => {
            let mut v = json!(cal);
            v["crop"] = json!(args.crop);
            v["location"] = json!(args
                .location
                .as_deref()
                .unwrap_or("North India (adjust for your region)"));
            v
        }
        None => json!({
            "crop": args.crop,
            "message": "Crop calendar not available. Please consult local agricultural department.",
            "general_tip": "Kharif crops: June-October, Rabi crops: October-March, Zaid crops: March-June",
        }),
    }
}

#[derive(Debug, Default)]
pub struct CropCalendarTool;

#[async_trait]
impl ToolHandler for CropCalendarTool {
    fn name(&self) -> &str {
        "get_crop_calendar"
    }

    fn description(&self) -> &str {
        "Get crop calendar and seasonal farming activities. Use this when the user asks about sowing time, harvesting time, crop seasons, or farming schedule."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CalendarArgs>()
    }

    fn validate(&self, args: &Value) -> Result<(), String> {
        CalendarArgs::parse(args).map(|_| ())
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args = CalendarArgs::parse(&args)?;
        Ok(lookup(&args).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wheat_is_rabi() {
        let out = CropCalendarTool
            .execute(json!({"crop": "wheat", "location": "Punjab"}))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["season"], "Rabi");
        assert_eq!(v["sowing"], "October-November");
        assert_eq!(v["location"], "Punjab");
        assert_eq!(v["activities"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_crop_falls_back_to_seasons() {
        let out = CropCalendarTool.execute(json!({"crop": "mustard"})).await.unwrap();
        assert!(out.contains("Zaid crops"));
    }

    #[test]
    fn test_schema_requires_crop() {
        let schema = CropCalendarTool.parameters_schema();
        assert_eq!(schema["required"], json!(["crop"]));
    }
}
