//! Current temperature for a location (simulated)

use super::{
    as_object, required_text, simulate_latency, ExecutionError, SchemaValidationError, Tool,
    ToolContext, ToolOutput,
};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::ops::RangeInclusive;
use std::time::Duration;

const NAME: &str = "weather";
const DEFAULT_DELAY: Duration = Duration::from_millis(2000);

/// Fahrenheit range every reading falls in
pub const TEMPERATURE_RANGE_F: RangeInclusive<i64> = 32..=90;

pub struct WeatherTool {
    delay: Duration,
}

impl WeatherTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

pub fn sample_temperature<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    rng.gen_range(TEMPERATURE_RANGE_F)
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "获取天气信息"
    }

    fn description(&self) -> String {
        "Get weather information for a specific location. Use this when user asks about weather conditions.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["location"],
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The location to get weather for (e.g., Beijing, New York, London)"
                }
            }
        })
    }

    fn validate(&self, input: &Value) -> Result<Value, SchemaValidationError> {
        let args = as_object(NAME, input)?;
        let location = required_text(NAME, "location", args.get("location"))?;
        Ok(json!({ "location": location }))
    }

    fn cancellation_message(&self) -> String {
        "用户取消了天气查询".to_string()
    }

    fn failure_message(&self) -> String {
        "获取天气信息失败，请稍后重试。".to_string()
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<ToolOutput, ExecutionError> {
        let input = self
            .validate(&input)
            .map_err(|e| ExecutionError::new(NAME, e.to_string()))?;
        let location = input["location"].as_str().unwrap_or_default().to_string();

        simulate_latency(self.delay, &ctx, NAME).await?;

        let temperature = sample_temperature(&mut rand::thread_rng());

        Ok(
            ToolOutput::new(format!("{location} 的当前温度是 {temperature}°F")).with_display(
                json!({
                    "type": "weather",
                    "location": location,
                    "temperature_f": temperature,
                    "follow_up": format!("请将 {temperature} 华氏度转换为摄氏度，位置是 {location}"),
                }),
            ),
        )
    }
}
