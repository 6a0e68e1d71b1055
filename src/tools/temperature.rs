//! Fahrenheit to Celsius conversion

use super::{
    as_object, simulate_latency, ExecutionError, SchemaValidationError, Tool, ToolContext,
    ToolOutput,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const NAME: &str = "convertFahrenheitToCelsius";
const DEFAULT_DELAY: Duration = Duration::from_millis(1000);
const UNKNOWN_LOCATION: &str = "Unknown";

pub struct ConvertTemperatureTool {
    delay: Duration,
}

impl ConvertTemperatureTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ConvertTemperatureTool {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

/// Whole degrees Celsius, halves rounded up
#[allow(clippy::cast_possible_truncation)]
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> i64 {
    ((fahrenheit - 32.0) * 5.0 / 9.0 + 0.5).floor() as i64
}

/// Whole degrees go out as JSON integers so panels show `98`, not `98.0`
#[allow(clippy::cast_possible_truncation)]
fn degrees_json(value: f64) -> Value {
    if value.fract().abs() < f64::EPSILON && value.abs() < 1e15 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

/// Accepts `75`, `"75"`, `"75°F"` and `"75 F"`
fn parse_temperature(value: Option<&Value>) -> Result<f64, SchemaValidationError> {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            let trimmed = trimmed
                .strip_suffix("°F")
                .or_else(|| trimmed.strip_suffix('F'))
                .unwrap_or(trimmed);
            trimmed.trim().parse::<f64>().ok()
        }
        None => {
            return Err(SchemaValidationError::invalid(
                NAME,
                "missing required field `temperature`",
            ))
        }
        Some(_) => None,
    };
    match parsed {
        Some(t) if t.is_finite() => Ok(t),
        _ => Err(SchemaValidationError::invalid(
            NAME,
            "`temperature` must be a number",
        )),
    }
}

#[async_trait]
impl Tool for ConvertTemperatureTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "温度转换"
    }

    fn description(&self) -> String {
        "Convert temperature from Fahrenheit to Celsius. Use this when user wants temperature in Celsius or mentions 摄氏度.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["temperature"],
            "properties": {
                "temperature": {
                    "type": "number",
                    "description": "Temperature in Fahrenheit to convert"
                },
                "location": {
                    "type": "string",
                    "description": "Location context for the temperature"
                }
            }
        })
    }

    fn validate(&self, input: &Value) -> Result<Value, SchemaValidationError> {
        let args = as_object(NAME, input)?;
        let temperature = parse_temperature(args.get("temperature"))?;
        let location = match args.get("location") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(other) => {
                return Err(SchemaValidationError::invalid(
                    NAME,
                    format!("`location` must be a string, got {other}"),
                ))
            }
        };

        let mut normalized = json!({ "temperature": temperature });
        if let Some(location) = location {
            normalized["location"] = Value::String(location);
        }
        Ok(normalized)
    }

    fn cancellation_message(&self) -> String {
        "用户取消了温度转换".to_string()
    }

    fn failure_message(&self) -> String {
        "温度转换失败，请稍后重试。".to_string()
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<ToolOutput, ExecutionError> {
        let input = self
            .validate(&input)
            .map_err(|e| ExecutionError::new(NAME, e.to_string()))?;
        let fahrenheit = input["temperature"]
            .as_f64()
            .ok_or_else(|| ExecutionError::new(NAME, "temperature missing after validation"))?;
        let location = input["location"]
            .as_str()
            .unwrap_or(UNKNOWN_LOCATION)
            .to_string();

        simulate_latency(self.delay, &ctx, NAME).await?;

        let celsius = fahrenheit_to_celsius(fahrenheit);

        Ok(
            ToolOutput::new(format!("{fahrenheit}°F 转换为摄氏度是 {celsius}°C")).with_display(
                json!({
                    "type": "temperature_conversion",
                    "location": location,
                    "original_temp": degrees_json(fahrenheit),
                    "converted_temp": celsius,
                }),
            ),
        )
    }
}
