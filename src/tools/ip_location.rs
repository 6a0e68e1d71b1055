//! IP address to city lookup (simulated)

use super::{
    as_object, required_text, simulate_latency, ExecutionError, SchemaValidationError, Tool,
    ToolContext, ToolOutput,
};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::time::Duration;

const NAME: &str = "ipToLocation";
const DEFAULT_DELAY: Duration = Duration::from_millis(1500);

/// Well-known public resolvers; everything else is treated as domestic.
pub const PUBLIC_IPS: &[&str] = &["8.8.8.8", "1.1.1.1", "208.67.222.222"];

pub const INTERNATIONAL_CITIES: &[&str] = &["纽约", "伦敦", "东京", "悉尼", "巴黎", "柏林"];

pub const DOMESTIC_CITIES: &[&str] = &[
    "北京", "上海", "广州", "深圳", "杭州", "成都", "西安", "武汉",
];

pub struct IpLocationTool {
    delay: Duration,
}

impl IpLocationTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for IpLocationTool {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

/// Pick a city for `ip`. Known public IPs land abroad.
pub fn locate<R: Rng + ?Sized>(ip: &str, rng: &mut R) -> &'static str {
    let pool = if PUBLIC_IPS.contains(&ip) {
        INTERNATIONAL_CITIES
    } else {
        DOMESTIC_CITIES
    };
    pool.choose(rng).copied().unwrap_or("北京")
}

#[async_trait]
impl Tool for IpLocationTool {
    fn name(&self) -> &'static str {
        NAME
    }

    fn display_name(&self) -> &'static str {
        "IP地址转地理位置"
    }

    fn description(&self) -> String {
        "Convert an IP address to its geographical location. Use this when user asks about IP location or weather for an IP address.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ip"],
            "properties": {
                "ip": {
                    "type": "string",
                    "description": "The IP address to lookup (e.g., 192.168.1.1, 8.8.8.8)"
                }
            }
        })
    }

    fn validate(&self, input: &Value) -> Result<Value, SchemaValidationError> {
        let args = as_object(NAME, input)?;
        let ip = required_text(NAME, "ip", args.get("ip"))?;
        Ok(json!({ "ip": ip }))
    }

    fn cancellation_message(&self) -> String {
        "用户取消了 IP 地理位置查询".to_string()
    }

    fn failure_message(&self) -> String {
        "IP 地理位置查询失败，请稍后重试。".to_string()
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> Result<ToolOutput, ExecutionError> {
        let input = self
            .validate(&input)
            .map_err(|e| ExecutionError::new(NAME, e.to_string()))?;
        let ip = input["ip"].as_str().unwrap_or_default().to_string();

        simulate_latency(self.delay, &ctx, NAME).await?;

        let location = locate(&ip, &mut rand::thread_rng());
        tracing::debug!(conv_id = %ctx.conversation_id, %ip, location, "IP located");

        Ok(
            ToolOutput::new(format!("IP 地址 {ip} 的地理位置是：{location}")).with_display(json!({
                "type": "ip_location",
                "ip": ip,
                "location": location,
                "follow_up": format!("查询 {location} 的天气情况"),
            })),
        )
    }
}
