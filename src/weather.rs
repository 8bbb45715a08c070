//! National Weather Service tool handlers and the paced HTTP fetcher.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::server::ToolHandler;
use crate::mcp::ToolDescriptor;

pub const NWS_API_BASE: &str = "https://api.weather.gov";

/// Blanket pacing delay applied before every upstream call, independent of
/// server feedback.
const PACING_DELAY: Duration = Duration::from_millis(500);

/// Wait applied on a 429 without a Retry-After header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Total attempts per URL, counting the first. A persistently rate-limited
/// upstream surfaces as `RateLimitExceeded` instead of retrying forever.
const MAX_ATTEMPTS: u32 = 3;

/// Continental-US bounding box enforced by the forecast input schema.
const LAT_MIN: f64 = 24.6;
const LAT_MAX: f64 = 49.4;
const LON_MIN: f64 = -125.0;
const LON_MAX: f64 = -66.9;

const BLOCK_SEPARATOR: &str = "\n---\n";

/// Rate-limited GET client for the NWS API.
pub struct NwsClient {
    http: reqwest::Client,
}

impl NwsClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                "toolchat-weather/",
                env!("CARGO_PKG_VERSION"),
                " (toolchat@example.com)"
            ))
            .build()
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        Ok(Self { http })
    }

    /// GET `url` as GeoJSON, pacing every attempt and honoring Retry-After on
    /// 429 up to the attempt budget.
    pub async fn fetch_json(&self, url: &str) -> Result<Value> {
        for attempt in 1..=MAX_ATTEMPTS {
            tokio::time::sleep(PACING_DELAY).await;

            let response = self
                .http
                .get(url)
                .header(reqwest::header::ACCEPT, "application/geo+json")
                .send()
                .await
                .map_err(|e| Error::ConnectionFailed(format!("GET {url}: {e}")))?;

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                // No point backing off when there is no attempt left to spend.
                if attempt < MAX_ATTEMPTS {
                    let wait = retry_after(response.headers());
                    warn!(url, attempt, wait_secs = wait.as_secs(), "rate limited, backing off");
                    tokio::time::sleep(wait).await;
                }
                continue;
            }
            if !status.is_success() {
                return Err(Error::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            debug!(url, attempt, "fetched");
            return response
                .json()
                .await
                .map_err(|e| Error::Protocol(format!("malformed response from {url}: {e}")));
        }

        Err(Error::RateLimitExceeded {
            url: url.to_string(),
            attempts: MAX_ATTEMPTS,
        })
    }
}

/// Parse a Retry-After header as whole seconds, defaulting when absent or
/// unparseable. HTTP-date forms fall back to the default too.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// `get-alerts`: active weather alerts for a two-letter US state code.
pub struct AlertsTool {
    client: Arc<NwsClient>,
}

impl AlertsTool {
    pub fn new(client: Arc<NwsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for AlertsTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "get-alerts".to_string(),
            description: "Get active weather alerts for a US state".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "state": {
                        "type": "string",
                        "description": "Two-letter state code (e.g. CA, NY)",
                        "minLength": 2,
                        "maxLength": 2,
                    },
                },
                "required": ["state"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let state = arguments
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();

        let url = format!("{NWS_API_BASE}/alerts/active/area/{state}");
        match self.client.fetch_json(&url).await {
            Ok(data) => Ok(format_alerts(&data, &state)),
            Err(e) => {
                warn!(state, error = %e, "alerts fetch failed");
                Ok(format!("Failed to retrieve alerts data for {state}."))
            }
        }
    }
}

/// `get-forecast`: short-term forecast for a continental-US coordinate.
pub struct ForecastTool {
    client: Arc<NwsClient>,
}

impl ForecastTool {
    pub fn new(client: Arc<NwsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for ForecastTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "get-forecast".to_string(),
            description: "Get the weather forecast for a location in the continental US"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "latitude": {
                        "type": "number",
                        "description": "Latitude of the location",
                        "minimum": LAT_MIN,
                        "maximum": LAT_MAX,
                    },
                    "longitude": {
                        "type": "number",
                        "description": "Longitude of the location",
                        "minimum": LON_MIN,
                        "maximum": LON_MAX,
                    },
                },
                "required": ["latitude", "longitude"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let latitude = arguments
            .get("latitude")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        let longitude = arguments
            .get("longitude")
            .and_then(Value::as_f64)
            .unwrap_or_default();

        let points_url = format!("{NWS_API_BASE}/points/{latitude:.4},{longitude:.4}");
        let points = match self.client.fetch_json(&points_url).await {
            Ok(data) => data,
            Err(e) => {
                warn!(latitude, longitude, error = %e, "points fetch failed");
                return Ok(format!(
                    "Failed to retrieve grid point data for {latitude}, {longitude}."
                ));
            }
        };

        let Some(forecast_url) = points
            .pointer("/properties/forecast")
            .and_then(Value::as_str)
        else {
            return Ok(format!(
                "Failed to get forecast URL for {latitude}, {longitude}."
            ));
        };

        match self.client.fetch_json(forecast_url).await {
            Ok(data) => Ok(format_forecast(&data, latitude, longitude)),
            Err(e) => {
                warn!(latitude, longitude, error = %e, "forecast fetch failed");
                Ok(format!(
                    "Failed to retrieve forecast data for {latitude}, {longitude}."
                ))
            }
        }
    }
}

fn text_or_unknown(props: &Value, key: &str) -> String {
    props
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

/// Render an alerts response as one text block per alert.
pub fn format_alerts(data: &Value, state: &str) -> String {
    let features = data.get("features").and_then(Value::as_array);
    let Some(features) = features.filter(|f| !f.is_empty()) else {
        return format!("No active alerts for {state}.");
    };

    let blocks: Vec<String> = features
        .iter()
        .map(|feature| {
            let props = feature.get("properties").cloned().unwrap_or(Value::Null);
            format!(
                "Event: {}\nArea: {}\nSeverity: {}\nDescription: {}\nInstructions: {}",
                text_or_unknown(&props, "event"),
                text_or_unknown(&props, "areaDesc"),
                text_or_unknown(&props, "severity"),
                text_or_unknown(&props, "description"),
                text_or_unknown(&props, "instruction"),
            )
        })
        .collect();

    format!(
        "Active alerts for {state}:\n\n{}",
        blocks.join(BLOCK_SEPARATOR)
    )
}

/// Render the first five forecast periods as text blocks.
pub fn format_forecast(data: &Value, latitude: f64, longitude: f64) -> String {
    let periods = data.pointer("/properties/periods").and_then(Value::as_array);
    let Some(periods) = periods.filter(|p| !p.is_empty()) else {
        return format!("No forecast periods available for {latitude}, {longitude}.");
    };

    let blocks: Vec<String> = periods
        .iter()
        .take(5)
        .map(|period| {
            let temperature = period
                .get("temperature")
                .and_then(Value::as_i64)
                .map(|t| t.to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            let unit = period
                .get("temperatureUnit")
                .and_then(Value::as_str)
                .unwrap_or("F");
            format!(
                "{}:\nTemperature: {}°{}\nWind: {} {}\n{}",
                text_or_unknown(period, "name"),
                temperature,
                unit,
                text_or_unknown(period, "windSpeed"),
                text_or_unknown(period, "windDirection"),
                text_or_unknown(period, "shortForecast"),
            )
        })
        .collect();

    format!(
        "Forecast for {latitude}, {longitude}:\n\n{}",
        blocks.join(BLOCK_SEPARATOR)
    )
}
