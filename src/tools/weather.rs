// ABOUTME: Weather lookup tool against an Open-Meteo-style forecast endpoint
// ABOUTME: Network failures surface as tool-level error results, not turn failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::models::RequestHints;

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Look up current weather for the requested coordinates
///
/// Coordinates come from the model's arguments, falling back to the
/// caller's request hints. Missing coordinates or a failed fetch produce an
/// `{"error": ...}` result the model can recover from.
pub async fn get_weather(http: &Client, args: &Value, hints: &RequestHints) -> Value {
    let latitude = args
        .get("latitude")
        .and_then(Value::as_f64)
        .or(hints.latitude);
    let longitude = args
        .get("longitude")
        .and_then(Value::as_f64)
        .or(hints.longitude);

    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        return json!({
            "error": "No location available; ask the user where they are"
        });
    };

    let request = http
        .get(FORECAST_URL)
        .query(&[
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            (
                "current",
                "temperature_2m,weather_code,wind_speed_10m".to_owned(),
            ),
            ("daily", "temperature_2m_max,temperature_2m_min".to_owned()),
            ("timezone", "auto".to_owned()),
        ])
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));

    match request.send().await {
        Ok(response) => match response.error_for_status() {
            Ok(response) => response.json::<Value>().await.unwrap_or_else(|e| {
                warn!("Weather response was not JSON: {e}");
                json!({"error": "Weather service returned an unreadable response"})
            }),
            Err(e) => {
                warn!("Weather service rejected the request: {e}");
                json!({"error": "Weather service rejected the request"})
            }
        },
        Err(e) => {
            warn!("Weather service unreachable: {e}");
            json!({"error": "Weather service is unreachable right now"})
        }
    }
}
