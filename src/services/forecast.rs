//! Forecast Client (C3): fetches a forecast slot list for a point and
//! selects the one nearest a target time, then derives a deterministic
//! severity score. Structured like the teacher's `YrClient` in
//! `services/yr.rs` — owned `reqwest::Client`, bounded timeout, typed
//! response structs deserialized once.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::AppError;

const FORECAST_HTTP_TIMEOUT_SECS: u64 = 25;
const FORECAST_URL: &str = "https://api.openweathermap.org/data/2.5/forecast";

/// A weather record derived from the selected forecast slot, suitable for
/// embedding in the `recalc_done` audit payload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WeatherRecord {
    pub summary: String,
    pub severity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_denied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ForecastResult {
    pub severity: f64,
    pub weather: WeatherRecord,
}

#[derive(Debug, Clone)]
pub struct ForecastClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ForecastClient {
    pub fn new(api_key: String, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(FORECAST_HTTP_TIMEOUT_SECS))
            .user_agent(user_agent.to_string())
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            api_key,
            base_url: FORECAST_URL.to_string(),
        }
    }

    /// Point at a test server instead of the real provider.
    #[cfg(test)]
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    pub async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        target_time: DateTime<Utc>,
    ) -> Result<ForecastResult, AppError> {
        let url = format!(
            "{}?lat={lat}&lon={lon}&appid={}&units=metric",
            self.base_url, self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("forecast request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "forecast provider returned HTTP {}",
                response.status()
            )));
        }

        let parsed: ForecastListResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("forecast JSON parse error: {e}"))
        })?;

        Ok(select_and_score(&parsed.list, target_time))
    }
}

fn select_and_score(list: &[ForecastSlot], target_time: DateTime<Utc>) -> ForecastResult {
    if list.is_empty() {
        return ForecastResult {
            severity: 0.0,
            weather: WeatherRecord {
                summary: "no-forecast".to_string(),
                severity: 0.0,
                budget_denied: None,
                error: None,
            },
        };
    }

    let target_ts = target_time.timestamp();
    let nearest = list
        .iter()
        .min_by_key(|slot| (slot.dt - target_ts).unsigned_abs())
        .expect("list is non-empty");

    let wind = nearest.wind.as_ref().map(|w| w.speed).unwrap_or(0.0);
    let rain = nearest
        .rain
        .as_ref()
        .and_then(|r| r.h3)
        .unwrap_or(0.0);
    let snow = nearest
        .snow
        .as_ref()
        .and_then(|s| s.h3)
        .unwrap_or(0.0);
    let clouds = nearest.clouds.as_ref().map(|c| c.all).unwrap_or(0.0);
    let summary = nearest
        .weather
        .first()
        .map(|w| w.main.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let severity = severity_score(rain, snow, wind, clouds);

    ForecastResult {
        severity,
        weather: WeatherRecord {
            summary,
            severity,
            budget_denied: None,
            error: None,
        },
    }
}

/// Spec §4.3's deterministic severity formula.
fn severity_score(rain_mm: f64, snow_mm: f64, wind_ms: f64, clouds_pct: f64) -> f64 {
    let s = (rain_mm / 10.0).min(1.0) * 0.5
        + (snow_mm / 5.0).min(1.0) * 0.6
        + (wind_ms / 15.0).min(1.0) * 0.4
        + (clouds_pct / 100.0) * 0.1;
    s.clamp(0.0, 1.0)
}

#[derive(Debug, Deserialize)]
struct ForecastListResponse {
    list: Vec<ForecastSlot>,
}

#[derive(Debug, Deserialize)]
struct ForecastSlot {
    dt: i64,
    #[serde(default)]
    weather: Vec<ForecastWeather>,
    wind: Option<ForecastWind>,
    rain: Option<ForecastPrecip>,
    snow: Option<ForecastPrecip>,
    clouds: Option<ForecastClouds>,
}

#[derive(Debug, Deserialize)]
struct ForecastWeather {
    main: String,
}

#[derive(Debug, Deserialize)]
struct ForecastWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastPrecip {
    #[serde(rename = "3h")]
    h3: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ForecastClouds {
    all: f64,
}
