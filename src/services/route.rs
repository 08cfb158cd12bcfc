//! Route Client (C2): wraps a primary (key-authenticated, POST) and a
//! fallback (open, path-encoded GET) driving-route provider behind one
//! interface, structured like the teacher's `YrClient` — an owned
//! `reqwest::Client` with a bounded timeout, `Result<_, AppError>` returns.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::db::models::Waypoint;
use crate::errors::AppError;

const ROUTE_HTTP_TIMEOUT_SECS: u64 = 25;
const PRIMARY_URL: &str = "https://api.openrouteservice.org/v2/directions/driving-car/geojson";
const FALLBACK_URL_BASE: &str = "https://router.project-osrm.org/route/v1/driving";

/// Which provider answered a `fetch_route` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Primary,
    Fallback,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Primary => "primary",
            Provider::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub distance_m: i64,
    pub duration_s: i64,
    pub geometry: serde_json::Value,
    pub provider: Provider,
}

/// Client for the driving-route providers.
#[derive(Debug, Clone)]
pub struct RouteClient {
    client: reqwest::Client,
    primary_api_key: Option<String>,
    primary_url: String,
    fallback_url_base: String,
}

impl RouteClient {
    pub fn new(primary_api_key: Option<String>, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(ROUTE_HTTP_TIMEOUT_SECS))
            .user_agent(user_agent.to_string())
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            primary_api_key,
            primary_url: PRIMARY_URL.to_string(),
            fallback_url_base: FALLBACK_URL_BASE.to_string(),
        }
    }

    /// Point at test-server base URLs instead of the real providers.
    #[cfg(test)]
    pub fn with_base_urls(primary_api_key: Option<String>, primary_url: String, fallback_url_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            primary_api_key,
            primary_url,
            fallback_url_base,
        }
    }

    pub async fn fetch_route(&self, waypoints: &[Waypoint]) -> Result<RouteResult, AppError> {
        validate_waypoints(waypoints)?;

        match &self.primary_api_key {
            Some(key) => self.fetch_primary(waypoints, key).await,
            None => self.fetch_fallback(waypoints).await,
        }
    }

    async fn fetch_primary(
        &self,
        waypoints: &[Waypoint],
        api_key: &str,
    ) -> Result<RouteResult, AppError> {
        let coordinates: Vec<[f64; 2]> = waypoints
            .iter()
            .map(|w| [crate::helpers::dec_to_f64(w.lon), crate::helpers::dec_to_f64(w.lat)])
            .collect();

        let body = json!({ "coordinates": coordinates });

        let response = self
            .client
            .post(&self.primary_url)
            .header("Authorization", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("route request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "primary route provider returned HTTP {}",
                response.status()
            )));
        }

        let parsed: PrimaryResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("route JSON parse error: {e}")))?;

        let feature = parsed
            .features
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ExternalServiceError("primary route has no features".into()))?;

        Ok(RouteResult {
            distance_m: feature.properties.summary.distance.round() as i64,
            duration_s: feature.properties.summary.duration.round() as i64,
            geometry: feature.geometry,
            provider: Provider::Primary,
        })
    }

    async fn fetch_fallback(&self, waypoints: &[Waypoint]) -> Result<RouteResult, AppError> {
        let path: String = waypoints
            .iter()
            .map(|w| {
                format!(
                    "{},{}",
                    crate::helpers::dec_to_f64(w.lon),
                    crate::helpers::dec_to_f64(w.lat)
                )
            })
            .collect::<Vec<_>>()
            .join(";");

        let url = format!(
            "{}/{path}?overview=full&geometries=geojson",
            self.fallback_url_base
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("route request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(AppError::ExternalServiceError(format!(
                "fallback route provider returned HTTP {}",
                response.status()
            )));
        }

        let parsed: FallbackResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("route JSON parse error: {e}")))?;

        let route = parsed
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ExternalServiceError("fallback route has no routes".into()))?;

        Ok(RouteResult {
            distance_m: route.distance.round() as i64,
            duration_s: route.duration.round() as i64,
            geometry: route.geometry,
            provider: Provider::Fallback,
        })
    }
}

fn validate_waypoints(waypoints: &[Waypoint]) -> Result<(), AppError> {
    if waypoints.len() < 2 {
        return Err(AppError::InvalidArgument(
            "at least 2 waypoints are required".to_string(),
        ));
    }
    for w in waypoints {
        let lat = crate::helpers::dec_to_f64(w.lat);
        let lon = crate::helpers::dec_to_f64(w.lon);
        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::InvalidArgument(format!("lat {lat} out of range")));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(AppError::InvalidArgument(format!("lon {lon} out of range")));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PrimaryResponse {
    features: Vec<PrimaryFeature>,
}

#[derive(Debug, Deserialize)]
struct PrimaryFeature {
    properties: PrimaryProperties,
    geometry: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PrimaryProperties {
    summary: PrimarySummary,
}

#[derive(Debug, Deserialize)]
struct PrimarySummary {
    distance: f64,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct FallbackResponse {
    routes: Vec<FallbackRoute>,
}

#[derive(Debug, Deserialize)]
struct FallbackRoute {
    distance: f64,
    duration: f64,
    geometry: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn wp(lat: &str, lon: &str) -> Waypoint {
        Waypoint {
            lat: Decimal::from_str(lat).unwrap(),
            lon: Decimal::from_str(lon).unwrap(),
        }
    }

    #[test]
    fn test_validate_waypoints_too_few() {
        let err = validate_waypoints(&[wp("10.0", "10.0")]).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_waypoints_lat_out_of_range() {
        let err = validate_waypoints(&[wp("91.0", "10.0"), wp("10.0", "10.0")]).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_waypoints_lon_out_of_range() {
        let err = validate_waypoints(&[wp("10.0", "181.0"), wp("10.0", "10.0")]).unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_waypoints_ok() {
        assert!(validate_waypoints(&[wp("10.0", "10.0"), wp("20.0", "20.0")]).is_ok());
    }

    #[test]
    fn test_provider_as_str() {
        assert_eq!(Provider::Primary.as_str(), "primary");
        assert_eq!(Provider::Fallback.as_str(), "fallback");
    }

    #[tokio::test]
    async fn test_fetch_primary_parses_geojson_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = json!({
            "features": [{
                "properties": {"summary": {"distance": 12000.4, "duration": 900.6}},
                "geometry": {"type": "LineString", "coordinates": [[8.5, 47.3], [8.6, 47.4]]},
            }]
        });
        Mock::given(method("POST"))
            .and(path("/route"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = RouteClient::with_base_urls(
            Some("test-key".to_string()),
            format!("{}/route", server.uri()),
            format!("{}/fallback", server.uri()),
        );
        let result = client
            .fetch_route(&[wp("47.3", "8.5"), wp("47.4", "8.6")])
            .await
            .unwrap();

        assert_eq!(result.distance_m, 12000);
        assert_eq!(result.duration_s, 901);
        assert_eq!(result.provider, Provider::Primary);
    }

    #[tokio::test]
    async fn test_fetch_fallback_parses_osrm_response() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = json!({
            "routes": [{
                "distance": 5000.0,
                "duration": 400.0,
                "geometry": {"type": "LineString", "coordinates": [[8.5, 47.3], [8.6, 47.4]]},
            }]
        });
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = RouteClient::with_base_urls(
            None,
            format!("{}/route", server.uri()),
            format!("{}/fallback", server.uri()),
        );
        let result = client
            .fetch_route(&[wp("47.3", "8.5"), wp("47.4", "8.6")])
            .await
            .unwrap();

        assert_eq!(result.distance_m, 5000);
        assert_eq!(result.duration_s, 400);
        assert_eq!(result.provider, Provider::Fallback);
    }

    #[tokio::test]
    async fn test_fetch_primary_http_error_surfaces_as_external_service_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = RouteClient::with_base_urls(
            Some("test-key".to_string()),
            format!("{}/route", server.uri()),
            format!("{}/fallback", server.uri()),
        );
        let err = client
            .fetch_route(&[wp("47.3", "8.5"), wp("47.4", "8.6")])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ExternalServiceError(_)));
    }
}
