use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single `(lat, lon)` waypoint. Stored inside `trips.waypoints` as a
/// JSONB array; full-precision `Decimal` round-trips through `serde_json`
/// as a string-encoded number (see `rust_decimal`'s serde-with-str feature).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Waypoint {
    pub lat: rust_decimal::Decimal,
    pub lon: rust_decimal::Decimal,
}

/// A delivery trip under a hard deadline, and the computed risk snapshot
/// from its last recalculation.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Trip {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,

    /// JSONB array of `Waypoint`; at least two entries, last is the destination.
    pub waypoints: serde_json::Value,

    // Computed by the recalculator (C6); all populated together when calc_state = done.
    pub eta_at: Option<DateTime<Utc>>,
    pub route_distance_m: Option<i64>,
    pub route_duration_s: Option<i64>,
    pub route_geojson: Option<serde_json::Value>,
    pub buffer_minutes: Option<i64>,
    pub delay_risk_pct: Option<i32>,
    pub status: Option<String>,
    pub suggestion: Option<String>,
    pub recommended_depart_at: Option<DateTime<Utc>>,
    pub why: Option<String>,
    pub customer_message: Option<String>,

    pub policy_mode: String,
    pub trip_owm_daily_cap: i32,
    pub trip_route_daily_cap: i32,

    pub calc_state: String,
    pub last_calc_at: Option<DateTime<Utc>>,
    pub next_calc_at: Option<DateTime<Utc>>,
}

/// An append-only audit entry for a trip (spec's event log, C7).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TripUpdate {
    pub id: i64,
    pub trip_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// `(trip_id, day) -> (owm_calls, route_calls)`, the per-trip-per-day quota counters.
#[derive(Debug, Clone, Copy, Serialize, FromRow)]
pub struct TripApiUsageDaily {
    pub trip_id: Uuid,
    pub day: NaiveDate,
    pub owm_calls: i32,
    pub route_calls: i32,
}

/// `(api_name, day) -> calls`, the global daily quota counter.
#[derive(Debug, Clone, FromRow)]
pub struct ApiUsageDaily {
    pub api_name: String,
    pub day: NaiveDate,
    pub calls: i32,
}

/// `(api_name, minute_bucket) -> calls`, the global per-minute quota counter.
#[derive(Debug, Clone, FromRow)]
pub struct ApiUsageMinute {
    pub api_name: String,
    pub minute_bucket: DateTime<Utc>,
    pub calls: i32,
}
