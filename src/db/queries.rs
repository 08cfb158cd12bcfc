use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Trip, TripUpdate, Waypoint};

/// Trip SELECT column list, kept in sync with the `Trip` model struct.
const TRIP_COLS: &str = "\
    id, created_at, updated_at, deadline_at, waypoints, \
    eta_at, route_distance_m, route_duration_s, route_geojson, buffer_minutes, \
    delay_risk_pct, status, suggestion, recommended_depart_at, why, customer_message, \
    policy_mode, trip_owm_daily_cap, trip_route_daily_cap, \
    calc_state, last_calc_at, next_calc_at";

/// Get a trip by id.
pub(crate) async fn get_trip(pool: &PgPool, id: Uuid) -> Result<Option<Trip>, sqlx::Error> {
    let query = format!("SELECT {TRIP_COLS} FROM trips WHERE id = $1");
    sqlx::query_as::<_, Trip>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Decode a trip's `waypoints` JSONB column into typed waypoints.
pub(crate) fn parse_waypoints(trip: &Trip) -> Result<Vec<Waypoint>, serde_json::Error> {
    serde_json::from_value(trip.waypoints.clone())
}

/// Select at most `limit` trips due for recalculation, ordered by
/// `next_calc_at` ascending (spec §4.5). `FOR UPDATE SKIP LOCKED` lets
/// multiple scanner instances run concurrently without double-selecting
/// a row another scanner is already transitioning.
pub(crate) async fn select_due_trips(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Trip>, sqlx::Error> {
    let query = format!(
        "SELECT {TRIP_COLS} FROM trips
         WHERE next_calc_at IS NOT NULL
           AND next_calc_at <= $1
           AND calc_state IN ('idle', 'done', 'budget_limited', 'error')
         ORDER BY next_calc_at ASC
         LIMIT $2
         FOR UPDATE SKIP LOCKED"
    );
    sqlx::query_as::<_, Trip>(&query)
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Transition a trip to `queued`, advancing `next_calc_at` by one scan
/// interval as collision protection (spec §4.5). Appends `recalc_queued`
/// in the same transaction as the state change.
pub(crate) async fn queue_trip(
    pool: &PgPool,
    trip_id: Uuid,
    next_calc_at: DateTime<Utc>,
    queued_by: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE trips SET calc_state = 'queued', next_calc_at = $2, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(trip_id)
    .bind(next_calc_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO trip_updates (trip_id, kind, payload) VALUES ($1, 'recalc_queued', $2)",
    )
    .bind(trip_id)
    .bind(serde_json::json!({"by": queued_by}))
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Transition a trip to `running` and append `recalc_running` (spec §4.6 step 2).
pub(crate) async fn start_running(pool: &PgPool, trip_id: Uuid) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE trips SET calc_state = 'running', updated_at = NOW() WHERE id = $1")
        .bind(trip_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO trip_updates (trip_id, kind, payload) VALUES ($1, 'recalc_running', $2)")
        .bind(trip_id)
        .bind(serde_json::json!({}))
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Terminal failure path: set `calc_state = error`, schedule the next
/// attempt, and append `recalc_error` with the given stage.
pub(crate) async fn fail_trip(
    pool: &PgPool,
    trip_id: Uuid,
    stage: &str,
    next_calc_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE trips SET calc_state = 'error', last_calc_at = NOW(),
                           next_calc_at = $2, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(trip_id)
    .bind(next_calc_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO trip_updates (trip_id, kind, payload) VALUES ($1, 'recalc_error', $2)")
        .bind(trip_id)
        .bind(serde_json::json!({"stage": stage}))
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Route-budget denial path (spec §4.6 step 5): jump straight to
/// `budget_limited` without touching any route field.
pub(crate) async fn budget_limit_trip(
    pool: &PgPool,
    trip_id: Uuid,
    api: &str,
    next_calc_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE trips SET calc_state = 'budget_limited', last_calc_at = NOW(),
                           next_calc_at = $2, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(trip_id)
    .bind(next_calc_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO trip_updates (trip_id, kind, payload) VALUES ($1, 'budget_denied', $2)")
        .bind(trip_id)
        .bind(serde_json::json!({"api": api}))
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Fields computed by a completed recalculation (spec §4.6 step 10).
#[allow(clippy::too_many_arguments)]
pub(crate) struct RecalcResult {
    pub(crate) eta_at: DateTime<Utc>,
    pub(crate) route_distance_m: i64,
    pub(crate) route_duration_s: i64,
    pub(crate) route_geojson: serde_json::Value,
    pub(crate) buffer_minutes: i64,
    pub(crate) delay_risk_pct: i32,
    pub(crate) status: String,
    pub(crate) suggestion: String,
    pub(crate) recommended_depart_at: DateTime<Utc>,
    pub(crate) why: String,
    pub(crate) customer_message: String,
    pub(crate) calc_state: String,
    pub(crate) next_calc_at: DateTime<Utc>,
    pub(crate) audit_payload: serde_json::Value,
}

/// Persist a completed (or budget-limited-but-completed) recalculation:
/// update every computed field on the trip and append `recalc_done`, in a
/// single transaction (spec §4.6 step 10).
pub(crate) async fn complete_recalc(
    pool: &PgPool,
    trip_id: Uuid,
    r: RecalcResult,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE trips SET
            eta_at = $2,
            route_distance_m = $3,
            route_duration_s = $4,
            route_geojson = $5,
            buffer_minutes = $6,
            delay_risk_pct = $7,
            status = $8,
            suggestion = $9,
            recommended_depart_at = $10,
            why = $11,
            customer_message = $12,
            calc_state = $13,
            last_calc_at = NOW(),
            next_calc_at = $14,
            updated_at = NOW()
         WHERE id = $1",
    )
    .bind(trip_id)
    .bind(r.eta_at)
    .bind(r.route_distance_m)
    .bind(r.route_duration_s)
    .bind(r.route_geojson)
    .bind(r.buffer_minutes)
    .bind(r.delay_risk_pct)
    .bind(&r.status)
    .bind(&r.suggestion)
    .bind(r.recommended_depart_at)
    .bind(&r.why)
    .bind(&r.customer_message)
    .bind(&r.calc_state)
    .bind(r.next_calc_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO trip_updates (trip_id, kind, payload) VALUES ($1, 'recalc_done', $2)")
        .bind(trip_id)
        .bind(r.audit_payload)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Apply a partial policy patch (spec §4.8 `patch-policy`). Any of the
/// three fields may be `None` to leave it unchanged; the changed subset is
/// recorded on the `policy_updated` audit event.
pub(crate) async fn patch_policy(
    pool: &PgPool,
    trip_id: Uuid,
    policy_mode: Option<&str>,
    trip_owm_daily_cap: Option<i32>,
    trip_route_daily_cap: Option<i32>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE trips SET
            policy_mode = COALESCE($2, policy_mode),
            trip_owm_daily_cap = COALESCE($3, trip_owm_daily_cap),
            trip_route_daily_cap = COALESCE($4, trip_route_daily_cap),
            updated_at = NOW()
         WHERE id = $1",
    )
    .bind(trip_id)
    .bind(policy_mode)
    .bind(trip_owm_daily_cap)
    .bind(trip_route_daily_cap)
    .execute(&mut *tx)
    .await?;

    let mut changed = serde_json::Map::new();
    if let Some(v) = policy_mode {
        changed.insert("policy_mode".to_string(), serde_json::json!(v));
    }
    if let Some(v) = trip_owm_daily_cap {
        changed.insert("trip_owm_daily_cap".to_string(), serde_json::json!(v));
    }
    if let Some(v) = trip_route_daily_cap {
        changed.insert("trip_route_daily_cap".to_string(), serde_json::json!(v));
    }

    sqlx::query("INSERT INTO trip_updates (trip_id, kind, payload) VALUES ($1, 'policy_updated', $2)")
        .bind(trip_id)
        .bind(serde_json::Value::Object(changed))
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

// ---------------------------------------------------------------------------
// Event Log Writer (C7)
// ---------------------------------------------------------------------------

/// Append a single audit event. Append-only — no update or delete path
/// exists for `trip_updates`.
pub(crate) async fn append_event(
    pool: &PgPool,
    trip_id: Uuid,
    kind: &str,
    payload: serde_json::Value,
) -> Result<TripUpdate, sqlx::Error> {
    sqlx::query_as::<_, TripUpdate>(
        "INSERT INTO trip_updates (trip_id, kind, payload) VALUES ($1, $2, $3)
         RETURNING id, trip_id, created_at, kind, payload",
    )
    .bind(trip_id)
    .bind(kind)
    .bind(payload)
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Waypoint;
    use rust_decimal::Decimal;

    #[test]
    fn test_parse_waypoints_round_trips() {
        let waypoints = vec![
            Waypoint {
                lat: Decimal::new(473769, 4),
                lon: Decimal::new(85454, 4),
            },
            Waypoint {
                lat: Decimal::new(472000, 4),
                lon: Decimal::new(86000, 4),
            },
        ];
        let json = serde_json::to_value(&waypoints).unwrap();
        let trip = Trip {
            id: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deadline_at: Utc::now(),
            waypoints: json,
            eta_at: None,
            route_distance_m: None,
            route_duration_s: None,
            route_geojson: None,
            buffer_minutes: None,
            delay_risk_pct: None,
            status: None,
            suggestion: None,
            recommended_depart_at: None,
            why: None,
            customer_message: None,
            policy_mode: "balanced".to_string(),
            trip_owm_daily_cap: 50,
            trip_route_daily_cap: 50,
            calc_state: "idle".to_string(),
            last_calc_at: None,
            next_calc_at: None,
        };

        let parsed = parse_waypoints(&trip).unwrap();
        assert_eq!(parsed, waypoints);
    }
}
