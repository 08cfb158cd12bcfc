//! Recalculator (C6): the job that turns one trip's `(route, forecast)`
//! pair into a fresh risk assessment. Driven by broker jobs, serialized per
//! trip by a transaction-scoped advisory lock (spec §5's "implementations
//! should additionally serialize via an advisory lock keyed on trip_id").

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::quota::{self, ApiName, ConsumeOutcome, QuotaLimits};
use crate::db::queries::{self, RecalcResult};
use crate::errors::AppError;
use crate::services::forecast::ForecastClient;
use crate::services::risk::{self, PolicyMode, Status};
use crate::services::route::RouteClient;

/// Budget-limited recalculations always back off by this many seconds
/// (spec §4.4, invariant P6), independent of policy mode or status.
const BUDGET_LIMITED_BACKOFF_SECS: i64 = 2700;

/// Run one `recalc_trip` job end to end. Never propagates an error out of
/// the job — every failure path is translated into a trip-state transition
/// and logged here.
pub async fn process_job(
    pool: &PgPool,
    route_client: &RouteClient,
    forecast_client: &ForecastClient,
    route_limits: QuotaLimits,
    owm_limits: QuotaLimits,
    trip_id: Uuid,
) {
    let mut lock_tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!("recalc {}: failed to open lock transaction: {}", trip_id, e);
            return;
        }
    };

    let acquired: Result<(bool,), sqlx::Error> =
        sqlx::query_as("SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(trip_id.to_string())
            .fetch_one(&mut *lock_tx)
            .await;

    let acquired = match acquired {
        Ok((got,)) => got,
        Err(e) => {
            tracing::error!("recalc {}: advisory lock query failed: {}", trip_id, e);
            let _ = lock_tx.rollback().await;
            return;
        }
    };

    if !acquired {
        tracing::debug!("recalc {}: already in flight, skipping duplicate job", trip_id);
        let _ = lock_tx.rollback().await;
        return;
    }

    if let Err(e) = run(pool, route_client, forecast_client, route_limits, owm_limits, trip_id).await
    {
        tracing::error!("recalc {}: {}", trip_id, e);
    }

    if let Err(e) = lock_tx.commit().await {
        tracing::error!("recalc {}: failed to release advisory lock: {}", trip_id, e);
    }
}

async fn run(
    pool: &PgPool,
    route_client: &RouteClient,
    forecast_client: &ForecastClient,
    route_limits: QuotaLimits,
    owm_limits: QuotaLimits,
    trip_id: Uuid,
) -> Result<(), AppError> {
    // Step 1: load trip.
    let trip = match queries::get_trip(pool, trip_id).await? {
        Some(t) => t,
        None => {
            tracing::warn!("recalc {}: trip not found", trip_id);
            return Ok(());
        }
    };

    // Step 2: running.
    queries::start_running(pool, trip_id).await?;

    let now = Utc::now();
    let policy_mode = PolicyMode::parse(&trip.policy_mode).unwrap_or(PolicyMode::Balanced);
    let prev_status = trip
        .status
        .as_deref()
        .and_then(Status::from_glyph)
        .unwrap_or(Status::Yellow);

    // Step 3: validate waypoints.
    let waypoints = match queries::parse_waypoints(&trip) {
        Ok(wp) if wp.len() >= 2 => wp,
        _ => {
            let next_at = now + Duration::seconds(risk::next_interval_seconds(
                policy_mode,
                Status::Yellow,
                false,
            ));
            queries::fail_trip(pool, trip_id, "validate", next_at).await?;
            return Ok(());
        }
    };
    let destination = waypoints
        .last()
        .expect("validated above to have at least 2 waypoints");

    // Step 4-5: route, cached or fetched.
    let cached_route = match (trip.route_distance_m, trip.route_duration_s, trip.route_geojson.clone()) {
        (Some(dist), Some(dur), Some(geo)) => Some((dist, dur, geo, None::<&str>)),
        _ => None,
    };

    let (distance_m, duration_s, geometry, provider) = match cached_route {
        Some((dist, dur, geo, provider)) => (dist, dur, geo, provider),
        None => {
            let outcome = quota::consume(pool, &trip, ApiName::Route, now, route_limits).await?;
            match outcome {
                ConsumeOutcome::Denied { .. } => {
                    let next_at = now + Duration::seconds(BUDGET_LIMITED_BACKOFF_SECS);
                    queries::budget_limit_trip(pool, trip_id, "route", next_at).await?;
                    return Ok(());
                }
                ConsumeOutcome::Approved => match route_client.fetch_route(&waypoints).await {
                    Ok(r) => (r.distance_m, r.duration_s, r.geometry, Some(r.provider.as_str())),
                    Err(e) => {
                        tracing::warn!("recalc {}: route fetch failed: {}", trip_id, e);
                        let next_at = now + Duration::seconds(risk::next_interval_seconds(
                            policy_mode,
                            prev_status,
                            false,
                        ));
                        queries::fail_trip(pool, trip_id, "route", next_at).await?;
                        return Ok(());
                    }
                },
            }
        }
    };

    // Step 6: ETA.
    let eta: DateTime<Utc> = now + Duration::seconds(duration_s);

    // Step 7-8: forecast, budget-gated.
    let (severity, weather_record, owm_budget_limited) =
        match quota::consume(pool, &trip, ApiName::Owm, now, owm_limits).await? {
            ConsumeOutcome::Denied { reason } => {
                queries::append_event(
                    pool,
                    trip_id,
                    "budget_denied",
                    json!({"api": "owm"}),
                )
                .await?;
                (
                    0.0,
                    json!({"summary": "budget-limited", "severity": 0.0, "budget_denied": true, "reason": reason}),
                    true,
                )
            }
            ConsumeOutcome::Approved => {
                let lat = crate::helpers::dec_to_f64(destination.lat);
                let lon = crate::helpers::dec_to_f64(destination.lon);
                match forecast_client.fetch_forecast(lat, lon, eta).await {
                    Ok(result) => (
                        result.severity,
                        serde_json::to_value(&result.weather).expect("weather always serializes"),
                        false,
                    ),
                    Err(e) => {
                        tracing::warn!("recalc {}: forecast fetch failed: {}", trip_id, e);
                        (
                            0.0,
                            json!({"summary": "error", "severity": 0.0, "error": e.to_string()}),
                            false,
                        )
                    }
                }
            }
        };

    // Step 9: risk model.
    let assessment = risk::assess(trip.deadline_at, eta, severity);
    let recommended_depart_at =
        risk::recommend_depart(now, assessment.status, assessment.buffer_minutes);
    let customer_message = risk::customer_message(
        assessment.status,
        eta,
        trip.deadline_at,
        &assessment.why,
        assessment.suggestion,
    );

    let budget_limited = owm_budget_limited;
    let next_at = now
        + Duration::seconds(risk::next_interval_seconds(
            policy_mode,
            assessment.status,
            budget_limited,
        ));

    let audit_payload = json!({
        "route": {
            "distance_m": distance_m,
            "duration_s": duration_s,
            "provider": provider,
        },
        "weather": weather_record,
        "buffer_minutes": assessment.buffer_minutes,
        "computed_at": now,
        "why": assessment.why,
    });

    queries::complete_recalc(
        pool,
        trip_id,
        RecalcResult {
            eta_at: eta,
            route_distance_m: distance_m,
            route_duration_s: duration_s,
            route_geojson: geometry,
            buffer_minutes: assessment.buffer_minutes,
            delay_risk_pct: assessment.risk_pct,
            status: assessment.status.glyph().to_string(),
            suggestion: assessment.suggestion.to_string(),
            recommended_depart_at,
            why: assessment.why,
            customer_message,
            calc_state: if budget_limited { "budget_limited" } else { "done" }.to_string(),
            next_calc_at: next_at,
            audit_payload,
        },
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_limited_backoff_matches_next_interval_invariant() {
        // P6: whenever budget_limited=true, next_calc_at - now == 2700s exactly,
        // regardless of policy/status.
        assert_eq!(
            risk::next_interval_seconds(PolicyMode::Aggressive, Status::Red, true),
            BUDGET_LIMITED_BACKOFF_SECS
        );
    }
}
