//! Quota Ledger (C1): atomic three-tier budget enforcement for the two
//! quota-bearing external APIs, modeled on the teacher's transactional
//! upsert pattern in `queries::upsert_race_from_gpx` — ensure-then-lock,
//! single commit point, no partial mutation on denial.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{ApiUsageDaily, ApiUsageMinute, Trip, TripApiUsageDaily};
use crate::db::queries::append_event;
use crate::helpers::{minute_bucket, usage_day};

/// The two quota-bearing external APIs named in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiName {
    Owm,
    Route,
}

impl ApiName {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiName::Owm => "owm",
            ApiName::Route => "route",
        }
    }
}

/// Per-API global limits, read from `AppConfig` at the call site.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub global_daily: i32,
    pub global_per_minute: i32,
}

/// Result of a `consume` call. `Denied` carries a human-readable reason
/// naming which cap failed and its current/limit values.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    Approved,
    Denied { reason: String },
}

impl ConsumeOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ConsumeOutcome::Approved)
    }
}

/// Consume one unit of `api_name`'s budget on behalf of `trip`, enforcing
/// the global-day, global-minute, and per-trip-day caps in that fixed
/// order (spec §4.1). Returns `Denied` without mutating any counter if any
/// cap would be exceeded; otherwise increments all three counters and
/// appends a `budget_consume` audit event before returning `Approved`.
pub async fn consume(
    pool: &PgPool,
    trip: &Trip,
    api_name: ApiName,
    now: DateTime<Utc>,
    limits: QuotaLimits,
) -> Result<ConsumeOutcome, sqlx::Error> {
    let amount: i32 = 1;
    let day = usage_day(now);
    let bucket = minute_bucket(now);
    let trip_cap = match api_name {
        ApiName::Owm => trip.trip_owm_daily_cap,
        ApiName::Route => trip.trip_route_daily_cap,
    };

    ensure_rows_exist(pool, api_name, trip.id, day, bucket).await?;

    let mut tx = pool.begin().await?;

    let global_day: ApiUsageDaily = sqlx::query_as(
        "SELECT api_name, day, calls FROM api_usage_daily WHERE api_name = $1 AND day = $2 FOR UPDATE",
    )
    .bind(api_name.as_str())
    .bind(day)
    .fetch_one(&mut *tx)
    .await?;

    let global_minute: ApiUsageMinute = sqlx::query_as(
        "SELECT api_name, minute_bucket, calls FROM api_usage_minute
         WHERE api_name = $1 AND minute_bucket = $2 FOR UPDATE",
    )
    .bind(api_name.as_str())
    .bind(bucket)
    .fetch_one(&mut *tx)
    .await?;

    let trip_day: TripApiUsageDaily = sqlx::query_as(
        "SELECT trip_id, day, owm_calls, route_calls FROM trip_api_usage_daily
         WHERE trip_id = $1 AND day = $2 FOR UPDATE",
    )
    .bind(trip.id)
    .bind(day)
    .fetch_one(&mut *tx)
    .await?;
    let trip_calls = match api_name {
        ApiName::Owm => trip_day.owm_calls,
        ApiName::Route => trip_day.route_calls,
    };

    if global_day.calls + amount > limits.global_daily {
        tx.rollback().await?;
        return Ok(ConsumeOutcome::Denied {
            reason: format!(
                "global-day cap exceeded for {}: {}+{} > {}",
                api_name.as_str(),
                global_day.calls,
                amount,
                limits.global_daily
            ),
        });
    }
    if global_minute.calls + amount > limits.global_per_minute {
        tx.rollback().await?;
        return Ok(ConsumeOutcome::Denied {
            reason: format!(
                "global-minute cap exceeded for {} at bucket {}: {}+{} > {}",
                api_name.as_str(),
                bucket,
                global_minute.calls,
                amount,
                limits.global_per_minute
            ),
        });
    }
    if trip_calls + amount > trip_cap {
        tx.rollback().await?;
        return Ok(ConsumeOutcome::Denied {
            reason: format!(
                "per-trip-day cap exceeded for {} on trip {}: {}+{} > {}",
                api_name.as_str(),
                trip.id,
                trip_calls,
                amount,
                trip_cap
            ),
        });
    }

    sqlx::query("UPDATE api_usage_daily SET calls = calls + $3 WHERE api_name = $1 AND day = $2")
        .bind(api_name.as_str())
        .bind(day)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE api_usage_minute SET calls = calls + $3
         WHERE api_name = $1 AND minute_bucket = $2",
    )
    .bind(api_name.as_str())
    .bind(bucket)
    .bind(amount)
    .execute(&mut *tx)
    .await?;

    let trip_col = match api_name {
        ApiName::Owm => "owm_calls",
        ApiName::Route => "route_calls",
    };
    sqlx::query(&format!(
        "UPDATE trip_api_usage_daily SET {trip_col} = {trip_col} + $3
         WHERE trip_id = $1 AND day = $2"
    ))
    .bind(trip.id)
    .bind(day)
    .bind(amount)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    append_event(
        pool,
        trip.id,
        "budget_consume",
        serde_json::json!({"api": api_name.as_str(), "amount": amount}),
    )
    .await?;

    Ok(ConsumeOutcome::Approved)
}

/// Insert the three counter rows with `calls=0` if they don't already
/// exist, in its own short transaction (spec §4.1 step 1). Run before the
/// locking transaction so step 2's `SELECT ... FOR UPDATE` always finds a row.
async fn ensure_rows_exist(
    pool: &PgPool,
    api_name: ApiName,
    trip_id: Uuid,
    day: chrono::NaiveDate,
    bucket: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO api_usage_daily (api_name, day, calls) VALUES ($1, $2, 0)
         ON CONFLICT (api_name, day) DO NOTHING",
    )
    .bind(api_name.as_str())
    .bind(day)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO api_usage_minute (api_name, minute_bucket, calls) VALUES ($1, $2, 0)
         ON CONFLICT (api_name, minute_bucket) DO NOTHING",
    )
    .bind(api_name.as_str())
    .bind(bucket)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO trip_api_usage_daily (trip_id, day, owm_calls, route_calls)
         VALUES ($1, $2, 0, 0)
         ON CONFLICT (trip_id, day) DO NOTHING",
    )
    .bind(trip_id)
    .bind(day)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_name_as_str() {
        assert_eq!(ApiName::Owm.as_str(), "owm");
        assert_eq!(ApiName::Route.as_str(), "route");
    }

    #[test]
    fn test_consume_outcome_is_approved() {
        assert!(ConsumeOutcome::Approved.is_approved());
        assert!(!ConsumeOutcome::Denied {
            reason: "x".to_string()
        }
        .is_approved());
    }
}
