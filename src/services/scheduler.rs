//! Scheduler / Scanner (C5): periodically selects due trips and enqueues
//! recalculation jobs. Structured like the teacher's `run_poller` loop in
//! `services/poller.rs` — an infinite `loop { ...; sleep }` spawned once
//! from `main`, sleeping a fixed wall-clock interval rather than adapting
//! to a per-resource expiry.

use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::db::queries;
use crate::services::broker::{Job, JobSender};

/// Run the scanner. Never returns; spawn with `tokio::spawn`.
pub async fn run_scheduler(
    pool: PgPool,
    jobs: JobSender,
    scan_interval_seconds: u64,
    scan_batch_size: i64,
) {
    tracing::info!("Scheduler started, interval={}s", scan_interval_seconds);

    loop {
        if let Err(e) = scan_once(&pool, &jobs, scan_interval_seconds, scan_batch_size).await {
            tracing::error!("Scheduler tick failed: {}", e);
        }
        tokio::time::sleep(std::time::Duration::from_secs(scan_interval_seconds)).await;
    }
}

/// A single scan tick (spec §4.5): select due trips, transition each to
/// `queued` in its own row-transaction, then dispatch a `recalc` job.
async fn scan_once(
    pool: &PgPool,
    jobs: &JobSender,
    scan_interval_seconds: u64,
    scan_batch_size: i64,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    let due = queries::select_due_trips(pool, now, scan_batch_size).await?;

    if due.is_empty() {
        return Ok(());
    }

    tracing::debug!("Scheduler: {} trip(s) due", due.len());
    let collision_guard = now + Duration::seconds(scan_interval_seconds as i64);

    for trip in due {
        queries::queue_trip(pool, trip.id, collision_guard, "scheduler").await?;
        jobs.send(Job::RecalcTrip { trip_id: trip.id }).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    // scan_once requires a live PgPool; its branching is exercised via
    // queries.rs unit tests and the recalculator's own test suite.
}
