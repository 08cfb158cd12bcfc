//! Job broker: an in-process stand-in for the durable at-least-once task
//! queue named in spec §9 ("Broker-driven background work"). The portable
//! shape is a job descriptor placed on a durable queue by the scanner and
//! façade, drained by a pool of workers — here realized as an mpsc channel
//! shared behind a mutex, mirroring the teacher's `SharedPollerState`
//! (`Arc<RwLock<_>>`) convention for process-wide shared handles.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Named jobs per spec §6: `worker.tasks.scan_due_trips` (no args),
/// `worker.tasks.recalc_trip(trip_id)`.
#[derive(Debug, Clone, Copy)]
pub enum Job {
    ScanDueTrips,
    RecalcTrip { trip_id: Uuid },
}

/// Sending half of the broker, cloned into the scheduler and façade.
#[derive(Clone)]
pub struct JobSender(mpsc::Sender<Job>);

impl JobSender {
    /// Enqueue a job. Delivery is at-least-once from the broker's
    /// perspective; duplicate delivery is tolerated by the recalculator's
    /// advisory lock and the quota ledger's row locks.
    pub async fn send(&self, job: Job) {
        if self.0.send(job).await.is_err() {
            tracing::error!("job broker channel closed, dropping job");
        }
    }
}

/// Receiving half, shared across a pool of worker tasks.
pub type JobReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Build a bounded broker channel. The bound is generous relative to
/// `scan_batch_size` so a single scan tick never blocks on dispatch.
pub fn channel(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (JobSender(tx), Arc::new(Mutex::new(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let (tx, rx) = channel(4);
        tx.send(Job::ScanDueTrips).await;
        tx.send(Job::RecalcTrip {
            trip_id: Uuid::nil(),
        })
        .await;

        let mut rx = rx.lock().await;
        assert!(matches!(rx.recv().await, Some(Job::ScanDueTrips)));
        assert!(matches!(
            rx.recv().await,
            Some(Job::RecalcTrip { trip_id }) if trip_id == Uuid::nil()
        ));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = channel(1);
        drop(rx);
        tx.send(Job::ScanDueTrips).await;
    }
}
