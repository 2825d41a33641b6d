//! In-process fan-out of progress events to per-job subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::job::JobStore;
use crate::metrics::{PROGRESS_EVENTS, PROGRESS_SUBSCRIBERS_DROPPED};

use super::{ClientMessage, ProgressConfig, ProgressError, ProgressEvent, ProgressPublisher};

type SubscriberMap = HashMap<String, HashMap<u64, mpsc::Sender<ProgressEvent>>>;

/// Registry of live subscribers, keyed by job.
///
/// Each subscriber owns a bounded queue. A publish that cannot enqueue (queue
/// full or receiver gone) drops that subscriber only.
pub struct ProgressBus {
    store: Arc<dyn JobStore>,
    buffer: usize,
    heartbeat: Duration,
    next_id: AtomicU64,
    subscribers: RwLock<SubscriberMap>,
}

/// One observer's view of a job's events.
pub struct Subscription {
    id: u64,
    job_id: String,
    receiver: mpsc::Receiver<ProgressEvent>,
    heartbeat: Duration,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the next event.
    ///
    /// Yields a heartbeat when nothing arrives within the idle window and
    /// `None` once the bus has dropped this subscriber.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        match timeout(self.heartbeat, self.receiver.recv()).await {
            Ok(event) => event,
            Err(_) => Some(ProgressEvent::heartbeat()),
        }
    }
}

impl ProgressBus {
    pub fn new(store: Arc<dyn JobStore>, config: &ProgressConfig) -> Self {
        Self {
            store,
            buffer: config.subscriber_buffer.max(1),
            heartbeat: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register an observer for `job_id`.
    ///
    /// The first queued message is a status snapshot taken from the store, so
    /// a subscriber joining mid-run starts from the persisted counters.
    pub fn subscribe(&self, job_id: &str) -> Result<Subscription, ProgressError> {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Holding the write lock orders the snapshot before any later publish.
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let snapshot = self.snapshot(job_id)?;
        // Fresh channel with capacity >= 1 cannot be full.
        let _ = sender.try_send(snapshot);

        subscribers
            .entry(job_id.to_string())
            .or_default()
            .insert(id, sender);

        debug!(job_id = %job_id, subscriber = id, "Subscriber added");
        Ok(Subscription {
            id,
            job_id: job_id.to_string(),
            receiver,
            heartbeat: self.heartbeat,
        })
    }

    /// Remove an observer. Safe to call more than once.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(job_subs) = subscribers.get_mut(&subscription.job_id) {
            if job_subs.remove(&subscription.id).is_some() {
                debug!(job_id = %subscription.job_id, subscriber = subscription.id, "Subscriber removed");
            }
            if job_subs.is_empty() {
                subscribers.remove(&subscription.job_id);
            }
        }
    }

    /// Deliver `event` to every current subscriber of `job_id`.
    ///
    /// Returns how many subscribers accepted it.
    pub fn broadcast(&self, job_id: &str, event: ProgressEvent) -> usize {
        PROGRESS_EVENTS
            .with_label_values(&[event.event_type()])
            .inc();

        let mut failed = Vec::new();
        let mut delivered = 0;
        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(job_subs) = subscribers.get(job_id) else {
                return 0;
            };
            for (id, sender) in job_subs {
                match sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => failed.push(*id),
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(job_subs) = subscribers.get_mut(job_id) {
                for id in &failed {
                    job_subs.remove(id);
                }
                if job_subs.is_empty() {
                    subscribers.remove(job_id);
                }
            }
            PROGRESS_SUBSCRIBERS_DROPPED.inc_by(failed.len() as u64);
            debug!(job_id = %job_id, dropped = failed.len(), "Dropped unreachable subscribers");
        }

        delivered
    }

    /// Current counters for `job_id`, read from the store.
    pub fn snapshot(&self, job_id: &str) -> Result<ProgressEvent, ProgressError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| ProgressError::JobNotFound(job_id.to_string()))?;
        Ok(ProgressEvent::status_update(&job))
    }

    /// Reply to an inbound subscriber message.
    pub fn answer(&self, job_id: &str, message: ClientMessage) -> Result<ProgressEvent, ProgressError> {
        match message {
            ClientMessage::Ping => Ok(ProgressEvent::Pong),
            ClientMessage::GetStatus => self.snapshot(job_id),
        }
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map_or(0, HashMap::len)
    }
}

impl ProgressPublisher for ProgressBus {
    fn publish(&self, job_id: &str, event: ProgressEvent) -> Result<(), ProgressError> {
        self.broadcast(job_id, event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DownloadedFile, JobStatus, RecordStatus, SqliteJobStore};
    use crate::testing::fixtures;

    fn setup(config: ProgressConfig) -> (Arc<SqliteJobStore>, ProgressBus, String) {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let job = store
            .create_job(fixtures::create_request("/data/index.csv", "/out"))
            .unwrap();
        let bus = ProgressBus::new(store.clone(), &config);
        (store, bus, job.id)
    }

    #[tokio::test]
    async fn test_subscribe_unknown_job_rejected() {
        let (_store, bus, _) = setup(ProgressConfig::default());
        assert!(matches!(
            bus.subscribe("nope"),
            Err(ProgressError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_then_events_in_order() {
        let (store, bus, job_id) = setup(ProgressConfig::default());
        let mut sub = bus.subscribe(&job_id).unwrap();

        let job = store.get_job(&job_id).unwrap().unwrap();
        for row in 1..=3 {
            bus.broadcast(&job_id, ProgressEvent::progress(&job, Some(row), "processing", None));
        }

        assert_eq!(sub.next().await.unwrap().event_type(), "status_update");
        for row in 1..=3 {
            match sub.next().await.unwrap() {
                ProgressEvent::Progress { current_record, .. } => {
                    assert_eq!(current_record, Some(row))
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_mid_run_snapshot_matches_store() {
        let (store, bus, job_id) = setup(ProgressConfig::default());
        store.request_status(&job_id, JobStatus::Running).unwrap();
        store.set_total_records(&job_id, 4).unwrap();

        let mut found = store
            .create_record(&job_id, 1, fixtures::row(&[("Invoice", "A-1")]))
            .unwrap();
        for status in [
            RecordStatus::Searching,
            RecordStatus::Found,
            RecordStatus::Downloading,
            RecordStatus::Processing,
            RecordStatus::Completed,
        ] {
            found.advance(status);
        }
        found.artifacts.push(DownloadedFile {
            document_id: "doc-1".to_string(),
            source_name: "doc-1_document.pdf".to_string(),
            saved_path: "/out/Acme/doc-1_document.pdf".to_string(),
            size_bytes: 4,
            transformed: false,
            sha256: None,
        });
        store.finish_record(&found).unwrap();

        let mut missing = store
            .create_record(&job_id, 2, fixtures::row(&[("Invoice", "A-2")]))
            .unwrap();
        missing.advance(RecordStatus::Searching);
        missing.advance(RecordStatus::NotFound);
        store.finish_record(&missing).unwrap();

        let mut sub = bus.subscribe(&job_id).unwrap();
        match sub.next().await.unwrap() {
            ProgressEvent::StatusUpdate { status, progress, .. } => {
                assert_eq!(status, JobStatus::Running);
                assert_eq!(progress.processed, 2);
                assert_eq!(progress.total, 4);
                assert_eq!(progress.successful, 1);
                assert_eq!(progress.percentage, 50.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let (_store, bus, job_id) = setup(ProgressConfig::default());
        assert_eq!(bus.broadcast(&job_id, ProgressEvent::error(&job_id, "x")), 0);
        assert!(bus.publish(&job_id, ProgressEvent::Pong).is_ok());
    }

    #[tokio::test]
    async fn test_failed_delivery_drops_only_that_subscriber() {
        let config = ProgressConfig {
            subscriber_buffer: 1,
            ..ProgressConfig::default()
        };
        let (_store, bus, job_id) = setup(config);

        // Never drained: its single slot is held by the snapshot.
        let _stalled = bus.subscribe(&job_id).unwrap();
        let mut live = bus.subscribe(&job_id).unwrap();
        live.next().await.unwrap();

        let delivered = bus.broadcast(&job_id, ProgressEvent::error(&job_id, "boom"));
        assert_eq!(delivered, 1);
        assert_eq!(bus.subscriber_count(&job_id), 1);
        assert_eq!(live.next().await.unwrap().event_type(), "error");
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_removed_on_publish() {
        let (_store, bus, job_id) = setup(ProgressConfig::default());
        let sub = bus.subscribe(&job_id).unwrap();
        let kept = bus.subscribe(&job_id).unwrap();
        drop(sub);

        bus.broadcast(&job_id, ProgressEvent::Pong);
        assert_eq!(bus.subscriber_count(&job_id), 1);
        bus.unsubscribe(&kept);
        bus.unsubscribe(&kept);
        assert_eq!(bus.subscriber_count(&job_id), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_stream_ends() {
        let (_store, bus, job_id) = setup(ProgressConfig::default());
        let mut sub = bus.subscribe(&job_id).unwrap();
        sub.next().await.unwrap();
        bus.unsubscribe(&sub);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_idle_subscriber_gets_heartbeat() {
        let (_store, bus, job_id) = setup(ProgressConfig {
            heartbeat_interval_secs: 1,
            ..ProgressConfig::default()
        });
        let mut sub = bus.subscribe(&job_id).unwrap();
        sub.next().await.unwrap();
        assert_eq!(sub.next().await.unwrap().event_type(), "heartbeat");
    }

    #[tokio::test]
    async fn test_answer_client_messages() {
        let (_store, bus, job_id) = setup(ProgressConfig::default());
        assert_eq!(bus.answer(&job_id, ClientMessage::Ping).unwrap(), ProgressEvent::Pong);
        assert_eq!(
            bus.answer(&job_id, ClientMessage::GetStatus).unwrap().event_type(),
            "status_update"
        );
    }
}
