//! Cross-process progress delivery through a SQLite outbox table.
//!
//! A worker process appends events with [`OutboxPublisher`]; the process
//! serving subscribers runs an [`OutboxRelay`] that tails the table in
//! sequence order and re-broadcasts each row into its local [`ProgressBus`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::metrics::{OUTBOX_RELAYED, PROGRESS_EVENTS};

use super::{ProgressBus, ProgressConfig, ProgressError, ProgressEvent, ProgressPublisher};

/// Rows fetched per relay poll.
const RELAY_BATCH: i64 = 500;

/// How often the relay prunes expired rows.
const PRUNE_EVERY: Duration = Duration::from_secs(60);

/// One persisted event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub seq: i64,
    pub job_id: String,
    pub event: ProgressEvent,
}

/// Publisher that appends events to the `progress_outbox` table.
pub struct OutboxPublisher {
    conn: Mutex<Connection>,
}

impl OutboxPublisher {
    /// Open the outbox in the database at `path`, creating the table if needed.
    pub fn new(path: &Path) -> Result<Self, ProgressError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS progress_outbox (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_progress_outbox_created ON progress_outbox(created_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ProgressError> {
        self.conn
            .lock()
            .map_err(|_| ProgressError::Outbox("connection mutex poisoned".to_string()))
    }

    /// Highest sequence number written so far, 0 when empty.
    pub fn last_seq(&self) -> Result<i64, ProgressError> {
        let conn = self.conn()?;
        let seq = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM progress_outbox",
            [],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// Entries with `seq > after`, oldest first.
    pub fn read_after(&self, after: i64, limit: i64) -> Result<Vec<OutboxEntry>, ProgressError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, job_id, payload FROM progress_outbox WHERE seq > ? ORDER BY seq LIMIT ?",
        )?;
        let rows = stmt.query_map(params![after, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (seq, job_id, payload) = row?;
            match serde_json::from_str(&payload) {
                Ok(event) => entries.push(OutboxEntry { seq, job_id, event }),
                Err(e) => warn!(seq, error = %e, "Skipping undecodable outbox row"),
            }
        }
        Ok(entries)
    }

    /// Delete rows older than `max_age`. Returns the number removed.
    pub fn prune(&self, max_age: Duration) -> Result<usize, ProgressError> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| ProgressError::Outbox(e.to_string()))?;
        let cutoff = (Utc::now() - age).to_rfc3339();
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM progress_outbox WHERE created_at < ?",
            params![cutoff],
        )?;
        Ok(removed)
    }
}

impl ProgressPublisher for OutboxPublisher {
    fn publish(&self, job_id: &str, event: ProgressEvent) -> Result<(), ProgressError> {
        let payload = serde_json::to_string(&event)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO progress_outbox (job_id, event_type, payload, created_at) VALUES (?, ?, ?, ?)",
            params![job_id, event.event_type(), payload, Utc::now().to_rfc3339()],
        )?;
        PROGRESS_EVENTS
            .with_label_values(&[event.event_type()])
            .inc();
        Ok(())
    }
}

/// Tails the outbox into the local bus.
pub struct OutboxRelay {
    outbox: Arc<OutboxPublisher>,
    bus: Arc<ProgressBus>,
    poll_interval: Duration,
    retention: Duration,
    cursor: AtomicI64,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<OutboxPublisher>, bus: Arc<ProgressBus>, config: &ProgressConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            outbox,
            bus,
            poll_interval: Duration::from_millis(config.outbox_poll_interval_ms.max(10)),
            retention: Duration::from_secs(config.outbox_retention_secs),
            cursor: AtomicI64::new(0),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Skip everything already in the table. Events are not replayed.
    pub fn seek_to_end(&self) -> Result<(), ProgressError> {
        self.cursor.store(self.outbox.last_seq()?, Ordering::SeqCst);
        Ok(())
    }

    /// Relay one batch. Returns the number of events broadcast.
    pub fn relay_once(&self) -> Result<usize, ProgressError> {
        let after = self.cursor.load(Ordering::SeqCst);
        let entries = self.outbox.read_after(after, RELAY_BATCH)?;
        let count = entries.len();

        for entry in entries {
            self.bus.broadcast(&entry.job_id, entry.event);
            self.cursor.store(entry.seq, Ordering::SeqCst);
        }

        if count > 0 {
            OUTBOX_RELAYED.inc_by(count as u64);
            debug!(count, "Relayed outbox events");
        }
        Ok(count)
    }

    /// Start the relay loop in the background.
    pub fn start(self: &Arc<Self>) -> Result<(), ProgressError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Outbox relay already running");
            return Ok(());
        }

        self.seek_to_end()?;
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            "Starting outbox relay"
        );

        let relay = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(relay.poll_interval);
            let mut last_prune = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Outbox relay shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = relay.relay_once() {
                            warn!(error = %e, "Outbox relay poll failed");
                        }
                        if last_prune.elapsed() >= PRUNE_EVERY {
                            last_prune = Instant::now();
                            match relay.outbox.prune(relay.retention) {
                                Ok(0) => {}
                                Ok(n) => debug!(removed = n, "Pruned outbox"),
                                Err(e) => warn!(error = %e, "Outbox prune failed"),
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping outbox relay");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}
