//! Progress publisher that records events for assertions.

use std::sync::Mutex;

use crate::progress::{ProgressError, ProgressEvent, ProgressPublisher};

/// Keeps every published event in order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(String, ProgressEvent)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published `(job_id, event)` pairs.
    pub fn events(&self) -> Vec<(String, ProgressEvent)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events published for one job.
    pub fn events_for(&self, job_id: &str) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, event)| event)
            .collect()
    }

    /// The `type` tags of the events published for one job.
    pub fn event_types_for(&self, job_id: &str) -> Vec<&'static str> {
        self.events_for(job_id)
            .iter()
            .map(ProgressEvent::event_type)
            .collect()
    }
}

impl ProgressPublisher for RecordingPublisher {
    fn publish(&self, job_id: &str, event: ProgressEvent) -> Result<(), ProgressError> {
        self.events
            .lock()
            .map_err(|e| ProgressError::Outbox(e.to_string()))?
            .push((job_id.to_string(), event));
        Ok(())
    }
}
