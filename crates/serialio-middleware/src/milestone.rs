//! Milestone recording.
//!
//! A milestone is a human-readable lifecycle note ("device opened", "service
//! stopped").  Every milestone is emitted as a `tracing` event.  When a bus is
//! attached it is also published as JSON on [`MILESTONE_CHANNEL`] so that a
//! remote log collector can pick it up.  Recording never fails.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::MessageBus;

/// Channel milestones are published on.
pub const MILESTONE_CHANNEL: &str = "logs/milestones";

/// One recorded milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"SerialPort_ttyUSB0"`
    pub author: String,
    pub text: String,
}

/// Milestone recorder bound to one author.
#[derive(Clone)]
pub struct MilestoneLog {
    author: String,
    bus: Option<Arc<dyn MessageBus>>,
}

impl MilestoneLog {
    /// A recorder that only writes to the `tracing` subscriber.
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            bus: None,
        }
    }

    /// Also publish milestones on `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    /// Record `text` and return the milestone that was emitted.
    pub async fn record(&self, text: impl Into<String>) -> Milestone {
        let milestone = Milestone {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            author: self.author.clone(),
            text: text.into(),
        };
        info!(author = %milestone.author, "{}", milestone.text);

        if let Some(bus) = &self.bus {
            match serde_json::to_vec(&milestone) {
                Ok(json) => {
                    if let Err(e) = bus.publish(MILESTONE_CHANNEL, &json).await {
                        debug!(author = %self.author, error = %e, "milestone not published");
                    }
                }
                Err(e) => debug!(error = %e, "milestone not serialisable"),
            }
        }
        milestone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    #[tokio::test]
    async fn record_without_bus_returns_milestone() {
        let log = MilestoneLog::new("SerialPort_ttyUSB0");
        let m = log.record("Shutdown command received.").await;
        assert_eq!(m.author, "SerialPort_ttyUSB0");
        assert_eq!(m.text, "Shutdown command received.");
    }

    #[tokio::test]
    async fn record_publishes_json_when_bus_attached() {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe(MILESTONE_CHANNEL).await.unwrap();
        let log = MilestoneLog::new("Launcher").with_bus(Arc::new(bus.clone()));

        let sent = log.record("IO Service initiating...").await;

        let raw = sub.recv().await.unwrap();
        let received: Milestone = serde_json::from_slice(&raw).unwrap();
        assert_eq!(received.id, sent.id);
        assert_eq!(received.author, "Launcher");
        assert_eq!(received.text, "IO Service initiating...");
    }

    #[tokio::test]
    async fn record_survives_disconnected_bus() {
        let bus = MemoryBus::default();
        bus.set_connected(false);
        let log = MilestoneLog::new("Launcher").with_bus(Arc::new(bus));
        let m = log.record("still recorded").await;
        assert_eq!(m.text, "still recorded");
    }
}
