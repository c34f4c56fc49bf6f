//! Event bus: per-task ordered pub/sub with a durable log.
//!
//! Two transports behind one interface: an in-process broadcast channel for
//! live subscribers, and the persisted per-task event log for replay across
//! reconnects. Events are persisted before they are broadcast, so the log
//! order is the committed order.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{TaskEvent, TaskEventPayload};
use crate::domain::ports::{Clock, EventRepository};

/// Default broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 1024;

pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
    store: Arc<dyn EventRepository>,
    clock: Arc<dyn Clock>,
    /// Next sequence number per task. Publishing holds this lock across the
    /// store append, which serializes commits within a topic.
    counters: Mutex<HashMap<Uuid, u64>>,
}

impl EventBus {
    pub fn new(store: Arc<dyn EventRepository>, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            store,
            clock,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an event on the task's topic.
    ///
    /// Assigns the next per-task sequence number, persists, then broadcasts.
    /// The first publish for a task after a restart resumes from the log's
    /// latest sequence.
    pub async fn publish(
        &self,
        task_id: Uuid,
        payload: TaskEventPayload,
    ) -> DomainResult<TaskEvent> {
        let mut counters = self.counters.lock().await;

        let next = match counters.get(&task_id) {
            Some(&next) => next,
            None => self
                .store
                .latest_seq(task_id)
                .await?
                .map_or(0, |latest| latest + 1),
        };

        let event = TaskEvent {
            task_id,
            seq: next,
            timestamp: self.clock.now(),
            payload,
        };

        self.store.append(&event).await?;
        counters.insert(task_id, next + 1);
        drop(counters);

        // No subscribers is fine.
        let _ = self.sender.send(event.clone());

        Ok(event)
    }

    /// Subscribe to the live firehose. Callers filter by task id.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Committed events for a task with `seq > since`.
    pub async fn replay(&self, task_id: Uuid, since: Option<u64>) -> DomainResult<Vec<TaskEvent>> {
        self.store.replay(task_id, since).await
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
