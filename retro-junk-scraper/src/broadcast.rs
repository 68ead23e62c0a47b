//! Fan-out of task progress events.
//!
//! Each task owns an unbounded outbound queue. The broadcaster spawns one
//! relay per task that drains that queue, in order, into a shared
//! `tokio::sync::broadcast` channel. Subscribers filter by scope.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::Stream;
use tokio::sync::{broadcast, mpsc};

use crate::task::{ProgressEvent, TaskId};

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    All,
    /// Every task for one system
    System(String),
    Task(TaskId),
}

impl SubscriptionScope {
    pub fn matches(&self, event: &ProgressEvent) -> bool {
        match self {
            SubscriptionScope::All => true,
            SubscriptionScope::System(system) => event.scope == *system,
            SubscriptionScope::Task(id) => event.task_id == *id,
        }
    }
}

pub struct ProgressBroadcaster {
    tx: broadcast::Sender<ProgressEvent>,
    latest: Arc<Mutex<HashMap<TaskId, Option<ProgressEvent>>>>,
}

impl ProgressBroadcaster {
    /// `capacity` bounds how far a subscriber may fall behind before it
    /// starts skipping events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create the outbound queue for a task and start its relay.
    ///
    /// The relay ends when the task drops its sender. Must be called within
    /// a tokio runtime.
    pub fn register(&self, task_id: TaskId) -> mpsc::UnboundedSender<ProgressEvent> {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let tx = self.tx.clone();
        let latest = self.latest.clone();
        latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id, None);
        tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                // Events still queued for a forgotten task are not cached again.
                if let Some(slot) = latest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_mut(&event.task_id)
                {
                    *slot = Some(event.clone());
                }
                // No subscribers is fine.
                let _ = tx.send(event);
            }
            log::debug!("Progress relay for task {} finished", task_id);
        });
        queue_tx
    }

    pub fn subscribe(&self, scope: SubscriptionScope) -> ProgressSubscription {
        ProgressSubscription {
            rx: self.tx.subscribe(),
            scope,
        }
    }

    /// Most recent event relayed for a task.
    pub fn latest(&self, task_id: TaskId) -> Option<ProgressEvent> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .cloned()
            .flatten()
    }

    /// Drop the cached event for a task.
    pub fn forget(&self, task_id: TaskId) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&task_id);
    }
}

/// A filtered view of the event stream.
pub struct ProgressSubscription {
    rx: broadcast::Receiver<ProgressEvent>,
    scope: SubscriptionScope,
}

impl ProgressSubscription {
    pub fn scope(&self) -> &SubscriptionScope {
        &self.scope
    }

    /// Next matching event, or `None` once the broadcaster is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.scope.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Progress subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}
