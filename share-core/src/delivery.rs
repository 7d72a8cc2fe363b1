//! Delivery context: the single serialized execution context on which all
//! consumer-facing callbacks run.

use std::sync::Arc;

use tokio::sync::mpsc;

pub type Task = Box<dyn FnOnce() + Send>;

/// Where consumer callbacks execute. Every inbound transport event is posted
/// here before any listener is invoked, so the consumer never observes two
/// callbacks running concurrently.
pub trait DeliveryContext: Send + Sync {
    fn post(&self, task: Task);
}

/// Runs tasks immediately on the calling thread. For tests and for hosts that
/// already marshal onto a main loop of their own.
pub struct InlineDelivery;

impl DeliveryContext for InlineDelivery {
    fn post(&self, task: Task) {
        task();
    }
}

/// One spawned task draining a queue in posting order: the "main thread"
/// analog for headless hosts. Tasks posted after the runtime shuts down are
/// dropped.
pub struct QueuedDelivery {
    tx: mpsc::UnboundedSender<Task>,
}

impl QueuedDelivery {
    /// Spawn the drain task on the current tokio runtime.
    pub fn spawn() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
        });
        Arc::new(Self { tx })
    }
}

impl DeliveryContext for QueuedDelivery {
    fn post(&self, task: Task) {
        let _ = self.tx.send(task);
    }
}
