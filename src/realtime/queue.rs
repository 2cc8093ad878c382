//! The work queue between feed parsers and the fusion workers.
//!
//! Bounded, so a fast parser backpressures instead of ballooning memory.
//! The depth gauge counts events that have been published but not yet fully
//! processed; feeders use `wait_until_drained` at the end of a batch, polled
//! once a second.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::models::RealtimeEvent;

/// Default queue name, shared with external feeders and dashboards.
pub const REALTIME_QUEUE_NAME: &str = "realtime-queue";

#[derive(Debug)]
pub struct QueueClosed;

#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<RealtimeEvent>,
    depth: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct EventReceiver {
    rx: Arc<Mutex<mpsc::Receiver<RealtimeEvent>>>,
    depth: Arc<AtomicUsize>,
}

pub fn event_queue(capacity: usize) -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let depth = Arc::new(AtomicUsize::new(0));
    (
        EventQueue {
            tx,
            depth: depth.clone(),
        },
        EventReceiver {
            rx: Arc::new(Mutex::new(rx)),
            depth,
        },
    )
}

impl EventQueue {
    /// Publish an event. Waits when the queue is full; errors only when all
    /// consumers are gone.
    ///
    /// The depth gauge moves before the send so a consumer can never
    /// decrement an event that was not yet counted.
    pub async fn publish(&self, event: RealtimeEvent) -> Result<(), QueueClosed> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).await.is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueClosed);
        }
        Ok(())
    }

    /// Events published but not yet fully processed.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Block until every published event has been processed.
    pub async fn wait_until_drained(&self) {
        loop {
            if self.depth() == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
}

impl EventReceiver {
    /// Next event, or `None` once the queue has shut down. Consumers share
    /// one receiver; whichever worker grabs the lock first takes the event.
    pub async fn recv(&self) -> Option<RealtimeEvent> {
        self.rx.lock().await.recv().await
    }

    /// Mark one event as fully processed, releasing drain waiters.
    pub fn mark_processed(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
