//! Bounded in-process queue of build ids.
//!
//! Any number of [`BuildQueue`] handles submit ids; workers share one
//! [`QueueReceiver`]. Dropping the last `BuildQueue` closes the queue: workers
//! still receive every id already buffered, then `recv` returns `None`.

use std::sync::Arc;
use tinderbox_core::BuildId;
use tokio::sync::{Mutex, mpsc};

use crate::{SchedulerError, SchedulerResult};

/// Create a queue that buffers up to `capacity` ids.
pub fn channel(capacity: usize) -> (BuildQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BuildQueue { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Submitting side of the queue.
#[derive(Debug, Clone)]
pub struct BuildQueue {
    tx: mpsc::Sender<BuildId>,
}

impl BuildQueue {
    /// Enqueue a build, waiting while the queue is full.
    pub async fn submit(&self, id: BuildId) -> SchedulerResult<()> {
        self.tx
            .send(id)
            .await
            .map_err(|e| SchedulerError::QueueClosed(e.0))
    }

    /// Number of ids that can be submitted without waiting.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of the queue, shared by all workers.
#[derive(Debug, Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<BuildId>>>,
}

impl QueueReceiver {
    /// Next build id, or `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<BuildId> {
        self.rx.lock().await.recv().await
    }
}
