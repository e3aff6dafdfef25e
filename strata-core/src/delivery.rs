//! The delivery context: a dedicated thread that runs completions and
//! observable memory-tier insertions in submission order.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, mpsc as std_mpsc},
    thread::{self, ThreadId},
};

use thiserror::Error;
use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to spawn delivery thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("delivery thread has stopped")]
    Closed,

    #[error("delivery job did not complete")]
    Interrupted,
}

struct Inner {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
    thread_id: ThreadId,
}

/// Handle to a delivery thread.
///
/// Clones share the thread, which exits once every handle is dropped and the
/// queue has drained. Several caches may share one queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    pub fn new(name: impl Into<String>) -> Result<Self, DeliveryError> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(
                            queue = %thread_name,
                            "delivery job panicked"
                        );
                    }
                }
                tracing::debug!(
                    queue = %thread_name,
                    "delivery thread stopped"
                );
            })
            .map_err(DeliveryError::Spawn)?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                sender,
                thread_id: handle.thread().id(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is this queue's delivery thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Queue `job` without waiting for it.
    pub fn dispatch<F>(&self, job: F) -> Result<(), DeliveryError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .sender
            .send(Box::new(job))
            .map_err(|_| DeliveryError::Closed)
    }

    /// Run `job` on the delivery thread and wait for its result.
    ///
    /// Runs inline when already on the delivery thread. Blocks the calling
    /// thread otherwise, so async code should prefer
    /// [`DeliveryQueue::dispatch`].
    pub fn run_sync<F, R>(&self, job: F) -> Result<R, DeliveryError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (tx, rx) = std_mpsc::sync_channel(1);
        self.dispatch(move || {
            let _ = tx.send(job());
        })?;
        rx.recv().map_err(|_| DeliveryError::Interrupted)
    }
}

impl fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("name", &self.inner.name)
            .field("thread_id", &self.inner.thread_id)
            .finish()
    }
}
