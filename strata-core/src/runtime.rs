//! Background pool: async store/producer I/O plus blocking CPU work.

use std::{fmt, future::Future};

use tokio::{
    runtime::{Builder, Handle, Runtime},
    task::JoinHandle,
};
use tokio_util::task::TaskTracker;

pub(crate) struct Background {
    handle: Handle,
    owned: Option<Runtime>,
    writes: TaskTracker,
}

impl Background {
    /// Borrow the ambient runtime, or start a multi-thread one when called
    /// outside of tokio or when `own_runtime` is set.
    pub fn new(
        worker_threads: Option<usize>,
        own_runtime: bool,
    ) -> std::io::Result<Self> {
        let ambient = if own_runtime {
            None
        } else {
            Handle::try_current().ok()
        };
        let (handle, owned) = match ambient {
            Some(handle) => (handle, None),
            None => {
                let mut builder = Builder::new_multi_thread();
                builder.thread_name("strata-worker").enable_all();
                if let Some(threads) = worker_threads {
                    builder.worker_threads(threads.max(1));
                }
                let runtime = builder.build()?;
                tracing::debug!("started owned background runtime");
                (runtime.handle().clone(), Some(runtime))
            }
        };

        // Kept closed so `wait` resolves whenever nothing is in flight.
        let writes = TaskTracker::new();
        writes.close();

        Ok(Self {
            handle,
            owned,
            writes,
        })
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    pub fn spawn_blocking<F, R>(&self, work: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(work)
    }

    /// Spawn a store write that [`Background::flush`] waits for.
    pub fn spawn_write<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.writes.spawn_on(future, &self.handle);
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub async fn flush(&self) {
        self.writes.wait().await;
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        if let Some(runtime) = self.owned.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Background")
            .field("owned_runtime", &self.owned.is_some())
            .field("pending_writes", &self.writes.len())
            .finish()
    }
}
