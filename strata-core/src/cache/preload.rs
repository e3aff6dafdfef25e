//! Warm the memory tier from a freshly registered format's store.

use std::{fmt, ops::ControlFlow, sync::Arc};

use chrono::{DateTime, TimeDelta, Utc};
use strata_model::PreloadPolicy;
use tokio::sync::mpsc;

use super::CacheInner;
use crate::{format::FormatHandle, store::StoredEntry};

/// `Recent` preloads entries accessed within this window of the newest
/// one.
pub const RECENT_WINDOW: TimeDelta = TimeDelta::hours(1);

/// Why a preload pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadStop {
    /// Every eligible entry was visited.
    Exhausted,
    /// `Recent` reached an entry older than the cutoff.
    Cutoff,
    /// A live request reached the format.
    LiveRequest,
    /// The memory tier is full.
    MemoryFull,
    /// The format was re-registered or removed.
    Superseded,
    /// The store failed to enumerate.
    Failed(String),
}

/// Outcome of a preload pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadSummary {
    pub format: String,
    pub loaded: usize,
    /// Entries whose bytes could not be decoded.
    pub skipped: usize,
    pub stop: PreloadStop,
}

impl fmt::Display for PreloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: loaded {}, skipped {}, stopped: {:?}",
            self.format, self.loaded, self.skipped, self.stop
        )
    }
}

pub(super) async fn run(
    inner: Arc<CacheInner>,
    handle: FormatHandle,
) -> PreloadSummary {
    let policy = handle.spec().preload_policy;
    let (tx, rx) = mpsc::unbounded_channel::<StoredEntry>();

    // Read no further than the memory tier can hold.
    let budget = match inner.memory.capacity() {
        0 => None,
        capacity => Some(capacity),
    };
    let enumerate = enumerate(handle.clone(), policy, budget, tx);
    let consume = consume(&inner, &handle, rx);
    let (listed, consumed) = tokio::join!(enumerate, consume);

    let (loaded, skipped, halted) = consumed;
    let stop = halted.unwrap_or(listed);
    inner.stats.on_preloaded(loaded as u64);

    let summary = PreloadSummary {
        format: handle.name().to_owned(),
        loaded,
        skipped,
        stop,
    };
    tracing::info!(format = handle.name(), %summary, "preload finished");
    summary
}

/// Feed eligible entries to the consumer, at most `budget` of them.
async fn enumerate(
    handle: FormatHandle,
    policy: PreloadPolicy,
    budget: Option<usize>,
    tx: mpsc::UnboundedSender<StoredEntry>,
) -> PreloadStop {
    let mut stop = PreloadStop::Exhausted;
    let mut cutoff: Option<DateTime<Utc>> = None;
    let mut sent = 0usize;

    let mut visitor = |entry: StoredEntry| {
        // Closed once the consumer has stopped.
        if tx.is_closed() {
            return ControlFlow::Break(());
        }
        if handle.has_live_requests() {
            stop = PreloadStop::LiveRequest;
            return ControlFlow::Break(());
        }
        if policy == PreloadPolicy::Recent {
            let cutoff =
                *cutoff.get_or_insert(entry.accessed_at - RECENT_WINDOW);
            if entry.accessed_at < cutoff {
                stop = PreloadStop::Cutoff;
                return ControlFlow::Break(());
            }
        }
        if tx.send(entry).is_err() {
            return ControlFlow::Break(());
        }
        sent += 1;
        if budget.is_some_and(|budget| sent >= budget) {
            stop = PreloadStop::MemoryFull;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    };

    let listed = handle.store().enumerate_by_access_date(&mut visitor).await;
    drop(visitor);
    drop(tx);

    match listed {
        Ok(()) => stop,
        Err(e) => {
            tracing::warn!(
                format = handle.name(),
                "preload enumeration failed: {e}"
            );
            PreloadStop::Failed(e.to_string())
        }
    }
}

/// Decode and insert entries in order. Returns the counts and, when it
/// halted the pass itself, the reason.
async fn consume(
    inner: &Arc<CacheInner>,
    handle: &FormatHandle,
    mut rx: mpsc::UnboundedReceiver<StoredEntry>,
) -> (usize, usize, Option<PreloadStop>) {
    let mut loaded = 0usize;
    let mut skipped = 0usize;

    while let Some(entry) = rx.recv().await {
        if handle.has_live_requests() {
            return (loaded, skipped, Some(PreloadStop::LiveRequest));
        }

        let StoredEntry { key, bytes, .. } = entry;
        let codec = Arc::clone(&inner.codec);
        let decoded = inner
            .background
            .spawn_blocking(move || {
                codec.decode(&bytes).map(|image| codec.materialize(image))
            })
            .await;
        let image = match decoded {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                tracing::debug!(
                    format = handle.name(),
                    key = %key,
                    "preload skipped undecodable entry: {e}"
                );
                skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    format = handle.name(),
                    key = %key,
                    "preload decode task failed: {e}"
                );
                skipped += 1;
                continue;
            }
        };

        let job_inner = Arc::clone(inner);
        let job_handle = handle.clone();
        let inserted = inner
            .on_delivery(move || {
                // Re-checked here: a request may have arrived during decode.
                if job_handle.has_live_requests() {
                    return Some(PreloadStop::LiveRequest);
                }
                if !job_inner.is_registered(&job_handle) {
                    return Some(PreloadStop::Superseded);
                }
                job_inner.memory.set(&key, image, job_handle.name());
                None
            })
            .await;

        match inserted {
            Ok(None) => loaded += 1,
            Ok(Some(stop)) => return (loaded, skipped, Some(stop)),
            Err(e) => {
                let stop = PreloadStop::Failed(e.to_string());
                return (loaded, skipped, Some(stop));
            }
        }

        let capacity = inner.memory.capacity();
        if capacity > 0 && loaded >= capacity {
            return (loaded, skipped, Some(PreloadStop::MemoryFull));
        }
    }

    (loaded, skipped, None)
}
