//! Shared application state for the HTTP handlers.
//!
//! Everything is reached through `Arc` — the configuration is read-only
//! after startup, the store carries its own pool, and the only mutable
//! pieces are lock-free counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::pipeline::{CaptureJob, CapturePipeline};
use crate::store::ContextStore;

/// Lock-free counters surfaced by the status endpoint.
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub captures_accepted: AtomicUsize,
    pub captures_rejected_busy: AtomicUsize,
    pub captures_rejected_invalid: AtomicUsize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_accepted(&self) -> usize {
        self.captures_accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_rejected_busy(&self) -> usize {
        self.captures_rejected_busy.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_rejected_invalid(&self) -> usize {
        self.captures_rejected_invalid.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// The single state type threaded through the axum router.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,
    pub store: ContextStore,
    pub pipeline: Arc<CapturePipeline>,
    pub counters: Arc<AtomicCounters>,
    capture_tx: mpsc::Sender<CaptureJob>,
}

impl SharedState {
    pub fn new(
        config: Arc<Config>,
        store: ContextStore,
        pipeline: Arc<CapturePipeline>,
        capture_tx: mpsc::Sender<CaptureJob>,
    ) -> Self {
        Self {
            config,
            store,
            pipeline,
            counters: Arc::new(AtomicCounters::new()),
            capture_tx,
        }
    }

    /// Bounded hand-off to the worker pool; `Err` means the queue is
    /// full (or draining for shutdown) and the caller must see `Busy`.
    pub fn try_enqueue(&self, job: CaptureJob) -> Result<(), ()> {
        self.capture_tx.try_send(job).map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero_and_increment() {
        let counters = AtomicCounters::new();
        assert_eq!(counters.captures_accepted.load(Ordering::Relaxed), 0);
        assert_eq!(counters.inc_accepted(), 1);
        assert_eq!(counters.inc_accepted(), 2);
        assert_eq!(counters.inc_rejected_busy(), 1);
        assert_eq!(counters.inc_rejected_invalid(), 1);
        assert_eq!(counters.captures_accepted.load(Ordering::Relaxed), 2);
    }
}
