use crate::client::AnalysisResult;
use std::sync::{Arc, Mutex, PoisonError};

/// One accepted analysis result and the request sequence that produced it.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub sequence: u64,
    pub result: Arc<AnalysisResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// A result from a later request is already held.
    Stale { held: u64 },
    /// The owning session has stopped.
    Closed,
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<CachedResult>,
    closed: bool,
}

/// Single-slot holder of the latest accepted analysis result.
///
/// Replacement swaps an `Arc`, so readers always see a whole result.
#[derive(Debug, Default)]
pub struct ResultCache {
    slot: Mutex<Slot>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, sequence: u64, result: AnalysisResult) -> StoreOutcome {
        self.store_and(sequence, result, |_| {})
    }

    /// Stores `result` and, if accepted, runs `on_stored` before the slot is
    /// released, so the callback can never be ordered after [`close`](Self::close).
    pub fn store_and<F>(&self, sequence: u64, result: AnalysisResult, on_stored: F) -> StoreOutcome
    where
        F: FnOnce(&AnalysisResult),
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        if slot.closed {
            return StoreOutcome::Closed;
        }
        if let Some(held) = &slot.latest
            && held.sequence > sequence
        {
            return StoreOutcome::Stale {
                held: held.sequence,
            };
        }

        let result = Arc::new(result);
        on_stored(&result);
        slot.latest = Some(CachedResult { sequence, result });
        StoreOutcome::Stored
    }

    /// Runs `f` unless the cache is closed, holding the slot meanwhile.
    pub fn while_open<F: FnOnce()>(&self, f: F) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.closed {
            return false;
        }
        f();
        true
    }

    pub fn latest(&self) -> Option<CachedResult> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }

    /// Rejects every later store. The held value stays readable.
    pub fn close(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).closed
    }
}
