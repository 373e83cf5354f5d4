//! Keyed deduplication of concurrent cache misses.
//!
//! For a given key, at most one computation runs at a time; callers that
//! arrive while it is pending wait on the same entry and receive the
//! computed value without running the computation themselves. The pending
//! entry is removed by an RAII guard, so errors, cancellations, and
//! panics cannot leak tokens.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

type Pending = Arc<Mutex<Option<Bytes>>>;

/// How a caller obtained its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightOutcome {
    /// This caller ran the computation.
    Computed,
    /// This caller waited on a peer's computation and shares its result.
    Coalesced,
}

pub struct SingleFlight {
    pending: DashMap<String, Pending>,
}

/// Removes the pending entry when the computing caller is done with it,
/// no matter how it exits. Waiters holding a clone of the slot still see
/// the filled value.
struct ReleaseGuard<'a> {
    map: &'a DashMap<String, Pending>,
    key: &'a str,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(self.key);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Number of in-flight computations, for stats reporting.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run `compute` for `key`, coalescing concurrent callers.
    ///
    /// The slot lock is held across the computation on purpose: it is the
    /// wait point for peers. If the computing caller fails, its waiters
    /// take over one at a time rather than stampeding.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<(Bytes, FlightOutcome), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        let slot = self
            .pending
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;

        if let Some(value) = guard.as_ref() {
            return Ok((value.clone(), FlightOutcome::Coalesced));
        }

        // Slot is empty: we are the computing caller for this key.
        let _release = ReleaseGuard {
            map: &self.pending,
            key,
        };

        let value = compute().await?;
        *guard = Some(value.clone());

        Ok((value, FlightOutcome::Computed))
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}
