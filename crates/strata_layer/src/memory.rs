//! In-process memory cache layer with reservation support.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use strata_common::CacheId;

use crate::{CacheLayer, EntryInfo, LayerError, LayerStats, QueryDisposition};

/// State of one memory slot.
enum Slot {
    /// The payload is resident.
    Ready(Arc<[u8]>),
    /// A reservation exists; a single producer is computing the payload.
    Pending,
}

struct MemoryInner {
    entries: HashMap<CacheId, Slot>,
    payload_bytes: usize,
}

/// Volatile in-process cache layer.
///
/// Entries live in a hash map protected by a mutex; payloads are shared
/// `Arc<[u8]>` slices, so a loaded reference stays valid after the entry is
/// evicted. This layer is the home of reservation bookkeeping: a query with
/// `reserve_on_miss` atomically designates the first caller as the single
/// producer for that id, and a condition variable wakes waiters when the
/// reservation resolves.
pub struct MemoryLayer {
    inner: Mutex<MemoryInner>,
    resolved: Condvar,
}

impl MemoryLayer {
    /// Creates an empty memory layer.
    ///
    /// `expected_entries` pre-sizes the map; the layer itself is unbounded
    /// and relies on process memory limits.
    pub fn new(expected_entries: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::with_capacity(expected_entries),
                payload_bytes: 0,
            }),
            resolved: Condvar::new(),
        }
    }

    /// Locks the map, recovering from a poisoned mutex.
    ///
    /// A panicking thread can only leave the map in a consistent state
    /// (every mutation is a single insert/remove), so recovery is safe and
    /// keeps the cache non-fatal to the host.
    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryLayer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CacheLayer for MemoryLayer {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports_reservations(&self) -> bool {
        true
    }

    fn query(&self, id: &CacheId, reserve_on_miss: bool) -> Result<QueryDisposition, LayerError> {
        let mut inner = self.lock();
        match inner.entries.get(id) {
            Some(Slot::Ready(data)) => Ok(QueryDisposition::Hit(EntryInfo {
                data_size: data.len(),
            })),
            Some(Slot::Pending) => Ok(QueryDisposition::Pending),
            None => {
                if reserve_on_miss {
                    inner.entries.insert(*id, Slot::Pending);
                    Ok(QueryDisposition::Reserved)
                } else {
                    Ok(QueryDisposition::Miss)
                }
            }
        }
    }

    fn load(&self, id: &CacheId) -> Result<Vec<u8>, LayerError> {
        self.load_shared(id).map(|data| data.to_vec())
    }

    fn load_shared(&self, id: &CacheId) -> Result<Arc<[u8]>, LayerError> {
        match self.lock().entries.get(id) {
            Some(Slot::Ready(data)) => Ok(Arc::clone(data)),
            _ => Err(LayerError::NotFound),
        }
    }

    fn store(&self, id: &CacheId, data: &[u8]) -> Result<(), LayerError> {
        let mut inner = self.lock();
        match inner.entries.get(id) {
            // First write wins; an identical re-store is a no-op.
            Some(Slot::Ready(_)) => return Ok(()),
            Some(Slot::Pending) | None => {}
        }
        inner.entries.insert(*id, Slot::Ready(Arc::from(data)));
        inner.payload_bytes += data.len();
        drop(inner);
        self.resolved.notify_all();
        Ok(())
    }

    fn abort_reservation(&self, id: &CacheId) {
        let mut inner = self.lock();
        if matches!(inner.entries.get(id), Some(Slot::Pending)) {
            inner.entries.remove(id);
        }
        drop(inner);
        self.resolved.notify_all();
    }

    fn wait(&self, id: &CacheId) -> Result<QueryDisposition, LayerError> {
        let mut inner = self.lock();
        loop {
            match inner.entries.get(id) {
                Some(Slot::Ready(data)) => {
                    return Ok(QueryDisposition::Hit(EntryInfo {
                        data_size: data.len(),
                    }));
                }
                None => return Ok(QueryDisposition::Miss),
                Some(Slot::Pending) => {
                    inner = self
                        .resolved
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn evict(&self, id: &CacheId) -> Result<(), LayerError> {
        let mut inner = self.lock();
        if let Some(Slot::Ready(data)) = inner.entries.remove(id) {
            inner.payload_bytes -= data.len();
        }
        drop(inner);
        // An evicted reservation behaves like an abort for any waiters.
        self.resolved.notify_all();
        Ok(())
    }

    fn mark_bad(&self, id: &CacheId) -> Result<(), LayerError> {
        self.evict(id)
    }

    fn entry_ids(&self) -> Result<Vec<CacheId>, LayerError> {
        let inner = self.lock();
        Ok(inner
            .entries
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Ready(_) => Some(*id),
                Slot::Pending => None,
            })
            .collect())
    }

    fn stats(&self) -> Result<LayerStats, LayerError> {
        let inner = self.lock();
        let entries = inner
            .entries
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count();
        Ok(LayerStats {
            entries,
            payload_bytes: inner.payload_bytes,
        })
    }
}
