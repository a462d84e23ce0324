//! Compiler-facing cache adapter.
//!
//! The shader compiler only speaks a narrow get/wait/set/release protocol.
//! [`CacheAdapter`] maps it onto the façade and hands out generation-checked
//! handles from a slot arena, so a handle used after release is detected
//! instead of reading a recycled slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_common::CacheId;

use crate::cache::{PipelineBinaryCache, QueryFlags, QueryStatus};
use crate::error::CacheError;

/// Opaque handle to one adapter slot.
///
/// Handles are cheap to copy but single-owner in spirit: after
/// [`CacheAdapter::release_entry`] the generation no longer matches and
/// every use fails with [`CacheError::InvalidHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle {
    index: usize,
    generation: u32,
}

/// What the caller holding a handle should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// The value exists; read it with `get_value`.
    Ready,
    /// This caller is the designated producer and must call `set_value`.
    MustPopulate,
    /// Another caller is producing; call `wait_for_entry`.
    Pending,
}

struct Slot {
    generation: u32,
    entry: Option<CacheId>,
}

#[derive(Default)]
struct SlotArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl SlotArena {
    fn allocate(&mut self, id: CacheId) -> EntryHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.entry = Some(id);
        EntryHandle {
            index,
            generation: slot.generation,
        }
    }

    fn resolve(&self, handle: EntryHandle) -> Result<CacheId, CacheError> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry)
            .ok_or(CacheError::InvalidHandle)
    }

    fn release(&mut self, handle: EntryHandle) -> Result<(), CacheError> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation && slot.entry.is_some())
            .ok_or(CacheError::InvalidHandle)?;
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(())
    }
}

/// Adapter between the façade and the compiler's entry protocol.
///
/// Guarantees at most one concurrent producer per cache id: the first
/// caller to `get_entry` with `allocate_on_miss` on a cold id receives
/// [`EntryStatus::MustPopulate`] and must eventually call `set_value`;
/// everyone else observes [`EntryStatus::Pending`] until then.
pub struct CacheAdapter {
    cache: Arc<PipelineBinaryCache>,
    arena: Mutex<SlotArena>,
}

impl CacheAdapter {
    /// Wraps a cache façade.
    pub fn new(cache: Arc<PipelineBinaryCache>) -> Self {
        Self {
            cache,
            arena: Mutex::new(SlotArena::default()),
        }
    }

    /// The façade this adapter wraps.
    pub fn cache(&self) -> &Arc<PipelineBinaryCache> {
        &self.cache
    }

    fn arena(&self) -> MutexGuard<'_, SlotArena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `id` and issues a handle for the follow-up operations.
    ///
    /// Without `allocate_on_miss`, a miss is [`CacheError::NotFound`] and
    /// no handle is issued.
    pub fn get_entry(
        &self,
        id: &CacheId,
        allocate_on_miss: bool,
    ) -> Result<(EntryHandle, EntryStatus), CacheError> {
        let result = self.cache.query(
            id,
            QueryFlags {
                reserve_on_miss: allocate_on_miss,
            },
        )?;
        let status = match result.status {
            QueryStatus::Hit(_) => EntryStatus::Ready,
            QueryStatus::Reserved => EntryStatus::MustPopulate,
            QueryStatus::Pending => EntryStatus::Pending,
            QueryStatus::Miss => return Err(CacheError::NotFound),
        };
        Ok((self.arena().allocate(*id), status))
    }

    /// Blocks until the entry behind `handle` stops being pending.
    ///
    /// If the producer aborted, this caller is promoted to producer and
    /// gets [`EntryStatus::MustPopulate`]; losing that race to another
    /// waiter loops back into the wait.
    pub fn wait_for_entry(&self, handle: EntryHandle) -> Result<EntryStatus, CacheError> {
        let id = self.arena().resolve(handle)?;
        loop {
            let waited = self.cache.wait(&id)?;
            if let QueryStatus::Hit(_) = waited.status {
                return Ok(EntryStatus::Ready);
            }
            match self.cache.query(&id, QueryFlags::RESERVE_ON_MISS)?.status {
                QueryStatus::Hit(_) => return Ok(EntryStatus::Ready),
                QueryStatus::Reserved | QueryStatus::Miss => {
                    return Ok(EntryStatus::MustPopulate)
                }
                QueryStatus::Pending => {}
            }
        }
    }

    /// Completes production for `handle`.
    ///
    /// With `success`, `data` becomes the single finalized payload for the
    /// id. Without it, the reservation is released, waiters observe a
    /// miss, and a later caller may become producer.
    pub fn set_value(
        &self,
        handle: EntryHandle,
        success: bool,
        data: &[u8],
    ) -> Result<(), CacheError> {
        let id = self.arena().resolve(handle)?;
        if success {
            self.cache.store(&id, data)
        } else {
            self.cache.abort_store(&id);
            Ok(())
        }
    }

    /// Copies out the payload behind a ready handle.
    pub fn get_value(&self, handle: EntryHandle) -> Result<Vec<u8>, CacheError> {
        let id = self.arena().resolve(handle)?;
        self.cache.load(&id)
    }

    /// Zero-copy payload access behind a ready handle.
    ///
    /// Falls back to a copy when no layer can share its backing storage.
    /// The slice must not be assumed valid past `release_entry`; holding
    /// the returned `Arc` is what keeps it alive.
    pub fn get_value_zero_copy(&self, handle: EntryHandle) -> Result<Arc<[u8]>, CacheError> {
        let id = self.arena().resolve(handle)?;
        match self.cache.load_shared(&id) {
            Ok(data) => Ok(data),
            Err(CacheError::NotFound) => self.cache.load(&id).map(Arc::from),
            Err(err) => Err(err),
        }
    }

    /// Frees the slot behind `handle`. Exactly once per issued handle;
    /// the handle is dead afterwards.
    pub fn release_entry(&self, handle: EntryHandle) -> Result<(), CacheError> {
        self.arena().release(handle)
    }
}
