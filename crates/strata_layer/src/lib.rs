//! Cache layer chain for the Strata pipeline binary cache.
//!
//! A cache is an ordered chain of layers, nearest/fastest first. Every layer
//! implements the same [`CacheLayer`] contract; the façade walks the chain
//! top-down on reads and promotes hits found below the top into the faster
//! layers above. Four variants exist:
//!
//! - [`MemoryLayer`] — in-process hash map, volatile, and the home of
//!   reservation (single-flight) bookkeeping.
//! - [`CompressingLayer`] — wraps exactly one inner layer and transparently
//!   compresses payloads.
//! - [`ArchiveLayer`] — persistent, file-backed; one writable archive plus
//!   zero or more read-only archives.
//! - [`ReinjectionLayer`] — developer-tooling hook that can substitute
//!   binaries supplied from outside the normal compilation path.

#![warn(missing_docs)]

pub mod archive;
pub mod compress;
pub mod memory;
pub mod reinject;

use std::sync::Arc;

use strata_common::CacheId;

pub use archive::{ArchiveFile, ArchiveLayer};
pub use compress::CompressingLayer;
pub use memory::MemoryLayer;
pub use reinject::ReinjectionLayer;

/// Errors a cache layer can report.
///
/// None of these are fatal to the caller: the façade reacts to a layer
/// error by skipping the layer and continuing down the chain, so the worst
/// outcome is a cache miss and a recompilation.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// The entry vanished between a query and a follow-up operation.
    ///
    /// An ordinary miss during `query` is [`QueryDisposition::Miss`], not an
    /// error; this variant only appears when a previously observed entry is
    /// gone.
    #[error("cache entry not found")]
    NotFound,

    /// The layer cannot perform the requested operation at all.
    #[error("operation not supported by the {layer} layer")]
    Unsupported {
        /// Name of the refusing layer.
        layer: &'static str,
    },

    /// Stored data failed structural or integrity validation.
    #[error("corrupt cache data: {reason}")]
    Corrupt {
        /// Description of the corruption.
        reason: String,
    },

    /// An I/O or allocation failure in the layer's backing resource.
    #[error("cache layer I/O error: {context}: {source}")]
    Resource {
        /// What the layer was doing when the failure occurred.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl LayerError {
    /// Convenience constructor for [`LayerError::Resource`].
    pub fn resource(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Resource {
            context: context.into(),
            source,
        }
    }

    /// Convenience constructor for [`LayerError::Corrupt`].
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }
}

/// Size information for a hit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    /// Payload size in bytes, as the caller will observe it from `load`.
    pub data_size: usize,
}

/// Outcome of a [`CacheLayer::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryDisposition {
    /// The layer holds the entry.
    Hit(EntryInfo),
    /// The layer does not hold the entry and made no reservation.
    Miss,
    /// Another caller holds a reservation for this id; the value is being
    /// produced.
    Pending,
    /// The layer reserved the slot for this caller, who is now the single
    /// designated producer and must complete or abort the reservation.
    Reserved,
}

/// Aggregate entry statistics for a layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Number of resident (ready) entries.
    pub entries: usize,
    /// Total payload bytes across resident entries, as observed by `load`.
    pub payload_bytes: usize,
}

/// The uniform contract every cache layer implements.
///
/// All operations are callable from multiple threads concurrently. Layers
/// that do not support an operation return [`LayerError::Unsupported`]
/// rather than failing the chain.
pub trait CacheLayer: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Whether `query` honors `reserve_on_miss`.
    ///
    /// Layers without reservation support treat the flag as `false`.
    fn supports_reservations(&self) -> bool {
        false
    }

    /// Looks up `id`.
    ///
    /// With `reserve_on_miss`, a supporting layer records a reservation on a
    /// miss and returns [`QueryDisposition::Reserved`]; concurrent queries
    /// for the same id then observe [`QueryDisposition::Pending`] until the
    /// producer stores the payload or aborts.
    fn query(&self, id: &CacheId, reserve_on_miss: bool) -> Result<QueryDisposition, LayerError>;

    /// Loads the payload for an entry previously observed as a hit.
    fn load(&self, id: &CacheId) -> Result<Vec<u8>, LayerError>;

    /// Zero-copy access to the payload where the backing store is shared
    /// memory. Layers whose storage is not directly shareable return
    /// [`LayerError::Unsupported`].
    fn load_shared(&self, id: &CacheId) -> Result<Arc<[u8]>, LayerError> {
        let _ = id;
        Err(LayerError::Unsupported { layer: self.name() })
    }

    /// Stores a payload, completing any outstanding reservation for `id`.
    ///
    /// Storing an id that already exists is a no-op; the first stored
    /// payload wins and entries are never partially updated.
    fn store(&self, id: &CacheId, data: &[u8]) -> Result<(), LayerError>;

    /// Releases a reservation without storing (the producer failed).
    /// Waiters are unblocked and observe a miss. No-op without a
    /// reservation.
    fn abort_reservation(&self, id: &CacheId);

    /// Blocks until an in-flight reservation for `id` resolves, then
    /// reports the final disposition (hit, or miss if the producer
    /// aborted). Returns immediately when no reservation exists.
    fn wait(&self, id: &CacheId) -> Result<QueryDisposition, LayerError>;

    /// Advisory removal of an entry. Best-effort; archives may only record
    /// metadata.
    fn evict(&self, id: &CacheId) -> Result<(), LayerError>;

    /// Advisory bad-entry marking; the entry stops being served. Aborts a
    /// pending reservation for the id.
    fn mark_bad(&self, id: &CacheId) -> Result<(), LayerError>;

    /// Ids of all resident entries, for serialization and merging.
    fn entry_ids(&self) -> Result<Vec<CacheId>, LayerError>;

    /// Aggregate statistics over resident entries.
    fn stats(&self) -> Result<LayerStats, LayerError>;
}
