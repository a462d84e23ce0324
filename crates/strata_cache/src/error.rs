//! Errors reported by the cache façade and adapter.

use strata_blob::BlobError;
use strata_layer::LayerError;

/// Errors from the cache façade and the compiler-facing adapter.
///
/// None of these are fatal: every caller can treat a cache error as a miss
/// and recompile.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No layer in the chain holds the entry.
    #[error("cache entry not found")]
    NotFound,

    /// A layer operation failed.
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Blob serialization or validation failed.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// A caller-provided serialization buffer is too small.
    #[error("serialization buffer too small: needed {needed} bytes, got {available}")]
    BufferTooSmall {
        /// Bytes the serialized blob requires.
        needed: usize,
        /// Bytes the caller provided.
        available: usize,
    },

    /// A dev-mode reinjection operation was attempted without a
    /// reinjection layer configured.
    #[error("binary reinjection is not enabled")]
    ReinjectionDisabled,

    /// An adapter handle is stale or was never issued.
    ///
    /// A handle goes stale when its slot is released; the generation
    /// counter catches reuse after release.
    #[error("invalid or stale cache entry handle")]
    InvalidHandle,
}
