//! Developer binary reinjection layer.
//!
//! Reinjection lets tooling substitute pipeline binaries from outside the
//! normal compilation path: binaries dropped in a directory, or pushed in
//! programmatically, are served ahead of anything the compiler would
//! produce. The layer is a thin wrapper over a [`MemoryLayer`] keyed by the
//! internal pipeline hash rather than the full cache id.

use std::path::Path;
use std::sync::Arc;

use strata_common::CacheId;
use tracing::{debug, warn};

use crate::memory::MemoryLayer;
use crate::{CacheLayer, LayerError, LayerStats, QueryDisposition};

/// Marker preceding the hash in a reinjectable binary's file name.
const FILE_HASH_MARKER: &str = "_0x";

/// In-memory layer of externally supplied replacement binaries.
pub struct ReinjectionLayer {
    store: MemoryLayer,
}

impl ReinjectionLayer {
    /// Creates an empty reinjection layer.
    pub fn new() -> Self {
        Self {
            store: MemoryLayer::default(),
        }
    }

    /// Extracts the cache id from a file name of the form
    /// `<anything>_0x<32 hex digits><anything>`.
    pub fn id_from_file_name(name: &str) -> Option<CacheId> {
        let start = name.rfind(FILE_HASH_MARKER)? + FILE_HASH_MARKER.len();
        let digits = name.get(start..start + 32)?;
        CacheId::parse_hex(digits)
    }

    /// Loads every parseable binary file from `dir`.
    ///
    /// Files whose names carry no hash marker are skipped with a warning;
    /// unreadable files are skipped likewise. Returns the number of
    /// binaries injected.
    pub fn inject_from_directory(&self, dir: &Path) -> Result<usize, LayerError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| LayerError::resource(format!("read directory {}", dir.display()), e))?;

        let mut injected = 0;
        for entry in entries {
            let entry = entry.map_err(|e| LayerError::resource("read directory entry", e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(id) = Self::id_from_file_name(name) else {
                warn!(file = name, "skipping file without an embedded hash");
                continue;
            };
            match std::fs::read(&path) {
                Ok(data) => {
                    self.store.store(&id, &data)?;
                    debug!(id = %id, file = name, "injected replacement binary");
                    injected += 1;
                }
                Err(err) => {
                    warn!(file = name, error = %err, "skipping unreadable binary");
                }
            }
        }
        Ok(injected)
    }
}

impl Default for ReinjectionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheLayer for ReinjectionLayer {
    fn name(&self) -> &'static str {
        "reinjection"
    }

    fn query(&self, id: &CacheId, _reserve_on_miss: bool) -> Result<QueryDisposition, LayerError> {
        // Reinjected binaries are complete by construction; reservations
        // make no sense here.
        self.store.query(id, false)
    }

    fn load(&self, id: &CacheId) -> Result<Vec<u8>, LayerError> {
        self.store.load(id)
    }

    fn load_shared(&self, id: &CacheId) -> Result<Arc<[u8]>, LayerError> {
        self.store.load_shared(id)
    }

    fn store(&self, id: &CacheId, data: &[u8]) -> Result<(), LayerError> {
        self.store.store(id, data)
    }

    fn abort_reservation(&self, _id: &CacheId) {}

    fn wait(&self, id: &CacheId) -> Result<QueryDisposition, LayerError> {
        self.store.query(id, false)
    }

    fn evict(&self, id: &CacheId) -> Result<(), LayerError> {
        self.store.evict(id)
    }

    fn mark_bad(&self, id: &CacheId) -> Result<(), LayerError> {
        self.store.mark_bad(id)
    }

    fn entry_ids(&self) -> Result<Vec<CacheId>, LayerError> {
        self.store.entry_ids()
    }

    fn stats(&self) -> Result<LayerStats, LayerError> {
        self.store.stats()
    }
}
