//! The pipeline binary cache façade.
//!
//! One [`PipelineBinaryCache`] serves one logical device. It owns an
//! ordered layer chain (fastest first) and walks it top-down on reads,
//! promoting hits found below the top into the faster layers above so the
//! next lookup is cheap. Writes land in every layer that will take them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use strata_blob::{
    anticipated_blob_size, is_valid_blob, BlobFormat, CacheBlobWriter, EntryHeader,
    ENTRY_HEADER_SIZE, PRIVATE_HEADER_SIZE,
};
use strata_common::{CacheId, PlatformKey};
use strata_layer::{
    ArchiveFile, ArchiveLayer, CacheLayer, CompressingLayer, EntryInfo, LayerError, MemoryLayer,
    QueryDisposition, ReinjectionLayer,
};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::CacheError;
use crate::settings::RuntimeSettings;

/// How many file names are tried before giving up on a writable archive.
///
/// Another process of the same application may hold the primary name; each
/// attempt appends a numeric suffix.
const MAX_ARCHIVE_NAME_ATTEMPTS: usize = 10;

/// Options for [`PipelineBinaryCache::query`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
    /// On a chain-wide miss, reserve the id so this caller becomes the
    /// single producer and concurrent queries observe
    /// [`QueryStatus::Pending`].
    pub reserve_on_miss: bool,
}

impl QueryFlags {
    /// Flags requesting a reservation on miss.
    pub const RESERVE_ON_MISS: Self = Self {
        reserve_on_miss: true,
    };
}

/// Resolution of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Some layer holds the entry.
    Hit(EntryInfo),
    /// No layer holds the entry and no reservation was made.
    Miss,
    /// Another caller is producing the entry.
    Pending,
    /// This caller is now the single designated producer.
    Reserved,
}

/// A resolved query, used as the token for follow-up entry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResult {
    /// The queried id.
    pub id: CacheId,
    /// How the chain resolved the query.
    pub status: QueryStatus,
}

impl QueryResult {
    /// Whether the query resolved to a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self.status, QueryStatus::Hit(_))
    }
}

/// Layered pipeline binary cache for one device.
pub struct PipelineBinaryCache {
    platform_key: PlatformKey,
    /// Ordered chain, fastest first. Index 0 is the mandatory memory layer
    /// (optionally wrapped in compression) and the home of reservations.
    chain: Vec<Arc<dyn CacheLayer>>,
    /// Replacement binaries from developer tooling; consulted before the
    /// chain and keyed independently.
    reinjection: Option<Arc<ReinjectionLayer>>,
    /// Serializes chain walks so promotion and reservation decisions are
    /// consistent across concurrent queries.
    entries_lock: Mutex<()>,
    /// Dev-mode map from the compiler's internal pipeline hash to the
    /// externally addressable cache id. Reader-heavy.
    hash_mapping: RwLock<HashMap<u64, CacheId>>,
}

impl PipelineBinaryCache {
    /// Builds the cache and its layer chain from `settings`.
    ///
    /// The memory layer always exists. Archive layers are optional and
    /// degrade with a warning when their files cannot be opened; a cache
    /// without archives still functions, it just forgets on teardown.
    pub fn new(
        platform_key: PlatformKey,
        settings: &RuntimeSettings,
    ) -> Result<Self, CacheError> {
        let memory = Arc::new(MemoryLayer::new(settings.expected_entries));
        let top: Arc<dyn CacheLayer> = if settings.use_compression {
            Arc::new(CompressingLayer::new(memory))
        } else {
            memory
        };
        let mut chain: Vec<Arc<dyn CacheLayer>> = vec![top];

        if settings.create_archive_layers {
            match Self::build_archive_layer(settings, platform_key.key64()) {
                Some(archive) => chain.push(Arc::new(archive)),
                None => {
                    if settings.archive_directory().is_some() {
                        warn!("no archive file usable; continuing without archive layers");
                    }
                }
            }
        }

        let reinjection = settings.reinjection_directory.as_ref().map(|dir| {
            let layer = ReinjectionLayer::new();
            match layer.inject_from_directory(dir) {
                Ok(count) => debug!(count, dir = %dir.display(), "loaded reinjection binaries"),
                Err(err) => warn!(
                    dir = %dir.display(),
                    error = %err,
                    "reinjection directory unavailable"
                ),
            }
            Arc::new(layer)
        });

        Ok(Self {
            platform_key,
            chain,
            reinjection,
            entries_lock: Mutex::new(()),
            hash_mapping: RwLock::new(HashMap::new()),
        })
    }

    /// Builds the cache and seeds it from a previously serialized blob.
    ///
    /// The blob starts at the private header, as produced by
    /// [`serialize`](Self::serialize). An invalid digest discards the whole
    /// blob; a malformed record stops parsing at that record, keeping what
    /// came before it.
    pub fn with_initial_data(
        platform_key: PlatformKey,
        settings: &RuntimeSettings,
        blob: &[u8],
    ) -> Result<Self, CacheError> {
        let cache = Self::new(platform_key, settings)?;
        if !is_valid_blob(&cache.platform_key, blob) {
            warn!("ignoring initial cache data: digest mismatch");
            return Ok(cache);
        }

        let mut offset = PRIVATE_HEADER_SIZE;
        let mut seeded = 0usize;
        while offset + ENTRY_HEADER_SIZE <= blob.len() {
            let Ok(header) = EntryHeader::read_from(&blob[offset..]) else {
                break;
            };
            let start = offset + ENTRY_HEADER_SIZE;
            let Some(end) = start
                .checked_add(header.data_size as usize)
                .filter(|end| *end <= blob.len())
            else {
                warn!(offset, "stopping initial data import at malformed record");
                break;
            };
            if let Err(err) = cache.store(&header.hash_id, &blob[start..end]) {
                warn!(error = %err, "stopping initial data import");
                break;
            }
            seeded += 1;
            offset = end;
        }
        debug!(entries = seeded, "seeded cache from initial data");
        Ok(cache)
    }

    /// The platform key this cache validates and signs blobs with.
    pub fn platform_key(&self) -> &PlatformKey {
        &self.platform_key
    }

    /// Opens archive files per the settings.
    ///
    /// The writable archive name is tried with numeric suffixes in case
    /// another process holds the primary file; after the last attempt the
    /// primary is opened read-only so its contents are still served.
    fn build_archive_layer(settings: &RuntimeSettings, key64: u64) -> Option<ArchiveLayer> {
        let dir = settings.archive_directory()?;
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %err, "cannot create cache directory");
            return None;
        }

        let base = settings.cache_filename_override.clone().unwrap_or_else(|| {
            format!(
                "{:016x}_{:016x}.sarc",
                xxh3_64(settings.application_name.as_bytes()),
                key64
            )
        });

        let mut writable = None;
        for attempt in 0..MAX_ARCHIVE_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}.{attempt}")
            };
            match ArchiveFile::open_writable(&dir.join(&name), key64) {
                Ok(archive) => {
                    debug!(path = %archive.path().display(), "opened writable archive");
                    writable = Some(archive);
                    break;
                }
                Err(err) => {
                    warn!(name, error = %err, "writable archive attempt failed");
                }
            }
        }

        let mut read_only = Vec::new();
        if writable.is_none() {
            match ArchiveFile::open_read_only(&dir.join(&base), key64) {
                Ok(archive) => read_only.push(archive),
                Err(err) => warn!(error = %err, "primary archive unreadable"),
            }
        }
        if let Some(name) = &settings.read_only_filename {
            match ArchiveFile::open_read_only(&dir.join(name), key64) {
                Ok(archive) => read_only.push(archive),
                Err(err) => warn!(name, error = %err, "read-only archive unreadable"),
            }
        }

        if writable.is_none() && read_only.is_empty() {
            return None;
        }
        Some(ArchiveLayer::new(writable, read_only))
    }

    fn lock_entries(&self) -> MutexGuard<'_, ()> {
        self.entries_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Walks the chain top-down and resolves `id`.
    ///
    /// A hit below the top is promoted into the layers above it; promotion
    /// failure never fails the read. A layer error is logged and the walk
    /// skips to the next layer. With `reserve_on_miss`, a chain-wide miss
    /// leaves a reservation in the top layer and this caller is the
    /// producer.
    pub fn query(&self, id: &CacheId, flags: QueryFlags) -> Result<QueryResult, CacheError> {
        let _entries = self.lock_entries();

        if let Some(reinjection) = &self.reinjection {
            if let Ok(QueryDisposition::Hit(info)) = reinjection.query(id, false) {
                debug!(id = %id, "serving reinjected binary");
                return Ok(QueryResult {
                    id: *id,
                    status: QueryStatus::Hit(info),
                });
            }
        }

        let mut reserved = false;
        for (index, layer) in self.chain.iter().enumerate() {
            match layer.query(id, flags.reserve_on_miss) {
                Ok(QueryDisposition::Hit(info)) => {
                    if index > 0 {
                        self.promote(index, id);
                    }
                    return Ok(QueryResult {
                        id: *id,
                        status: QueryStatus::Hit(info),
                    });
                }
                Ok(QueryDisposition::Pending) => {
                    return Ok(QueryResult {
                        id: *id,
                        status: QueryStatus::Pending,
                    });
                }
                Ok(QueryDisposition::Reserved) => {
                    reserved = true;
                }
                Ok(QueryDisposition::Miss) => {}
                Err(err) => {
                    warn!(layer = layer.name(), error = %err, "skipping cache layer");
                }
            }
        }

        Ok(QueryResult {
            id: *id,
            status: if reserved {
                QueryStatus::Reserved
            } else {
                QueryStatus::Miss
            },
        })
    }

    /// Copies a hit at `chain[from]` into every layer above it.
    ///
    /// Completes any reservation the walk left in the upper layers. All
    /// failures are logged and swallowed.
    fn promote(&self, from: usize, id: &CacheId) {
        let data = match self.chain[from].load(id) {
            Ok(data) => data,
            Err(err) => {
                warn!(id = %id, error = %err, "promotion load failed");
                for upper in &self.chain[..from] {
                    upper.abort_reservation(id);
                }
                return;
            }
        };
        for upper in self.chain[..from].iter().rev() {
            if let Err(err) = upper.store(id, &data) {
                warn!(layer = upper.name(), error = %err, "promotion store failed");
                upper.abort_reservation(id);
            }
        }
    }

    /// Blocks until an in-flight reservation for `id` resolves, then
    /// re-queries the chain for the final answer.
    pub fn wait(&self, id: &CacheId) -> Result<QueryResult, CacheError> {
        for layer in &self.chain {
            if layer.supports_reservations() {
                layer.wait(id)?;
                break;
            }
        }
        self.query(id, QueryFlags::default())
    }

    /// Loads the payload for `id` from the nearest layer that holds it.
    pub fn load(&self, id: &CacheId) -> Result<Vec<u8>, CacheError> {
        if let Some(reinjection) = &self.reinjection {
            if let Ok(data) = reinjection.load(id) {
                return Ok(data);
            }
        }
        for layer in &self.chain {
            match layer.load(id) {
                Ok(data) => return Ok(data),
                Err(LayerError::NotFound) => {}
                Err(err) => {
                    warn!(layer = layer.name(), error = %err, "load skipping cache layer");
                }
            }
        }
        Err(CacheError::NotFound)
    }

    /// Zero-copy load from the nearest layer whose storage is shareable.
    pub fn load_shared(&self, id: &CacheId) -> Result<Arc<[u8]>, CacheError> {
        if let Some(reinjection) = &self.reinjection {
            if let Ok(data) = reinjection.load_shared(id) {
                return Ok(data);
            }
        }
        for layer in &self.chain {
            match layer.load_shared(id) {
                Ok(data) => return Ok(data),
                Err(LayerError::NotFound) | Err(LayerError::Unsupported { .. }) => {}
                Err(err) => {
                    warn!(layer = layer.name(), error = %err, "shared load skipping layer");
                }
            }
        }
        Err(CacheError::NotFound)
    }

    /// Stores a payload, completing any outstanding reservation.
    ///
    /// The top layer must accept the write; persistence into lower layers
    /// is best-effort.
    pub fn store(&self, id: &CacheId, data: &[u8]) -> Result<(), CacheError> {
        let _entries = self.lock_entries();
        self.chain[0].store(id, data)?;
        for layer in &self.chain[1..] {
            match layer.store(id, data) {
                Ok(()) | Err(LayerError::Unsupported { .. }) => {}
                Err(err) => {
                    warn!(layer = layer.name(), error = %err, "store skipping cache layer");
                }
            }
        }
        Ok(())
    }

    /// Releases a reservation without storing: the producer failed and
    /// waiters should observe a miss.
    pub fn abort_store(&self, id: &CacheId) {
        for layer in &self.chain {
            layer.abort_reservation(id);
        }
    }

    /// Loads the payload behind a resolved hit.
    pub fn get_data(&self, result: &QueryResult) -> Result<Vec<u8>, CacheError> {
        if !result.is_hit() {
            return Err(CacheError::NotFound);
        }
        self.load(&result.id)
    }

    /// Zero-copy payload access behind a resolved hit.
    ///
    /// The returned slice stays valid for as long as the `Arc` is held,
    /// even across eviction.
    pub fn get_data_shared(&self, result: &QueryResult) -> Result<Arc<[u8]>, CacheError> {
        if !result.is_hit() {
            return Err(CacheError::NotFound);
        }
        self.load_shared(&result.id)
    }

    /// Releases the caller's reference to a resolved entry.
    ///
    /// Payload lifetime is carried by the `Arc` handed out by the load
    /// calls, so there is no bookkeeping to undo here; the method exists
    /// so callers pair every successful query with a release.
    pub fn release_ref(&self, _result: &QueryResult) {}

    /// Advisory eviction across all layers. Best-effort.
    pub fn evict_entry(&self, result: &QueryResult) {
        for layer in &self.chain {
            if let Err(err) = layer.evict(&result.id) {
                warn!(layer = layer.name(), error = %err, "evict failed");
            }
        }
    }

    /// Advisory bad-entry marking across all layers. Best-effort.
    pub fn mark_entry_bad(&self, result: &QueryResult) {
        for layer in &self.chain {
            if let Err(err) = layer.mark_bad(&result.id) {
                warn!(layer = layer.name(), error = %err, "mark-bad failed");
            }
        }
    }

    /// Every entry id reachable anywhere in the chain, deduplicated.
    fn collect_entry_ids(&self) -> Vec<CacheId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for layer in &self.chain {
            match layer.entry_ids() {
                Ok(list) => {
                    for id in list {
                        if seen.insert(id) {
                            ids.push(id);
                        }
                    }
                }
                Err(err) => {
                    warn!(layer = layer.name(), error = %err, "cannot enumerate layer");
                }
            }
        }
        ids
    }

    /// Renders every reachable entry into a cache blob.
    ///
    /// With `buf = None` this returns the exact byte size a subsequent
    /// call needs. With a buffer, it writes the private header (keyed
    /// digest included) followed by all entry records, and returns the
    /// bytes written.
    pub fn serialize(&self, buf: Option<&mut [u8]>) -> Result<usize, CacheError> {
        let _entries = self.lock_entries();

        let mut entries = Vec::new();
        let mut total_payload = 0usize;
        for id in self.collect_entry_ids() {
            match self.load(&id) {
                Ok(data) => {
                    total_payload += data.len();
                    entries.push((id, data));
                }
                Err(err) => {
                    warn!(id = %id, error = %err, "skipping unloadable entry");
                }
            }
        }

        let needed = anticipated_blob_size(entries.len(), total_payload);
        let Some(buf) = buf else {
            return Ok(needed);
        };
        if buf.len() < needed {
            return Err(CacheError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }

        let mut writer = CacheBlobWriter::new(BlobFormat::Strict, &mut buf[..needed])?;
        for (id, data) in &entries {
            writer.add_entry(id, data)?;
        }
        writer.finalize(&self.platform_key)?;
        Ok(needed)
    }

    /// Unions entries from `sources` into this cache.
    ///
    /// First-seen wins: ids already present here are skipped, and earlier
    /// sources shadow later ones. Merging a cache with itself is a no-op.
    pub fn merge(&self, sources: &[&PipelineBinaryCache]) -> Result<(), CacheError> {
        for source in sources {
            if std::ptr::eq(*source, self) {
                continue;
            }
            for id in source.collect_entry_ids() {
                if self.query(&id, QueryFlags::default())?.is_hit() {
                    continue;
                }
                match source.load(&id) {
                    Ok(data) => self.store(&id, &data)?,
                    Err(err) => {
                        warn!(id = %id, error = %err, "skipping unloadable merge entry");
                    }
                }
            }
        }
        Ok(())
    }

    /// Records the cache id the compiler assigned to an internal pipeline
    /// hash. Dev-mode correlation for reinjection tooling.
    pub fn register_hash_mapping(&self, internal_hash: u64, id: CacheId) {
        self.hash_mapping
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(internal_hash, id);
    }

    /// Looks up the cache id for an internal pipeline hash.
    pub fn cache_id_for_pipeline(&self, internal_hash: u64) -> Option<CacheId> {
        self.hash_mapping
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&internal_hash)
            .copied()
    }

    /// Loads a reinjected replacement binary by internal pipeline hash.
    pub fn load_reinjection_binary(&self, internal_hash: u64) -> Result<Vec<u8>, CacheError> {
        let layer = self
            .reinjection
            .as_ref()
            .ok_or(CacheError::ReinjectionDisabled)?;
        let id = self
            .cache_id_for_pipeline(internal_hash)
            .ok_or(CacheError::NotFound)?;
        layer.load(&id).map_err(|_| CacheError::NotFound)
    }

    /// Stores a replacement binary under an internal pipeline hash,
    /// registering the hash mapping as a side effect.
    pub fn store_reinjection_binary(
        &self,
        internal_hash: u64,
        data: &[u8],
    ) -> Result<(), CacheError> {
        let layer = self
            .reinjection
            .as_ref()
            .ok_or(CacheError::ReinjectionDisabled)?;
        let id = CacheId::from_contents(data);
        layer.store(&id, data)?;
        self.register_hash_mapping(internal_hash, id);
        Ok(())
    }
}
