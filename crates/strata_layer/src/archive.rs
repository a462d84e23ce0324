//! File-backed archive cache layer.
//!
//! An archive file is a small bincode-framed header followed by a flat run
//! of entry records. The header carries magic bytes, a format version, and
//! the 64-bit platform key of the device the archive was written for; an
//! archive from a different platform or format version is never read.
//! Records are append-only, so a crash mid-write costs at most the final
//! record: opening tolerates a truncated tail and a writable archive trims
//! it away.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use strata_common::CacheId;
use tracing::{debug, warn};

use crate::{CacheLayer, EntryInfo, LayerError, LayerStats, QueryDisposition};

/// Magic bytes identifying a Strata archive file.
const ARCHIVE_MAGIC: [u8; 4] = *b"SARC";

/// Current archive format version. Increment on breaking changes to the
/// header or record format.
const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// Bytes of fixed record header preceding each payload: 16-byte id plus a
/// little-endian `u64` payload length.
const RECORD_HEADER_SIZE: usize = CacheId::LEN + 8;

/// Framed header at the start of every archive file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveHeader {
    /// Magic bytes: must be `b"SARC"`.
    magic: [u8; 4],

    /// Archive format version.
    format_version: u32,

    /// Truncated platform key of the device this archive belongs to.
    platform_key64: u64,
}

/// Location of one record's payload within the archive file.
#[derive(Debug, Clone, Copy)]
struct RecordLocation {
    payload_offset: u64,
    payload_len: u64,
}

/// One archive file with an in-memory index of its records.
pub struct ArchiveFile {
    path: PathBuf,
    file: File,
    writable: bool,
    index: HashMap<CacheId, RecordLocation>,
    /// File offset where the next record would be appended.
    end_offset: u64,
}

impl ArchiveFile {
    /// Opens an existing archive for reading only.
    ///
    /// Fails if the file is missing, the header does not parse, or the
    /// header belongs to a different format version or platform.
    pub fn open_read_only(path: &Path, platform_key64: u64) -> Result<Self, LayerError> {
        let file = File::open(path)
            .map_err(|e| LayerError::resource(format!("open archive {}", path.display()), e))?;
        let mut archive = Self {
            path: path.to_path_buf(),
            file,
            writable: false,
            index: HashMap::new(),
            end_offset: 0,
        };
        archive.read_header_and_index(platform_key64)?;
        Ok(archive)
    }

    /// Opens or creates a writable archive.
    ///
    /// The file is taken under an exclusive advisory lock, held until the
    /// archive is dropped: a second process opening the same path fails and
    /// must fall back to another file name. An existing file with an
    /// unreadable or incompatible header is discarded and recreated in
    /// place: a stale archive from an older driver or another device has no
    /// salvageable content for this one.
    pub fn open_writable(path: &Path, platform_key64: u64) -> Result<Self, LayerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| LayerError::resource(format!("open archive {}", path.display()), e))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(LayerError::resource(
                    format!("archive {} is held by another process", path.display()),
                    std::io::Error::from(std::io::ErrorKind::WouldBlock),
                ));
            }
            Err(TryLockError::Error(e)) => {
                return Err(LayerError::resource(
                    format!("lock archive {}", path.display()),
                    e,
                ));
            }
        }
        let mut archive = Self {
            path: path.to_path_buf(),
            file,
            writable: true,
            index: HashMap::new(),
            end_offset: 0,
        };

        let len = archive.file_len()?;
        if len == 0 {
            archive.write_header(platform_key64)?;
            return Ok(archive);
        }

        match archive.read_header_and_index(platform_key64) {
            Ok(()) => {
                // Trim any partial record left by a crashed writer.
                if archive.end_offset < len {
                    warn!(
                        path = %archive.path.display(),
                        trimmed = len - archive.end_offset,
                        "trimming truncated archive tail"
                    );
                    archive
                        .file
                        .set_len(archive.end_offset)
                        .map_err(|e| LayerError::resource("truncate archive", e))?;
                }
                Ok(archive)
            }
            Err(err) => {
                warn!(
                    path = %archive.path.display(),
                    error = %err,
                    "recreating incompatible archive"
                );
                archive
                    .file
                    .set_len(0)
                    .map_err(|e| LayerError::resource("recreate archive", e))?;
                archive.index.clear();
                archive.write_header(platform_key64)?;
                Ok(archive)
            }
        }
    }

    /// Path the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether new records may be appended.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the archive holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn file_len(&self) -> Result<u64, LayerError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| LayerError::resource("stat archive", e))
    }

    fn write_header(&mut self, platform_key64: u64) -> Result<(), LayerError> {
        let header = ArchiveHeader {
            magic: ARCHIVE_MAGIC,
            format_version: ARCHIVE_FORMAT_VERSION,
            platform_key64,
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| LayerError::corrupt(format!("encode archive header: {e}")))?;

        // Layout: 4-byte header length (little-endian) + header + records.
        let mut framed = Vec::with_capacity(4 + header_bytes.len());
        framed.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        framed.extend_from_slice(&header_bytes);

        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&framed))
            .and_then(|_| self.file.sync_data())
            .map_err(|e| LayerError::resource("write archive header", e))?;
        self.end_offset = framed.len() as u64;
        Ok(())
    }

    /// Parses the header and builds the record index.
    ///
    /// Stops cleanly at a truncated tail record; `end_offset` then marks
    /// the last complete record.
    fn read_header_and_index(&mut self, platform_key64: u64) -> Result<(), LayerError> {
        let mut raw = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut raw))
            .map_err(|e| LayerError::resource("read archive", e))?;

        if raw.len() < 4 {
            return Err(LayerError::corrupt("archive shorter than header frame"));
        }
        let header_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if raw.len() < 4 + header_len {
            return Err(LayerError::corrupt("archive header truncated"));
        }
        let (header, _): (ArchiveHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .map_err(|e| LayerError::corrupt(format!("decode archive header: {e}")))?;

        if header.magic != ARCHIVE_MAGIC {
            return Err(LayerError::corrupt("bad archive magic"));
        }
        if header.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(LayerError::corrupt(format!(
                "archive format version {} (expected {ARCHIVE_FORMAT_VERSION})",
                header.format_version
            )));
        }
        if header.platform_key64 != platform_key64 {
            return Err(LayerError::corrupt("archive belongs to another platform"));
        }

        let mut offset = 4 + header_len;
        while offset + RECORD_HEADER_SIZE <= raw.len() {
            let mut id_bytes = [0u8; CacheId::LEN];
            id_bytes.copy_from_slice(&raw[offset..offset + CacheId::LEN]);
            let id = CacheId::from_bytes(id_bytes);
            let mut len_bytes = [0u8; 8];
            len_bytes.copy_from_slice(&raw[offset + CacheId::LEN..offset + RECORD_HEADER_SIZE]);
            let payload_len = u64::from_le_bytes(len_bytes);

            let payload_offset = offset + RECORD_HEADER_SIZE;
            let Some(record_end) = payload_offset.checked_add(payload_len as usize) else {
                break;
            };
            if record_end > raw.len() {
                // Truncated tail; everything before it stays valid.
                break;
            }
            // First record wins on a duplicate id.
            self.index.entry(id).or_insert(RecordLocation {
                payload_offset: payload_offset as u64,
                payload_len,
            });
            offset = record_end;
        }
        self.end_offset = offset as u64;
        Ok(())
    }

    /// Looks up a record's payload size without reading it.
    pub fn entry_size(&self, id: &CacheId) -> Option<usize> {
        self.index.get(id).map(|loc| loc.payload_len as usize)
    }

    /// Reads one record's payload from disk.
    pub fn load(&mut self, id: &CacheId) -> Result<Vec<u8>, LayerError> {
        let loc = *self.index.get(id).ok_or(LayerError::NotFound)?;
        let mut data = vec![0u8; loc.payload_len as usize];
        self.file
            .seek(SeekFrom::Start(loc.payload_offset))
            .and_then(|_| self.file.read_exact(&mut data))
            .map_err(|e| LayerError::resource("read archive record", e))?;
        Ok(data)
    }

    /// Appends one record. A duplicate id is a no-op (first write wins).
    pub fn store(&mut self, id: &CacheId, data: &[u8]) -> Result<(), LayerError> {
        if !self.writable {
            return Err(LayerError::Unsupported { layer: "archive" });
        }
        if self.index.contains_key(id) {
            return Ok(());
        }

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + data.len());
        record.extend_from_slice(id.as_bytes());
        record.extend_from_slice(&(data.len() as u64).to_le_bytes());
        record.extend_from_slice(data);

        self.file
            .seek(SeekFrom::Start(self.end_offset))
            .and_then(|_| self.file.write_all(&record))
            .and_then(|_| self.file.sync_data())
            .map_err(|e| LayerError::resource("append archive record", e))?;

        self.index.insert(
            *id,
            RecordLocation {
                payload_offset: self.end_offset + RECORD_HEADER_SIZE as u64,
                payload_len: data.len() as u64,
            },
        );
        self.end_offset += record.len() as u64;
        Ok(())
    }

    /// Ids of all indexed records.
    pub fn entry_ids(&self) -> Vec<CacheId> {
        self.index.keys().copied().collect()
    }

    /// Total payload bytes across all records.
    pub fn payload_bytes(&self) -> usize {
        self.index.values().map(|loc| loc.payload_len as usize).sum()
    }
}

/// Persistent cache layer over one writable archive and any number of
/// read-only archives.
///
/// Lookups consult the writable archive first, then the read-only ones in
/// registration order. Eviction and bad-entry marks are in-memory
/// tombstones; the file content is append-only and is never rewritten.
pub struct ArchiveLayer {
    writable: Option<Mutex<ArchiveFile>>,
    read_only: Vec<Mutex<ArchiveFile>>,
    tombstones: Mutex<HashSet<CacheId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ArchiveLayer {
    /// Builds a layer from already opened archives.
    pub fn new(writable: Option<ArchiveFile>, read_only: Vec<ArchiveFile>) -> Self {
        Self {
            writable: writable.map(Mutex::new),
            read_only: read_only.into_iter().map(Mutex::new).collect(),
            tombstones: Mutex::new(HashSet::new()),
        }
    }

    /// Whether the layer can accept new entries.
    pub fn has_writable_archive(&self) -> bool {
        self.writable.is_some()
    }

    fn is_tombstoned(&self, id: &CacheId) -> bool {
        lock(&self.tombstones).contains(id)
    }

    /// Runs `f` over each archive, writable first, until it yields a value.
    fn find_map<T>(&self, mut f: impl FnMut(&mut ArchiveFile) -> Option<T>) -> Option<T> {
        if let Some(writable) = &self.writable {
            if let Some(found) = f(&mut lock(writable)) {
                return Some(found);
            }
        }
        self.read_only
            .iter()
            .find_map(|archive| f(&mut lock(archive)))
    }
}

impl CacheLayer for ArchiveLayer {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn query(&self, id: &CacheId, _reserve_on_miss: bool) -> Result<QueryDisposition, LayerError> {
        if self.is_tombstoned(id) {
            return Ok(QueryDisposition::Miss);
        }
        match self.find_map(|archive| archive.entry_size(id)) {
            Some(data_size) => Ok(QueryDisposition::Hit(EntryInfo { data_size })),
            None => Ok(QueryDisposition::Miss),
        }
    }

    fn load(&self, id: &CacheId) -> Result<Vec<u8>, LayerError> {
        if self.is_tombstoned(id) {
            return Err(LayerError::NotFound);
        }
        self.find_map(|archive| {
            if archive.entry_size(id).is_some() {
                Some(archive.load(id))
            } else {
                None
            }
        })
        .unwrap_or(Err(LayerError::NotFound))
    }

    fn store(&self, id: &CacheId, data: &[u8]) -> Result<(), LayerError> {
        let Some(writable) = &self.writable else {
            return Err(LayerError::Unsupported { layer: "archive" });
        };
        lock(writable).store(id, data)?;
        lock(&self.tombstones).remove(id);
        debug!(id = %id, size = data.len(), "archived cache entry");
        Ok(())
    }

    fn abort_reservation(&self, _id: &CacheId) {}

    fn wait(&self, id: &CacheId) -> Result<QueryDisposition, LayerError> {
        // No reservations here, so the answer is immediate.
        self.query(id, false)
    }

    fn evict(&self, id: &CacheId) -> Result<(), LayerError> {
        lock(&self.tombstones).insert(*id);
        Ok(())
    }

    fn mark_bad(&self, id: &CacheId) -> Result<(), LayerError> {
        self.evict(id)
    }

    fn entry_ids(&self) -> Result<Vec<CacheId>, LayerError> {
        let tombstones = lock(&self.tombstones);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut collect = |archive: &ArchiveFile| {
            for id in archive.entry_ids() {
                if !tombstones.contains(&id) && seen.insert(id) {
                    ids.push(id);
                }
            }
        };
        if let Some(writable) = &self.writable {
            collect(&lock(writable));
        }
        for archive in &self.read_only {
            collect(&lock(archive));
        }
        Ok(ids)
    }

    fn stats(&self) -> Result<LayerStats, LayerError> {
        let mut stats = LayerStats::default();
        for id in self.entry_ids()? {
            if let Some(size) = self.find_map(|archive| archive.entry_size(&id)) {
                stats.entries += 1;
                stats.payload_bytes += size;
            }
        }
        Ok(stats)
    }
}
