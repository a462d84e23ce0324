//! Transparent payload compression for an inner cache layer.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use strata_common::CacheId;
use tracing::debug;

use crate::{CacheLayer, EntryInfo, LayerError, LayerStats, QueryDisposition};

/// Size of the raw-size prefix on each stored frame.
const FRAME_PREFIX_SIZE: usize = 8;

/// Layer that compresses payloads before handing them to an inner layer.
///
/// Each stored frame is the original payload size as a little-endian `u64`
/// followed by the zlib stream. The prefix lets `query` report the
/// decompressed size without inflating the payload, and guards `load`
/// against corrupted streams. Reservation operations pass straight through,
/// so wrapping the memory layer keeps single-flight behavior intact.
pub struct CompressingLayer {
    inner: Arc<dyn CacheLayer>,
    level: Compression,
}

impl CompressingLayer {
    /// Wraps `inner` with compression at the default zlib level.
    pub fn new(inner: Arc<dyn CacheLayer>) -> Self {
        Self::with_level(inner, Compression::default())
    }

    /// Wraps `inner` with compression at an explicit zlib level.
    pub fn with_level(inner: Arc<dyn CacheLayer>, level: Compression) -> Self {
        Self { inner, level }
    }

    /// Reads the stored frame for `id` from the inner layer.
    fn load_frame(&self, id: &CacheId) -> Result<Vec<u8>, LayerError> {
        match self.inner.load_shared(id) {
            Ok(frame) => Ok(frame.to_vec()),
            Err(LayerError::Unsupported { .. }) => self.inner.load(id),
            Err(err) => Err(err),
        }
    }

    /// Decodes the raw-size prefix of a stored frame.
    fn raw_size(frame: &[u8]) -> Result<usize, LayerError> {
        if frame.len() < FRAME_PREFIX_SIZE {
            return Err(LayerError::corrupt("compressed frame shorter than prefix"));
        }
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        prefix.copy_from_slice(&frame[..FRAME_PREFIX_SIZE]);
        Ok(u64::from_le_bytes(prefix) as usize)
    }
}

impl CacheLayer for CompressingLayer {
    fn name(&self) -> &'static str {
        "compressing"
    }

    fn supports_reservations(&self) -> bool {
        self.inner.supports_reservations()
    }

    fn query(&self, id: &CacheId, reserve_on_miss: bool) -> Result<QueryDisposition, LayerError> {
        match self.inner.query(id, reserve_on_miss)? {
            QueryDisposition::Hit(_) => {
                let frame = self.load_frame(id)?;
                Ok(QueryDisposition::Hit(EntryInfo {
                    data_size: Self::raw_size(&frame)?,
                }))
            }
            other => Ok(other),
        }
    }

    fn load(&self, id: &CacheId) -> Result<Vec<u8>, LayerError> {
        let frame = self.load_frame(id)?;
        let raw_size = Self::raw_size(&frame)?;

        let mut data = Vec::with_capacity(raw_size);
        let mut decoder = ZlibDecoder::new(&frame[FRAME_PREFIX_SIZE..]);
        decoder
            .read_to_end(&mut data)
            .map_err(|err| LayerError::corrupt(format!("zlib inflate failed: {err}")))?;
        if data.len() != raw_size {
            return Err(LayerError::corrupt(format!(
                "inflated size {} does not match recorded size {raw_size}",
                data.len()
            )));
        }
        Ok(data)
    }

    fn store(&self, id: &CacheId, data: &[u8]) -> Result<(), LayerError> {
        let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE + data.len() / 2);
        frame.extend_from_slice(&(data.len() as u64).to_le_bytes());

        let mut encoder = ZlibEncoder::new(frame, self.level);
        encoder
            .write_all(data)
            .map_err(|err| LayerError::resource("zlib deflate", err))?;
        let frame = encoder
            .finish()
            .map_err(|err| LayerError::resource("zlib deflate", err))?;
        debug!(
            id = %id,
            raw = data.len(),
            stored = frame.len(),
            "compressed cache entry"
        );
        self.inner.store(id, &frame)
    }

    fn abort_reservation(&self, id: &CacheId) {
        self.inner.abort_reservation(id);
    }

    fn wait(&self, id: &CacheId) -> Result<QueryDisposition, LayerError> {
        match self.inner.wait(id)? {
            QueryDisposition::Hit(_) => {
                let frame = self.load_frame(id)?;
                Ok(QueryDisposition::Hit(EntryInfo {
                    data_size: Self::raw_size(&frame)?,
                }))
            }
            other => Ok(other),
        }
    }

    fn evict(&self, id: &CacheId) -> Result<(), LayerError> {
        self.inner.evict(id)
    }

    fn mark_bad(&self, id: &CacheId) -> Result<(), LayerError> {
        self.inner.mark_bad(id)
    }

    fn entry_ids(&self) -> Result<Vec<CacheId>, LayerError> {
        self.inner.entry_ids()
    }

    fn stats(&self) -> Result<LayerStats, LayerError> {
        // Payload bytes are reported decompressed, matching what `load`
        // hands back; the prefix makes this a metadata read per entry.
        let mut stats = LayerStats::default();
        for id in self.inner.entry_ids()? {
            let frame = self.load_frame(&id)?;
            stats.entries += 1;
            stats.payload_bytes += Self::raw_size(&frame)?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLayer;

    fn layer() -> CompressingLayer {
        CompressingLayer::new(Arc::new(MemoryLayer::default()))
    }

    #[test]
    fn store_then_load_roundtrips() {
        let layer = layer();
        let data = vec![0x2au8; 4096];
        let id = CacheId::from_contents(&data);

        layer.store(&id, &data).unwrap();
        assert_eq!(layer.load(&id).unwrap(), data);
    }

    #[test]
    fn query_reports_decompressed_size() {
        let layer = layer();
        let data = vec![7u8; 1000];
        let id = CacheId::from_contents(&data);
        layer.store(&id, &data).unwrap();

        assert_eq!(
            layer.query(&id, false).unwrap(),
            QueryDisposition::Hit(EntryInfo { data_size: 1000 })
        );
    }

    #[test]
    fn inner_layer_holds_smaller_frame() {
        let inner = Arc::new(MemoryLayer::default());
        let layer = CompressingLayer::new(Arc::clone(&inner) as Arc<dyn CacheLayer>);
        let data = vec![0u8; 8192];
        let id = CacheId::from_contents(&data);
        layer.store(&id, &data).unwrap();

        let frame = inner.load(&id).unwrap();
        assert!(frame.len() < data.len());
    }

    #[test]
    fn reservation_passes_through() {
        let layer = layer();
        let id = CacheId::from_contents(b"entry");

        assert!(layer.supports_reservations());
        assert_eq!(layer.query(&id, true).unwrap(), QueryDisposition::Reserved);
        assert_eq!(layer.query(&id, false).unwrap(), QueryDisposition::Pending);
        layer.abort_reservation(&id);
        assert_eq!(layer.query(&id, false).unwrap(), QueryDisposition::Miss);
    }

    #[test]
    fn corrupt_frame_is_rejected() {
        let inner = Arc::new(MemoryLayer::default());
        let layer = CompressingLayer::new(Arc::clone(&inner) as Arc<dyn CacheLayer>);
        let id = CacheId::from_contents(b"entry");

        // A frame whose prefix promises more data than the stream holds.
        let mut frame = 64u64.to_le_bytes().to_vec();
        frame.extend_from_slice(b"not a zlib stream");
        inner.store(&id, &frame).unwrap();

        assert!(matches!(layer.load(&id), Err(LayerError::Corrupt { .. })));
    }

    #[test]
    fn stats_report_decompressed_bytes() {
        let layer = layer();
        let a = vec![1u8; 300];
        let b = vec![2u8; 200];
        layer.store(&CacheId::from_contents(&a), &a).unwrap();
        layer.store(&CacheId::from_contents(&b), &b).unwrap();

        let stats = layer.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.payload_bytes, 500);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let layer = layer();
        let id = CacheId::from_contents(b"empty");
        layer.store(&id, b"").unwrap();
        assert_eq!(layer.load(&id).unwrap(), Vec::<u8>::new());
        assert_eq!(
            layer.query(&id, false).unwrap(),
            QueryDisposition::Hit(EntryInfo { data_size: 0 })
        );
    }
}
