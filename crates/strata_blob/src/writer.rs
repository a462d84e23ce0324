//! Serializing in-memory cache data into valid cache blobs.

use strata_common::{CacheId, PlatformKey, PLATFORM_DIGEST_LEN};

use crate::error::BlobError;
use crate::format::{
    BlobFormat, EntryHeader, PrivateHeader, ENTRY_HEADER_SIZE, PRIVATE_HEADER_SIZE,
};

/// Upper bound for the size of a blob's private section.
///
/// Covers the private header plus `num_entries` entry records carrying
/// `total_payload_bytes` of payload in total. The public header is not
/// included.
pub fn anticipated_blob_size(num_entries: usize, total_payload_bytes: usize) -> usize {
    PRIVATE_HEADER_SIZE + num_entries * ENTRY_HEADER_SIZE + total_payload_bytes
}

/// Writes the private section of a cache blob into a caller buffer.
///
/// The writer reserves space for the private header up front, appends entry
/// records with [`add_entry`](CacheBlobWriter::add_entry), and seals the blob
/// with [`finalize`](CacheBlobWriter::finalize), which computes the
/// platform-keyed digest over everything after the private header. Once
/// finalized the writer is sealed and rejects further entries, since a late
/// entry would silently invalidate the written digest.
pub struct CacheBlobWriter<'a> {
    blob_format: BlobFormat,
    buf: &'a mut [u8],
    bytes_used: usize,
    num_entries: usize,
    sealed: bool,
}

impl<'a> CacheBlobWriter<'a> {
    /// Creates a writer over `buf`, reserving private-header space.
    ///
    /// Fails if the buffer cannot hold even an empty blob.
    pub fn new(blob_format: BlobFormat, buf: &'a mut [u8]) -> Result<Self, BlobError> {
        if buf.len() < PRIVATE_HEADER_SIZE {
            return Err(BlobError::BufferTooSmall {
                needed: PRIVATE_HEADER_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            blob_format,
            buf,
            bytes_used: PRIVATE_HEADER_SIZE,
            num_entries: 0,
            sealed: false,
        })
    }

    /// Appends one entry record (header plus payload).
    ///
    /// Fails with [`BlobError::Finalized`] once the blob has been sealed.
    pub fn add_entry(&mut self, id: &CacheId, data: &[u8]) -> Result<(), BlobError> {
        if self.sealed {
            return Err(BlobError::Finalized);
        }
        let needed = ENTRY_HEADER_SIZE + data.len();
        let available = self.buf.len() - self.bytes_used;
        if needed > available {
            return Err(BlobError::BufferTooSmall { needed, available });
        }

        let header = EntryHeader {
            hash_id: *id,
            data_size: data.len() as u64,
        };
        header.write_to(&mut self.buf[self.bytes_used..])?;
        self.bytes_used += ENTRY_HEADER_SIZE;
        self.buf[self.bytes_used..self.bytes_used + data.len()].copy_from_slice(data);
        self.bytes_used += data.len();
        self.num_entries += 1;
        Ok(())
    }

    /// Seals the blob: writes the private header with the keyed digest.
    ///
    /// Returns the number of entries written and the total bytes used.
    pub fn finalize(&mut self, key: &PlatformKey) -> Result<(usize, usize), BlobError> {
        let digest = key.digest(&self.buf[PRIVATE_HEADER_SIZE..self.bytes_used]);
        let header = PrivateHeader {
            blob_format: self.blob_format as u32,
            hash_id: digest,
        };
        header.write_to(self.buf)?;
        self.sealed = true;
        Ok((self.num_entries, self.bytes_used))
    }
}

/// Verifies the platform-keyed digest of a blob's private section.
///
/// `data` starts at the private header (after any public header and reserved
/// space). Returns `false` on truncated input or a digest mismatch; never an
/// error, since a rejected blob is simply ignored.
pub fn is_valid_blob(key: &PlatformKey, data: &[u8]) -> bool {
    if data.len() < PRIVATE_HEADER_SIZE {
        return false;
    }
    let header = match PrivateHeader::read_from(data) {
        Ok(header) => header,
        Err(_) => return false,
    };
    let digest = key.digest(&data[PRIVATE_HEADER_SIZE..]);
    // Digest length is fixed; plain comparison, no secrecy concerns here.
    digest[..] == header.hash_id[..PLATFORM_DIGEST_LEN]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PlatformKey {
        PlatformKey::new(0x1002, 0x73bf, [1u8; 16], b"driver 1.0")
    }

    #[test]
    fn empty_blob_is_valid() {
        let mut buf = vec![0u8; PRIVATE_HEADER_SIZE];
        let mut writer = CacheBlobWriter::new(BlobFormat::Strict, &mut buf).unwrap();
        let (entries, bytes) = writer.finalize(&key()).unwrap();
        assert_eq!(entries, 0);
        assert_eq!(bytes, PRIVATE_HEADER_SIZE);
        assert!(is_valid_blob(&key(), &buf));
    }

    #[test]
    fn entries_roundtrip_and_validate() {
        let payload_a = b"binary a contents";
        let payload_b = b"binary b";
        let id_a = CacheId::from_contents(payload_a);
        let id_b = CacheId::from_contents(payload_b);

        let size = anticipated_blob_size(2, payload_a.len() + payload_b.len());
        let mut buf = vec![0u8; size];
        let mut writer = CacheBlobWriter::new(BlobFormat::Portable, &mut buf).unwrap();
        writer.add_entry(&id_a, payload_a).unwrap();
        writer.add_entry(&id_b, payload_b).unwrap();
        let (entries, bytes) = writer.finalize(&key()).unwrap();
        assert_eq!(entries, 2);
        assert_eq!(bytes, size);
        assert!(is_valid_blob(&key(), &buf));

        let header = PrivateHeader::read_from(&buf).unwrap();
        assert_eq!(header.blob_format, BlobFormat::Portable as u32);
    }

    #[test]
    fn rejected_under_different_platform_key() {
        let mut buf = vec![0u8; anticipated_blob_size(1, 4)];
        let mut writer = CacheBlobWriter::new(BlobFormat::Strict, &mut buf).unwrap();
        writer
            .add_entry(&CacheId::from_contents(b"data"), b"data")
            .unwrap();
        writer.finalize(&key()).unwrap();

        let other = PlatformKey::new(0x1002, 0x73bf, [1u8; 16], b"driver 2.0");
        assert!(is_valid_blob(&key(), &buf));
        assert!(!is_valid_blob(&other, &buf));
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let mut buf = vec![0u8; anticipated_blob_size(1, 4)];
        let mut writer = CacheBlobWriter::new(BlobFormat::Strict, &mut buf).unwrap();
        writer
            .add_entry(&CacheId::from_contents(b"data"), b"data")
            .unwrap();
        writer.finalize(&key()).unwrap();

        *buf.last_mut().unwrap() ^= 0xff;
        assert!(!is_valid_blob(&key(), &buf));
    }

    #[test]
    fn truncated_input_fails_validation() {
        assert!(!is_valid_blob(&key(), &[]));
        assert!(!is_valid_blob(&key(), &[0u8; PRIVATE_HEADER_SIZE - 1]));
    }

    #[test]
    fn writer_rejects_tiny_buffer() {
        let mut buf = [0u8; PRIVATE_HEADER_SIZE - 1];
        assert!(CacheBlobWriter::new(BlobFormat::Strict, &mut buf).is_err());
    }

    #[test]
    fn entries_rejected_after_finalize() {
        let mut buf = vec![0u8; anticipated_blob_size(1, 4)];
        let mut writer = CacheBlobWriter::new(BlobFormat::Strict, &mut buf).unwrap();
        writer.finalize(&key()).unwrap();

        let err = writer
            .add_entry(&CacheId::from_contents(b"late"), b"late")
            .unwrap_err();
        assert!(matches!(err, BlobError::Finalized));
        // The sealed blob still validates.
        assert!(is_valid_blob(&key(), &buf));
    }

    #[test]
    fn add_entry_rejects_overflow() {
        let mut buf = vec![0u8; PRIVATE_HEADER_SIZE + ENTRY_HEADER_SIZE + 2];
        let mut writer = CacheBlobWriter::new(BlobFormat::Strict, &mut buf).unwrap();
        let err = writer
            .add_entry(&CacheId::from_contents(b"big"), b"too big payload")
            .unwrap_err();
        assert!(matches!(err, BlobError::BufferTooSmall { .. }));
    }
}
