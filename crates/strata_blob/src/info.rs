//! Structural inspection of cache blobs.
//!
//! [`CacheBlobInfo`] re-parses any blob, whether it came from the live
//! driver cache or the offline creator tool. It is valid to use with
//! invalid or partially valid blobs: construction only checks that the
//! buffer could contain both headers, and each accessor reports its own
//! structural failure.

use strata_common::CacheId;

use crate::error::BlobError;
use crate::format::{
    EntryHeader, PrivateHeader, PublicHeader, ENTRY_HEADER_SIZE, PRIVATE_HEADER_SIZE,
    PUBLIC_HEADER_SIZE,
};

/// Parsed public header plus the reserved space that follows it.
#[derive(Debug, Clone, Copy)]
pub struct PublicHeaderInfo {
    /// The decoded public header.
    pub header: PublicHeader,
    /// Bytes of opaque reserved space between the structural public header
    /// and the private header.
    pub trailing_space_before_private_blob: usize,
}

/// Parsed private header plus the size of the content section.
#[derive(Debug, Clone, Copy)]
pub struct PrivateHeaderInfo {
    /// The decoded private header.
    pub header: PrivateHeader,
    /// Total bytes of entry records following the private header. Zero for
    /// an empty cache.
    pub content_blob_size: usize,
}

/// One enumerated cache entry: header fields, location, payload, checksum.
#[derive(Debug, Clone)]
pub struct BlobEntryInfo<'a> {
    /// The decoded entry header.
    pub header: EntryHeader,
    /// Zero-based index of the entry in the content section.
    pub index: usize,
    /// Byte offset of the entry header within the blob.
    pub offset: usize,
    /// Borrowed payload bytes.
    pub payload: &'a [u8],
    /// Content checksum of the payload, for cross-referencing against
    /// source binaries.
    pub checksum: CacheId,
}

/// Analyzer for serialized cache blobs.
///
/// Accessors do not have to be called in any particular order.
pub struct CacheBlobInfo<'a> {
    blob: &'a [u8],
}

impl<'a> CacheBlobInfo<'a> {
    /// Wraps a blob buffer for inspection.
    ///
    /// Fails only when the buffer is too small to contain a public and a
    /// private header back to back; all deeper validation is deferred to
    /// the accessors.
    pub fn new(blob: &'a [u8]) -> Result<Self, BlobError> {
        let min_size = PUBLIC_HEADER_SIZE + PRIVATE_HEADER_SIZE;
        if blob.len() < min_size {
            return Err(BlobError::Truncated {
                what: "cache blob container",
                needed: min_size,
                available: blob.len(),
            });
        }
        Ok(Self { blob })
    }

    /// Reads the public header and computes the reserved trailing space.
    pub fn public_header_info(&self) -> Result<PublicHeaderInfo, BlobError> {
        let header = PublicHeader::read_from(self.blob)?;
        let declared = header.header_length as usize;
        if declared < PUBLIC_HEADER_SIZE {
            return Err(BlobError::HeaderLengthTooSmall {
                declared,
                structural: PUBLIC_HEADER_SIZE,
            });
        }
        if declared >= self.blob.len() {
            return Err(BlobError::Truncated {
                what: "public header reserved space",
                needed: declared,
                available: self.blob.len(),
            });
        }
        Ok(PublicHeaderInfo {
            header,
            trailing_space_before_private_blob: declared - PUBLIC_HEADER_SIZE,
        })
    }

    /// Locates the private header via the public header's declared length.
    pub fn private_header_offset(&self) -> Result<usize, BlobError> {
        let header = PublicHeader::read_from(self.blob)?;
        let offset = header.header_length as usize;
        if offset < PUBLIC_HEADER_SIZE {
            return Err(BlobError::HeaderLengthTooSmall {
                declared: offset,
                structural: PUBLIC_HEADER_SIZE,
            });
        }
        if offset + PRIVATE_HEADER_SIZE > self.blob.len() {
            return Err(BlobError::Truncated {
                what: "private header",
                needed: offset + PRIVATE_HEADER_SIZE,
                available: self.blob.len(),
            });
        }
        Ok(offset)
    }

    /// Locates the first entry record.
    pub fn content_offset(&self) -> Result<usize, BlobError> {
        Ok(self.private_header_offset()? + PRIVATE_HEADER_SIZE)
    }

    /// Reads the private header and the content section size.
    pub fn private_header_info(&self) -> Result<PrivateHeaderInfo, BlobError> {
        let offset = self.private_header_offset()?;
        let header = PrivateHeader::read_from(&self.blob[offset..])?;
        Ok(PrivateHeaderInfo {
            header,
            content_blob_size: self.blob.len() - (offset + PRIVATE_HEADER_SIZE),
        })
    }

    /// Enumerates all entry records, computing a checksum per payload.
    ///
    /// An empty content section yields an empty list. A truncated entry
    /// header or payload fails the whole enumeration.
    pub fn entries_info(&self) -> Result<Vec<BlobEntryInfo<'a>>, BlobError> {
        let mut offset = self.content_offset()?;
        let mut entries = Vec::new();

        while offset < self.blob.len() {
            let index = entries.len();
            if offset + ENTRY_HEADER_SIZE > self.blob.len() {
                return Err(BlobError::TruncatedEntry { index, offset });
            }
            let header = EntryHeader::read_from(&self.blob[offset..])?;
            let payload_start = offset + ENTRY_HEADER_SIZE;
            let payload_end = payload_start
                .checked_add(header.data_size as usize)
                .filter(|end| *end <= self.blob.len())
                .ok_or(BlobError::TruncatedEntry { index, offset })?;

            let payload = &self.blob[payload_start..payload_end];
            entries.push(BlobEntryInfo {
                header,
                index,
                offset,
                payload,
                checksum: CacheId::from_contents(payload),
            });
            offset = payload_end;
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{BlobFormat, PUBLIC_HEADER_VERSION};
    use crate::writer::{anticipated_blob_size, CacheBlobWriter};
    use strata_common::PlatformKey;

    fn key() -> PlatformKey {
        PlatformKey::new(0x1002, 0x73bf, [2u8; 16], b"fingerprint")
    }

    /// Builds a full blob with the given reserved trailing space and entries.
    fn build_blob(trailing: usize, entries: &[&[u8]]) -> Vec<u8> {
        let total_payload: usize = entries.iter().map(|e| e.len()).sum();
        let private_size = anticipated_blob_size(entries.len(), total_payload);
        let mut blob = vec![0u8; PUBLIC_HEADER_SIZE + trailing + private_size];

        let header = PublicHeader {
            header_length: (PUBLIC_HEADER_SIZE + trailing) as u32,
            header_version: PUBLIC_HEADER_VERSION,
            vendor_id: 0x1002,
            device_id: 0x73bf,
            uuid: [2u8; 16],
        };
        header.write_to(&mut blob).unwrap();

        let private = &mut blob[PUBLIC_HEADER_SIZE + trailing..];
        let mut writer = CacheBlobWriter::new(BlobFormat::Strict, private).unwrap();
        for payload in entries {
            writer
                .add_entry(&CacheId::from_contents(payload), payload)
                .unwrap();
        }
        writer.finalize(&key()).unwrap();
        blob
    }

    #[test]
    fn header_with_one_byte_of_reserved_space() {
        let blob = build_blob(1, &[]);
        let info = CacheBlobInfo::new(&blob).unwrap();

        let public = info.public_header_info().unwrap();
        assert_eq!(public.trailing_space_before_private_blob, 1);

        // The private header still fits after the padding.
        let offset = info.private_header_offset().unwrap();
        assert_eq!(offset, PUBLIC_HEADER_SIZE + 1);
    }

    #[test]
    fn all_zero_container_parses_but_headers_fail() {
        let blob = vec![0u8; 512];
        let info = CacheBlobInfo::new(&blob).unwrap();

        // headerLength of zero cannot contain the public header.
        assert!(matches!(
            info.public_header_info(),
            Err(BlobError::HeaderLengthTooSmall { .. })
        ));
        assert!(matches!(
            info.private_header_offset(),
            Err(BlobError::HeaderLengthTooSmall { .. })
        ));
    }

    #[test]
    fn container_too_small_is_rejected() {
        let blob = vec![0u8; PUBLIC_HEADER_SIZE + PRIVATE_HEADER_SIZE - 1];
        assert!(CacheBlobInfo::new(&blob).is_err());
    }

    #[test]
    fn zero_entry_blob_yields_empty_list() {
        let blob = build_blob(0, &[]);
        let info = CacheBlobInfo::new(&blob).unwrap();

        let private = info.private_header_info().unwrap();
        assert_eq!(private.content_blob_size, 0);
        assert!(info.entries_info().unwrap().is_empty());
    }

    #[test]
    fn single_entry_reports_size_offset_and_checksum() {
        let payload = [0xde, 0xad, 0xbe, 0xef];
        let blob = build_blob(0, &[&payload]);
        let info = CacheBlobInfo::new(&blob).unwrap();

        let entries = info.entries_info().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.header.data_size, 4);
        assert_eq!(entry.offset, info.content_offset().unwrap());
        assert_eq!(entry.payload, payload);
        assert_eq!(entry.checksum, CacheId::from_contents(&payload));
    }

    #[test]
    fn multiple_entries_enumerate_in_order() {
        let blob = build_blob(3, &[b"first entry", b"second", b"third binary"]);
        let info = CacheBlobInfo::new(&blob).unwrap();

        let entries = info.entries_info().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].payload, b"first entry");
        assert_eq!(entries[1].payload, b"second");
        assert_eq!(entries[2].payload, b"third binary");
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.index, i);
            assert_eq!(entry.header.hash_id, CacheId::from_contents(entry.payload));
        }
    }

    #[test]
    fn truncated_entry_payload_fails_enumeration() {
        let mut blob = build_blob(0, &[b"payload bytes"]);
        blob.truncate(blob.len() - 4);
        let info = CacheBlobInfo::new(&blob).unwrap();
        assert!(matches!(
            info.entries_info(),
            Err(BlobError::TruncatedEntry { index: 0, .. })
        ));
    }

    #[test]
    fn reserved_space_preserved_on_roundtrip() {
        let mut blob = build_blob(7, &[b"entry"]);
        // Mark the reserved gap with a sentinel pattern.
        for byte in &mut blob[PUBLIC_HEADER_SIZE..PUBLIC_HEADER_SIZE + 7] {
            *byte = 0x5c;
        }

        let info = CacheBlobInfo::new(&blob).unwrap();
        let public = info.public_header_info().unwrap();
        assert_eq!(public.trailing_space_before_private_blob, 7);

        // Re-reading leaves the gap untouched.
        assert!(blob[PUBLIC_HEADER_SIZE..PUBLIC_HEADER_SIZE + 7]
            .iter()
            .all(|b| *b == 0x5c));
        assert_eq!(info.entries_info().unwrap().len(), 1);
    }
}
