//! Offline construction of relocatable cache files.
//!
//! The creator builds, from a set of compiled pipeline ELF binaries, a
//! cache file byte-identical in layout to one serialized by the live
//! driver: public header, platform-keyed private header, one entry per
//! input binary keyed by the hash the compiler embedded into it.

use strata_blob::{
    anticipated_blob_size, BlobFormat, CacheBlobWriter, PublicHeader, PUBLIC_HEADER_SIZE,
    PUBLIC_HEADER_VERSION,
};
use strata_common::{CacheId, PlatformKey};

use crate::elf_notes::read_elf_cache_info;
use crate::error::CreatorError;

/// PCI vendor id the cache files are produced for.
pub const VENDOR_ID: u32 = 0x1002;

/// Compiler interface major version this tool understands.
///
/// Binaries carrying a different major version use an incompatible
/// metadata layout and are rejected rather than silently mis-cached.
pub const COMPILER_MAJOR_VERSION: u32 = 70;

/// Upper bound for the output file size given the input binary sizes.
///
/// Entry payloads are the input binaries verbatim, so the bound is exact.
pub fn anticipated_cache_file_size(input_sizes: &[usize]) -> usize {
    PUBLIC_HEADER_SIZE + anticipated_blob_size(input_sizes.len(), input_sizes.iter().sum())
}

/// Builds one relocatable cache file into a caller buffer.
pub struct RelocatableCacheCreator<'a> {
    platform_key: PlatformKey,
    writer: CacheBlobWriter<'a>,
}

impl<'a> RelocatableCacheCreator<'a> {
    /// Writes the public header into `out` and prepares the entry writer
    /// over the remainder.
    ///
    /// The platform key is derived from the same device identity the live
    /// driver would use, so the produced file validates on that device.
    pub fn new(
        device_id: u32,
        uuid: [u8; 16],
        fingerprint: &[u8],
        out: &'a mut [u8],
    ) -> Result<Self, CreatorError> {
        if out.len() < PUBLIC_HEADER_SIZE {
            return Err(CreatorError::Blob(strata_blob::BlobError::BufferTooSmall {
                needed: PUBLIC_HEADER_SIZE,
                available: out.len(),
            }));
        }
        let (public, private) = out.split_at_mut(PUBLIC_HEADER_SIZE);

        let header = PublicHeader {
            header_length: PUBLIC_HEADER_SIZE as u32,
            header_version: PUBLIC_HEADER_VERSION,
            vendor_id: VENDOR_ID,
            device_id,
            uuid,
        };
        header.write_to(public)?;

        Ok(Self {
            platform_key: PlatformKey::new(VENDOR_ID, device_id, uuid, fingerprint),
            writer: CacheBlobWriter::new(BlobFormat::Strict, private)?,
        })
    }

    /// Appends one pipeline binary as a cache entry.
    ///
    /// The entry id comes from the binary's embedded `cache_hash` note;
    /// the payload is the binary verbatim. A binary from an incompatible
    /// compiler major version is rejected.
    pub fn add_elf(&mut self, elf: &[u8]) -> Result<(), CreatorError> {
        let info = read_elf_cache_info(elf)?;
        let (major, _minor) = info.compiler_version;
        if major != COMPILER_MAJOR_VERSION {
            return Err(CreatorError::CompilerVersionMismatch {
                found: major,
                expected: COMPILER_MAJOR_VERSION,
            });
        }
        self.writer
            .add_entry(&CacheId::from_bytes(info.cache_hash), elf)?;
        Ok(())
    }

    /// Seals the file: writes the keyed private header.
    ///
    /// Returns the number of entries and the total file size in bytes,
    /// public header included.
    pub fn finalize(&mut self) -> Result<(usize, usize), CreatorError> {
        let (entries, private_bytes) = self.writer.finalize(&self.platform_key)?;
        Ok((entries, PUBLIC_HEADER_SIZE + private_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf_notes::build_test_elf;
    use strata_blob::{is_valid_blob, CacheBlobInfo};

    const DEVICE_ID: u32 = 0x744c;
    const UUID: [u8; 16] = [0x5au8; 16];

    #[test]
    fn produces_a_blob_the_live_cache_accepts() {
        let elf_a = build_test_elf([1u8; 16], (COMPILER_MAJOR_VERSION, 0));
        let elf_b = build_test_elf([2u8; 16], (COMPILER_MAJOR_VERSION, 4));

        let mut out = vec![0u8; anticipated_cache_file_size(&[elf_a.len(), elf_b.len()])];
        let mut creator =
            RelocatableCacheCreator::new(DEVICE_ID, UUID, b"fingerprint", &mut out).unwrap();
        creator.add_elf(&elf_a).unwrap();
        creator.add_elf(&elf_b).unwrap();
        let (entries, total) = creator.finalize().unwrap();
        assert_eq!(entries, 2);
        assert_eq!(total, out.len());

        // The private section validates under the matching platform key.
        let key = PlatformKey::new(VENDOR_ID, DEVICE_ID, UUID, b"fingerprint");
        assert!(is_valid_blob(&key, &out[PUBLIC_HEADER_SIZE..]));

        // And the inspector can walk the whole file.
        let info = CacheBlobInfo::new(&out).unwrap();
        let public = info.public_header_info().unwrap();
        assert_eq!(public.header.vendor_id, VENDOR_ID);
        assert_eq!(public.header.device_id, DEVICE_ID);
        assert_eq!(public.trailing_space_before_private_blob, 0);

        let parsed = info.entries_info().unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].header.hash_id, CacheId::from_bytes([1u8; 16]));
        assert_eq!(parsed[0].payload, elf_a);
        assert_eq!(parsed[1].payload, elf_b);
    }

    #[test]
    fn rejects_incompatible_compiler_version() {
        let elf = build_test_elf([1u8; 16], (COMPILER_MAJOR_VERSION + 1, 0));
        let mut out = vec![0u8; anticipated_cache_file_size(&[elf.len()])];
        let mut creator =
            RelocatableCacheCreator::new(DEVICE_ID, UUID, b"fp", &mut out).unwrap();
        assert!(matches!(
            creator.add_elf(&elf),
            Err(CreatorError::CompilerVersionMismatch { .. })
        ));
    }

    #[test]
    fn different_fingerprint_fails_validation() {
        let elf = build_test_elf([1u8; 16], (COMPILER_MAJOR_VERSION, 0));
        let mut out = vec![0u8; anticipated_cache_file_size(&[elf.len()])];
        let mut creator =
            RelocatableCacheCreator::new(DEVICE_ID, UUID, b"driver A", &mut out).unwrap();
        creator.add_elf(&elf).unwrap();
        creator.finalize().unwrap();

        let other = PlatformKey::new(VENDOR_ID, DEVICE_ID, UUID, b"driver B");
        assert!(!is_valid_blob(&other, &out[PUBLIC_HEADER_SIZE..]));
    }

    #[test]
    fn empty_input_set_yields_empty_cache() {
        let mut out = vec![0u8; anticipated_cache_file_size(&[])];
        let mut creator =
            RelocatableCacheCreator::new(DEVICE_ID, UUID, b"fp", &mut out).unwrap();
        let (entries, total) = creator.finalize().unwrap();
        assert_eq!(entries, 0);
        assert_eq!(total, out.len());

        let info = CacheBlobInfo::new(&out).unwrap();
        assert!(info.entries_info().unwrap().is_empty());
    }
}
