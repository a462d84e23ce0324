//! Fixed on-disk layouts for the blob headers and entry records.

use strata_common::{CacheId, PLATFORM_DIGEST_LEN};

use crate::error::BlobError;

/// Structural size in bytes of the public header.
pub const PUBLIC_HEADER_SIZE: usize = 32;

/// Structural size in bytes of the private header.
pub const PRIVATE_HEADER_SIZE: usize = 4 + PLATFORM_DIGEST_LEN;

/// Size in bytes of one entry record header.
pub const ENTRY_HEADER_SIZE: usize = CacheId::LEN + 8;

/// The only public header version this format defines.
pub const PUBLIC_HEADER_VERSION: u32 = 1;

/// Format tag stored in the private header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlobFormat {
    /// Entries are valid only for the exact platform key that produced them.
    Strict = 0,
    /// Entries are relocatable and may be consumed by a compatible compiler.
    Portable = 1,
}

impl BlobFormat {
    /// Decodes a format tag, returning `None` for unknown values.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Strict),
            1 => Some(Self::Portable),
            _ => None,
        }
    }
}

/// The public header at the start of every blob.
///
/// `header_length` is self-declared and may exceed [`PUBLIC_HEADER_SIZE`];
/// the private header begins at `header_length`, not at the structural size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicHeader {
    /// Declared total length of the public header, reserved space included.
    pub header_length: u32,
    /// Header layout version; always [`PUBLIC_HEADER_VERSION`].
    pub header_version: u32,
    /// PCI vendor id of the device the cache was built for.
    pub vendor_id: u32,
    /// PCI device id of the device the cache was built for.
    pub device_id: u32,
    /// Pipeline-cache UUID of the driver/compiler build.
    pub uuid: [u8; 16],
}

impl PublicHeader {
    /// Encodes the header into `buf`, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, BlobError> {
        if buf.len() < PUBLIC_HEADER_SIZE {
            return Err(BlobError::BufferTooSmall {
                needed: PUBLIC_HEADER_SIZE,
                available: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&self.header_length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.header_version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.vendor_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.device_id.to_le_bytes());
        buf[16..32].copy_from_slice(&self.uuid);
        Ok(PUBLIC_HEADER_SIZE)
    }

    /// Decodes a header from the front of `buf`.
    ///
    /// Only the structural layout is checked here; whether the declared
    /// `header_length` is plausible is the reader's concern.
    pub fn read_from(buf: &[u8]) -> Result<Self, BlobError> {
        if buf.len() < PUBLIC_HEADER_SIZE {
            return Err(BlobError::Truncated {
                what: "public header",
                needed: PUBLIC_HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[16..32]);
        Ok(Self {
            header_length: u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes")),
            header_version: u32::from_le_bytes(buf[4..8].try_into().expect("4 bytes")),
            vendor_id: u32::from_le_bytes(buf[8..12].try_into().expect("4 bytes")),
            device_id: u32::from_le_bytes(buf[12..16].try_into().expect("4 bytes")),
            uuid,
        })
    }
}

/// The private header located at the public header's declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateHeader {
    /// Blob format tag (raw; may hold values this build does not know).
    pub blob_format: u32,
    /// Platform-keyed digest over every byte following this header.
    pub hash_id: [u8; PLATFORM_DIGEST_LEN],
}

impl PrivateHeader {
    /// Encodes the header into `buf`, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, BlobError> {
        if buf.len() < PRIVATE_HEADER_SIZE {
            return Err(BlobError::BufferTooSmall {
                needed: PRIVATE_HEADER_SIZE,
                available: buf.len(),
            });
        }
        buf[0..4].copy_from_slice(&self.blob_format.to_le_bytes());
        buf[4..PRIVATE_HEADER_SIZE].copy_from_slice(&self.hash_id);
        Ok(PRIVATE_HEADER_SIZE)
    }

    /// Decodes a header from the front of `buf`.
    pub fn read_from(buf: &[u8]) -> Result<Self, BlobError> {
        if buf.len() < PRIVATE_HEADER_SIZE {
            return Err(BlobError::Truncated {
                what: "private header",
                needed: PRIVATE_HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut hash_id = [0u8; PLATFORM_DIGEST_LEN];
        hash_id.copy_from_slice(&buf[4..PRIVATE_HEADER_SIZE]);
        Ok(Self {
            blob_format: u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes")),
            hash_id,
        })
    }
}

/// One entry record header: the entry's id and its payload size.
///
/// The payload size is fixed at `u64` on the wire so blobs are portable
/// across word sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Content hash identifying the entry.
    pub hash_id: CacheId,
    /// Payload size in bytes.
    pub data_size: u64,
}

impl EntryHeader {
    /// Encodes the header into `buf`, returning the bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, BlobError> {
        if buf.len() < ENTRY_HEADER_SIZE {
            return Err(BlobError::BufferTooSmall {
                needed: ENTRY_HEADER_SIZE,
                available: buf.len(),
            });
        }
        buf[0..CacheId::LEN].copy_from_slice(self.hash_id.as_bytes());
        buf[CacheId::LEN..ENTRY_HEADER_SIZE].copy_from_slice(&self.data_size.to_le_bytes());
        Ok(ENTRY_HEADER_SIZE)
    }

    /// Decodes a header from the front of `buf`.
    pub fn read_from(buf: &[u8]) -> Result<Self, BlobError> {
        if buf.len() < ENTRY_HEADER_SIZE {
            return Err(BlobError::Truncated {
                what: "entry header",
                needed: ENTRY_HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[0..CacheId::LEN]);
        Ok(Self {
            hash_id: CacheId::from_bytes(id),
            data_size: u64::from_le_bytes(
                buf[CacheId::LEN..ENTRY_HEADER_SIZE].try_into().expect("8 bytes"),
            ),
        })
    }
}
