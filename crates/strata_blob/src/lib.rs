//! Serialized pipeline binary cache blob format.
//!
//! A cache blob is the exportable unit shared by the live driver cache and
//! the offline cache-creator tool. Its layout is fixed and all integer
//! fields are little-endian:
//!
//! 1. A public header (`headerLength`, `headerVersion`, vendor id, device id,
//!    16-byte UUID). `headerLength` may declare more bytes than the
//!    structural size; the surplus is opaque reserved space that readers
//!    skip and round-trips preserve verbatim.
//! 2. A private header at offset `headerLength`: a blob-format tag and a
//!    20-byte platform-keyed digest over everything that follows it.
//! 3. Zero or more entry records: a 16-byte [`CacheId`], a `u64` payload
//!    size, then the raw payload bytes.
//!
//! [`CacheBlobWriter`] produces blobs, [`is_valid_blob`] verifies the keyed
//! digest, and [`CacheBlobInfo`] re-parses blobs structurally (tolerating
//! invalid or partially valid input) for inspection tooling.
//!
//! [`CacheId`]: strata_common::CacheId

#![warn(missing_docs)]

mod error;
mod format;
mod info;
mod writer;

pub use error::BlobError;
pub use format::{
    BlobFormat, EntryHeader, PrivateHeader, PublicHeader, ENTRY_HEADER_SIZE, PRIVATE_HEADER_SIZE,
    PUBLIC_HEADER_SIZE, PUBLIC_HEADER_VERSION,
};
pub use info::{BlobEntryInfo, CacheBlobInfo, PrivateHeaderInfo, PublicHeaderInfo};
pub use writer::{anticipated_blob_size, is_valid_blob, CacheBlobWriter};
