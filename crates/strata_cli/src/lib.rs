//! Offline cache tooling for Strata pipeline binary caches.
//!
//! Library code behind the `strata-cache` binary: the relocatable cache
//! creator (builds a cache blob from compiled pipeline ELF binaries), a
//! minimal ELF note reader that extracts the per-binary cache identity the
//! compiler embeds, and UUID string helpers for the command line.

#![warn(missing_docs)]

pub mod creator;
pub mod elf_notes;
pub mod error;
pub mod uuid;

pub use creator::{anticipated_cache_file_size, RelocatableCacheCreator};
pub use elf_notes::{read_elf_cache_info, ElfCacheInfo};
pub use error::CreatorError;
pub use uuid::{parse_uuid, uuid_to_hex_string};
