//! Shared foundational types for the Strata pipeline binary cache.
//!
//! This crate provides the two identity primitives the rest of the cache is
//! built on: [`CacheId`], the 128-bit content hash that addresses every cache
//! entry, and [`PlatformKey`], the device/driver/compiler fingerprint that
//! binds serialized cache contents to the platform that produced them.

#![warn(missing_docs)]

pub mod hash;
pub mod platform_key;

pub use hash::CacheId;
pub use platform_key::{PlatformKey, PLATFORM_DIGEST_LEN};
