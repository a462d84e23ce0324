//! Pipeline binary cache façade and compiler-facing adapter.
//!
//! [`PipelineBinaryCache`] composes the cache layer chain for one device:
//! an optional compressing layer over the mandatory memory layer, file
//! archives behind them, and (for developer tooling) a reinjection layer
//! consulted ahead of everything else. [`CacheAdapter`] narrows the façade
//! to the get/wait/set/release contract the shader compiler consumes, with
//! single-flight production per cache id.

#![warn(missing_docs)]

pub mod adapter;
pub mod cache;
pub mod error;
pub mod settings;

pub use adapter::{CacheAdapter, EntryHandle, EntryStatus};
pub use cache::{PipelineBinaryCache, QueryFlags, QueryResult, QueryStatus};
pub use error::CacheError;
pub use settings::RuntimeSettings;

pub use strata_blob::is_valid_blob;
