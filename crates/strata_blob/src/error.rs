//! Error type for blob serialization and parsing.

/// Errors produced while writing or parsing a cache blob.
///
/// Blob errors are never fatal to the driver: a malformed blob is discarded
/// wholesale and the cache degrades to a miss.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// The output buffer is too small for the data being written.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required to complete the write.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The input buffer is too small to contain the named structure.
    #[error("truncated blob: {what} does not fit ({needed} bytes needed, {available} available)")]
    Truncated {
        /// The structure that did not fit.
        what: &'static str,
        /// Bytes required by the structure.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The public header's self-declared length is structurally impossible.
    #[error("public header length {declared} smaller than structural size {structural}")]
    HeaderLengthTooSmall {
        /// The `headerLength` field value.
        declared: usize,
        /// The fixed structural size of the public header.
        structural: usize,
    },

    /// An entry was appended after the blob was finalized.
    #[error("blob is already finalized")]
    Finalized,

    /// An entry record extends past the end of the blob.
    #[error("truncated cache entry #{index} at offset {offset}")]
    TruncatedEntry {
        /// Zero-based index of the bad entry.
        index: usize,
        /// Byte offset of the entry header within the blob.
        offset: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_too_small_display() {
        let err = BlobError::BufferTooSmall {
            needed: 64,
            available: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("64"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn truncated_entry_display() {
        let err = BlobError::TruncatedEntry {
            index: 3,
            offset: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("#3"));
        assert!(msg.contains("1024"));
    }
}
