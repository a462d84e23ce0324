//! Errors from the offline cache tools.

use strata_blob::BlobError;

/// Errors produced while building or inspecting cache files.
#[derive(Debug, thiserror::Error)]
pub enum CreatorError {
    /// The input is not a little-endian ELF64 image.
    #[error("not a little-endian ELF64 image")]
    NotElf,

    /// A required note is absent from the binary.
    #[error("missing ELF note `{name}`")]
    MissingNote {
        /// Name of the absent note.
        name: &'static str,
    },

    /// A note was found but its payload has the wrong shape.
    #[error("malformed ELF note `{name}`: {reason}")]
    MalformedNote {
        /// Name of the malformed note.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The binary was produced by an incompatible compiler.
    #[error("compiler major version {found} does not match tool version {expected}")]
    CompilerVersionMismatch {
        /// Major version recorded in the binary.
        found: u32,
        /// Major version this tool was built for.
        expected: u32,
    },

    /// Blob serialization failed.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// A file could not be read or written.
    #[error("{context}: {source}")]
    Io {
        /// What the tool was doing.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl CreatorError {
    /// Convenience constructor for [`CreatorError::Io`].
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
