//! Runtime configuration for cache construction.

use std::path::PathBuf;

/// Environment variable overriding the cache directory.
pub const ENV_CACHE_PATH: &str = "STRATA_CACHE_PATH";

/// Environment variable overriding the writable archive file name.
pub const ENV_CACHE_FILENAME: &str = "STRATA_CACHE_FILENAME";

/// Environment variable naming an optional read-only companion archive.
pub const ENV_CACHE_READ_ONLY_FILENAME: &str = "STRATA_CACHE_READ_ONLY_FILENAME";

/// Settings consumed once at cache construction.
///
/// Programmatic fields come from the embedding driver; the environment
/// overrides are read by [`RuntimeSettings::from_env`] so a deployment can
/// redirect the archive files without touching the embedder.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Application name, folded into the default archive file name so
    /// different applications keep separate archives.
    pub application_name: String,

    /// Whether the memory layer is wrapped in a compressing layer.
    pub use_compression: bool,

    /// Whether file archive layers are constructed at all.
    pub create_archive_layers: bool,

    /// Directory for archive files when no environment override is set.
    /// `None` with no override disables archive layers.
    pub default_cache_path: Option<PathBuf>,

    /// Directory of replacement binaries for the reinjection layer.
    /// `None` disables reinjection.
    pub reinjection_directory: Option<PathBuf>,

    /// Expected entry count, used to pre-size the memory layer.
    pub expected_entries: usize,

    /// Cache directory override (environment).
    pub cache_path_override: Option<PathBuf>,

    /// Writable archive file name override (environment).
    pub cache_filename_override: Option<String>,

    /// Read-only companion archive file name (environment).
    pub read_only_filename: Option<String>,
}

impl RuntimeSettings {
    /// Default settings for the named application.
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            use_compression: false,
            create_archive_layers: true,
            default_cache_path: None,
            reinjection_directory: None,
            expected_entries: 0,
            cache_path_override: None,
            cache_filename_override: None,
            read_only_filename: None,
        }
    }

    /// Applies environment overrides on top of the current settings.
    pub fn from_env(mut self) -> Self {
        if let Some(path) = std::env::var_os(ENV_CACHE_PATH) {
            self.cache_path_override = Some(PathBuf::from(path));
        }
        if let Ok(name) = std::env::var(ENV_CACHE_FILENAME) {
            if !name.is_empty() {
                self.cache_filename_override = Some(name);
            }
        }
        if let Ok(name) = std::env::var(ENV_CACHE_READ_ONLY_FILENAME) {
            if !name.is_empty() {
                self.read_only_filename = Some(name);
            }
        }
        self
    }

    /// The directory archive files live in, if any.
    pub fn archive_directory(&self) -> Option<&PathBuf> {
        self.cache_path_override
            .as_ref()
            .or(self.default_cache_path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_takes_precedence_over_default_path() {
        let mut settings = RuntimeSettings::new("app");
        settings.default_cache_path = Some(PathBuf::from("/var/cache/strata"));
        assert_eq!(
            settings.archive_directory(),
            Some(&PathBuf::from("/var/cache/strata"))
        );

        settings.cache_path_override = Some(PathBuf::from("/tmp/override"));
        assert_eq!(
            settings.archive_directory(),
            Some(&PathBuf::from("/tmp/override"))
        );
    }

    #[test]
    fn no_paths_means_no_archive_directory() {
        let settings = RuntimeSettings::new("app");
        assert_eq!(settings.archive_directory(), None);
    }
}
