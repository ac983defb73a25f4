use std::path::PathBuf;

/// Errors that can occur while building a repository map.
///
/// Per-file extraction problems are not represented here: they degrade the
/// file to tag-less and surface as warnings. Library crates use this type
/// directly; the binary reports it through `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasError;
///
/// let err = AtlasError::Config("max_tokens must be positive".into());
/// assert!(err.to_string().contains("max_tokens"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AtlasError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Source code parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// The tag cache store could not be opened, read, or written.
    #[error("cache error: {0}")]
    #[diagnostic(help("run `atlas cache clear` or pass --no-cache"))]
    Cache(String),

    /// A cache entry exists but cannot be decoded.
    #[error("corrupt cache entry for {}: {reason}", .path.display())]
    CacheCorruption { path: PathBuf, reason: String },

    /// Nothing to map: no input files, or every file was tag-less and empty.
    #[error("empty corpus: no mappable files were given")]
    #[diagnostic(help("pass source files or a directory containing supported languages"))]
    EmptyCorpus,

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AtlasError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = AtlasError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn corruption_names_the_file() {
        let err = AtlasError::CacheCorruption {
            path: PathBuf::from("/repo/src/lib.rs"),
            reason: "truncated payload".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/repo/src/lib.rs"));
        assert!(msg.contains("truncated payload"));
    }

    #[test]
    fn empty_corpus_is_distinct() {
        let err = AtlasError::EmptyCorpus;
        assert!(err.to_string().starts_with("empty corpus"));
    }
}
