use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use atlas_core::{AtlasError, WalkConfig};
use serde::{Deserialize, Serialize};

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// Programming language detected from file extension.
///
/// # Examples
///
/// ```
/// use atlas_repomap::walker::Language;
///
/// assert_eq!(Language::from_extension("rs"), Language::Rust);
/// assert_eq!(Language::from_extension("py"), Language::Python);
/// assert_eq!(Language::from_extension("hpp"), Language::Cpp);
/// assert_eq!(Language::from_extension("kts"), Language::Kotlin);
/// assert_eq!(Language::from_extension("txt"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    Unknown,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path's extension.
    ///
    /// ```
    /// use std::path::Path;
    /// use atlas_repomap::walker::Language;
    ///
    /// assert_eq!(Language::from_path(Path::new("src/app.tsx")), Language::TypeScript);
    /// assert_eq!(Language::from_path(Path::new("Makefile")), Language::Unknown);
    /// ```
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Get the tree-sitter language grammar for this language.
    ///
    /// Returns `None` for `Language::Unknown`.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Language::C => Some(tree_sitter_c::LANGUAGE.into()),
            Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Language::Ruby => Some(tree_sitter_ruby::LANGUAGE.into()),
            Language::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            Language::Kotlin => Some(tree_sitter_kotlin_ng::LANGUAGE.into()),
            Language::Swift => Some(tree_sitter_swift::LANGUAGE.into()),
            Language::Unknown => None,
        }
    }

    /// Lowercase name, as stored in the cache.
    pub fn name(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Unknown => "unknown",
        }
    }
}

/// Why a source file could not be read.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("not valid UTF-8 text")]
    Decode,
    #[error("{0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => SourceError::NotFound,
            ErrorKind::PermissionDenied => SourceError::PermissionDenied,
            ErrorKind::InvalidData => SourceError::Decode,
            _ => SourceError::Io(err),
        }
    }
}

/// Read a file as text.
///
/// Files with a NUL byte in their first 8 KiB are treated as binary and
/// rejected with [`SourceError::Decode`].
///
/// # Errors
///
/// Returns the [`SourceError`] matching the failure; callers exclude the file
/// from the run rather than aborting.
pub fn read_source(path: &Path) -> Result<String, SourceError> {
    let bytes = std::fs::read(path)?;
    let check_len = bytes.len().min(BINARY_CHECK_SIZE);
    if bytes[..check_len].contains(&0) {
        return Err(SourceError::Decode);
    }
    String::from_utf8(bytes).map_err(|_| SourceError::Decode)
}

/// Expand `inputs` (files or directories) into the list of files to map.
///
/// Relative inputs are resolved against `root`.
/// Directories are walked respecting `.gitignore`, skipping hidden entries,
/// files larger than `config.max_file_size`, unknown languages, and
/// `config.exclude` globs (matched against the path relative to `root`).
/// Explicitly named files are kept as-is so the pipeline can report them.
/// Returns absolute, sorted, de-duplicated paths.
///
/// # Errors
///
/// Returns [`AtlasError::FileNotFound`] if an input does not exist, or
/// [`AtlasError::Config`] if an exclude glob is invalid.
///
/// # Examples
///
/// ```no_run
/// use std::path::{Path, PathBuf};
/// use atlas_core::WalkConfig;
/// use atlas_repomap::walker::discover;
///
/// let files = discover(Path::new("."), &[PathBuf::from(".")], &WalkConfig::default()).unwrap();
/// for f in &files {
///     println!("{}", f.display());
/// }
/// ```
pub fn discover(
    root: &Path,
    inputs: &[PathBuf],
    config: &WalkConfig,
) -> Result<Vec<PathBuf>, AtlasError> {
    let root = absolute(root);
    let excludes = config
        .exclude
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| AtlasError::Config(format!("invalid exclude pattern {p:?}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let is_excluded = |path: &Path| {
        let rel = path.strip_prefix(&root).unwrap_or(path);
        excludes.iter().any(|p| p.matches_path(rel))
    };

    let mut files = BTreeSet::new();
    for input in inputs {
        let input = if input.is_absolute() {
            absolute(input)
        } else {
            absolute(&root.join(input))
        };
        if input.is_file() {
            files.insert(input);
            continue;
        }
        if !input.is_dir() {
            return Err(AtlasError::FileNotFound(input));
        }

        for entry in ignore::WalkBuilder::new(&input).build() {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();

            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if metadata.len() > config.max_file_size {
                continue;
            }
            if Language::from_path(path) == Language::Unknown {
                continue;
            }
            if is_excluded(path) {
                continue;
            }
            files.insert(path.to_path_buf());
        }
    }

    Ok(files.into_iter().collect())
}

/// Make `path` absolute without touching the filesystem more than needed.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_temp_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/lib.py"), "def hello(): pass").unwrap();
        fs::write(root.join("src/app.ts"), "function run() {}").unwrap();
        fs::write(root.join("src/util.js"), "const x = 1;").unwrap();
        fs::write(root.join("src/main.go"), "package main").unwrap();

        fs::write(root.join("README.md"), "# Hello").unwrap();
        fs::write(root.join("data.csv"), "a,b,c").unwrap();

        dir
    }

    fn relative(root: &Path, files: &[PathBuf]) -> Vec<PathBuf> {
        let root = absolute(root);
        files
            .iter()
            .map(|f| f.strip_prefix(&root).unwrap().to_path_buf())
            .collect()
    }

    #[test]
    fn discover_finds_known_language_files_sorted() {
        let dir = make_temp_repo();
        let files = discover(dir.path(), &[PathBuf::from(".")], &WalkConfig::default()).unwrap();

        let rel = relative(dir.path(), &files);
        assert_eq!(
            rel,
            vec![
                PathBuf::from("src/app.ts"),
                PathBuf::from("src/lib.py"),
                PathBuf::from("src/main.go"),
                PathBuf::from("src/main.rs"),
                PathBuf::from("src/util.js"),
            ]
        );
    }

    #[test]
    fn discover_respects_gitignore() {
        let dir = make_temp_repo();
        let root = dir.path();

        // The ignore crate needs a .git dir to recognize .gitignore files
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/output.rs"), "fn ignored() {}").unwrap();
        fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files = discover(root, &[PathBuf::from(".")], &WalkConfig::default()).unwrap();
        for p in relative(root, &files) {
            assert!(!p.starts_with("build"), "gitignored: {}", p.display());
        }
    }

    #[test]
    fn discover_applies_exclude_globs_and_size_limit() {
        let dir = make_temp_repo();
        let root = dir.path();
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(root.join("vendor/dep.rs"), "fn dep() {}").unwrap();
        fs::write(root.join("huge.rs"), "x".repeat(4096)).unwrap();

        let config = WalkConfig {
            max_file_size: 1024,
            exclude: vec!["vendor/**".into()],
        };
        let files = discover(root, &[PathBuf::from(".")], &config).unwrap();
        let rel = relative(root, &files);
        assert!(!rel.contains(&PathBuf::from("vendor/dep.rs")));
        assert!(!rel.contains(&PathBuf::from("huge.rs")));
        assert!(rel.contains(&PathBuf::from("src/main.rs")));
    }

    #[test]
    fn explicit_files_are_kept_even_with_unknown_language() {
        let dir = make_temp_repo();
        let files = discover(
            dir.path(),
            &[PathBuf::from("README.md"), PathBuf::from("src/main.rs")],
            &WalkConfig::default(),
        )
        .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = make_temp_repo();
        let err = discover(
            dir.path(),
            &[PathBuf::from("nope.rs")],
            &WalkConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AtlasError::FileNotFound(_)));
    }

    #[test]
    fn invalid_glob_is_a_config_error() {
        let dir = make_temp_repo();
        let config = WalkConfig {
            exclude: vec!["[".into()],
            ..WalkConfig::default()
        };
        let err = discover(dir.path(), &[PathBuf::from(".")], &config).unwrap_err();
        assert!(matches!(err, AtlasError::Config(_)));
    }

    #[test]
    fn read_source_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.rs");
        let mut content = b"fn main() { ".to_vec();
        content.push(0);
        fs::write(&path, &content).unwrap();

        assert!(matches!(read_source(&path), Err(SourceError::Decode)));
        assert!(matches!(
            read_source(&dir.path().join("missing.rs")),
            Err(SourceError::NotFound)
        ));
    }
}
