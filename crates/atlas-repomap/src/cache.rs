//! Tag cache: skip re-parsing files whose identity has not changed.
//!
//! Entries are keyed by `(absolute path, mtime, size)`. A lookup whose stored
//! signature differs from the file on disk is a miss; an entry that cannot be
//! decoded is treated as a miss and overwritten. Stores replace whole entries
//! per key, so concurrent readers only ever see complete entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use atlas_core::{AtlasError, CacheConfig, Tier};
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::corpus::CorpusFile;
use crate::extractor::{ExtractError, TagExtractor};
use crate::tags::Tag;
use crate::walker::{self, Language, SourceError};
use crate::MapWarning;

/// Bumped whenever the stored tag format changes; older stores are wiped.
const SCHEMA_VERSION: &str = "1";

/// Identity of one file version.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_repomap::cache::CacheKey;
///
/// let a = CacheKey { path: PathBuf::from("/r/a.rs"), mtime_ns: 10, size: 3 };
/// let b = CacheKey { mtime_ns: 11, ..a.clone() };
/// assert!(!a.same_version(&b));
/// assert!(a.same_version(&a.clone()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Absolute file path.
    pub path: PathBuf,
    /// Modification time in nanoseconds since the UNIX epoch.
    pub mtime_ns: i64,
    /// File size in bytes.
    pub size: u64,
}

impl CacheKey {
    /// Stat `path` and build its key.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the file cannot be stat'ed.
    pub fn for_file(path: &Path) -> Result<Self, SourceError> {
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Ok(Self {
            path: path.to_path_buf(),
            mtime_ns: i64::try_from(mtime.as_nanos()).unwrap_or(i64::MAX),
            size: metadata.len(),
        })
    }

    /// Same path, timestamp, and size.
    pub fn same_version(&self, other: &CacheKey) -> bool {
        self == other
    }
}

/// Cached extraction result for one file version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Language the extractor was asked to parse.
    pub language: Language,
    /// Tags in extractor order.
    pub tags: Vec<Tag>,
}

/// Persistence behind the [`TagCache`].
///
/// `get` must return `Ok(None)` when the stored signature differs from `key`
/// and [`AtlasError::CacheCorruption`] when an entry exists but cannot be
/// decoded.
pub trait CacheStore: Send {
    /// Look up the entry for `key.path`, valid only for `key`'s signature.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AtlasError>;
    /// Replace the entry for `key.path` as a single atomic write.
    fn put(&mut self, key: &CacheKey, entry: &CacheEntry) -> Result<(), AtlasError>;
    /// Remove every entry.
    fn invalidate_all(&mut self) -> Result<(), AtlasError>;
    /// Remove entries whose file no longer exists; returns how many.
    fn prune(&mut self) -> Result<usize, AtlasError>;
    /// Number of stored entries.
    fn len(&self) -> Result<usize, AtlasError>;
    /// Flush and release the store.
    fn close(self: Box<Self>) -> Result<(), AtlasError>;
}

/// SQLite-backed [`CacheStore`], one row per file.
///
/// # Examples
///
/// ```
/// use atlas_repomap::cache::{CacheStore, SqliteStore};
///
/// let store = SqliteStore::in_memory().unwrap();
/// assert_eq!(store.len().unwrap(), 0);
/// ```
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use atlas_repomap::cache::SqliteStore;
    ///
    /// let store = SqliteStore::open(Path::new(".atlas.cache/tags.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, AtlasError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AtlasError::Cache(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| AtlasError::Cache(format!("failed to open database: {e}")))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| AtlasError::Cache(format!("failed to set busy timeout: {e}")))?;
        // Readers stay unblocked while another run writes. Best effort.
        let _ = conn.pragma_update(None, "journal_mode", "WAL");

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if schema creation fails.
    pub fn in_memory() -> Result<Self, AtlasError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            AtlasError::Cache(format!("failed to create in-memory database: {e}"))
        })?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), AtlasError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS tags (
                    path TEXT PRIMARY KEY,
                    mtime_ns INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    language TEXT NOT NULL,
                    tags TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| AtlasError::Cache(format!("failed to create schema: {e}")))?;

        let version: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AtlasError::Cache(format!("failed to read schema version: {e}")))?;

        if version.as_deref() != Some(SCHEMA_VERSION) {
            if version.is_some() {
                debug!(?version, "cache schema changed, dropping entries");
            }
            self.conn
                .execute("DELETE FROM tags", [])
                .map_err(|e| AtlasError::Cache(format!("failed to reset cache: {e}")))?;
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION],
                )
                .map_err(|e| AtlasError::Cache(format!("failed to write schema version: {e}")))?;
        }
        Ok(())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AtlasError> {
        let row: Option<(i64, i64, String, String)> = self
            .conn
            .query_row(
                "SELECT mtime_ns, size, language, tags FROM tags WHERE path = ?1",
                params![path_key(&key.path)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| AtlasError::Cache(format!("failed to read entry: {e}")))?;

        let Some((mtime_ns, size, language, tags)) = row else {
            return Ok(None);
        };
        if mtime_ns != key.mtime_ns || size != key.size as i64 {
            return Ok(None);
        }

        let corrupt = |reason: String| AtlasError::CacheCorruption {
            path: key.path.clone(),
            reason,
        };
        let language: Language = serde_json::from_value(serde_json::Value::String(language))
            .map_err(|e| corrupt(format!("bad language: {e}")))?;
        let tags: Vec<Tag> =
            serde_json::from_str(&tags).map_err(|e| corrupt(format!("bad tag payload: {e}")))?;
        Ok(Some(CacheEntry { language, tags }))
    }

    fn put(&mut self, key: &CacheKey, entry: &CacheEntry) -> Result<(), AtlasError> {
        let tags = serde_json::to_string(&entry.tags)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO tags (path, mtime_ns, size, language, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    path_key(&key.path),
                    key.mtime_ns,
                    key.size as i64,
                    entry.language.name(),
                    tags
                ],
            )
            .map_err(|e| AtlasError::Cache(format!("failed to write entry: {e}")))?;
        Ok(())
    }

    fn invalidate_all(&mut self) -> Result<(), AtlasError> {
        self.conn
            .execute("DELETE FROM tags", [])
            .map_err(|e| AtlasError::Cache(format!("failed to clear cache: {e}")))?;
        Ok(())
    }

    fn prune(&mut self) -> Result<usize, AtlasError> {
        let paths: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare("SELECT path FROM tags")
                .map_err(|e| AtlasError::Cache(format!("failed to list entries: {e}")))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| AtlasError::Cache(format!("failed to list entries: {e}")))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        let tx = self
            .conn
            .transaction()
            .map_err(|e| AtlasError::Cache(format!("failed to begin prune: {e}")))?;
        let mut removed = 0;
        for path in paths.iter().filter(|p| !Path::new(p).exists()) {
            removed += tx
                .execute("DELETE FROM tags WHERE path = ?1", params![path])
                .map_err(|e| AtlasError::Cache(format!("failed to prune entry: {e}")))?;
        }
        tx.commit()
            .map_err(|e| AtlasError::Cache(format!("failed to commit prune: {e}")))?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize, AtlasError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
            .map_err(|e| AtlasError::Cache(format!("failed to count entries: {e}")))?;
        Ok(count as usize)
    }

    fn close(self: Box<Self>) -> Result<(), AtlasError> {
        self.conn
            .close()
            .map_err(|(_, e)| AtlasError::Cache(format!("failed to close database: {e}")))
    }
}

/// Process-local [`CacheStore`], used with `--no-cache` and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<PathBuf, (CacheKey, CacheEntry)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, AtlasError> {
        Ok(self
            .entries
            .get(&key.path)
            .filter(|(stored, _)| stored.same_version(key))
            .map(|(_, entry)| entry.clone()))
    }

    fn put(&mut self, key: &CacheKey, entry: &CacheEntry) -> Result<(), AtlasError> {
        self.entries
            .insert(key.path.clone(), (key.clone(), entry.clone()));
        Ok(())
    }

    fn invalidate_all(&mut self) -> Result<(), AtlasError> {
        self.entries.clear();
        Ok(())
    }

    fn prune(&mut self) -> Result<usize, AtlasError> {
        let before = self.entries.len();
        self.entries.retain(|path, _| path.exists());
        Ok(before - self.entries.len())
    }

    fn len(&self) -> Result<usize, AtlasError> {
        Ok(self.entries.len())
    }

    fn close(self: Box<Self>) -> Result<(), AtlasError> {
        Ok(())
    }
}

/// File name of the SQLite store inside the cache directory.
pub const CACHE_DB_NAME: &str = "tags.db";

/// Open the store described by `config`, relative to `root`.
///
/// A disabled cache, or one whose database cannot be opened, yields a
/// [`MemoryStore`]; the latter is logged.
pub fn open_store(root: &Path, config: &CacheConfig) -> Box<dyn CacheStore> {
    if !config.enabled {
        return Box::new(MemoryStore::new());
    }
    let path = root.join(&config.dir).join(CACHE_DB_NAME);
    match SqliteStore::open(&path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "tag cache unavailable, continuing without it");
            Box::new(MemoryStore::new())
        }
    }
}

/// Counters for one [`TagCache`] lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub corrupt: usize,
    /// Extractor invocations (misses plus forced refreshes).
    pub extractions: usize,
    pub failures: usize,
}

/// A file requested for the map, with its priority tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub tier: Tier,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>, tier: Tier) -> Self {
        Self {
            path: path.into(),
            tier,
        }
    }
}

/// Extraction front-end with a persistent per-file cache.
///
/// Lifecycle: construct with a store, call [`TagCache::get_tags`] or
/// [`TagCache::load`] any number of times, then [`TagCache::close`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use atlas_repomap::cache::{MemoryStore, TagCache};
/// use atlas_repomap::extractor::TreeSitterExtractor;
///
/// let cache = TagCache::new(".", Box::new(MemoryStore::new()), Arc::new(TreeSitterExtractor));
/// assert_eq!(cache.stats().hits, 0);
/// cache.close().unwrap();
/// ```
pub struct TagCache {
    root: PathBuf,
    store: Box<dyn CacheStore>,
    extractor: Arc<dyn TagExtractor>,
    stats: CacheStats,
}

/// Per-file state between the lookup and extraction phases of a load.
struct Pending {
    input: InputFile,
    rel: PathBuf,
    language: Language,
    content: String,
    key: Option<CacheKey>,
    tags: Option<Vec<Tag>>,
}

impl TagCache {
    /// Create a cache whose tag paths are reported relative to `root`.
    pub fn new(
        root: impl AsRef<Path>,
        store: Box<dyn CacheStore>,
        extractor: Arc<dyn TagExtractor>,
    ) -> Self {
        Self {
            root: walker::absolute(root.as_ref()),
            store,
            extractor,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Tags for a single file, extracting only when the cache is stale.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if the file cannot be read or tagged. Store
    /// failures are logged and degrade to an uncached extraction.
    pub fn get_tags(&mut self, path: &Path) -> Result<Vec<Tag>, ExtractError> {
        let path = walker::absolute(path);
        let rel = self.relative(&path);
        let key = CacheKey::for_file(&path)?;
        if let Some(tags) = self.lookup(&key, &rel) {
            return Ok(tags);
        }
        let content = walker::read_source(&path)?;
        let language = Language::from_path(&path);
        self.stats.extractions += 1;
        match self.extractor.extract(&rel, &content, language) {
            Ok(tags) => {
                self.store_entry(&key, language, &tags);
                Ok(tags)
            }
            Err(e) => {
                self.stats.failures += 1;
                Err(e)
            }
        }
    }

    /// Read and tag every input, extracting cache misses in parallel.
    ///
    /// Per-file failures never abort the load: the file comes back tag-less
    /// (with empty content if it could not be read) and a
    /// [`MapWarning::ExtractionFailed`] is returned alongside. With
    /// `force_refresh`, every file is re-extracted and its entry overwritten.
    pub fn load(
        &mut self,
        inputs: &[InputFile],
        force_refresh: bool,
    ) -> (Vec<CorpusFile>, Vec<MapWarning>) {
        let mut warnings = Vec::new();
        let mut pending = Vec::with_capacity(inputs.len());

        for input in inputs {
            let abs = walker::absolute(&input.path);
            let rel = self.relative(&abs);
            let language = Language::from_path(&abs);
            let mut item = Pending {
                input: InputFile::new(abs.clone(), input.tier),
                rel,
                language,
                content: String::new(),
                key: None,
                tags: None,
            };

            let read = CacheKey::for_file(&abs)
                .and_then(|key| walker::read_source(&abs).map(|content| (key, content)));
            match read {
                Ok((key, content)) => {
                    item.content = content;
                    if !force_refresh {
                        item.tags = self.lookup(&key, &item.rel);
                    }
                    item.key = Some(key);
                }
                Err(e) => {
                    self.stats.failures += 1;
                    warn!(path = %item.rel.display(), error = %e, "skipping unreadable file");
                    warnings.push(MapWarning::ExtractionFailed {
                        path: item.rel.clone(),
                        reason: ExtractError::from(e).to_string(),
                    });
                    item.tags = Some(Vec::new());
                }
            }
            pending.push(item);
        }

        let extractor = Arc::clone(&self.extractor);
        let extracted: Vec<Option<Result<Vec<Tag>, ExtractError>>> = pending
            .par_iter()
            .map(|item| {
                if item.tags.is_some() {
                    return None;
                }
                Some(extractor.extract(&item.rel, &item.content, item.language))
            })
            .collect();

        let mut files = Vec::with_capacity(pending.len());
        for (mut item, result) in pending.into_iter().zip(extracted) {
            if let Some(result) = result {
                self.stats.extractions += 1;
                match result {
                    Ok(tags) => {
                        if let Some(key) = &item.key {
                            self.store_entry(key, item.language, &tags);
                        }
                        item.tags = Some(tags);
                    }
                    Err(e) => {
                        self.stats.failures += 1;
                        warn!(path = %item.rel.display(), error = %e, "tag extraction failed");
                        warnings.push(MapWarning::ExtractionFailed {
                            path: item.rel.clone(),
                            reason: e.to_string(),
                        });
                        item.tags = Some(Vec::new());
                    }
                }
            }

            files.push(CorpusFile {
                path: item.rel,
                abs_path: item.input.path,
                tier: item.input.tier,
                language: item.language,
                content: item.content,
                tags: item.tags.unwrap_or_default(),
            });
        }

        debug!(
            hits = self.stats.hits,
            misses = self.stats.misses,
            extractions = self.stats.extractions,
            "tag cache load finished"
        );
        (files, warnings)
    }

    fn lookup(&mut self, key: &CacheKey, rel: &Path) -> Option<Vec<Tag>> {
        match self.store.get(key) {
            Ok(Some(entry)) => {
                self.stats.hits += 1;
                debug!(path = %rel.display(), "tag cache hit");
                let mut tags = entry.tags;
                // The root may differ from the run that filled the entry.
                for tag in tags.iter_mut().filter(|t| t.file != rel) {
                    tag.file = rel.to_path_buf();
                }
                Some(tags)
            }
            Ok(None) => {
                self.stats.misses += 1;
                None
            }
            Err(e) => {
                self.stats.misses += 1;
                self.stats.corrupt += 1;
                warn!(path = %rel.display(), error = %e, "ignoring unusable cache entry");
                None
            }
        }
    }

    fn store_entry(&mut self, key: &CacheKey, language: Language, tags: &[Tag]) {
        let entry = CacheEntry {
            language,
            tags: tags.to_vec(),
        };
        if let Err(e) = self.store.put(key, &entry) {
            warn!(path = %key.path.display(), error = %e, "failed to write cache entry");
        }
    }

    /// Drop every cached entry.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the store cannot be cleared.
    pub fn clear(&mut self) -> Result<(), AtlasError> {
        self.store.invalidate_all()
    }

    /// Drop entries for files that no longer exist.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the store cannot be pruned.
    pub fn prune(&mut self) -> Result<usize, AtlasError> {
        self.store.prune()
    }

    /// Number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the store cannot be queried.
    pub fn len(&self) -> Result<usize, AtlasError> {
        self.store.len()
    }

    /// Flush and close the underlying store.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the store fails to close cleanly.
    pub fn close(self) -> Result<(), AtlasError> {
        self.store.close()
    }
}
