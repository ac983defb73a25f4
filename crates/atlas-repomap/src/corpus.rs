//! The set of files taking part in one map run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use atlas_core::{AtlasError, Tier};

use crate::tags::Tag;
use crate::walker::Language;

/// One input file after reading and tag extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusFile {
    /// Path relative to the repository root; the file's identity in the map.
    pub path: PathBuf,
    pub abs_path: PathBuf,
    pub tier: Tier,
    pub language: Language,
    /// Full text, empty when the file could not be read.
    pub content: String,
    pub tags: Vec<Tag>,
}

impl CorpusFile {
    pub fn definitions(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|t| t.is_definition())
    }

    pub fn references(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|t| !t.is_definition())
    }

    pub fn has_definitions(&self) -> bool {
        self.definitions().next().is_some()
    }

    /// Source lines (without terminators).
    pub fn lines(&self) -> Vec<&str> {
        self.content.lines().collect()
    }
}

/// Files keyed and ordered by relative path.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_core::Tier;
/// use atlas_repomap::corpus::{Corpus, CorpusFile};
/// use atlas_repomap::tags::{SyntaxCategory, Tag};
/// use atlas_repomap::walker::Language;
///
/// let file = CorpusFile {
///     path: PathBuf::from("a.py"),
///     abs_path: PathBuf::from("/repo/a.py"),
///     tier: Tier::Chat,
///     language: Language::Python,
///     content: "def foo():\n    pass\n".into(),
///     tags: vec![Tag::definition("a.py", "foo", 1, SyntaxCategory::Function)],
/// };
/// let corpus = Corpus::new(vec![file]).unwrap();
/// assert_eq!(corpus.len(), 1);
/// assert_eq!(corpus.tier(std::path::Path::new("a.py")), Some(Tier::Chat));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    files: BTreeMap<PathBuf, CorpusFile>,
}

impl Corpus {
    /// Build a corpus, merging duplicate paths into their highest tier.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::EmptyCorpus`] if there are no files, or if every
    /// file is both tag-less and empty.
    pub fn new(files: Vec<CorpusFile>) -> Result<Self, AtlasError> {
        let mut map: BTreeMap<PathBuf, CorpusFile> = BTreeMap::new();
        for file in files {
            match map.get_mut(&file.path) {
                Some(existing) => existing.tier = existing.tier.max(file.tier),
                None => {
                    map.insert(file.path.clone(), file);
                }
            }
        }

        let usable = map
            .values()
            .any(|f| !f.tags.is_empty() || !f.content.is_empty());
        if !usable {
            return Err(AtlasError::EmptyCorpus);
        }
        Ok(Self { files: map })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&CorpusFile> {
        self.files.get(path)
    }

    pub fn tier(&self, path: &Path) -> Option<Tier> {
        self.files.get(path).map(|f| f.tier)
    }

    /// Files in path order.
    pub fn files(&self) -> impl Iterator<Item = &CorpusFile> {
        self.files.values()
    }

    pub fn files_in_tier(&self, tier: Tier) -> impl Iterator<Item = &CorpusFile> {
        self.files.values().filter(move |f| f.tier == tier)
    }
}
