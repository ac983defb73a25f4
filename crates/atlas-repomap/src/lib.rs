//! Ranked, token-budgeted repository maps.
//!
//! The pipeline reads every input file once, extracts definition and
//! reference tags (through a persistent [`cache::TagCache`]), links files
//! that reference each other's symbols into a [`graph::ReferenceGraph`],
//! ranks files with personalized PageRank and splits each file's score over
//! its definitions ([`rank`]), then binary-searches how many top-ranked
//! definitions can be rendered within the token budget ([`budget`],
//! [`render`]).

pub mod budget;
pub mod cache;
pub mod corpus;
pub mod extractor;
pub mod graph;
pub mod measure;
pub mod rank;
pub mod render;
pub mod tags;
pub mod walker;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atlas_core::{AtlasConfig, AtlasError, OutputFormat, Tier};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::budget::MapPlan;
use crate::cache::{CacheStats, InputFile, TagCache};
use crate::corpus::Corpus;
use crate::extractor::TreeSitterExtractor;
use crate::graph::{GraphStats, ReferenceGraph};
use crate::measure::{TiktokenMeasurer, TokenMeasurer};
use crate::render::RenderOptions;

/// Something that went wrong without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MapWarning {
    /// The file could not be read or tagged; it is mapped tag-less.
    ExtractionFailed { path: PathBuf, reason: String },
    /// Even the minimal map exceeds the budget.
    OverBudget { tokens: usize, budget: usize },
}

impl fmt::Display for MapWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapWarning::ExtractionFailed { path, reason } => {
                write!(f, "{}: {reason}", path.display())
            }
            MapWarning::OverBudget { tokens, budget } => {
                write!(f, "map needs {tokens} tokens, over the budget of {budget}")
            }
        }
    }
}

/// Inputs for one map.
///
/// # Examples
///
/// ```
/// use atlas_core::Tier;
/// use atlas_repomap::MapRequest;
///
/// let request = MapRequest::new(2048)
///     .add_files(["src/lib.rs", "src/main.rs"], Tier::Other)
///     .add_files(["src/main.rs"], Tier::Chat)
///     .mention("Parser");
/// assert_eq!(request.files.len(), 3);
/// assert!(request.mentioned_idents.contains("Parser"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRequest {
    /// Files with their tiers; a path listed twice keeps its highest tier.
    pub files: Vec<InputFile>,
    pub mentioned_idents: BTreeSet<String>,
    pub max_tokens: usize,
    pub format: OutputFormat,
    /// Re-extract every file and overwrite its cache entry.
    pub force_refresh: bool,
}

impl MapRequest {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            files: Vec::new(),
            mentioned_idents: BTreeSet::new(),
            max_tokens,
            format: OutputFormat::Text,
            force_refresh: false,
        }
    }

    pub fn add_files<I, P>(mut self, paths: I, tier: Tier) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files
            .extend(paths.into_iter().map(|p| InputFile::new(p, tier)));
        self
    }

    pub fn mention(mut self, ident: impl Into<String>) -> Self {
        self.mentioned_idents.insert(ident.into());
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }
}

/// Counters describing one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStats {
    pub files: usize,
    pub definitions: usize,
    /// Items rendered beyond the chat-tier floor.
    pub selected: usize,
    pub tokens: usize,
    pub budget: usize,
    pub renders: usize,
    pub pagerank_iterations: usize,
    pub graph: GraphStats,
    pub cache: CacheStats,
}

/// A rendered map. Fatal problems are reported as `Err` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOutcome {
    pub text: String,
    /// Unset when even the minimal map exceeds the budget.
    pub within_budget: bool,
    pub warnings: Vec<MapWarning>,
    pub stats: MapStats,
}

/// The map pipeline with its tag cache and token measurer.
///
/// # Examples
///
/// ```no_run
/// use atlas_core::{AtlasConfig, Tier};
/// use atlas_repomap::{MapRequest, RepoMap};
///
/// let mut repomap = RepoMap::open(".", AtlasConfig::default()).unwrap();
/// let request = MapRequest::new(1024).add_files(["src/lib.rs"], Tier::Chat);
/// let outcome = repomap.generate(&request).unwrap();
/// println!("{}", outcome.text);
/// repomap.close().unwrap();
/// ```
pub struct RepoMap {
    config: AtlasConfig,
    cache: TagCache,
    measurer: Box<dyn TokenMeasurer>,
}

impl RepoMap {
    pub fn new(config: AtlasConfig, cache: TagCache, measurer: Box<dyn TokenMeasurer>) -> Self {
        Self {
            config,
            cache,
            measurer,
        }
    }

    /// Set up the default collaborators for `root`: the store from
    /// `config.cache`, tree-sitter extraction, and a tiktoken measurer for
    /// `config.map.model`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Config`] if no tokenizer can be loaded.
    pub fn open(root: impl AsRef<Path>, config: AtlasConfig) -> Result<Self, AtlasError> {
        let root = root.as_ref();
        let store = cache::open_store(root, &config.cache);
        let cache = TagCache::new(root, store, Arc::new(TreeSitterExtractor));
        let measurer = TiktokenMeasurer::new(&config.map.model)?;
        Ok(Self::new(config, cache, Box::new(measurer)))
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TagCache {
        &mut self.cache
    }

    /// Build the map for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::EmptyCorpus`] when there is nothing to map: no
    /// input files, or only files that are both tag-less and empty. Per-file
    /// failures and an exceeded budget are reported in
    /// [`MapOutcome::warnings`] instead.
    pub fn generate(&mut self, request: &MapRequest) -> Result<MapOutcome, AtlasError> {
        let inputs = merge_tiers(&request.files);
        if inputs.is_empty() {
            return Err(AtlasError::EmptyCorpus);
        }

        let (files, mut warnings) = self.cache.load(&inputs, request.force_refresh);
        let corpus = Corpus::new(files)?;
        let has_chat_files = corpus.files_in_tier(Tier::Chat).next().is_some();
        let token_budget = self.config.map.budget_for(request.max_tokens, has_chat_files);

        let ranking_config = &self.config.ranking;
        let graph = ReferenceGraph::build(&corpus, &request.mentioned_idents, ranking_config);
        let ranking = rank::rank(&graph, &graph.personalization(), ranking_config);

        let plan = MapPlan::new(&ranking);
        let options = RenderOptions::from_config(&self.config.map, request.format);
        let result = budget::select(
            plan.min_k(),
            plan.len(),
            token_budget,
            self.measurer.as_ref(),
            |k| render::render(&plan.selection(k), &corpus, &options),
        )?;

        if !result.within_budget {
            warn!(tokens = result.tokens, budget = token_budget, "map exceeds the token budget");
            warnings.push(MapWarning::OverBudget {
                tokens: result.tokens,
                budget: token_budget,
            });
        }

        let stats = MapStats {
            files: corpus.len(),
            definitions: ranking.definitions.len(),
            selected: result.k,
            tokens: result.tokens,
            budget: token_budget,
            renders: result.renders,
            pagerank_iterations: ranking.iterations,
            graph: graph.stats(),
            cache: self.cache.stats(),
        };
        info!(
            files = stats.files,
            definitions = stats.definitions,
            tokens = stats.tokens,
            "map generated"
        );

        Ok(MapOutcome {
            text: result.text,
            within_budget: result.within_budget,
            warnings,
            stats,
        })
    }

    /// Close the tag cache.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Cache`] if the store fails to close cleanly.
    pub fn close(self) -> Result<(), AtlasError> {
        self.cache.close()
    }
}

/// Collapse duplicate paths, keeping the highest tier; order is by path.
fn merge_tiers(files: &[InputFile]) -> Vec<InputFile> {
    let mut merged: BTreeMap<PathBuf, Tier> = BTreeMap::new();
    for file in files {
        let tier = merged.entry(walker::absolute(&file.path)).or_default();
        *tier = (*tier).max(file.tier);
    }
    merged
        .into_iter()
        .map(|(path, tier)| InputFile::new(path, tier))
        .collect()
}

/// Discover the files under `root`, add them to `request` as
/// [`Tier::Other`], and build the map in one call.
///
/// `paths` (files or directories, relative to the working directory) default
/// to `root`. Chat and mentioned files already in `request` keep their tier
/// even when discovery skips them.
///
/// # Errors
///
/// Returns [`AtlasError`] if discovery fails, no tokenizer can be loaded, or
/// the corpus is empty.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use atlas_core::{AtlasConfig, Tier};
/// use atlas_repomap::{generate_map, MapRequest};
///
/// let config = AtlasConfig::default();
/// let request = MapRequest::new(config.map.max_tokens)
///     .add_files(["src/lib.rs"], Tier::Chat)
///     .mention("Parser");
/// let outcome = generate_map(Path::new("."), &[], request, &config).unwrap();
/// println!("{}", outcome.text);
/// ```
pub fn generate_map(
    root: &Path,
    paths: &[PathBuf],
    request: MapRequest,
    config: &AtlasConfig,
) -> Result<MapOutcome, AtlasError> {
    let roots = if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        let cwd = std::env::current_dir()?;
        paths.iter().map(|p| cwd.join(p)).collect()
    };
    let discovered = walker::discover(root, &roots, &config.walk)?;
    debug!(files = discovered.len(), "discovered files");
    let request = request.add_files(discovered, Tier::Other);

    let mut repomap = RepoMap::open(root, config.clone())?;
    let outcome = repomap.generate(&request)?;
    repomap.close()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_highest_tier() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        std::fs::write(&a, "").unwrap();
        std::fs::write(&b, "").unwrap();

        let merged = merge_tiers(&[
            InputFile::new(&b, Tier::Other),
            InputFile::new(&a, Tier::Chat),
            InputFile::new(&b, Tier::Mentioned),
            InputFile::new(&a, Tier::Other),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].tier, Tier::Chat);
        assert_eq!(merged[1].tier, Tier::Mentioned);
    }

    #[test]
    fn warnings_display() {
        let w = MapWarning::ExtractionFailed {
            path: PathBuf::from("a.py"),
            reason: "parse error".into(),
        };
        assert_eq!(w.to_string(), "a.py: parse error");
        let w = MapWarning::OverBudget {
            tokens: 20,
            budget: 10,
        };
        assert!(w.to_string().contains("20"));
    }
}
