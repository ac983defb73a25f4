//! Weighted reference multigraph between files.
//!
//! Every reference occurrence in file `F` to a symbol defined in file `D`
//! (with `D != F`) becomes one `F -> D` edge. Edge weights combine the
//! identifier's multiplier, the referencing file's tier multiplier, a
//! `1 / sqrt(n)` factor for the `n` references to that symbol within `F`,
//! and an even split across the symbol's other definers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use atlas_core::{RankingConfig, Tier};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use tracing::debug;

use crate::corpus::Corpus;
use crate::tags::Tag;

/// A file taking part in ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub path: PathBuf,
    pub tier: Tier,
    /// Unnormalized personalization prior.
    pub prior: f64,
}

/// One reference occurrence pointing at a definer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEdge {
    pub symbol: String,
    pub weight: f64,
}

/// Counters reported alongside the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    /// Reference tags seen in graph files.
    pub references: usize,
    /// References to symbols nobody defines; they add no edge.
    pub dangling_references: usize,
    /// References whose only definer is the referencing file itself.
    pub self_references: usize,
}

/// Directed multigraph of files linked by symbol references.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use std::path::{Path, PathBuf};
/// use atlas_core::{RankingConfig, Tier};
/// use atlas_repomap::corpus::{Corpus, CorpusFile};
/// use atlas_repomap::graph::ReferenceGraph;
/// use atlas_repomap::tags::{SyntaxCategory, Tag};
/// use atlas_repomap::walker::Language;
///
/// let file = |path: &str, tags: Vec<Tag>| CorpusFile {
///     path: PathBuf::from(path),
///     abs_path: PathBuf::from("/repo").join(path),
///     tier: Tier::Other,
///     language: Language::Python,
///     content: "...".into(),
///     tags,
/// };
/// let corpus = Corpus::new(vec![
///     file("a.py", vec![Tag::definition("a.py", "foo", 1, SyntaxCategory::Function)]),
///     file("b.py", vec![Tag::reference("b.py", "foo", 1)]),
/// ])
/// .unwrap();
///
/// let graph = ReferenceGraph::build(&corpus, &BTreeSet::new(), &RankingConfig::default());
/// assert_eq!(graph.node_count(), 2);
/// assert_eq!(graph.edge_count(), 1);
/// assert!(graph.inbound(Path::new("a.py"), "foo") > 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct ReferenceGraph {
    graph: DiGraph<FileNode, ReferenceEdge>,
    index: BTreeMap<PathBuf, NodeIndex>,
    /// Definition tags per node, in file order.
    definitions: Vec<Vec<Tag>>,
    /// Accumulated inbound weight per defined symbol, per node.
    inbound: Vec<BTreeMap<String, f64>>,
    /// Corpus files that are not nodes (tag-less, outside the chat tier).
    detached: Vec<(PathBuf, Tier)>,
    stats: GraphStats,
}

impl ReferenceGraph {
    /// Build the graph for `corpus`.
    ///
    /// Nodes are files with at least one tag plus every chat-tier file.
    /// Tiers come from the corpus; a file whose stem or directory name
    /// equals one of `mentioned_idents` gets the mentioned prior.
    pub fn build(
        corpus: &Corpus,
        mentioned_idents: &BTreeSet<String>,
        config: &RankingConfig,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        let mut definitions = Vec::new();
        let mut inbound: Vec<BTreeMap<String, f64>> = Vec::new();
        let mut detached = Vec::new();
        let mut stats = GraphStats::default();

        for file in corpus.files() {
            if file.tags.is_empty() && file.tier != Tier::Chat {
                detached.push((file.path.clone(), file.tier));
                continue;
            }
            let prior = match file.tier {
                Tier::Chat => config.chat_prior,
                Tier::Mentioned => config.mentioned_prior,
                Tier::Other if path_mentions(&file.path, mentioned_idents) => {
                    config.mentioned_prior
                }
                Tier::Other => config.base_prior,
            };
            let idx = graph.add_node(FileNode {
                path: file.path.clone(),
                tier: file.tier,
                prior,
            });
            index.insert(file.path.clone(), idx);

            let defs: Vec<Tag> = file.definitions().cloned().collect();
            inbound.push(defs.iter().map(|d| (d.name.clone(), 0.0)).collect());
            definitions.push(defs);
        }

        let mut definers: BTreeMap<&str, BTreeSet<NodeIndex>> = BTreeMap::new();
        for (&idx, defs) in index.values().map(|i| (i, &definitions[i.index()])) {
            for def in defs {
                definers.entry(def.name.as_str()).or_default().insert(idx);
            }
        }

        let mut edges = Vec::new();
        for (path, &from) in &index {
            let Some(file) = corpus.get(path) else {
                continue;
            };
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for reference in file.references() {
                *counts.entry(reference.name.as_str()).or_default() += 1;
            }

            let tier_multiplier = match file.tier {
                Tier::Chat => config.chat_file_weight,
                Tier::Mentioned => config.mentioned_file_weight,
                Tier::Other => 1.0,
            };

            for (symbol, count) in counts {
                stats.references += count;
                let Some(owners) = definers.get(symbol) else {
                    stats.dangling_references += count;
                    continue;
                };
                let targets: Vec<NodeIndex> =
                    owners.iter().copied().filter(|&to| to != from).collect();
                if targets.is_empty() {
                    stats.self_references += count;
                    continue;
                }

                let weight = symbol_multiplier(symbol, owners.len(), mentioned_idents, config)
                    * tier_multiplier
                    / (count as f64).sqrt()
                    / targets.len() as f64;

                for _ in 0..count {
                    for &to in &targets {
                        edges.push((from, to, symbol.to_string(), weight));
                    }
                }
            }
        }

        for (from, to, symbol, weight) in edges {
            if let Some(acc) = inbound[to.index()].get_mut(&symbol) {
                *acc += weight;
            }
            graph.add_edge(from, to, ReferenceEdge { symbol, weight });
        }

        stats.nodes = graph.node_count();
        stats.edges = graph.edge_count();
        debug!(
            nodes = stats.nodes,
            edges = stats.edges,
            dangling = stats.dangling_references,
            detached = detached.len(),
            "reference graph built"
        );

        Self {
            graph,
            index,
            definitions,
            inbound,
            detached,
            stats,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn stats(&self) -> GraphStats {
        self.stats
    }

    /// Node position of `path`, usable as an index into score vectors.
    pub fn position(&self, path: &Path) -> Option<usize> {
        self.index.get(path).map(|i| i.index())
    }

    /// Nodes in index order.
    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.graph.node_weights()
    }

    pub fn node(&self, position: usize) -> &FileNode {
        &self.graph[NodeIndex::new(position)]
    }

    /// Every edge as `(source, target, weight)` positions.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), e.weight().weight))
    }

    /// Edges between two files, one per reference occurrence.
    #[cfg(test)]
    pub(crate) fn edges_between(&self, from: &Path, to: &Path) -> Vec<&ReferenceEdge> {
        let (Some(&from), Some(&to)) = (self.index.get(from), self.index.get(to)) else {
            return Vec::new();
        };
        self.graph
            .edges_connecting(from, to)
            .map(|e| e.weight())
            .collect()
    }

    /// Definition tags of the node at `position`.
    pub fn definitions(&self, position: usize) -> &[Tag] {
        &self.definitions[position]
    }

    /// Total inbound weight for `symbol` defined in `path`.
    pub fn inbound(&self, path: &Path, symbol: &str) -> f64 {
        self.position(path)
            .and_then(|p| self.inbound[p].get(symbol))
            .copied()
            .unwrap_or(0.0)
    }

    pub(crate) fn inbound_at(&self, position: usize, symbol: &str) -> f64 {
        self.inbound[position].get(symbol).copied().unwrap_or(0.0)
    }

    /// Corpus files left out of the graph, in path order.
    pub fn detached(&self) -> &[(PathBuf, Tier)] {
        &self.detached
    }

    /// Node priors normalized to sum to 1.
    pub fn personalization(&self) -> Vec<f64> {
        let priors: Vec<f64> = self.graph.node_weights().map(|n| n.prior).collect();
        let total: f64 = priors.iter().sum();
        if priors.is_empty() || total <= 0.0 {
            let n = priors.len().max(1) as f64;
            return vec![1.0 / n; priors.len()];
        }
        priors.into_iter().map(|p| p / total).collect()
    }
}

/// Weight factor contributed by the symbol name itself.
fn symbol_multiplier(
    symbol: &str,
    definer_count: usize,
    mentioned_idents: &BTreeSet<String>,
    config: &RankingConfig,
) -> f64 {
    let mut multiplier = 1.0;
    if mentioned_idents.contains(symbol) {
        multiplier *= config.mentioned_ident_weight;
    }
    if is_deliberate_name(symbol, config.long_ident_min_len) {
        multiplier *= config.long_ident_weight;
    }
    if symbol.starts_with('_') {
        multiplier *= config.private_ident_weight;
    }
    if definer_count > config.generic_def_threshold {
        multiplier *= config.generic_ident_weight;
    }
    multiplier
}

/// Long snake_case, kebab-case or camelCase names are rarely accidental.
fn is_deliberate_name(name: &str, min_len: usize) -> bool {
    if name.chars().count() < min_len {
        return false;
    }
    let has_alpha = name.chars().any(char::is_alphabetic);
    let snake = name.contains('_') && has_alpha;
    let kebab = name.contains('-') && has_alpha;
    let camel = name.chars().any(char::is_uppercase) && name.chars().any(char::is_lowercase);
    snake || kebab || camel
}

/// Whether any directory name or the file stem equals a mentioned identifier.
fn path_mentions(path: &Path, idents: &BTreeSet<String>) -> bool {
    if idents.is_empty() {
        return false;
    }
    let stem = path.file_stem().and_then(|s| s.to_str());
    let dirs = path
        .parent()
        .into_iter()
        .flat_map(|p| p.components())
        .filter_map(|c| c.as_os_str().to_str());
    stem.into_iter().chain(dirs).any(|part| idents.contains(part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusFile;
    use crate::tags::SyntaxCategory;
    use crate::walker::Language;

    fn def(file: &str, name: &str, line: u32) -> Tag {
        Tag::definition(file, name, line, SyntaxCategory::Function)
    }

    fn reference(file: &str, name: &str, line: u32) -> Tag {
        Tag::reference(file, name, line)
    }

    fn file(path: &str, tier: Tier, tags: Vec<Tag>) -> CorpusFile {
        CorpusFile {
            path: PathBuf::from(path),
            abs_path: PathBuf::from("/repo").join(path),
            tier,
            language: Language::Python,
            content: "x".into(),
            tags,
        }
    }

    fn build(files: Vec<CorpusFile>, idents: &[&str]) -> ReferenceGraph {
        let corpus = Corpus::new(files).unwrap();
        let idents = idents.iter().map(|s| s.to_string()).collect();
        ReferenceGraph::build(&corpus, &idents, &RankingConfig::default())
    }

    #[test]
    fn one_edge_per_reference_occurrence() {
        let graph = build(
            vec![
                file("a.py", Tier::Other, vec![def("a.py", "foo", 1)]),
                file(
                    "b.py",
                    Tier::Other,
                    vec![reference("b.py", "foo", 1), reference("b.py", "foo", 2)],
                ),
            ],
            &[],
        );
        let edges = graph.edges_between(Path::new("b.py"), Path::new("a.py"));
        assert_eq!(edges.len(), 2);
        // each occurrence carries 1/sqrt(2); together sqrt(2)
        let total: f64 = edges.iter().map(|e| e.weight).sum();
        assert!((total - 2f64.sqrt()).abs() < 1e-12);
        assert!((graph.inbound(Path::new("a.py"), "foo") - total).abs() < 1e-12);
    }

    #[test]
    fn self_references_and_dangling_add_no_edges() {
        let graph = build(
            vec![file(
                "a.py",
                Tier::Other,
                vec![
                    def("a.py", "foo", 1),
                    reference("a.py", "foo", 3),
                    reference("a.py", "print", 4),
                ],
            )],
            &[],
        );
        assert_eq!(graph.edge_count(), 0);
        let stats = graph.stats();
        assert_eq!(stats.self_references, 1);
        assert_eq!(stats.dangling_references, 1);
        assert_eq!(stats.references, 2);
    }

    #[test]
    fn multiple_definers_split_weight() {
        let graph = build(
            vec![
                file("a.py", Tier::Other, vec![def("a.py", "run", 1)]),
                file("b.py", Tier::Other, vec![def("b.py", "run", 1)]),
                file("c.py", Tier::Other, vec![reference("c.py", "run", 1)]),
            ],
            &[],
        );
        let to_a = graph.edges_between(Path::new("c.py"), Path::new("a.py"));
        let to_b = graph.edges_between(Path::new("c.py"), Path::new("b.py"));
        assert!((to_a[0].weight - 0.5).abs() < 1e-12);
        assert!((to_b[0].weight - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mentioned_ident_and_tier_multiply() {
        let files = || {
            vec![
                file("a.py", Tier::Other, vec![def("a.py", "bar", 1)]),
                file("b.py", Tier::Mentioned, vec![reference("b.py", "bar", 1)]),
            ]
        };
        let plain = build(files(), &[]);
        let mentioned = build(files(), &["bar"]);
        let w_plain = plain.edges_between(Path::new("b.py"), Path::new("a.py"))[0].weight;
        let w_mentioned = mentioned.edges_between(Path::new("b.py"), Path::new("a.py"))[0].weight;
        assert!((w_plain - 10.0).abs() < 1e-12, "mentioned file weight");
        assert!((w_mentioned - 100.0).abs() < 1e-12, "plus mentioned ident");
    }

    #[test]
    fn name_shape_multipliers() {
        let config = RankingConfig::default();
        let none = BTreeSet::new();
        assert_eq!(symbol_multiplier("foo", 1, &none, &config), 1.0);
        assert_eq!(symbol_multiplier("parse_config", 1, &none, &config), 10.0);
        assert_eq!(symbol_multiplier("parseConfig", 1, &none, &config), 10.0);
        assert!((symbol_multiplier("_x", 1, &none, &config) - 0.1).abs() < 1e-12);
        // long private helper: deliberate and private
        assert!((symbol_multiplier("_load_cache", 1, &none, &config) - 1.0).abs() < 1e-12);
        assert!((symbol_multiplier("new", 6, &none, &config) - 0.1).abs() < 1e-12);
        assert_eq!(symbol_multiplier("new", 5, &none, &config), 1.0);
    }

    #[test]
    fn chat_files_are_nodes_even_without_tags() {
        let graph = build(
            vec![
                file("a.py", Tier::Chat, vec![]),
                file("b.py", Tier::Other, vec![]),
                file("c.py", Tier::Other, vec![def("c.py", "f", 1)]),
            ],
            &[],
        );
        assert_eq!(graph.node_count(), 2);
        assert!(graph.position(Path::new("a.py")).is_some());
        assert_eq!(graph.detached(), &[(PathBuf::from("b.py"), Tier::Other)]);
    }

    #[test]
    fn personalization_is_normalized_by_tier() {
        let graph = build(
            vec![
                file("chat.py", Tier::Chat, vec![def("chat.py", "a", 1)]),
                file("mentioned.py", Tier::Mentioned, vec![def("mentioned.py", "b", 1)]),
                file("other.py", Tier::Other, vec![def("other.py", "c", 1)]),
            ],
            &[],
        );
        let p = graph.personalization();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let at = |path: &str| p[graph.position(Path::new(path)).unwrap()];
        assert!((at("chat.py") / at("other.py") - 100.0).abs() < 1e-9);
        assert!((at("mentioned.py") / at("other.py") - 10.0).abs() < 1e-9);
    }

    #[test]
    fn path_matching_mentioned_ident_gets_mentioned_prior() {
        let graph = build(
            vec![
                file("src/parser/mod.py", Tier::Other, vec![def("src/parser/mod.py", "a", 1)]),
                file("src/lexer.py", Tier::Other, vec![def("src/lexer.py", "b", 1)]),
                file("src/util.py", Tier::Other, vec![def("src/util.py", "c", 1)]),
            ],
            &["parser", "lexer"],
        );
        let prior = |path: &str| graph.node(graph.position(Path::new(path)).unwrap()).prior;
        assert_eq!(prior("src/parser/mod.py"), 10.0);
        assert_eq!(prior("src/lexer.py"), 10.0);
        assert_eq!(prior("src/util.py"), 1.0);
    }
}
