//! Personalized PageRank over the reference graph, and redistribution of
//! file scores onto individual definitions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use atlas_core::{RankingConfig, Tier};
use serde::Serialize;
use tracing::debug;

use crate::graph::ReferenceGraph;
use crate::tags::SyntaxCategory;

/// A definition with its share of the owning file's importance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDefinition {
    pub file: PathBuf,
    pub symbol: String,
    pub line: u32,
    pub score: f64,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<SyntaxCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A file's propagated importance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedFile {
    pub path: PathBuf,
    pub tier: Tier,
    /// Zero for files outside the graph.
    pub score: f64,
    pub has_definitions: bool,
}

/// Result of a PageRank run.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRank {
    /// Scores indexed by graph position.
    pub scores: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Output of the ranker, independent of any budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    /// Strictly ordered: score descending, then file, symbol, line.
    pub definitions: Vec<RankedDefinition>,
    /// Graph files by score descending then path, followed by detached files
    /// in path order.
    pub files: Vec<RankedFile>,
    pub iterations: usize,
    pub converged: bool,
}

/// Personalized PageRank.
///
/// `personalization` is both the restart distribution and the starting
/// vector. Mass of nodes without outgoing edges is redistributed along
/// `personalization`. Iterates until the L1 change drops below `tolerance`
/// or `max_iterations` is reached; every iteration reads only the previous
/// iteration's scores. With no edges the personalization vector is returned
/// as is.
///
/// # Examples
///
/// ```
/// use atlas_repomap::rank::pagerank;
///
/// // 0 -> 1
/// let result = pagerank(2, &[(0, 1, 1.0)], &[0.5, 0.5], 0.85, 1e-9, 200);
/// assert!(result.converged);
/// assert!(result.scores[1] > result.scores[0]);
/// assert!((result.scores.iter().sum::<f64>() - 1.0).abs() < 1e-9);
///
/// let still = pagerank(2, &[], &[0.25, 0.75], 0.85, 1e-9, 200);
/// assert_eq!(still.scores, vec![0.25, 0.75]);
/// assert_eq!(still.iterations, 0);
/// ```
pub fn pagerank(
    node_count: usize,
    edges: &[(usize, usize, f64)],
    personalization: &[f64],
    damping: f64,
    tolerance: f64,
    max_iterations: usize,
) -> PageRank {
    let mut scores = personalization.to_vec();
    if edges.is_empty() || node_count == 0 {
        return PageRank {
            scores,
            iterations: 0,
            converged: true,
        };
    }

    let mut out_weight = vec![0.0; node_count];
    for &(from, _, weight) in edges {
        out_weight[from] += weight;
    }

    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        iterations += 1;

        let dangling: f64 = scores
            .iter()
            .zip(&out_weight)
            .filter(|(_, w)| **w <= 0.0)
            .map(|(s, _)| s)
            .sum();

        let mut next = vec![0.0; node_count];
        for &(from, to, weight) in edges {
            next[to] += damping * scores[from] * weight / out_weight[from];
        }
        let restart = damping * dangling + (1.0 - damping);
        for (value, p) in next.iter_mut().zip(personalization) {
            *value += restart * p;
        }

        let delta: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
        scores = next;
        if delta < tolerance {
            converged = true;
            break;
        }
    }

    PageRank {
        scores,
        iterations,
        converged,
    }
}

/// Rank every definition in `graph`.
///
/// Each file's score is split across its definitions in proportion to the
/// inbound weight of the defined symbol (shared evenly by same-named
/// definitions in that file); definitions nobody references weigh
/// `unreferenced_floor` times the smallest referenced weight in the file,
/// so they always rank below referenced ones. The shares of one file always sum to the file's
/// score.
pub fn rank(
    graph: &ReferenceGraph,
    personalization: &[f64],
    config: &RankingConfig,
) -> Ranking {
    let edges: Vec<(usize, usize, f64)> = graph.edges().collect();
    let result = pagerank(
        graph.node_count(),
        &edges,
        personalization,
        config.damping,
        config.tolerance,
        config.max_iterations,
    );
    debug!(
        iterations = result.iterations,
        converged = result.converged,
        "pagerank finished"
    );

    let mut definitions = Vec::new();
    let mut files = Vec::with_capacity(graph.node_count() + graph.detached().len());

    for (position, node) in graph.nodes().enumerate() {
        let file_score = result.scores.get(position).copied().unwrap_or(0.0);
        let defs = graph.definitions(position);
        files.push(RankedFile {
            path: node.path.clone(),
            tier: node.tier,
            score: file_score,
            has_definitions: !defs.is_empty(),
        });
        if defs.is_empty() {
            continue;
        }

        let mut duplicates: BTreeMap<&str, usize> = BTreeMap::new();
        for def in defs {
            *duplicates.entry(def.name.as_str()).or_default() += 1;
        }
        let referenced: Vec<f64> = defs
            .iter()
            .map(|def| graph.inbound_at(position, &def.name) / duplicates[def.name.as_str()] as f64)
            .collect();
        // Unreferenced definitions sit below the weakest referenced one.
        let floor = referenced
            .iter()
            .copied()
            .filter(|&m| m > 0.0)
            .min_by(f64::total_cmp)
            .map_or(config.unreferenced_floor, |least| least * config.unreferenced_floor);
        let masses: Vec<f64> = referenced
            .into_iter()
            .map(|m| if m > 0.0 { m } else { floor })
            .collect();
        let total: f64 = masses.iter().sum();

        for (def, mass) in defs.iter().zip(masses) {
            definitions.push(RankedDefinition {
                file: node.path.clone(),
                symbol: def.name.clone(),
                line: def.line,
                score: file_score * mass / total,
                tier: node.tier,
                category: def.category,
                signature: def.signature.clone(),
            });
        }
    }

    definitions.sort_by(compare_definitions);
    files.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
    files.extend(graph.detached().iter().map(|(path, tier)| RankedFile {
        path: path.clone(),
        tier: *tier,
        score: 0.0,
        has_definitions: false,
    }));

    Ranking {
        definitions,
        files,
        iterations: result.iterations,
        converged: result.converged,
    }
}

fn compare_definitions(a: &RankedDefinition, b: &RankedDefinition) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.file.cmp(&b.file))
        .then_with(|| a.symbol.cmp(&b.symbol))
        .then_with(|| a.line.cmp(&b.line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::Path;

    use crate::corpus::{Corpus, CorpusFile};
    use crate::tags::Tag;
    use crate::walker::Language;

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

    fn def(file: &str, name: &str, line: u32) -> Tag {
        Tag::definition(file, name, line, SyntaxCategory::Function)
    }

    fn rank_files(files: Vec<CorpusFile>, idents: &[&str]) -> (ReferenceGraph, Ranking) {
        let corpus = Corpus::new(files).unwrap();
        let idents: BTreeSet<String> = idents.iter().map(|s| s.to_string()).collect();
        let config = RankingConfig::default();
        let graph = ReferenceGraph::build(&corpus, &idents, &config);
        let ranking = rank(&graph, &graph.personalization(), &config);
        (graph, ranking)
    }

    #[test]
    fn zero_edges_return_personalization() {
        let (graph, ranking) = rank_files(
            vec![
                file("a.py", Tier::Chat, vec![def("a.py", "a", 1)]),
                file("b.py", Tier::Other, vec![def("b.py", "b", 1)]),
            ],
            &[],
        );
        assert_eq!(graph.edge_count(), 0);
        let p = graph.personalization();
        for f in &ranking.files {
            let expected = p[graph.position(&f.path).unwrap()];
            assert_eq!(f.score, expected);
        }
        assert_eq!(ranking.iterations, 0);
    }

    #[test]
    fn chain_flows_to_the_end() {
        let result = pagerank(
            3,
            &[(0, 1, 1.0), (1, 2, 1.0)],
            &[1.0 / 3.0; 3],
            0.85,
            1e-10,
            500,
        );
        assert!(result.scores[2] > result.scores[1]);
        assert!(result.scores[1] > result.scores[0]);
    }

    #[test]
    fn iteration_cap_is_respected() {
        let result = pagerank(2, &[(0, 1, 1.0), (1, 0, 2.0)], &[0.9, 0.1], 0.85, 0.0, 3);
        assert_eq!(result.iterations, 3);
        assert!(!result.converged);
    }

    #[test]
    fn scores_remain_a_distribution_with_dangling_nodes() {
        // node 2 has no outgoing edges
        let result = pagerank(3, &[(0, 2, 1.0), (1, 2, 3.0)], &[0.2, 0.3, 0.5], 0.85, 1e-12, 500);
        assert!((result.scores.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn redistribution_partitions_file_score() {
        let (_, ranking) = rank_files(
            vec![
                file(
                    "a.py",
                    Tier::Other,
                    vec![def("a.py", "foo", 1), def("a.py", "bar", 5), def("a.py", "baz", 9)],
                ),
                file(
                    "b.py",
                    Tier::Other,
                    vec![
                        def("b.py", "main", 1),
                        Tag::reference("b.py", "foo", 2),
                        Tag::reference("b.py", "foo", 3),
                        Tag::reference("b.py", "bar", 4),
                    ],
                ),
            ],
            &[],
        );

        for f in &ranking.files {
            let sum: f64 = ranking
                .definitions
                .iter()
                .filter(|d| d.file == f.path)
                .map(|d| d.score)
                .sum();
            assert!(sum <= f.score * (1.0 + 1e-12), "{}: {sum} > {}", f.path.display(), f.score);
            assert!((sum - f.score).abs() < 1e-12);
        }

        let score = |name: &str| {
            ranking
                .definitions
                .iter()
                .find(|d| d.symbol == name)
                .unwrap()
                .score
        };
        assert!(score("foo") > score("bar"));
        assert!(score("bar") > score("baz"));
        assert!(score("baz") > 0.0, "unreferenced floor");
    }

    #[test]
    fn penalized_reference_still_beats_unreferenced_definition() {
        // `_x` is private and defined in 21 files, so its inbound weight is tiny
        let mut files = vec![
            file("a.py", Tier::Other, vec![def("a.py", "_x", 1), def("a.py", "y", 5)]),
            file("user.py", Tier::Other, vec![Tag::reference("user.py", "_x", 1)]),
        ];
        for i in 0..20 {
            let path = format!("dup_{i:02}.py");
            files.push(file(&path, Tier::Other, vec![def(&path, "_x", 1)]));
        }
        let (graph, ranking) = rank_files(files, &[]);
        assert!(graph.inbound(Path::new("a.py"), "_x") < RankingConfig::default().unreferenced_floor);

        let score = |symbol: &str| {
            ranking
                .definitions
                .iter()
                .find(|d| d.file == Path::new("a.py") && d.symbol == symbol)
                .unwrap()
                .score
        };
        assert!(score("_x") > score("y"), "{} <= {}", score("_x"), score("y"));
        assert!(score("y") > 0.0);
    }

    #[test]
    fn ties_break_on_file_symbol_line() {
        let (_, ranking) = rank_files(
            vec![
                file("b.py", Tier::Other, vec![def("b.py", "x", 3), def("b.py", "x", 1)]),
                file("a.py", Tier::Other, vec![def("a.py", "y", 1), def("a.py", "x", 2)]),
            ],
            &[],
        );
        let order: Vec<(&str, &str, u32)> = ranking
            .definitions
            .iter()
            .map(|d| (d.file.to_str().unwrap(), d.symbol.as_str(), d.line))
            .collect();
        assert_eq!(
            order,
            vec![("a.py", "x", 2), ("a.py", "y", 1), ("b.py", "x", 1), ("b.py", "x", 3)]
        );
    }

    #[test]
    fn referenced_definition_outranks_referencer() {
        let (_, ranking) = rank_files(
            vec![
                file("A.py", Tier::Other, vec![def("A.py", "foo", 1)]),
                file(
                    "B.py",
                    Tier::Other,
                    vec![
                        def("B.py", "main", 1),
                        Tag::reference("B.py", "foo", 2),
                        Tag::reference("B.py", "foo", 3),
                    ],
                ),
            ],
            &[],
        );
        assert_eq!(ranking.definitions[0].symbol, "foo");
        assert_eq!(ranking.files[0].path, Path::new("A.py"));
    }

    #[test]
    fn mentioned_ident_lifts_its_definer() {
        let (_, ranking) = rank_files(
            vec![
                file("C.py", Tier::Other, vec![def("C.py", "bar", 1)]),
                file("D.py", Tier::Other, vec![def("D.py", "qux", 1)]),
                file(
                    "main.py",
                    Tier::Other,
                    vec![Tag::reference("main.py", "bar", 1), Tag::reference("main.py", "qux", 2)],
                ),
            ],
            &["bar"],
        );
        let score = |path: &str| {
            ranking
                .files
                .iter()
                .find(|f| f.path == Path::new(path))
                .unwrap()
                .score
        };
        assert!(score("C.py") > score("D.py"));
    }

    #[test]
    fn detached_files_follow_ranked_ones() {
        let (_, ranking) = rank_files(
            vec![
                file("a.py", Tier::Other, vec![]),
                file("b.py", Tier::Other, vec![def("b.py", "f", 1)]),
            ],
            &[],
        );
        let paths: Vec<_> = ranking.files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("b.py"), PathBuf::from("a.py")]);
        assert_eq!(ranking.files[1].score, 0.0);
    }
}
