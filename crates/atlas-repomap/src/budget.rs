//! Fitting the ranked map into a token budget.

use std::collections::HashMap;
use std::path::Path;

use atlas_core::{AtlasError, Tier};
use tracing::debug;

use crate::measure::TokenMeasurer;
use crate::rank::{RankedDefinition, Ranking};
use crate::render::Selection;

/// One candidate entry beyond the floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapItem<'a> {
    Definition(&'a RankedDefinition),
    /// A file without definitions, listed by path.
    File(&'a Path),
}

/// Ordered inclusion candidates for one ranking.
///
/// The floor (every chat-tier definition) is always included; the first `k`
/// items are added on top of it. Items are the remaining definitions in rank
/// order, then files without definitions in file-rank order.
///
/// # Examples
///
/// ```
/// use atlas_repomap::budget::MapPlan;
/// use atlas_repomap::rank::Ranking;
///
/// let ranking = Ranking::default();
/// let plan = MapPlan::new(&ranking);
/// assert_eq!(plan.len(), 0);
/// assert_eq!(plan.min_k(), 0);
/// assert!(plan.selection(0).definitions.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct MapPlan<'a> {
    floor: Vec<&'a RankedDefinition>,
    items: Vec<MapItem<'a>>,
    has_tier_files: bool,
}

impl<'a> MapPlan<'a> {
    pub fn new(ranking: &'a Ranking) -> Self {
        let (floor, rest): (Vec<_>, Vec<_>) = ranking
            .definitions
            .iter()
            .partition(|d| d.tier == Tier::Chat);

        let mut items: Vec<MapItem<'a>> = rest.into_iter().map(MapItem::Definition).collect();
        // Tier files are always shown by the renderer.
        items.extend(
            ranking
                .files
                .iter()
                .filter(|f| !f.has_definitions && f.tier == Tier::Other)
                .map(|f| MapItem::File(f.path.as_path())),
        );
        let has_tier_files = ranking.files.iter().any(|f| f.tier != Tier::Other);
        Self {
            floor,
            items,
            has_tier_files,
        }
    }

    /// Number of items beyond the floor.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn floor(&self) -> &[&'a RankedDefinition] {
        &self.floor
    }

    pub fn items(&self) -> &[MapItem<'a>] {
        &self.items
    }

    /// Smallest `k` worth rendering.
    ///
    /// Zero whenever the floor renders something on its own: chat-tier
    /// definitions, or the headers of chat and mentioned files. Otherwise one
    /// item, so the map is never empty.
    pub fn min_k(&self) -> usize {
        let floor_renders = !self.floor.is_empty() || self.has_tier_files;
        usize::from(!floor_renders && !self.items.is_empty())
    }

    /// The floor plus the first `k` items.
    pub fn selection(&self, k: usize) -> Selection<'a> {
        let mut selection = Selection {
            definitions: self.floor.clone(),
            files: Vec::new(),
        };
        for item in self.items.iter().take(k) {
            match *item {
                MapItem::Definition(def) => selection.definitions.push(def),
                MapItem::File(path) => selection.files.push(path),
            }
        }
        selection
    }
}

/// The chosen rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetResult {
    pub text: String,
    pub tokens: usize,
    /// Items included beyond the floor.
    pub k: usize,
    pub within_budget: bool,
    /// Distinct renderings measured.
    pub renders: usize,
}

/// Binary-search the largest `k` in `min_k..=max_k` whose rendering fits
/// `budget` tokens.
///
/// `render(k)` must produce output whose size never shrinks as `k` grows.
/// Each `k` is rendered and measured at most once. When even `min_k` does not
/// fit, that rendering is returned with `within_budget` unset.
///
/// # Errors
///
/// Propagates the first error returned by `render`.
///
/// # Examples
///
/// ```
/// use atlas_repomap::budget::select;
/// use atlas_repomap::measure::HeuristicMeasurer;
///
/// let measurer = HeuristicMeasurer::default();
/// // each k renders 4k characters, i.e. k tokens
/// let result = select(0, 100, 42, &measurer, |k| Ok("abcd".repeat(k))).unwrap();
/// assert_eq!(result.k, 42);
/// assert!(result.within_budget);
/// ```
pub fn select<F>(
    min_k: usize,
    max_k: usize,
    budget: usize,
    measurer: &dyn TokenMeasurer,
    mut render: F,
) -> Result<BudgetResult, AtlasError>
where
    F: FnMut(usize) -> Result<String, AtlasError>,
{
    let max_k = max_k.max(min_k);
    let mut memo: HashMap<usize, (String, usize)> = HashMap::new();
    let mut measure = |k: usize| -> Result<usize, AtlasError> {
        if let Some((_, tokens)) = memo.get(&k) {
            return Ok(*tokens);
        }
        let text = render(k)?;
        let tokens = measurer.measure(&text);
        memo.insert(k, (text, tokens));
        Ok(tokens)
    };

    let floor_tokens = measure(min_k)?;
    let (k, within_budget) = if floor_tokens > budget {
        (min_k, false)
    } else if measure(max_k)? <= budget {
        (max_k, true)
    } else {
        // min_k fits, max_k does not
        let (mut lo, mut hi) = (min_k, max_k - 1);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if measure(mid)? <= budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        (lo, true)
    };

    let renders = memo.len();
    let (text, tokens) = memo.remove(&k).unwrap_or_default();
    debug!(k, tokens, budget, renders, within_budget, "budget search finished");
    Ok(BudgetResult {
        text,
        tokens,
        k,
        within_budget,
        renders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::PathBuf;

    use crate::measure::HeuristicMeasurer;
    use crate::rank::RankedFile;

    /// One token per whitespace-separated word.
    struct WordMeasurer;

    impl TokenMeasurer for WordMeasurer {
        fn measure(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }

        fn model(&self) -> &str {
            "words"
        }
    }

    fn words(k: usize) -> Result<String, AtlasError> {
        Ok(vec!["w"; 10 + 3 * k].join(" "))
    }

    #[test]
    fn finds_largest_fitting_k() {
        // 10 + 3k <= 50  =>  k = 13
        let result = select(0, 100, 50, &WordMeasurer, words).unwrap();
        assert_eq!(result.k, 13);
        assert_eq!(result.tokens, 49);
        assert!(result.within_budget);
    }

    #[test]
    fn exact_fit_is_accepted() {
        // 10 + 3 * 10 = 40
        let result = select(0, 100, 40, &WordMeasurer, words).unwrap();
        assert_eq!(result.k, 10);
        assert_eq!(result.tokens, 40);
    }

    #[test]
    fn everything_fits() {
        let result = select(0, 5, 1000, &WordMeasurer, words).unwrap();
        assert_eq!(result.k, 5);
        assert_eq!(result.renders, 2);
    }

    #[test]
    fn floor_over_budget_is_flagged() {
        let result = select(1, 100, 5, &WordMeasurer, words).unwrap();
        assert!(!result.within_budget);
        assert_eq!(result.k, 1);
        assert_eq!(result.tokens, 13);
        assert_eq!(result.renders, 1);
    }

    #[test]
    fn each_k_is_rendered_once() {
        let calls = Cell::new(0);
        let seen = std::cell::RefCell::new(Vec::new());
        let result = select(0, 1000, 1234, &WordMeasurer, |k| {
            calls.set(calls.get() + 1);
            seen.borrow_mut().push(k);
            words(k)
        })
        .unwrap();
        assert_eq!(result.k, 408);
        let mut distinct = seen.borrow().clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), calls.get());
        assert_eq!(result.renders, calls.get());
        // logarithmic in the candidate count
        assert!(calls.get() <= 14, "{} renders", calls.get());
    }

    #[test]
    fn render_errors_propagate() {
        let err = select(0, 10, 10, &HeuristicMeasurer::default(), |_| {
            Err(AtlasError::Parse("boom".into()))
        })
        .unwrap_err();
        assert!(matches!(err, AtlasError::Parse(_)));
    }

    fn def(file: &str, tier: Tier, score: f64) -> RankedDefinition {
        RankedDefinition {
            file: PathBuf::from(file),
            symbol: "f".into(),
            line: 1,
            score,
            tier,
            category: None,
            signature: None,
        }
    }

    #[test]
    fn plan_puts_chat_definitions_in_floor() {
        let ranking = Ranking {
            definitions: vec![
                def("b.py", Tier::Other, 0.5),
                def("chat.py", Tier::Chat, 0.3),
                def("c.py", Tier::Mentioned, 0.2),
            ],
            files: vec![
                RankedFile {
                    path: PathBuf::from("b.py"),
                    tier: Tier::Other,
                    score: 0.5,
                    has_definitions: true,
                },
                RankedFile {
                    path: PathBuf::from("refs.py"),
                    tier: Tier::Other,
                    score: 0.1,
                    has_definitions: false,
                },
                RankedFile {
                    path: PathBuf::from("chat_notes.py"),
                    tier: Tier::Chat,
                    score: 0.1,
                    has_definitions: false,
                },
            ],
            iterations: 1,
            converged: true,
        };

        let plan = MapPlan::new(&ranking);
        assert_eq!(plan.floor().len(), 1);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.min_k(), 0);
        assert_eq!(plan.items()[2], MapItem::File(Path::new("refs.py")));

        let selection = plan.selection(2);
        let files: Vec<_> = selection.definitions.iter().map(|d| d.file.clone()).collect();
        assert_eq!(
            files,
            vec![PathBuf::from("chat.py"), PathBuf::from("b.py"), PathBuf::from("c.py")]
        );
        assert!(selection.files.is_empty());
        assert_eq!(plan.selection(99).files, vec![Path::new("refs.py")]);
    }

    #[test]
    fn empty_floor_starts_at_one_item() {
        let ranking = Ranking {
            definitions: vec![def("b.py", Tier::Other, 1.0)],
            ..Ranking::default()
        };
        assert_eq!(MapPlan::new(&ranking).min_k(), 1);
    }

    #[test]
    fn mentioned_file_header_is_a_floor() {
        let ranking = Ranking {
            definitions: vec![def("m.py", Tier::Mentioned, 1.0)],
            files: vec![RankedFile {
                path: PathBuf::from("m.py"),
                tier: Tier::Mentioned,
                score: 1.0,
                has_definitions: true,
            }],
            ..Ranking::default()
        };
        let plan = MapPlan::new(&ranking);
        assert!(plan.floor().is_empty());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.min_k(), 0);
    }
}
