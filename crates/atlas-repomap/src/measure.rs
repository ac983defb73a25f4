//! Token counting for the budget search.

use atlas_core::AtlasError;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Counts tokens for one model.
///
/// Implementations must be deterministic: the same text always measures the
/// same.
pub trait TokenMeasurer: Send + Sync {
    fn measure(&self, text: &str) -> usize;

    /// Model identifier the measurer was built for.
    fn model(&self) -> &str;
}

/// BPE token counter backed by `tiktoken-rs`.
///
/// Models tiktoken does not know fall back to `cl100k_base`.
///
/// # Examples
///
/// ```no_run
/// use atlas_repomap::measure::{TiktokenMeasurer, TokenMeasurer};
///
/// let measurer = TiktokenMeasurer::new("gpt-4").unwrap();
/// assert!(measurer.measure("fn main() {}") > 0);
/// ```
pub struct TiktokenMeasurer {
    model: String,
    bpe: CoreBPE,
}

impl TiktokenMeasurer {
    /// Load the tokenizer for `model`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Config`] if no tokenizer can be loaded.
    pub fn new(model: &str) -> Result<Self, AtlasError> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                debug!(model, error = %e, "unknown model, using cl100k_base");
                tiktoken_rs::cl100k_base().map_err(|e| {
                    AtlasError::Config(format!("failed to load cl100k_base tokenizer: {e}"))
                })?
            }
        };
        Ok(Self {
            model: model.to_string(),
            bpe,
        })
    }
}

impl TokenMeasurer for TiktokenMeasurer {
    fn measure(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Offline estimate of roughly four characters per token.
///
/// # Examples
///
/// ```
/// use atlas_repomap::measure::{HeuristicMeasurer, TokenMeasurer};
///
/// let measurer = HeuristicMeasurer::new("gpt-4");
/// assert_eq!(measurer.measure(""), 0);
/// assert_eq!(measurer.measure("abcd"), 1);
/// assert_eq!(measurer.measure("abcde"), 2);
/// ```
#[derive(Debug, Clone)]
pub struct HeuristicMeasurer {
    model: String,
}

impl HeuristicMeasurer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for HeuristicMeasurer {
    fn default() -> Self {
        Self::new("heuristic")
    }
}

impl TokenMeasurer for HeuristicMeasurer {
    fn measure(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
