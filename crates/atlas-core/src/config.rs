use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AtlasError;

/// Top-level configuration loaded from `.atlas.toml`.
///
/// Supports layered resolution: CLI flags > local config > defaults.
///
/// # Examples
///
/// ```
/// use atlas_core::AtlasConfig;
///
/// let config = AtlasConfig::default();
/// assert_eq!(config.map.max_tokens, 1024);
/// assert_eq!(config.ranking.mentioned_ident_weight, 10.0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    /// Rendering and budget settings.
    #[serde(default)]
    pub map: MapConfig,
    /// Graph weighting and PageRank tuning.
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Tag cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// File discovery settings.
    #[serde(default)]
    pub walk: WalkConfig,
}

impl AtlasConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Io`] if the file cannot be read,
    /// [`AtlasError::Toml`] if the content is not valid TOML, or
    /// [`AtlasError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use atlas_core::AtlasConfig;
    /// use std::path::Path;
    ///
    /// let config = AtlasConfig::from_file(Path::new(".atlas.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, AtlasError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Toml`] if parsing fails, or
    /// [`AtlasError::Config`] if validation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlas_core::AtlasConfig;
    ///
    /// let toml = r#"
    /// [map]
    /// max_tokens = 2048
    /// "#;
    /// let config = AtlasConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.map.max_tokens, 2048);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, AtlasError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), AtlasError> {
        if self.map.no_chat_multiplier == 0 {
            return Err(AtlasError::Config(
                "map.no_chat_multiplier must be at least 1".into(),
            ));
        }
        let r = &self.ranking;
        if !(0.0..1.0).contains(&r.damping) {
            return Err(AtlasError::Config(format!(
                "ranking.damping must be in [0, 1), got {}",
                r.damping
            )));
        }
        if r.max_iterations == 0 {
            return Err(AtlasError::Config(
                "ranking.max_iterations must be at least 1".into(),
            ));
        }
        if r.tolerance <= 0.0 {
            return Err(AtlasError::Config("ranking.tolerance must be positive".into()));
        }
        let weights = [
            ("mentioned_ident_weight", r.mentioned_ident_weight),
            ("mentioned_file_weight", r.mentioned_file_weight),
            ("chat_file_weight", r.chat_file_weight),
            ("long_ident_weight", r.long_ident_weight),
            ("private_ident_weight", r.private_ident_weight),
            ("generic_ident_weight", r.generic_ident_weight),
            ("chat_prior", r.chat_prior),
            ("mentioned_prior", r.mentioned_prior),
            ("base_prior", r.base_prior),
            ("unreferenced_floor", r.unreferenced_floor),
        ];
        for (key, value) in weights {
            if !(value.is_finite() && value > 0.0) {
                return Err(AtlasError::Config(format!(
                    "ranking.{key} must be a positive number, got {value}"
                )));
            }
        }
        if r.unreferenced_floor >= 1.0 {
            return Err(AtlasError::Config(format!(
                "ranking.unreferenced_floor must be below 1, got {}",
                r.unreferenced_floor
            )));
        }
        Ok(())
    }
}

/// Rendering and budget configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::MapConfig;
///
/// let config = MapConfig::default();
/// assert_eq!(config.model, "gpt-4");
/// assert_eq!(config.context_lines, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Token ceiling for the rendered map (default: 1024).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Model identifier used to pick the tokenizer (default: `"gpt-4"`).
    #[serde(default = "default_model")]
    pub model: String,
    /// Source lines shown on each side of a definition (default: 1).
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    /// Rendered source lines are cut at this many characters (default: 100).
    #[serde(default = "default_max_line_width")]
    pub max_line_width: usize,
    /// Context window of the consuming model. When set and no chat files are
    /// given, the budget may grow up to `no_chat_multiplier` times.
    #[serde(default)]
    pub max_context_window: Option<usize>,
    /// Budget multiplier for maps without chat files (default: 8).
    #[serde(default = "default_no_chat_multiplier")]
    pub no_chat_multiplier: usize,
}

/// Tokens of the context window kept free for the rest of the prompt.
pub const CONTEXT_WINDOW_HEADROOM: usize = 4096;

impl MapConfig {
    /// Token budget for one map.
    ///
    /// With chat files, or without a known context window, this is
    /// `max_tokens`. Otherwise the map may use `max_tokens * no_chat_multiplier`
    /// tokens, but no more than the window minus [`CONTEXT_WINDOW_HEADROOM`],
    /// and never less than `max_tokens`.
    ///
    /// ```
    /// use atlas_core::MapConfig;
    ///
    /// let config = MapConfig {
    ///     max_context_window: Some(128_000),
    ///     ..MapConfig::default()
    /// };
    /// assert_eq!(config.budget_for(1024, true), 1024);
    /// assert_eq!(config.budget_for(1024, false), 8192);
    /// ```
    pub fn budget_for(&self, max_tokens: usize, has_chat_files: bool) -> usize {
        match self.max_context_window {
            Some(window) if !has_chat_files => max_tokens
                .saturating_mul(self.no_chat_multiplier)
                .min(window.saturating_sub(CONTEXT_WINDOW_HEADROOM))
                .max(max_tokens),
            _ => max_tokens,
        }
    }
}

fn default_max_tokens() -> usize {
    1024
}

fn default_model() -> String {
    "gpt-4".into()
}

fn default_context_lines() -> usize {
    1
}

fn default_max_line_width() -> usize {
    100
}

fn default_no_chat_multiplier() -> usize {
    8
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            model: default_model(),
            context_lines: default_context_lines(),
            max_line_width: default_max_line_width(),
            max_context_window: None,
            no_chat_multiplier: default_no_chat_multiplier(),
        }
    }
}

/// Heuristic weights for the reference graph and PageRank.
///
/// The numeric values are tuning knobs; the ranking properties hold under any
/// reweighting that keeps boosts above 1 and penalties below 1.
///
/// # Examples
///
/// ```
/// use atlas_core::RankingConfig;
///
/// let config = RankingConfig::default();
/// assert_eq!(config.damping, 0.85);
/// assert_eq!(config.max_iterations, 100);
/// assert!(config.chat_prior > config.mentioned_prior);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Edge multiplier when the symbol is a mentioned identifier.
    #[serde(default = "default_boost")]
    pub mentioned_ident_weight: f64,
    /// Edge multiplier when the referencing file is in the mentioned tier.
    #[serde(default = "default_boost")]
    pub mentioned_file_weight: f64,
    /// Edge multiplier when the referencing file is in the chat tier.
    #[serde(default = "default_chat_file_weight")]
    pub chat_file_weight: f64,
    /// Edge multiplier for long snake/kebab/camel case identifiers.
    #[serde(default = "default_boost")]
    pub long_ident_weight: f64,
    /// Minimum identifier length for `long_ident_weight`.
    #[serde(default = "default_long_ident_min_len")]
    pub long_ident_min_len: usize,
    /// Edge multiplier for identifiers starting with `_`.
    #[serde(default = "default_penalty")]
    pub private_ident_weight: f64,
    /// Edge multiplier for symbols defined in many files.
    #[serde(default = "default_penalty")]
    pub generic_ident_weight: f64,
    /// A symbol defined in more than this many files counts as generic.
    #[serde(default = "default_generic_def_threshold")]
    pub generic_def_threshold: usize,
    /// Personalization prior for chat-tier files.
    #[serde(default = "default_chat_prior")]
    pub chat_prior: f64,
    /// Personalization prior for mentioned-tier files.
    #[serde(default = "default_boost")]
    pub mentioned_prior: f64,
    /// Personalization prior for every other file.
    #[serde(default = "default_base_prior")]
    pub base_prior: f64,
    /// PageRank damping factor.
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// L1 convergence tolerance.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Hard cap on PageRank iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Weight of an unreferenced definition, as a fraction of the smallest
    /// referenced weight in the same file.
    #[serde(default = "default_unreferenced_floor")]
    pub unreferenced_floor: f64,
}

fn default_boost() -> f64 {
    10.0
}

fn default_chat_file_weight() -> f64 {
    50.0
}

fn default_long_ident_min_len() -> usize {
    8
}

fn default_penalty() -> f64 {
    0.1
}

fn default_generic_def_threshold() -> usize {
    5
}

fn default_chat_prior() -> f64 {
    100.0
}

fn default_base_prior() -> f64 {
    1.0
}

fn default_damping() -> f64 {
    0.85
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_max_iterations() -> usize {
    100
}

fn default_unreferenced_floor() -> f64 {
    1e-3
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            mentioned_ident_weight: default_boost(),
            mentioned_file_weight: default_boost(),
            chat_file_weight: default_chat_file_weight(),
            long_ident_weight: default_boost(),
            long_ident_min_len: default_long_ident_min_len(),
            private_ident_weight: default_penalty(),
            generic_ident_weight: default_penalty(),
            generic_def_threshold: default_generic_def_threshold(),
            chat_prior: default_chat_prior(),
            mentioned_prior: default_boost(),
            base_prior: default_base_prior(),
            damping: default_damping(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            unreferenced_floor: default_unreferenced_floor(),
        }
    }
}

/// Tag cache configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::CacheConfig;
///
/// let config = CacheConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.dir.to_str(), Some(".atlas.cache"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Persist extracted tags between runs (default: true).
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Cache directory, relative to the repository root.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".atlas.cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
        }
    }
}

/// File discovery configuration.
///
/// # Examples
///
/// ```
/// use atlas_core::WalkConfig;
///
/// let config = WalkConfig::default();
/// assert_eq!(config.max_file_size, 1_048_576);
/// assert!(config.exclude.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Files larger than this many bytes are skipped (default: 1 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Glob patterns (relative to the root) to leave out of the map.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_max_file_size() -> u64 {
    1_048_576
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            exclude: Vec::new(),
        }
    }
}
