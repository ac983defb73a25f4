use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Priority class of an input file.
///
/// Tiers drive both the ranking prior and the inclusion floor: chat files are
/// always rendered, mentioned files get a smaller boost.
///
/// # Examples
///
/// ```
/// use atlas_core::Tier;
///
/// assert!(Tier::Chat > Tier::Mentioned);
/// assert!(Tier::Mentioned > Tier::Other);
/// assert_eq!(Tier::default(), Tier::Other);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Everything else handed to the pipeline.
    #[default]
    Other,
    /// Files the caller mentioned but is not editing.
    Mentioned,
    /// Files currently in focus (being edited).
    Chat,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Other => write!(f, "other"),
            Tier::Mentioned => write!(f, "mentioned"),
            Tier::Chat => write!(f, "chat"),
        }
    }
}

/// Output format for rendered maps.
///
/// # Examples
///
/// ```
/// use atlas_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Path headers followed by `│`-prefixed source lines.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown with one fenced block per file.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "md".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn tier_ordering_and_display() {
        let mut tiers = vec![Tier::Chat, Tier::Other, Tier::Mentioned];
        tiers.sort();
        assert_eq!(tiers, vec![Tier::Other, Tier::Mentioned, Tier::Chat]);
        assert_eq!(Tier::Chat.to_string(), "chat");
    }

    #[test]
    fn tier_serde_lowercase() {
        let json = serde_json::to_string(&Tier::Mentioned).unwrap();
        assert_eq!(json, "\"mentioned\"");
        let back: Tier = serde_json::from_str("\"chat\"").unwrap();
        assert_eq!(back, Tier::Chat);
    }
}
