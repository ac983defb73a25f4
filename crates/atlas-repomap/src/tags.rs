use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One occurrence of a symbol name in a file.
///
/// Tags are produced by a [`TagExtractor`](crate::extractor::TagExtractor)
/// and never mutated afterwards.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use atlas_repomap::tags::{SyntaxCategory, Tag, TagKind};
///
/// let tag = Tag::definition("src/lib.rs", "parse", 12, SyntaxCategory::Function)
///     .with_signature("pub fn parse(input: &str) -> Ast");
/// assert_eq!(tag.kind, TagKind::Definition);
/// assert_eq!(tag.file, PathBuf::from("src/lib.rs"));
/// assert!(tag.is_definition());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// File path, relative to the repository root.
    pub file: PathBuf,
    /// Symbol name as written in the source.
    pub name: String,
    /// Definition or reference.
    pub kind: TagKind,
    /// Line where the occurrence starts (1-indexed).
    pub line: u32,
    /// Syntax category; references usually carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<SyntaxCategory>,
    /// One-line signature for definitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Tag {
    /// Build a definition tag.
    pub fn definition(
        file: impl Into<PathBuf>,
        name: impl Into<String>,
        line: u32,
        category: SyntaxCategory,
    ) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            kind: TagKind::Definition,
            line,
            category: Some(category),
            signature: None,
        }
    }

    /// Build a reference tag.
    pub fn reference(file: impl Into<PathBuf>, name: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
            kind: TagKind::Reference,
            line,
            category: None,
            signature: None,
        }
    }

    /// Attach a signature snippet.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn is_definition(&self) -> bool {
        self.kind == TagKind::Definition
    }
}

/// Whether a tag defines a symbol or refers to one.
///
/// Definitions order before references on the same line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Definition,
    Reference,
}

/// Classification of defined symbols, shared by every language.
///
/// Grammar node kinds that have no better match map to
/// [`SyntaxCategory::Symbol`].
///
/// # Examples
///
/// ```
/// use atlas_repomap::tags::SyntaxCategory;
///
/// assert_eq!(SyntaxCategory::from_label("class"), SyntaxCategory::Class);
/// assert_eq!(SyntaxCategory::from_label("macro"), SyntaxCategory::Symbol);
/// assert_eq!(SyntaxCategory::Function.label(), "fn");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntaxCategory {
    Function,
    Method,
    Struct,
    Enum,
    Trait,
    Impl,
    Class,
    Interface,
    Module,
    Constant,
    Symbol,
}

impl SyntaxCategory {
    /// Parse a category name, falling back to `Symbol` for anything unknown.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "function" | "fn" => SyntaxCategory::Function,
            "method" => SyntaxCategory::Method,
            "struct" => SyntaxCategory::Struct,
            "enum" => SyntaxCategory::Enum,
            "trait" | "protocol" => SyntaxCategory::Trait,
            "impl" => SyntaxCategory::Impl,
            "class" => SyntaxCategory::Class,
            "interface" => SyntaxCategory::Interface,
            "module" | "mod" | "namespace" => SyntaxCategory::Module,
            "constant" | "const" => SyntaxCategory::Constant,
            _ => SyntaxCategory::Symbol,
        }
    }

    /// Short label used by the renderers.
    pub fn label(self) -> &'static str {
        match self {
            SyntaxCategory::Function => "fn",
            SyntaxCategory::Method => "method",
            SyntaxCategory::Struct => "struct",
            SyntaxCategory::Enum => "enum",
            SyntaxCategory::Trait => "trait",
            SyntaxCategory::Impl => "impl",
            SyntaxCategory::Class => "class",
            SyntaxCategory::Interface => "interface",
            SyntaxCategory::Module => "mod",
            SyntaxCategory::Constant => "const",
            SyntaxCategory::Symbol => "symbol",
        }
    }
}

impl fmt::Display for SyntaxCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_has_no_category() {
        let tag = Tag::reference("b.py", "foo", 3);
        assert_eq!(tag.kind, TagKind::Reference);
        assert!(tag.category.is_none());
        assert!(!tag.is_definition());
    }

    #[test]
    fn unknown_labels_map_to_symbol() {
        for label in ["decorator", "", "macro_rules"] {
            assert_eq!(SyntaxCategory::from_label(label), SyntaxCategory::Symbol);
        }
        assert_eq!(SyntaxCategory::from_label("Protocol"), SyntaxCategory::Trait);
    }

    #[test]
    fn json_omits_empty_optionals() {
        let json = serde_json::to_string(&Tag::reference("a.rs", "x", 1)).unwrap();
        assert!(!json.contains("category"));
        assert!(!json.contains("signature"));
        assert!(json.contains("\"kind\":\"reference\""));
    }
}
