//! Definition/reference tag extraction.
//!
//! The pipeline only depends on the [`TagExtractor`] trait. The default
//! implementation, [`TreeSitterExtractor`], walks a tree-sitter syntax tree
//! and matches node kinds against a small per-language rule table.

use std::collections::HashSet;
use std::path::Path;

use tree_sitter::{Node, Parser};

use crate::tags::{SyntaxCategory, Tag};
use crate::walker::{Language, SourceError};

/// Longest signature kept on a definition tag.
const MAX_SIGNATURE_LEN: usize = 120;

/// Node kinds that count as a use of a name.
const REFERENCE_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "simple_identifier",
    "namespace_identifier",
    "constant",
    "name",
];

/// Why a file produced no tags.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// No grammar is available for the file's language.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    /// The grammar could not be loaded or the parse was aborted.
    #[error("parse failed: {0}")]
    Parse(String),
    /// The file could not be read.
    #[error("unreadable: {0}")]
    Read(#[from] SourceError),
}

/// Produces definition and reference tags for one file.
///
/// Implementations must be pure with respect to their inputs: the tag cache
/// assumes identical `(path, contents, language)` always yields identical tags.
pub trait TagExtractor: Send + Sync {
    /// Extract tags from `contents`. `path` is stamped onto every tag.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the file cannot be tagged at all.
    fn extract(
        &self,
        path: &Path,
        contents: &str,
        language: Language,
    ) -> Result<Vec<Tag>, ExtractError>;
}

/// Where the name of a definition lives relative to its node.
#[derive(Debug, Clone, Copy)]
enum NameAt {
    /// First direct child of one of these kinds.
    Child(&'static [&'static str]),
    /// Inside a C-style `function_declarator`.
    Declarator,
}

#[derive(Debug, Clone, Copy)]
struct DefRule {
    node: &'static str,
    name: NameAt,
    category: SyntaxCategory,
    /// The node must have a direct child of this kind.
    requires: Option<&'static str>,
    /// `false` for nodes that only scope methods (e.g. Rust `impl`).
    emit: bool,
}

const fn def(node: &'static str, names: &'static [&'static str], category: SyntaxCategory) -> DefRule {
    DefRule {
        node,
        name: NameAt::Child(names),
        category,
        requires: None,
        emit: true,
    }
}

const fn def_with(
    node: &'static str,
    names: &'static [&'static str],
    category: SyntaxCategory,
    requires: &'static str,
) -> DefRule {
    DefRule {
        node,
        name: NameAt::Child(names),
        category,
        requires: Some(requires),
        emit: true,
    }
}

const fn scope(node: &'static str, category: SyntaxCategory) -> DefRule {
    DefRule {
        node,
        name: NameAt::Child(&[]),
        category,
        requires: None,
        emit: false,
    }
}

const fn c_function(node: &'static str) -> DefRule {
    DefRule {
        node,
        name: NameAt::Declarator,
        category: SyntaxCategory::Function,
        requires: None,
        emit: true,
    }
}

use crate::tags::SyntaxCategory as S;

const IDENT: &[&str] = &["identifier"];
const TYPE_IDENT: &[&str] = &["type_identifier"];
const TYPE_OR_IDENT: &[&str] = &["type_identifier", "identifier"];
const PROPERTY: &[&str] = &["property_identifier"];
const KOTLIN_NAME: &[&str] = &["type_identifier", "simple_identifier", "identifier"];
const SWIFT_NAME: &[&str] = &["type_identifier", "simple_identifier"];
const PHP_NAME: &[&str] = &["name"];

const RUST_RULES: &[DefRule] = &[
    def("function_item", IDENT, S::Function),
    def("function_signature_item", IDENT, S::Function),
    def("struct_item", TYPE_IDENT, S::Struct),
    def("union_item", TYPE_IDENT, S::Struct),
    def("enum_item", TYPE_IDENT, S::Enum),
    def("trait_item", TYPE_IDENT, S::Trait),
    def("type_item", TYPE_IDENT, S::Symbol),
    def("mod_item", IDENT, S::Module),
    def("const_item", IDENT, S::Constant),
    def("static_item", IDENT, S::Constant),
    def("macro_definition", IDENT, S::Symbol),
    scope("impl_item", S::Impl),
];

const PYTHON_RULES: &[DefRule] = &[
    def("function_definition", IDENT, S::Function),
    def("class_definition", IDENT, S::Class),
];

const JS_RULES: &[DefRule] = &[
    def("function_declaration", IDENT, S::Function),
    def("generator_function_declaration", IDENT, S::Function),
    def("class_declaration", TYPE_OR_IDENT, S::Class),
    def("method_definition", PROPERTY, S::Method),
    def_with("variable_declarator", IDENT, S::Function, "arrow_function"),
    def_with("variable_declarator", IDENT, S::Function, "function_expression"),
];

const TS_RULES: &[DefRule] = &[
    def("function_declaration", IDENT, S::Function),
    def("generator_function_declaration", IDENT, S::Function),
    def("function_signature", IDENT, S::Function),
    def("class_declaration", TYPE_OR_IDENT, S::Class),
    def("abstract_class_declaration", TYPE_OR_IDENT, S::Class),
    def("interface_declaration", TYPE_IDENT, S::Interface),
    def("type_alias_declaration", TYPE_IDENT, S::Symbol),
    def("enum_declaration", IDENT, S::Enum),
    def("method_definition", PROPERTY, S::Method),
    def("method_signature", PROPERTY, S::Method),
    def_with("variable_declarator", IDENT, S::Function, "arrow_function"),
    def_with("variable_declarator", IDENT, S::Function, "function_expression"),
];

const GO_RULES: &[DefRule] = &[
    def("function_declaration", IDENT, S::Function),
    def("method_declaration", &["field_identifier"], S::Method),
    def_with("type_spec", TYPE_IDENT, S::Struct, "struct_type"),
    def_with("type_spec", TYPE_IDENT, S::Interface, "interface_type"),
    def("type_spec", TYPE_IDENT, S::Symbol),
];

const JAVA_RULES: &[DefRule] = &[
    def("class_declaration", IDENT, S::Class),
    def("record_declaration", IDENT, S::Class),
    def("interface_declaration", IDENT, S::Interface),
    def("enum_declaration", IDENT, S::Enum),
    def("method_declaration", IDENT, S::Method),
    def("constructor_declaration", IDENT, S::Method),
];

const C_RULES: &[DefRule] = &[
    c_function("function_definition"),
    def_with("struct_specifier", TYPE_IDENT, S::Struct, "field_declaration_list"),
    def_with("union_specifier", TYPE_IDENT, S::Struct, "field_declaration_list"),
    def_with("enum_specifier", TYPE_IDENT, S::Enum, "enumerator_list"),
    def("type_definition", TYPE_IDENT, S::Symbol),
];

const CPP_RULES: &[DefRule] = &[
    c_function("function_definition"),
    def_with("class_specifier", TYPE_IDENT, S::Class, "field_declaration_list"),
    def_with("struct_specifier", TYPE_IDENT, S::Struct, "field_declaration_list"),
    def_with("enum_specifier", TYPE_IDENT, S::Enum, "enumerator_list"),
    def("namespace_definition", &["namespace_identifier", "identifier"], S::Module),
    def("type_definition", TYPE_IDENT, S::Symbol),
];

const RUBY_RULES: &[DefRule] = &[
    def("method", IDENT, S::Method),
    def("singleton_method", IDENT, S::Method),
    def("class", &["constant", "scope_resolution"], S::Class),
    def("module", &["constant", "scope_resolution"], S::Module),
];

const PHP_RULES: &[DefRule] = &[
    def("function_definition", PHP_NAME, S::Function),
    def("method_declaration", PHP_NAME, S::Method),
    def("class_declaration", PHP_NAME, S::Class),
    def("interface_declaration", PHP_NAME, S::Interface),
    def("trait_declaration", PHP_NAME, S::Trait),
    def("enum_declaration", PHP_NAME, S::Enum),
    def("namespace_definition", &["namespace_name", "name"], S::Module),
];

const KOTLIN_RULES: &[DefRule] = &[
    def("function_declaration", KOTLIN_NAME, S::Function),
    def("class_declaration", KOTLIN_NAME, S::Class),
    def("object_declaration", KOTLIN_NAME, S::Class),
];

const SWIFT_RULES: &[DefRule] = &[
    def("function_declaration", SWIFT_NAME, S::Function),
    def("protocol_function_declaration", SWIFT_NAME, S::Method),
    def("class_declaration", SWIFT_NAME, S::Class),
    def("protocol_declaration", SWIFT_NAME, S::Trait),
];

fn rules_for(language: Language) -> &'static [DefRule] {
    match language {
        Language::Rust => RUST_RULES,
        Language::Python => PYTHON_RULES,
        Language::JavaScript => JS_RULES,
        Language::TypeScript => TS_RULES,
        Language::Go => GO_RULES,
        Language::Java => JAVA_RULES,
        Language::C => C_RULES,
        Language::Cpp => CPP_RULES,
        Language::Ruby => RUBY_RULES,
        Language::Php => PHP_RULES,
        Language::Kotlin => KOTLIN_RULES,
        Language::Swift => SWIFT_RULES,
        Language::Unknown => &[],
    }
}

/// Tree-sitter backed [`TagExtractor`] covering every [`Language`] with a
/// grammar.
///
/// Tree-sitter is error-tolerant, so files with syntax errors still yield
/// the tags of their well-formed parts.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use atlas_repomap::extractor::{TagExtractor, TreeSitterExtractor};
/// use atlas_repomap::walker::Language;
///
/// let src = "def greet():\n    pass\n\ngreet()\n";
/// let tags = TreeSitterExtractor
///     .extract(Path::new("app.py"), src, Language::Python)
///     .unwrap();
/// assert!(tags.iter().any(|t| t.is_definition() && t.name == "greet"));
/// assert!(tags.iter().any(|t| !t.is_definition() && t.name == "greet" && t.line == 4));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterExtractor;

impl TagExtractor for TreeSitterExtractor {
    fn extract(
        &self,
        path: &Path,
        contents: &str,
        language: Language,
    ) -> Result<Vec<Tag>, ExtractError> {
        let Some(ts_language) = language.tree_sitter_language() else {
            return Err(ExtractError::UnsupportedLanguage(language.name().to_string()));
        };

        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ExtractError::Parse(format!("failed to set language: {e}")))?;
        let tree = parser
            .parse(contents, None)
            .ok_or_else(|| ExtractError::Parse("parser returned no tree".into()))?;

        let mut walk = TagWalk {
            path,
            source: contents.as_bytes(),
            rules: rules_for(language),
            tags: Vec::new(),
            name_nodes: HashSet::new(),
        };
        walk.definitions(tree.root_node(), false);
        walk.references(tree.root_node());

        let mut tags = walk.tags;
        tags.sort_by(|a, b| a.line.cmp(&b.line).then(a.kind.cmp(&b.kind)));
        Ok(tags)
    }
}

struct TagWalk<'a> {
    path: &'a Path,
    source: &'a [u8],
    rules: &'static [DefRule],
    tags: Vec<Tag>,
    /// Ids of nodes that name a definition; never reported as references.
    name_nodes: HashSet<usize>,
}

impl TagWalk<'_> {
    fn definitions(&mut self, node: Node, inside_type: bool) {
        let mut child_inside = inside_type;

        if let Some(rule) = self.match_rule(&node) {
            let category = match rule.category {
                S::Function if inside_type => S::Method,
                other => other,
            };
            if rule.emit {
                if let Some(name_node) = find_name(&node, rule.name) {
                    let name = node_text(&name_node, self.source);
                    if !name.is_empty() {
                        self.name_nodes.insert(name_node.id());
                        let tag = Tag::definition(
                            self.path,
                            name,
                            node.start_position().row as u32 + 1,
                            category,
                        )
                        .with_signature(signature(&node, self.source));
                        self.tags.push(tag);
                    }
                }
            }
            child_inside = matches!(
                category,
                S::Class | S::Impl | S::Trait | S::Interface | S::Struct | S::Enum
            );
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.definitions(child, child_inside);
        }
    }

    fn match_rule(&self, node: &Node) -> Option<DefRule> {
        let kind = node.kind();
        self.rules
            .iter()
            .find(|rule| {
                rule.node == kind && rule.requires.map_or(true, |req| child_has_kind(node, req))
            })
            .copied()
    }

    fn references(&mut self, node: Node) {
        if node.child_count() == 0
            && REFERENCE_KINDS.contains(&node.kind())
            && !self.name_nodes.contains(&node.id())
        {
            let name = node_text(&node, self.source);
            if !name.is_empty() {
                self.tags.push(Tag::reference(
                    self.path,
                    name,
                    node.start_position().row as u32 + 1,
                ));
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.references(child);
        }
    }
}

fn find_name<'t>(node: &Node<'t>, at: NameAt) -> Option<Node<'t>> {
    match at {
        NameAt::Child(kinds) => {
            let mut cursor = node.walk();
            let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
            kinds
                .iter()
                .find_map(|kind| children.iter().find(|c| c.kind() == *kind).copied())
        }
        NameAt::Declarator => {
            let declarator = find_descendant(node, "function_declarator", 3)?;
            let mut cursor = declarator.walk();
            let children: Vec<Node<'t>> = declarator.children(&mut cursor).collect();
            children.into_iter().find_map(|child| match child.kind() {
                "identifier" | "field_identifier" | "destructor_name" | "operator_name" => {
                    Some(child)
                }
                "qualified_identifier" => last_named_leaf(&child),
                _ => None,
            })
        }
    }
}

/// Breadth-limited search for a descendant of `kind` (pointer and reference
/// declarators wrap the function declarator in C/C++).
fn find_descendant<'t>(node: &Node<'t>, kind: &str, depth: usize) -> Option<Node<'t>> {
    if depth == 0 {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    for child in &children {
        if child.kind() == kind {
            return Some(*child);
        }
    }
    children
        .iter()
        .filter(|c| c.kind().ends_with("declarator"))
        .find_map(|c| find_descendant(c, kind, depth - 1))
}

fn last_named_leaf<'t>(node: &Node<'t>) -> Option<Node<'t>> {
    let mut current = *node;
    while current.named_child_count() > 0 {
        current = current.named_child(current.named_child_count() - 1)?;
    }
    Some(current)
}

/// First line of the definition, without a trailing `{` or `:`.
fn signature(node: &Node, source: &[u8]) -> String {
    let text = node_text(node, source);
    let first = text.lines().next().unwrap_or_default().trim();
    let first = first
        .trim_end_matches('{')
        .trim_end()
        .trim_end_matches(':')
        .trim_end();
    let collapsed = first.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate(&collapsed, MAX_SIGNATURE_LEN).to_string()
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn node_text(node: &Node, source: &[u8]) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    if start >= source.len() || end > source.len() {
        return String::new();
    }
    String::from_utf8_lossy(&source[start..end]).to_string()
}

fn child_has_kind(node: &Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}
