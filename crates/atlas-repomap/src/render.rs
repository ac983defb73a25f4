//! Serialization of a selected set of definitions into a readable map.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::path::Path;

use atlas_core::{AtlasError, MapConfig, OutputFormat, Tier};
use serde::Serialize;

use crate::corpus::{Corpus, CorpusFile};
use crate::rank::RankedDefinition;
use crate::walker::Language;

/// Marker for skipped source lines.
const ELISION: &str = "\u{22ee}";
/// Prefix for shown source lines.
const GUTTER: &str = "\u{2502}";

/// Rendering settings.
///
/// # Examples
///
/// ```
/// use atlas_core::{MapConfig, OutputFormat};
/// use atlas_repomap::render::RenderOptions;
///
/// let options = RenderOptions::from_config(&MapConfig::default(), OutputFormat::Markdown);
/// assert_eq!(options.context_lines, 1);
/// assert_eq!(options.max_line_width, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub format: OutputFormat,
    /// Lines shown above and below each definition.
    pub context_lines: usize,
    /// Shown lines are cut to this many characters.
    pub max_line_width: usize,
}

impl RenderOptions {
    pub fn from_config(config: &MapConfig, format: OutputFormat) -> Self {
        Self {
            format,
            context_lines: config.context_lines,
            max_line_width: config.max_line_width,
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&MapConfig::default(), OutputFormat::Text)
    }
}

/// What goes into one rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection<'a> {
    pub definitions: Vec<&'a RankedDefinition>,
    /// Files listed by path only.
    pub files: Vec<&'a Path>,
}

/// Inclusive, 1-indexed line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: usize,
    end: usize,
}

/// Everything shown for one file.
struct FileView<'a> {
    path: &'a Path,
    tier: Tier,
    language: Language,
    definitions: Vec<&'a RankedDefinition>,
    lines: Vec<&'a str>,
    windows: Vec<Window>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonMap<'a> {
    files: Vec<JsonFile<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonFile<'a> {
    path: String,
    tier: Tier,
    definitions: Vec<JsonDefinition<'a>>,
    snippets: Vec<JsonSnippet>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonDefinition<'a> {
    symbol: &'a str,
    line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a str>,
    score: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonSnippet {
    start_line: usize,
    end_line: usize,
    lines: Vec<String>,
}

/// Render `selection` against the source text in `corpus`.
///
/// Files appear in path order: every file with a selected definition, every
/// selected bare file, and every chat or mentioned file (as a bare header
/// when nothing of it is selected). Within a file, definitions are shown in
/// line order with `context_lines` of surrounding source; overlapping or
/// touching windows are merged. The output depends only on the inputs.
///
/// # Errors
///
/// Returns [`AtlasError::Serialization`] if JSON output fails to serialize.
///
/// # Examples
///
/// ```
/// use atlas_repomap::corpus::Corpus;
/// use atlas_repomap::render::{render, RenderOptions, Selection};
///
/// let text = render(&Selection::default(), &Corpus::default(), &RenderOptions::default()).unwrap();
/// assert!(text.is_empty());
/// ```
pub fn render(
    selection: &Selection<'_>,
    corpus: &Corpus,
    options: &RenderOptions,
) -> Result<String, AtlasError> {
    let views = file_views(selection, corpus, options.context_lines);
    match options.format {
        OutputFormat::Text => Ok(render_text(&views, options.max_line_width)),
        OutputFormat::Markdown => Ok(render_markdown(&views, options.max_line_width)),
        OutputFormat::Json => render_json(&views, options.max_line_width),
    }
}

fn file_views<'a>(
    selection: &Selection<'a>,
    corpus: &'a Corpus,
    context_lines: usize,
) -> Vec<FileView<'a>> {
    let mut by_file: BTreeMap<&'a Path, Vec<&'a RankedDefinition>> = BTreeMap::new();
    for &def in &selection.definitions {
        by_file.entry(def.file.as_path()).or_default().push(def);
    }
    for &path in &selection.files {
        by_file.entry(path).or_default();
    }
    for file in corpus.files().filter(|f| f.tier != Tier::Other) {
        by_file.entry(file.path.as_path()).or_default();
    }

    by_file
        .into_iter()
        .map(|(path, mut definitions)| {
            definitions.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.symbol.cmp(&b.symbol)));
            definitions.dedup_by(|a, b| a.line == b.line && a.symbol == b.symbol);

            let file = corpus.get(path);
            let lines = file.map(CorpusFile::lines).unwrap_or_default();
            let def_lines: BTreeSet<usize> = definitions.iter().map(|d| d.line as usize).collect();
            let windows = windows(&def_lines, lines.len(), context_lines);

            FileView {
                path,
                tier: file.map_or(Tier::Other, |f| f.tier),
                language: file.map_or(Language::Unknown, |f| f.language),
                definitions,
                lines,
                windows,
            }
        })
        .collect()
}

/// Merge `context`-line windows around each line of interest.
fn windows(lines_of_interest: &BTreeSet<usize>, line_count: usize, context: usize) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    for &line in lines_of_interest {
        if line == 0 || line > line_count {
            continue;
        }
        let window = Window {
            start: line.saturating_sub(context).max(1),
            end: (line + context).min(line_count),
        };
        match merged.last_mut() {
            Some(last) if window.start <= last.end + 1 => last.end = last.end.max(window.end),
            _ => merged.push(window),
        }
    }
    merged
}

fn clip(line: &str, width: usize) -> &str {
    let line = line.trim_end();
    match line.char_indices().nth(width) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Source lines of `view` with `None` marking elided stretches.
fn excerpt<'a>(view: &FileView<'a>, width: usize) -> Vec<Option<&'a str>> {
    let mut out = Vec::new();
    let mut shown_until = 0;
    for window in &view.windows {
        if window.start > shown_until + 1 {
            out.push(None);
        }
        for n in window.start..=window.end {
            out.push(Some(clip(view.lines[n - 1], width)));
        }
        shown_until = window.end;
    }
    if !view.windows.is_empty() && shown_until < view.lines.len() {
        out.push(None);
    }
    out
}

fn render_text(views: &[FileView<'_>], width: usize) -> String {
    let mut out = String::new();
    for view in views {
        let _ = writeln!(out, "{}:", view.path.display());
        if view.windows.is_empty() {
            // No source to show; fall back to signatures.
            for def in &view.definitions {
                let text = def.signature.as_deref().unwrap_or(&def.symbol);
                let _ = writeln!(out, "{GUTTER}{}", clip(text, width));
            }
            continue;
        }
        for line in excerpt(view, width) {
            match line {
                Some(text) => {
                    let _ = writeln!(out, "{GUTTER}{text}");
                }
                None => {
                    let _ = writeln!(out, "{ELISION}");
                }
            }
        }
    }
    out
}

fn render_markdown(views: &[FileView<'_>], width: usize) -> String {
    if views.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str("# Repository Map\n");
    for view in views {
        let _ = writeln!(out, "\n## `{}`", view.path.display());
        if view.definitions.is_empty() {
            continue;
        }
        let fence = match view.language {
            Language::Unknown => "",
            other => other.name(),
        };
        let _ = writeln!(out, "\n```{fence}");
        if view.windows.is_empty() {
            for def in &view.definitions {
                let text = def.signature.as_deref().unwrap_or(&def.symbol);
                let _ = writeln!(out, "{}", clip(text, width));
            }
        } else {
            for line in excerpt(view, width) {
                let _ = writeln!(out, "{}", line.unwrap_or(ELISION));
            }
        }
        out.push_str("```\n");
    }
    out
}

fn render_json(views: &[FileView<'_>], width: usize) -> Result<String, AtlasError> {
    let files = views
        .iter()
        .map(|view| JsonFile {
            path: view.path.display().to_string(),
            tier: view.tier,
            definitions: view
                .definitions
                .iter()
                .map(|d| JsonDefinition {
                    symbol: &d.symbol,
                    line: d.line,
                    kind: d.category.map(|c| c.label()),
                    signature: d.signature.as_deref(),
                    score: d.score,
                })
                .collect(),
            snippets: view
                .windows
                .iter()
                .map(|w| JsonSnippet {
                    start_line: w.start,
                    end_line: w.end,
                    lines: view.lines[w.start - 1..w.end]
                        .iter()
                        .map(|l| clip(l, width).to_string())
                        .collect(),
                })
                .collect(),
        })
        .collect();

    serde_json::to_string_pretty(&JsonMap { files }).map_err(AtlasError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::tags::{SyntaxCategory, Tag};

    const SOURCE: &str = "import os\n\ndef foo():\n    return 1\n\n\ndef bar():\n    return foo()\n\nx = 1\n";

    fn corpus() -> Corpus {
        Corpus::new(vec![
            CorpusFile {
                path: PathBuf::from("a.py"),
                abs_path: PathBuf::from("/repo/a.py"),
                tier: Tier::Other,
                language: Language::Python,
                content: SOURCE.to_string(),
                tags: vec![
                    Tag::definition("a.py", "foo", 3, SyntaxCategory::Function),
                    Tag::definition("a.py", "bar", 7, SyntaxCategory::Function),
                ],
            },
            CorpusFile {
                path: PathBuf::from("chat.py"),
                abs_path: PathBuf::from("/repo/chat.py"),
                tier: Tier::Chat,
                language: Language::Python,
                content: "foo()\n".to_string(),
                tags: vec![],
            },
            CorpusFile {
                path: PathBuf::from("z.txt"),
                abs_path: PathBuf::from("/repo/z.txt"),
                tier: Tier::Other,
                language: Language::Unknown,
                content: "notes".to_string(),
                tags: vec![],
            },
        ])
        .unwrap()
    }

    fn ranked(symbol: &str, line: u32) -> RankedDefinition {
        RankedDefinition {
            file: PathBuf::from("a.py"),
            symbol: symbol.to_string(),
            line,
            score: 0.5,
            tier: Tier::Other,
            category: Some(SyntaxCategory::Function),
            signature: Some(format!("def {symbol}()")),
        }
    }

    #[test]
    fn window_merging() {
        let set = |v: &[usize]| v.iter().copied().collect::<BTreeSet<_>>();
        assert_eq!(
            windows(&set(&[3, 7]), 10, 1),
            vec![Window { start: 2, end: 4 }, Window { start: 6, end: 8 }]
        );
        // touching windows merge
        assert_eq!(windows(&set(&[3, 6]), 10, 1), vec![Window { start: 2, end: 7 }]);
        // clipped at both ends
        assert_eq!(windows(&set(&[1, 10]), 10, 2), vec![
            Window { start: 1, end: 3 },
            Window { start: 8, end: 10 }
        ]);
        // lines past the end are ignored
        assert!(windows(&set(&[42]), 10, 1).is_empty());
    }

    #[test]
    fn text_layout() {
        let corpus = corpus();
        let foo = ranked("foo", 3);
        let bar = ranked("bar", 7);
        let selection = Selection {
            definitions: vec![&bar, &foo],
            files: vec![Path::new("z.txt")],
        };
        let text = render(&selection, &corpus, &RenderOptions::default()).unwrap();
        let expected = "\
a.py:
\u{22ee}
\u{2502}
\u{2502}def foo():
\u{2502}    return 1
\u{22ee}
\u{2502}
\u{2502}def bar():
\u{2502}    return foo()
\u{22ee}
chat.py:
z.txt:
";
        assert_eq!(text, expected);
    }

    #[test]
    fn rendering_is_deterministic() {
        let corpus = corpus();
        let foo = ranked("foo", 3);
        let bar = ranked("bar", 7);
        let a = Selection {
            definitions: vec![&foo, &bar],
            files: vec![],
        };
        let b = Selection {
            definitions: vec![&bar, &foo],
            files: vec![],
        };
        for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::Markdown] {
            let options = RenderOptions {
                format,
                ..RenderOptions::default()
            };
            assert_eq!(
                render(&a, &corpus, &options).unwrap(),
                render(&b, &corpus, &options).unwrap()
            );
        }
    }

    #[test]
    fn long_lines_are_clipped() {
        assert_eq!(clip("abcdef   ", 3), "abc");
        assert_eq!(clip("ab", 3), "ab");
        assert_eq!(clip("ééééé", 2), "éé");
    }

    #[test]
    fn markdown_fences_by_language() {
        let corpus = corpus();
        let foo = ranked("foo", 3);
        let options = RenderOptions {
            format: OutputFormat::Markdown,
            ..RenderOptions::default()
        };
        let md = render(
            &Selection {
                definitions: vec![&foo],
                files: vec![],
            },
            &corpus,
            &options,
        )
        .unwrap();
        assert!(md.starts_with("# Repository Map\n"));
        assert!(md.contains("## `a.py`\n\n```python\n"));
        assert!(md.contains("## `chat.py`\n"));
    }

    #[test]
    fn json_has_snippets() {
        let corpus = corpus();
        let foo = ranked("foo", 3);
        let options = RenderOptions {
            format: OutputFormat::Json,
            ..RenderOptions::default()
        };
        let json = render(
            &Selection {
                definitions: vec![&foo],
                files: vec![],
            },
            &corpus,
            &options,
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let files = value["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["path"], "a.py");
        assert_eq!(files[0]["definitions"][0]["kind"], "fn");
        assert_eq!(files[0]["snippets"][0]["startLine"], 2);
        assert_eq!(files[0]["snippets"][0]["lines"][1], "def foo():");
        assert_eq!(files[1]["tier"], "chat");
    }

    #[test]
    fn unreadable_file_falls_back_to_signatures() {
        let corpus = Corpus::new(vec![CorpusFile {
            path: PathBuf::from("a.py"),
            abs_path: PathBuf::from("/repo/a.py"),
            tier: Tier::Other,
            language: Language::Python,
            content: String::new(),
            tags: vec![Tag::definition("a.py", "foo", 3, SyntaxCategory::Function)],
        }])
        .unwrap();
        let foo = ranked("foo", 3);
        let text = render(
            &Selection {
                definitions: vec![&foo],
                files: vec![],
            },
            &corpus,
            &RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(text, "a.py:\n\u{2502}def foo()\n");
    }
}
