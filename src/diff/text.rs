//! Rendered-text snapshots and line-oriented comparison.

use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

use super::{Diff, SnapshotStrategy};

/// A titled block of lines in a rendered snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub lines: Vec<String>,
}

impl Section {
    /// Creates a section with a heading and its body lines.
    pub fn new(title: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            title: title.into(),
            lines,
        }
    }
}

/// Human-readable form of a value: its kind plus titled sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendering {
    pub kind: String,
    pub sections: Vec<Section>,
}

impl Rendering {
    /// Formats the rendering as the stored text block.
    ///
    /// ```text
    /// # Snapshot: <kind>
    ///
    /// ## <title>
    /// <lines>
    /// ```
    pub fn to_text(&self) -> String {
        let mut out = format!("# Snapshot: {}\n", self.kind);
        for section in &self.sections {
            out.push_str(&format!("\n## {}\n", section.title));
            for line in &section.lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// Turns values into [`Rendering`]s. Must be deterministic.
pub trait Renderer<T: ?Sized> {
    fn render(&self, value: &T) -> Result<Rendering>;
}

/// Renders any `Serialize` value as a structure outline plus pretty JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeRenderer;

impl<T: Serialize + ?Sized> Renderer<T> for SerdeRenderer {
    fn render(&self, value: &T) -> Result<Rendering> {
        let tree = serde_json::to_value(value)?;
        let content = serde_json::to_string_pretty(&tree)?
            .lines()
            .map(str::to_string)
            .collect();
        Ok(Rendering {
            kind: short_type_name(std::any::type_name::<T>()),
            sections: vec![
                Section::new("Structure", outline(&tree)),
                Section::new("Content", content),
            ],
        })
    }
}

/// Renders any `Display` value as its text, one section.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayRenderer;

impl<T: Display + ?Sized> Renderer<T> for DisplayRenderer {
    fn render(&self, value: &T) -> Result<Rendering> {
        let text = value.to_string();
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        Ok(Rendering {
            kind: short_type_name(std::any::type_name::<T>()),
            sections: vec![
                Section::new("Structure", vec![format!("{} lines", lines.len())]),
                Section::new("Content", lines),
            ],
        })
    }
}

/// Drops module paths: `alloc::vec::Vec<my::Row>` becomes `Vec<Row>`.
fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut token = String::new();
    let flush = |token: &mut String, out: &mut String| {
        out.push_str(token.rsplit("::").next().unwrap_or_default());
        token.clear();
    };
    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            token.push(c);
        } else {
            flush(&mut token, &mut out);
            out.push(c);
        }
    }
    flush(&mut token, &mut out);
    out
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn summary(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let mut kinds: Vec<&str> = items.iter().map(json_type).collect();
            kinds.sort_unstable();
            kinds.dedup();
            match kinds.as_slice() {
                [] => "array[0]".to_string(),
                [kind] => format!("array[{}] of {}", items.len(), kind),
                _ => format!("array[{}] of mixed", items.len()),
            }
        }
        Value::Object(fields) => format!("object with {} fields", fields.len()),
        other => json_type(other).to_string(),
    }
}

/// Shape of a value: one line for the root, one per top-level field.
fn outline(tree: &Value) -> Vec<String> {
    let mut lines = vec![summary(tree)];
    if let Value::Object(fields) = tree {
        for (key, value) in fields {
            lines.push(format!("  {}: {}", key, summary(value)));
        }
    }
    lines
}

/// Stores a rendered text block and compares it line by line.
#[derive(Debug, Clone, Default)]
pub struct RenderedText<R = SerdeRenderer> {
    renderer: R,
}

impl RenderedText<SerdeRenderer> {
    /// Renders values through their serde representation.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R> RenderedText<R> {
    /// Uses a custom renderer.
    pub fn with_renderer(renderer: R) -> Self {
        Self { renderer }
    }
}

impl<T: ?Sized, R: Renderer<T>> SnapshotStrategy<T> for RenderedText<R> {
    fn extension(&self) -> &str {
        "txt"
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        Ok(self.renderer.render(value)?.to_text().into_bytes())
    }

    fn compare(&self, stored: &[u8], value: &T) -> Result<Diff> {
        let old = String::from_utf8_lossy(stored);
        let new = self.renderer.render(value)?.to_text();
        Ok(line_diff(&old, &new))
    }
}

/// Compares two texts line by line, reporting 1-based line numbers.
pub(crate) fn line_diff(old: &str, new: &str) -> Diff {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();
    let mut diff = Diff::default();
    for i in 0..old.len().max(new.len()) {
        let (a, b) = (old.get(i), new.get(i));
        if a != b {
            diff.push(
                format!("line {}", i + 1),
                a.map(|s| s.to_string()),
                b.map(|s| s.to_string()),
            );
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Table {
        columns: Vec<String>,
        rows: usize,
        weights: Vec<f64>,
    }

    fn table() -> Table {
        Table {
            columns: vec!["id".to_string(), "score".to_string()],
            rows: 2,
            weights: vec![0.5, 1.5],
        }
    }

    #[test]
    fn rendering_starts_with_header_and_has_sections() {
        let text = SerdeRenderer.render(&table()).unwrap().to_text();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# Snapshot: Table"));
        assert!(text.contains("\n## Structure\nobject with 3 fields\n"));
        assert!(text.contains("  columns: array[2] of string\n"));
        assert!(text.contains("  weights: array[2] of float\n"));
        assert!(text.contains("\n## Content\n{\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut map = BTreeMap::new();
        map.insert("z", 1);
        map.insert("a", 2);
        let first = SerdeRenderer.render(&map).unwrap().to_text();
        let second = SerdeRenderer.render(&map).unwrap().to_text();
        assert_eq!(first, second);
    }

    #[test]
    fn short_type_names_drop_paths() {
        assert_eq!(short_type_name("alloc::vec::Vec<my::Row>"), "Vec<Row>");
        assert_eq!(
            short_type_name("std::collections::BTreeMap<&str, i32>"),
            "BTreeMap<&str, i32>"
        );
        assert_eq!(short_type_name("f64"), "f64");
    }

    #[test]
    fn line_diff_reports_changed_lines() {
        let diff = line_diff("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(diff.len(), 1);
        assert_eq!(diff.entries[0].location, "line 2");
        assert_eq!(diff.entries[0].old.as_deref(), Some("b"));
        assert_eq!(diff.entries[0].new.as_deref(), Some("B"));
    }

    #[test]
    fn line_diff_marks_missing_lines_absent() {
        let diff = line_diff("a\n", "a\nb\nc\n");
        assert_eq!(diff.len(), 2);
        assert_eq!(diff.entries[0].old, None);
        assert_eq!(diff.entries[1].location, "line 3");

        let diff = line_diff("a\nb\n", "a\n");
        assert_eq!(diff.entries[0].new, None);
    }

    #[test]
    fn rendered_strategy_detects_content_change() {
        let strategy = RenderedText::new();
        let stored = strategy.encode(&table()).unwrap();
        assert!(strategy.compare(&stored, &table()).unwrap().is_empty());

        let mut changed = table();
        changed.weights[1] = 2.5;
        let diff = strategy.compare(&stored, &changed).unwrap();
        assert!(!diff.is_empty());
        assert!(diff.entries.iter().any(|d| d.new.as_deref() == Some("    2.5")));
    }

    #[test]
    fn display_renderer_uses_text_lines() {
        let strategy = RenderedText::with_renderer(DisplayRenderer);
        let stored = strategy.encode("mean 4.2\nsd 1.1").unwrap();
        let text = String::from_utf8(stored).unwrap();
        assert!(text.starts_with("# Snapshot: str\n"));
        assert!(text.contains("## Content\nmean 4.2\nsd 1.1\n"));
    }
}
