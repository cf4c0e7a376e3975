//! Heading breadcrumb injection.
//!
//! Markdown-aware chunkers split at heading boundaries and every chunk loses
//! the headings above it: two sections both titled "Installation" become
//! indistinguishable. Before chunking, [`inject_breadcrumbs`] writes the full
//! ancestor chain as a plain-text line directly under each heading:
//!
//! ```text
//! # User Guide
//! ## Installation
//! [User Guide > Installation]
//!
//! ### Windows
//! [User Guide > Installation > Windows]
//!
//! Follow these steps...
//! ```
//!
//! Titles go through [`normalize_title`](crate::temporal::normalize_title),
//! so a root heading `# 6050` still gets a `[Year 6050]` tag even though it
//! has no ancestors. The heading lines themselves are never rewritten.

use crate::heading::parse_heading;
use crate::models::SourceItem;
use crate::temporal::normalize_title;

/// Currently open heading ancestry while scanning a document.
///
/// Levels are strictly increasing from the outermost entry to the innermost.
#[derive(Debug, Default, Clone)]
pub struct HierarchyStack {
    entries: Vec<(u8, String)>,
}

impl HierarchyStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a heading at `level`, closing siblings and deeper descendants.
    pub fn enter(&mut self, level: u8, title: String) {
        while let Some((last, _)) = self.entries.last() {
            if *last >= level {
                self.entries.pop();
            } else {
                break;
            }
        }
        self.entries.push((level, title));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(u8, String)] {
        &self.entries
    }

    /// Titles joined outer-to-inner with `" > "`.
    pub fn trail(&self) -> String {
        self.entries
            .iter()
            .map(|(_, title)| title.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

/// Whether `line` has the shape of an injected breadcrumb.
pub fn is_breadcrumb_line(line: &str) -> bool {
    let line = line.trim_end();
    line.len() > 2 && line.starts_with('[') && line.ends_with(']')
}

/// Rewrite `text` with a breadcrumb line under every heading.
///
/// Content lines are copied unchanged. A breadcrumb already present directly
/// under its heading is not injected a second time, so annotating annotated
/// text is a no-op.
pub fn inject_breadcrumbs(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut stack = HierarchyStack::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(heading) = parse_heading(line) else {
            out.push((*line).to_string());
            continue;
        };

        let normalized = normalize_title(&heading.title);
        let is_temporal = normalized.is_temporal();
        stack.enter(heading.level, normalized.text);
        out.push((*line).to_string());

        let crumb = if stack.len() > 1 || is_temporal {
            format!("[{}]", stack.trail())
        } else {
            continue;
        };

        if lines.get(i + 1).map(|next| next.trim_end()) == Some(crumb.as_str()) {
            continue;
        }

        out.push(crumb);
        out.push(String::new());
    }

    out.join("\n")
}

/// Inject breadcrumbs into every item's body.
///
/// Items are taken by value and returned with only `body` changed; source
/// identifiers and metadata pass through untouched.
pub fn annotate(items: Vec<SourceItem>) -> Vec<SourceItem> {
    items
        .into_iter()
        .map(|mut item| {
            item.body = inject_breadcrumbs(&item.body);
            tracing::debug!(source_id = %item.source_id, "annotated document");
            item
        })
        .collect()
}
