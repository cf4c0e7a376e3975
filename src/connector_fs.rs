//! Filesystem document loader.
//!
//! Walks `[connectors.filesystem] root`, filters by glob, and turns each
//! matching file into a [`SourceItem`]. Markdown and text are read as-is;
//! PDFs are extracted and rendered to Markdown so their headings reach the
//! breadcrumb injector. Files that cannot be extracted are skipped and
//! counted, never fatal.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::{Config, FilesystemConnectorConfig};
use crate::extract::{
    check_size, extract_elements, extract_text, render_markdown, ExtractError, MIME_MARKDOWN,
    MIME_PDF, MIME_TEXT,
};
use crate::models::SourceItem;

pub const SOURCE_NAME: &str = "filesystem";

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/__pycache__/**",
    "**/target/**",
    "**/node_modules/**",
    "**/*.png",
    "**/*.jpg",
    "**/*.jpeg",
    "**/*.gif",
];

/// Loaded items plus the number of files that could not be extracted.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub items: Vec<SourceItem>,
    pub extraction_skipped: usize,
}

pub fn scan_filesystem(config: &Config) -> Result<ScanResult> {
    let fs_config = config
        .connectors
        .filesystem
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Filesystem connector not configured"))?;

    scan_root(fs_config)
}

/// Scan one filesystem root with the given settings.
pub fn scan_root(fs_config: &FilesystemConnectorConfig) -> Result<ScanResult> {
    let root = &fs_config.root;
    if !root.exists() {
        bail!(
            "Filesystem connector root does not exist: {}",
            root.display()
        );
    }

    let include_set = build_globset(&fs_config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(fs_config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let max_depth = if fs_config.recursive { usize::MAX } else { 1 };
    let mut candidates = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(fs_config.follow_symlinks)
        .max_depth(max_depth)
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        candidates.push((path.to_path_buf(), rel_str));
    }

    candidates.sort_by(|a, b| a.1.cmp(&b.1));
    if let Some(max) = fs_config.max_files {
        candidates.truncate(max);
    }

    let mut result = ScanResult::default();
    for (path, rel_str) in candidates {
        match file_to_source_item(&path, &rel_str, fs_config.max_extract_bytes) {
            Ok(item) => result.items.push(item),
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "skipping file");
                result.extraction_skipped += 1;
            }
        }
    }

    Ok(result)
}

/// Content type for a path, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "md" | "markdown" => MIME_MARKDOWN,
        _ => MIME_TEXT,
    }
}

fn file_to_source_item(
    path: &Path,
    relative_path: &str,
    max_extract_bytes: u64,
) -> Result<SourceItem> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    check_size(metadata.len(), max_extract_bytes)?;

    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let content_type = content_type_for(path);
    let body = read_body(&bytes, content_type)?;

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(SourceItem {
        source: SOURCE_NAME.to_string(),
        source_id: relative_path.to_string(),
        source_url: Some(format!("file://{}", path.display())),
        title: Some(title),
        author: None,
        created_at: modified,
        updated_at: modified,
        // PDFs are stored as the Markdown rendered from them.
        content_type: if content_type == MIME_PDF {
            MIME_MARKDOWN.to_string()
        } else {
            content_type.to_string()
        },
        body,
        metadata_json: serde_json::json!({ "source_path": relative_path }).to_string(),
        raw_json: None,
    })
}

fn read_body(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    let text = extract_text(bytes, content_type)?;
    if content_type == MIME_PDF {
        return Ok(render_markdown(&extract_elements(&text)));
    }
    Ok(text)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}
