//! Chronological queries over indexed chunks.
//!
//! The timeline does not look at headings again. It scans chunk text for the
//! breadcrumb lines written at index time (`[Timeline > Year 6050]`,
//! `[Date 6050-3-14]`, ...) and orders chunks by the first number found in
//! such a tag. Chunks without a temporal breadcrumb are not part of the
//! timeline, so this only works on content indexed with breadcrumbs enabled.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use sqlx::Row;
use std::sync::LazyLock;

use crate::config::Config;
use crate::db;
use crate::models::ContextChunk;

/// Fallback when a chunk carries no `source_path` metadata.
pub const UNKNOWN_SOURCE: &str = "unknown";

static BREADCRUMB_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[[^\]\n]*?\b(?:Years|Year|Date|circa Year)\s+(\d+)")
        .expect("breadcrumb year pattern is valid")
});

/// One point on the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub content: String,
    pub source_path: String,
    pub year: i64,
}

/// Anything the timeline can be built from.
pub trait IndexedChunk {
    fn content(&self) -> &str;
    fn source_path(&self) -> Option<&str>;
}

/// A chunk as stored in the index: its text plus its document's metadata.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub text: String,
    pub metadata: serde_json::Value,
}

impl IndexedChunk for StoredChunk {
    fn content(&self) -> &str {
        &self.text
    }

    fn source_path(&self) -> Option<&str> {
        self.metadata.get("source_path").and_then(|v| v.as_str())
    }
}

impl IndexedChunk for ContextChunk {
    fn content(&self) -> &str {
        &self.content
    }

    fn source_path(&self) -> Option<&str> {
        Some(&self.source_path)
    }
}

/// The year of the first temporal breadcrumb in `text`.
///
/// Returns `None` when there is no such breadcrumb or the number does not
/// fit in an `i64`.
pub fn breadcrumb_year(text: &str) -> Option<i64> {
    let caps = BREADCRUMB_YEAR_RE.captures(text)?;
    caps[1].parse::<i64>().ok()
}

/// Build a chronologically ordered timeline from `chunks`.
///
/// Both bounds are inclusive and optional. Entries with equal years keep
/// their input order. At most `limit` entries are returned.
pub fn retrieve_timeline<C: IndexedChunk>(
    chunks: &[C],
    start_year: Option<i64>,
    end_year: Option<i64>,
    limit: usize,
) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = chunks
        .iter()
        .filter_map(|chunk| {
            let year = breadcrumb_year(chunk.content())?;
            if start_year.is_some_and(|start| year < start) {
                return None;
            }
            if end_year.is_some_and(|end| year > end) {
                return None;
            }
            Some(TimelineEntry {
                content: chunk.content().to_string(),
                source_path: chunk.source_path().unwrap_or(UNKNOWN_SOURCE).to_string(),
                year,
            })
        })
        .collect();

    entries.sort_by_key(|e| e.year);
    entries.truncate(limit);
    entries
}

/// Read every stored chunk with its document metadata, in document order.
pub async fn load_chunks(config: &Config) -> Result<Vec<StoredChunk>> {
    let pool = db::connect(config).await?;

    let rows = sqlx::query(
        r#"
        SELECT c.text, d.metadata_json
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        ORDER BY d.source_id ASC, c.chunk_index ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let chunks = rows
        .iter()
        .map(|row| {
            let metadata_json: String = row.get("metadata_json");
            StoredChunk {
                text: row.get("text"),
                metadata: serde_json::from_str(&metadata_json)
                    .unwrap_or(serde_json::json!({})),
            }
        })
        .collect();

    pool.close().await;
    Ok(chunks)
}

/// Load the index and build a timeline from it.
///
/// `limit` falls back to `[timeline] default_limit`.
pub async fn fetch_timeline(
    config: &Config,
    start_year: Option<i64>,
    end_year: Option<i64>,
    limit: Option<usize>,
) -> Result<Vec<TimelineEntry>> {
    let chunks = load_chunks(config).await?;
    let limit = limit.unwrap_or(config.timeline.default_limit);
    let entries = retrieve_timeline(&chunks, start_year, end_year, limit);
    tracing::debug!(
        scanned = chunks.len(),
        returned = entries.len(),
        "timeline built"
    );
    Ok(entries)
}

/// CLI entry point for `lore timeline`.
pub async fn run_timeline(
    config: &Config,
    start_year: Option<i64>,
    end_year: Option<i64>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let entries = fetch_timeline(config, start_year, end_year, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No timeline entries.");
        return Ok(());
    }

    for (i, entry) in entries.iter().enumerate() {
        println!("{}. [{}] {}", i + 1, entry.year, entry.source_path);
        let excerpt: String = entry.content.chars().take(240).collect();
        println!("    {}", excerpt.replace('\n', " ").trim());
        println!();
    }

    Ok(())
}
