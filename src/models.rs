//! Core data models shared by the indexing and retrieval pipeline.
//!
//! A [`SourceItem`] is what a loader produces; the breadcrumb injector
//! rewrites its body, the chunker turns it into [`Chunk`]s, and retrieval
//! hands [`ContextChunk`]s back to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A loaded document before chunking.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub source: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content_type: String,
    pub body: String,
    /// JSON object; always carries `source_path` for filesystem documents.
    pub metadata_json: String,
    pub raw_json: Option<String>,
}

impl SourceItem {
    /// The `source_path` entry of the metadata, if any.
    pub fn source_path(&self) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(&self.metadata_json)
            .ok()?
            .get("source_path")?
            .as_str()
            .map(str::to_string)
    }
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A retrieved chunk handed to callers and to the answer prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub source_path: String,
    pub score: f64,
}
