//! Stored document lookup for `lore get`.
//!
//! A document is addressed by its UUID or by its source path relative to
//! the connector root. The body shown is the stored one, breadcrumbs
//! included.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::Row;

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub title: Option<String>,
    pub updated_at: String, // ISO8601
    pub content_type: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub index: i64,
    pub text: String,
}

pub async fn get_document(config: &Config, id_or_path: &str) -> Result<DocumentResponse> {
    let pool = db::connect(config).await?;

    let doc_row = sqlx::query(
        r#"
        SELECT id, source, source_id, title, updated_at, content_type, body, metadata_json
        FROM documents
        WHERE id = ? OR source_id = ?
        ORDER BY (id = ?) DESC
        LIMIT 1
        "#,
    )
    .bind(id_or_path)
    .bind(id_or_path)
    .bind(id_or_path)
    .fetch_optional(&pool)
    .await?;

    let Some(doc_row) = doc_row else {
        pool.close().await;
        bail!("document not found: {}", id_or_path);
    };

    let id: String = doc_row.get("id");
    let metadata_json: String = doc_row.get("metadata_json");

    let chunks = sqlx::query(
        "SELECT chunk_index, text FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
    )
    .bind(&id)
    .fetch_all(&pool)
    .await?
    .iter()
    .map(|row| ChunkResponse {
        index: row.get("chunk_index"),
        text: row.get("text"),
    })
    .collect();

    pool.close().await;

    Ok(DocumentResponse {
        id,
        source: doc_row.get("source"),
        source_id: doc_row.get("source_id"),
        title: doc_row.get("title"),
        updated_at: format_ts_iso(doc_row.get("updated_at")),
        content_type: doc_row.get("content_type"),
        body: doc_row.get("body"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        chunks,
    })
}

pub async fn run_get(config: &Config, id_or_path: &str, json: bool) -> Result<()> {
    let doc = get_document(config, id_or_path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!(
        "title:        {}",
        doc.title.as_deref().unwrap_or("(untitled)")
    );
    println!("source_id:    {}", doc.source_id);
    println!("updated_at:   {}", doc.updated_at);
    println!("content_type: {}", doc.content_type);
    println!("metadata:     {}", doc.metadata);
    println!();

    println!("--- Body ---");
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {}]", chunk.index);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
