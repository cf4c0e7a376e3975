//! Index build: load → annotate → chunk → store → embed.
//!
//! Documents are upserted by `(source, source_id)` and their chunks (plus
//! FTS rows and any stale vectors) are replaced in one transaction. A
//! checkpoint holding the newest modification time makes later runs
//! incremental unless `--full` is given.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::breadcrumb;
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::connector_fs::{self, SOURCE_NAME};
use crate::db;
use crate::embed_cmd;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::{Chunk, SourceItem};

/// Counts reported by one index build.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub documents_ingested: u64,
    pub chunks_indexed: u64,
    pub embeddings_written: u64,
    pub embeddings_pending: u64,
    pub extraction_skipped: u64,
}

/// Scan the filesystem connector and index what changed.
pub async fn build_index(config: &Config, full: bool, limit: Option<usize>) -> Result<IndexStats> {
    let pool = db::connect(config).await?;

    let checkpoint = if full {
        None
    } else {
        get_checkpoint(&pool, SOURCE_NAME).await?
    };

    let scan = connector_fs::scan_filesystem(config)?;
    let mut items = filter_items(scan.items, checkpoint, limit);
    if items.is_empty() {
        tracing::warn!("No documents loaded after filtering.");
    }
    if config.chunking.breadcrumbs {
        items = breadcrumb::annotate(items);
    }

    let mut stats = index_documents(config, &pool, &items).await?;
    stats.extraction_skipped = scan.extraction_skipped as u64;

    let newest = items
        .iter()
        .map(|item| item.updated_at.timestamp())
        .max()
        .unwrap_or(0)
        .max(checkpoint.unwrap_or(0));
    set_checkpoint(&pool, SOURCE_NAME, newest).await?;

    pool.close().await;
    Ok(stats)
}

fn filter_items(
    mut items: Vec<SourceItem>,
    checkpoint: Option<i64>,
    limit: Option<usize>,
) -> Vec<SourceItem> {
    if let Some(cp) = checkpoint {
        items.retain(|item| item.updated_at.timestamp() > cp);
    }
    if let Some(lim) = limit {
        items.truncate(lim);
    }
    items
}

/// Chunk and store already-annotated items.
///
/// Items are stored as given; callers decide whether breadcrumbs are
/// injected first.
pub async fn index_documents(
    config: &Config,
    pool: &SqlitePool,
    items: &[SourceItem],
) -> Result<IndexStats> {
    let provider: Option<Box<dyn EmbeddingProvider>> = if config.embedding.is_enabled() {
        match embedding::create_provider(&config.embedding) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(error = %e, "could not create embedding provider");
                None
            }
        }
    } else {
        None
    };

    let mut stats = IndexStats::default();

    for item in items {
        let doc_id = upsert_document(pool, item).await?;
        let chunks = chunk_text(
            &doc_id,
            &item.body,
            config.chunking.max_tokens,
            config.chunking.overlap_tokens,
        );
        replace_chunks(pool, &doc_id, &chunks).await?;

        if config.embedding.is_enabled() {
            let (ok, pending) = match provider.as_deref() {
                Some(p) => {
                    embed_cmd::embed_chunks_inline(Some(p), config.embedding.batch_size, pool, &chunks)
                        .await
                }
                None => (0, chunks.len() as u64),
            };
            stats.embeddings_written += ok;
            stats.embeddings_pending += pending;
        }

        tracing::debug!(
            source_id = %item.source_id,
            chunks = chunks.len(),
            "document indexed"
        );
        stats.documents_ingested += 1;
        stats.chunks_indexed += chunks.len() as u64;
    }

    Ok(stats)
}

/// CLI entry point for `lore index`.
pub async fn run_index(
    config: &Config,
    full: bool,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    if dry_run {
        let scan = connector_fs::scan_filesystem(config)?;
        let items = filter_items(scan.items, None, limit);
        let items = if config.chunking.breadcrumbs {
            breadcrumb::annotate(items)
        } else {
            items
        };
        let estimated: usize = items
            .iter()
            .map(|item| {
                chunk_text(
                    "dry-run",
                    &item.body,
                    config.chunking.max_tokens,
                    config.chunking.overlap_tokens,
                )
                .len()
            })
            .sum();
        println!("index (dry-run)");
        println!("  documents found: {}", items.len());
        println!("  extraction skipped: {}", scan.extraction_skipped);
        println!("  estimated chunks: {}", estimated);
        return Ok(());
    }

    let stats = build_index(config, full, limit).await?;

    println!("index");
    println!("  documents ingested: {}", stats.documents_ingested);
    println!("  chunks indexed: {}", stats.chunks_indexed);
    println!("  extraction skipped: {}", stats.extraction_skipped);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", stats.embeddings_written);
        println!("  embeddings pending: {}", stats.embeddings_pending);
    }
    println!("ok");

    Ok(())
}

async fn upsert_document(pool: &SqlitePool, item: &SourceItem) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(item.source.as_bytes());
    hasher.update(item.source_id.as_bytes());
    hasher.update(item.updated_at.timestamp().to_le_bytes());
    hasher.update(item.body.as_bytes());
    let dedup_hash = format!("{:x}", hasher.finalize());

    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source = ? AND source_id = ?")
            .bind(&item.source)
            .bind(&item.source_id)
            .fetch_optional(pool)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, source_url, title, author, created_at, updated_at, content_type, body, metadata_json, raw_json, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            source_url = excluded.source_url,
            title = excluded.title,
            author = excluded.author,
            updated_at = excluded.updated_at,
            content_type = excluded.content_type,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            raw_json = excluded.raw_json,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&item.source)
    .bind(&item.source_id)
    .bind(&item.source_url)
    .bind(&item.title)
    .bind(&item.author)
    .bind(item.created_at.timestamp())
    .bind(item.updated_at.timestamp())
    .bind(&item.content_type)
    .bind(&item.body)
    .bind(&item.metadata_json)
    .bind(&item.raw_json)
    .bind(&dedup_hash)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for stmt in [
        "DELETE FROM chunk_vectors WHERE document_id = ?",
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        "DELETE FROM chunks_fts WHERE document_id = ?",
        "DELETE FROM chunks WHERE document_id = ?",
    ] {
        sqlx::query(stmt).bind(document_id).execute(&mut *tx).await?;
    }

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<i64>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;

    Ok(result.and_then(|s| s.parse::<i64>().ok()))
}

async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor_val: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor_val.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesystemConnectorConfig;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(root: &Path, db: &Path) -> Config {
        let mut config = Config::minimal();
        config.db.path = db.to_path_buf();
        config.connectors.filesystem = Some(FilesystemConnectorConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.pdf".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            recursive: true,
            max_files: None,
            max_extract_bytes: 1024 * 1024,
        });
        config
    }

    async fn chunk_texts(config: &Config) -> Vec<String> {
        let pool = db::connect(config).await.unwrap();
        let texts = sqlx::query_scalar("SELECT text FROM chunks ORDER BY text")
            .fetch_all(&pool)
            .await
            .unwrap();
        pool.close().await;
        texts
    }

    #[tokio::test]
    async fn test_build_index_annotates_and_counts() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(
            docs.join("history.md"),
            "# History\n## 6050\nThe city was founded.\n",
        )
        .unwrap();
        std::fs::write(docs.join("broken.pdf"), "not a pdf").unwrap();

        let config = test_config(&docs, &tmp.path().join("db/lore.sqlite"));
        crate::migrate::run_migrations(&config).await.unwrap();

        let stats = build_index(&config, false, None).await.unwrap();
        assert_eq!(stats.documents_ingested, 1);
        assert_eq!(stats.extraction_skipped, 1);
        assert!(stats.chunks_indexed >= 1);

        let texts = chunk_texts(&config).await;
        assert!(texts.iter().any(|t| t.contains("[History > Year 6050]")));
    }

    #[tokio::test]
    async fn test_breadcrumbs_can_be_disabled() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("h.md"), "# History\n## 6050\nFounded.\n").unwrap();

        let mut config = test_config(tmp.path(), &tmp.path().join("lore.sqlite"));
        config.chunking.breadcrumbs = false;
        crate::migrate::run_migrations(&config).await.unwrap();
        build_index(&config, true, None).await.unwrap();

        let texts = chunk_texts(&config).await;
        assert!(texts.iter().all(|t| !t.contains('[')));
    }

    #[tokio::test]
    async fn test_incremental_and_full_rebuild() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "# A\nalpha\n").unwrap();

        let config = test_config(&docs, &tmp.path().join("lore.sqlite"));
        crate::migrate::run_migrations(&config).await.unwrap();

        assert_eq!(build_index(&config, false, None).await.unwrap().documents_ingested, 1);
        assert_eq!(build_index(&config, false, None).await.unwrap().documents_ingested, 0);

        let full = build_index(&config, true, None).await.unwrap();
        assert_eq!(full.documents_ingested, 1);
        // Re-indexing replaces chunks rather than duplicating them
        assert_eq!(chunk_texts(&config).await.len() as u64, full.chunks_indexed);
    }

    #[test]
    fn test_filter_items_limit() {
        let item = |id: &str| SourceItem {
            source: SOURCE_NAME.to_string(),
            source_id: id.to_string(),
            source_url: None,
            title: None,
            author: None,
            created_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            updated_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            content_type: "text/markdown".to_string(),
            body: String::new(),
            metadata_json: "{}".to_string(),
            raw_json: None,
        };
        let items = vec![item("a"), item("b"), item("c")];
        assert_eq!(filter_items(items.clone(), None, Some(2)).len(), 2);
        assert!(filter_items(items, Some(0), None).is_empty());
    }
}
