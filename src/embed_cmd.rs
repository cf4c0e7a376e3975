//! `lore embed pending|rebuild` and inline embedding during indexing.
//!
//! A chunk's embedding is stale when the hash stored next to it differs from
//! the chunk's current text hash; only missing or stale chunks are sent to
//! the provider. Batch failures are logged and counted, never fatal.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::Chunk;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedStats {
    pub embedded: u64,
    pub failed: u64,
}

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    hash: String,
}

fn require_enabled(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    Ok(())
}

/// Embed chunks that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    require_enabled(config)?;

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let pending = find_pending_chunks(&pool, provider.model_name(), limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    let stats = embed_batches(&pool, provider.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", pending.len());
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    pool.close().await;
    Ok(())
}

/// Drop every stored vector and embed all chunks again.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    require_enabled(config)?;

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM embeddings").execute(&mut *tx).await?;
    tx.commit().await?;

    let all_chunks = find_pending_chunks(&pool, provider.model_name(), None).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    let stats = embed_batches(&pool, provider.as_ref(), &all_chunks, batch_size).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", all_chunks.len());
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    pool.close().await;
    Ok(())
}

async fn embed_batches(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    chunks: &[PendingChunk],
    batch_size: usize,
) -> Result<EmbedStats> {
    let mut stats = EmbedStats::default();

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match provider.embed(&texts).await {
            Ok(vectors) => {
                for (item, vector) in batch.iter().zip(vectors.iter()) {
                    upsert_embedding(
                        pool,
                        &item.chunk_id,
                        &item.document_id,
                        provider,
                        &item.hash,
                        vector,
                    )
                    .await?;
                    stats.embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, size = batch.len(), "embedding batch failed");
                stats.failed += batch.len() as u64;
            }
        }
    }

    Ok(stats)
}

/// Embed freshly written chunks during `lore index`.
///
/// Returns `(embedded, pending)`; chunks whose stored hash already matches
/// count as embedded.
pub async fn embed_chunks_inline(
    provider: Option<&dyn EmbeddingProvider>,
    batch_size: usize,
    pool: &SqlitePool,
    chunks: &[Chunk],
) -> (u64, u64) {
    let Some(provider) = provider else {
        return (0, 0);
    };

    let mut embedded = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(batch_size.max(1)) {
        let mut need_embedding = Vec::new();
        for chunk in batch {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT hash FROM embeddings WHERE chunk_id = ? AND model = ?")
                    .bind(&chunk.id)
                    .bind(provider.model_name())
                    .fetch_optional(pool)
                    .await
                    .unwrap_or(None);

            if existing.as_deref() == Some(chunk.hash.as_str()) {
                embedded += 1;
            } else {
                need_embedding.push(chunk);
            }
        }

        if need_embedding.is_empty() {
            continue;
        }

        let texts: Vec<String> = need_embedding.iter().map(|c| c.text.clone()).collect();
        match provider.embed(&texts).await {
            Ok(vectors) => {
                for (chunk, vector) in need_embedding.iter().zip(vectors.iter()) {
                    let stored = upsert_embedding(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        provider,
                        &chunk.hash,
                        vector,
                    )
                    .await;
                    match stored {
                        Ok(()) => embedded += 1,
                        Err(e) => {
                            tracing::warn!(chunk_id = %chunk.id, error = %e, "failed to store embedding");
                            pending += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "inline embedding failed; run `lore embed pending` later");
                pending += need_embedding.len() as u64;
            }
        }
    }

    (embedded, pending)
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(-1);

    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect())
}

async fn upsert_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    provider: &dyn EmbeddingProvider,
    text_hash: &str,
    vector: &[f32],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            created_at = excluded.created_at,
            hash = excluded.hash
        "#,
    )
    .bind(chunk_id)
    .bind(provider.model_name())
    .bind(provider.dims() as i64)
    .bind(now)
    .bind(text_hash)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(embedding::vec_to_blob(vector))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
