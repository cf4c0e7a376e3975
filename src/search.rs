//! Chunk retrieval: keyword (FTS5 BM25), semantic (cosine) and hybrid.
//!
//! Hybrid scoring min-max normalises each channel's candidates to `[0, 1]`
//! and blends them as `(1 - α)·keyword + α·vector`; a chunk missing from a
//! channel scores 0 there. `keyword` mode is α = 0, `semantic` is α = 1.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::ContextChunk;
use crate::timeline::UNKNOWN_SOURCE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn needs_embeddings(&self) -> bool {
        !matches!(self, SearchMode::Keyword)
    }

    fn alpha(&self, hybrid_alpha: f64) -> f64 {
        match self {
            SearchMode::Keyword => 0.0,
            SearchMode::Semantic => 1.0,
            SearchMode::Hybrid => hybrid_alpha,
        }
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        })
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    chunk_id: String,
    raw_score: f64,
}

/// Retrieve the best matching chunks for `query`.
///
/// `limit` falls back to `[retrieval] final_limit`. A blank query returns
/// no chunks.
pub async fn retrieve_context(
    config: &Config,
    query: &str,
    mode: SearchMode,
    limit: Option<usize>,
) -> Result<Vec<ContextChunk>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    if mode.needs_embeddings() && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            mode
        );
    }

    let pool = db::connect(config).await?;
    let final_limit = limit.unwrap_or(config.retrieval.final_limit.max(1) as usize);

    let keyword = if mode != SearchMode::Semantic {
        fetch_keyword_candidates(&pool, query, config.retrieval.candidate_k_keyword).await?
    } else {
        Vec::new()
    };
    let vector = if mode != SearchMode::Keyword {
        fetch_vector_candidates(&pool, config, query, config.retrieval.candidate_k_vector).await?
    } else {
        Vec::new()
    };

    let mut ranked = merge_candidates(
        &keyword,
        &vector,
        mode.alpha(config.retrieval.hybrid_alpha),
    );
    ranked.truncate(final_limit);

    let mut results = Vec::with_capacity(ranked.len());
    for (chunk_id, score) in ranked {
        if let Some(chunk) = load_context_chunk(&pool, &chunk_id, score).await? {
            results.push(chunk);
        }
    }

    tracing::debug!(%mode, query, returned = results.len(), "retrieval done");
    pool.close().await;
    Ok(results)
}

/// Blend both channels into `(chunk_id, score)` ordered by score.
///
/// Ties keep first-seen order, keyword candidates before vector-only ones.
fn merge_candidates(keyword: &[Candidate], vector: &[Candidate], alpha: f64) -> Vec<(String, f64)> {
    let kw_map: HashMap<&str, f64> = normalize_scores(keyword)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(vector)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    let mut order: Vec<&str> = Vec::new();
    for c in keyword.iter().chain(vector.iter()) {
        if !order.contains(&c.chunk_id.as_str()) {
            order.push(&c.chunk_id);
        }
    }

    let mut scored: Vec<(String, f64)> = order
        .into_iter()
        .map(|id| {
            let k = kw_map.get(id).copied().unwrap_or(0.0);
            let v = vec_map.get(id).copied().unwrap_or(0.0);
            (id.to_string(), (1.0 - alpha) * k + alpha * v)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Turn free text into an FTS5 query that cannot be a syntax error.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let Some(match_expr) = fts_query(query) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(
        r#"
        SELECT chunk_id, rank
        FROM chunks_fts
        WHERE chunks_fts MATCH ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(match_expr)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            Candidate {
                chunk_id: row.get("chunk_id"),
                // bm25 rank is lower-is-better
                raw_score: -rank,
            }
        })
        .collect())
}

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<Candidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), query).await?;

    let rows = sqlx::query("SELECT chunk_id, embedding FROM chunk_vectors")
        .fetch_all(pool)
        .await?;

    let mut candidates: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            Candidate {
                chunk_id: row.get("chunk_id"),
                raw_score: embedding::cosine_similarity(&query_vec, &embedding::blob_to_vec(&blob))
                    as f64,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k.max(0) as usize);

    Ok(candidates)
}

async fn load_context_chunk(
    pool: &SqlitePool,
    chunk_id: &str,
    score: f64,
) -> Result<Option<ContextChunk>> {
    let row = sqlx::query(
        r#"
        SELECT c.id, c.document_id, c.text, d.metadata_json
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        WHERE c.id = ?
        "#,
    )
    .bind(chunk_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let metadata_json: String = row.get("metadata_json");
        let source_path = serde_json::from_str::<serde_json::Value>(&metadata_json)
            .ok()
            .and_then(|m| m.get("source_path")?.as_str().map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
        ContextChunk {
            chunk_id: row.get("id"),
            document_id: row.get("document_id"),
            content: row.get("text"),
            source_path,
            score,
        }
    }))
}

/// Min-max normalise scores to `[0, 1]`; equal scores all become 1.
fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// CLI entry point for `lore search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: SearchMode,
    limit: Option<usize>,
) -> Result<()> {
    let results = retrieve_context(config, query, mode, limit).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, chunk) in results.iter().enumerate() {
        let excerpt: String = chunk.content.chars().take(240).collect();
        println!("{}. [{:.2}] {}", i + 1, chunk.score, chunk.source_path);
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    document: {}", chunk.document_id);
        println!();
    }

    Ok(())
}
