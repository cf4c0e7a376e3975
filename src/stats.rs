//! Index overview for `lore stats` and the `status` tool.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::timeline::breadcrumb_year;

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    /// Chunks carrying a temporal breadcrumb, i.e. visible to the timeline.
    pub temporal_chunks: i64,
    pub last_indexed: Option<i64>,
    pub db_size_bytes: u64,
}

pub async fn collect_stats(config: &Config) -> Result<IndexSummary> {
    let pool = db::connect(config).await?;

    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(&pool)
        .await?;
    let last_indexed: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_at) FROM checkpoints")
        .fetch_one(&pool)
        .await?;

    let texts: Vec<String> = sqlx::query_scalar("SELECT text FROM chunks")
        .fetch_all(&pool)
        .await?;
    let temporal_chunks = texts
        .iter()
        .filter(|t| breadcrumb_year(t).is_some())
        .count() as i64;

    pool.close().await;

    Ok(IndexSummary {
        documents,
        chunks,
        embedded,
        temporal_chunks,
        last_indexed,
        db_size_bytes: std::fs::metadata(&config.db.path)
            .map(|m| m.len())
            .unwrap_or(0),
    })
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let s = collect_stats(config).await?;

    println!("Lorekeeper index");
    println!("================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(s.db_size_bytes));
    println!();
    println!("  Documents:   {}", s.documents);
    println!("  Chunks:      {}", s.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        s.embedded,
        s.chunks,
        percent(s.embedded, s.chunks)
    );
    println!("  Temporal:    {} chunks on the timeline", s.temporal_chunks);
    println!(
        "  Last index:  {}",
        s.last_indexed
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    Ok(())
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style; falls back to a date beyond 30 days or in the future.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    match delta {
        d if d < 0 || d >= 86400 * 30 => chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string()),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86400 => plural(d / 3600, "hour"),
        d => plural(d / 86400, "day"),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert_eq!(format_ts_relative(now - 3 * 86400), "3 days ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(3, 0), 0);
    }
}
