//! Database persistence for rate limit state.
//!
//! Backoff earned against a platform should survive process restarts, so a
//! fresh run does not immediately hammer a platform that was throttling us
//! minutes ago.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::bucket::PlatformBucket;
use super::RateLimiter;

/// Open a database connection with proper concurrency settings.
fn open_db(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 30000;
    "#,
    )?;
    Ok(conn)
}

/// Initialize the rate limit table in the database.
pub fn init_rate_limit_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limit_state (
            platform TEXT PRIMARY KEY,
            backoff_multiplier REAL NOT NULL,
            in_backoff INTEGER NOT NULL DEFAULT 0,
            total_requests INTEGER NOT NULL DEFAULT 0,
            throttle_hits INTEGER NOT NULL DEFAULT 0,
            block_hits INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
    "#,
    )?;
    Ok(())
}

/// Load persisted rate limit state into a limiter.
///
/// Only platforms still in backoff carry meaningful state; healthy platforms
/// start fresh. Admission slots and cooldown instants are monotonic and
/// cannot be restored across processes.
pub async fn load_rate_limit_state(limiter: &RateLimiter, db_path: &Path) -> anyhow::Result<usize> {
    // Collect rows before touching the limiter so no database handle is
    // held across an await.
    let rows: Vec<(String, f64, bool, u64, u64, u64)> = {
        let conn = open_db(db_path)?;
        init_rate_limit_table(&conn)?;

        let mut stmt = conn.prepare(
            "SELECT platform, backoff_multiplier, in_backoff, total_requests, throttle_hits, block_hits
             FROM rate_limit_state",
        )?;
        let mapped = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i32>(2)? != 0,
                row.get::<_, i64>(3)? as u64,
                row.get::<_, i64>(4)? as u64,
                row.get::<_, i64>(5)? as u64,
            ))
        })?;
        mapped.collect::<Result<_, _>>()?
    };

    let mut count = 0;
    for (platform, multiplier, in_backoff, total_requests, throttle_hits, block_hits) in rows {
        if !in_backoff && multiplier <= 1.0 {
            continue;
        }

        let mut bucket = PlatformBucket::new(limiter.base_delay());
        bucket.backoff_multiplier = multiplier;
        bucket.in_backoff = in_backoff;
        bucket.total_requests = total_requests;
        bucket.throttle_hits = throttle_hits;
        bucket.block_hits = block_hits;

        info!(
            "restored rate limit state for {}: x{:.2}, in_backoff={}",
            platform, multiplier, in_backoff
        );
        limiter.restore_bucket(platform, bucket).await;
        count += 1;
    }

    if count > 0 {
        info!("loaded rate limit state for {} platforms", count);
    }
    Ok(count)
}

/// Save rate limit state to the database.
///
/// Healthy platforms are pruned so the table only holds platforms with
/// meaningful backoff.
pub async fn save_rate_limit_state(limiter: &RateLimiter, db_path: &Path) -> anyhow::Result<usize> {
    let buckets = limiter.snapshot_buckets().await;

    let conn = open_db(db_path)?;
    init_rate_limit_table(&conn)?;
    let mut count = 0;

    for (platform, bucket) in buckets.iter() {
        if !bucket.in_backoff && bucket.backoff_multiplier <= 1.0 {
            continue;
        }
        conn.execute(
            r#"INSERT OR REPLACE INTO rate_limit_state
               (platform, backoff_multiplier, in_backoff, total_requests, throttle_hits, block_hits, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)"#,
            params![
                platform,
                bucket.backoff_multiplier,
                bucket.in_backoff as i32,
                bucket.total_requests as i64,
                bucket.throttle_hits as i64,
                bucket.block_hits as i64,
            ],
        )?;
        count += 1;
    }

    conn.execute(
        "DELETE FROM rate_limit_state WHERE in_backoff = 0 AND backoff_multiplier <= 1.0",
        [],
    )?;

    if count > 0 {
        debug!("saved rate limit state for {} platforms", count);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{Outcome, RateLimitConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db");

        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(50),
            ..Default::default()
        });
        limiter.acquire("ticketmax").await;
        limiter.report_outcome("ticketmax", Outcome::Throttled).await;
        limiter.acquire("calmsite").await;
        limiter.report_outcome("calmsite", Outcome::Success).await;

        let saved = save_rate_limit_state(&limiter, &db_path).await.unwrap();
        assert_eq!(saved, 1);

        let restored = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(50),
            ..Default::default()
        });
        let loaded = load_rate_limit_state(&restored, &db_path).await.unwrap();
        assert_eq!(loaded, 1);

        let stats = restored.stats().await;
        assert!(stats.contains_key("ticketmax"));
        assert!(!stats.contains_key("calmsite"));
        assert!(stats["ticketmax"].backoff_multiplier > 1.0);
    }
}
