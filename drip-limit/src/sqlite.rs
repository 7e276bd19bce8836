//! Buckets persisted in a SQLite database.
//!
//! All buckets of a database share one table per logical limiter; rows are
//! keyed by bucket name so that per-host buckets can live side by side. Writes
//! run inside `BEGIN IMMEDIATE` transactions, which serialises admission across
//! every process that opens the same file. A bucket without rates keeps only
//! its latest item.

use std::path::Path;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
pub use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteConnection;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::Bucket;
use crate::BucketError;
use crate::Rate;
use crate::RateItem;
use crate::bucket::check_weight;
use crate::bucket::validate_rates;

/// Table used when the caller does not name one.
pub const DEFAULT_TABLE: &str = "rate_bucket";

/// Opens (creating if needed) the database at `path`.
pub async fn connect(path: impl AsRef<Path>) -> Result<SqlitePool, BucketError> {
    let options = SqliteConnectOptions::new()
        .filename(path.as_ref())
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    debug!(path = %path.as_ref().display(), "Opening sqlite bucket database");
    Ok(SqlitePoolOptions::new().connect_with(options).await?)
}

#[derive(Debug)]
pub struct SqliteBucket {
    rates: Vec<Rate>,
    pool: SqlitePool,
    table: String,
    name: String,
}

impl SqliteBucket {
    /// Opens the database at `path` and binds a bucket called `name` in `table`.
    pub async fn open(
        rates: Vec<Rate>,
        path: impl AsRef<Path>,
        table: &str,
        name: &str,
    ) -> Result<Self, BucketError> {
        let pool = connect(path).await?;
        Self::with_pool(rates, pool, table, name).await
    }

    /// Binds a bucket called `name` in `table`, creating the table if missing.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::InvalidTable`] unless `table` consists only of
    /// ASCII letters, digits and underscores.
    pub async fn with_pool(
        rates: Vec<Rate>,
        pool: SqlitePool,
        table: &str,
        name: &str,
    ) -> Result<Self, BucketError> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(BucketError::InvalidTable(table.to_string()));
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (name TEXT NOT NULL, item_timestamp INTEGER NOT NULL)"
        ))
        .execute(&pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_name_ts ON {table} (name, item_timestamp)"
        ))
        .execute(&pool)
        .await?;

        Ok(Self {
            rates: validate_rates(rates)?,
            pool,
            table: table.to_string(),
            name: name.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn held_since(
        &self,
        conn: &mut SqliteConnection,
        since: i64,
    ) -> Result<usize, BucketError> {
        let held: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE name = ? AND item_timestamp > ?",
            self.table
        ))
        .bind(&self.name)
        .bind(since)
        .fetch_one(&mut *conn)
        .await?;
        Ok(held as usize)
    }

    async fn leak_until(
        &self,
        conn: &mut SqliteConnection,
        now: i64,
    ) -> Result<usize, BucketError> {
        // Without rates nothing is ever held, so every earlier item is expired.
        let until = match self.rates.last() {
            Some(largest) => now - largest.interval_ms() as i64,
            None => i64::MAX,
        };
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE name = ? AND item_timestamp <= ?",
            self.table
        ))
        .bind(&self.name)
        .bind(until)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn try_put(
        &self,
        conn: &mut SqliteConnection,
        item: &RateItem,
    ) -> Result<bool, BucketError> {
        let now = item.timestamp() as i64;
        self.leak_until(conn, now).await?;

        for rate in &self.rates {
            let held = self.held_since(conn, now - rate.interval_ms() as i64).await?;
            if held + item.weight() > rate.limit() {
                return Ok(false);
            }
        }

        let insert = format!(
            "INSERT INTO {} (name, item_timestamp) VALUES (?, ?)",
            self.table
        );
        for _ in 0..item.weight() {
            sqlx::query(&insert)
                .bind(&self.name)
                .bind(now)
                .execute(&mut *conn)
                .await?;
        }
        Ok(true)
    }
}

#[async_trait]
impl Bucket for SqliteBucket {
    fn rates(&self) -> &[Rate] {
        &self.rates
    }

    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    async fn put(&self, item: &RateItem) -> Result<bool, BucketError> {
        check_weight(&self.rates, item.weight())?;
        // Dropping the transaction unfinished (an error, or a cancelled
        // caller) rolls it back before the connection is reused.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let admitted = self.try_put(&mut *tx, item).await?;
        if admitted {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(admitted)
    }

    async fn waiting(&self, item: &RateItem) -> Result<Duration, BucketError> {
        check_weight(&self.rates, item.weight())?;
        let now = item.timestamp() as i64;
        let mut conn = self.pool.acquire().await?;

        let mut wait = 0;
        for rate in &self.rates {
            let interval = rate.interval_ms() as i64;
            let needed = self.held_since(&mut *conn, now - interval).await? + item.weight();
            if needed <= rate.limit() {
                continue;
            }
            let blocking: Option<i64> = sqlx::query_scalar(&format!(
                "SELECT item_timestamp FROM {} WHERE name = ? AND item_timestamp > ? \
                 ORDER BY item_timestamp ASC LIMIT 1 OFFSET ?",
                self.table
            ))
            .bind(&self.name)
            .bind(now - interval)
            .bind((needed - rate.limit() - 1) as i64)
            .fetch_optional(&mut *conn)
            .await?;
            if let Some(blocking) = blocking {
                wait = wait.max((blocking + interval - now).max(0));
            }
        }
        Ok(Duration::from_millis(wait as u64))
    }

    async fn leak(&self) -> Result<usize, BucketError> {
        let mut conn = self.pool.acquire().await?;
        self.leak_until(&mut *conn, self.now() as i64).await
    }

    async fn count(&self) -> Result<usize, BucketError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE name = ?",
            self.table
        ))
        .bind(&self.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn flush(&self) -> Result<(), BucketError> {
        sqlx::query(&format!("DELETE FROM {} WHERE name = ?", self.table))
            .bind(&self.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
