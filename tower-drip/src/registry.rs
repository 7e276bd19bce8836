use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use drip_limit::Bucket;
use drip_limit::BucketError;
use drip_limit::BucketFactory;
use drip_limit::InMemoryBucket;
use drip_limit::Rate;
use tracing::debug;

use crate::Backend;

#[cfg(feature = "sqlite")]
use drip_limit::SqliteBucket;
#[cfg(feature = "sqlite")]
use drip_limit::sqlite::SqlitePool;

/// Lazily creates one bucket per key.
///
/// Keys are whatever the caller tracks limits by: request origins for
/// per-host tracking, or a single fixed name. Every bucket shares the same
/// rates and backend.
#[derive(Debug)]
pub struct HostBucketFactory {
    rates: Vec<Rate>,
    backend: Backend,
    #[cfg(feature = "sqlite")]
    table: String,
    #[cfg(feature = "sqlite")]
    pool: tokio::sync::OnceCell<SqlitePool>,
    buckets: DashMap<String, Arc<dyn Bucket>>,
}

impl HostBucketFactory {
    pub fn new(rates: Vec<Rate>, backend: Backend) -> Self {
        Self {
            rates,
            backend,
            #[cfg(feature = "sqlite")]
            table: drip_limit::sqlite::DEFAULT_TABLE.to_string(),
            #[cfg(feature = "sqlite")]
            pool: tokio::sync::OnceCell::new(),
            buckets: DashMap::new(),
        }
    }

    /// Set the SQLite table persistent buckets are stored in.
    #[cfg(feature = "sqlite")]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Number of keys seen so far.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    async fn create(&self, name: &str) -> Result<Arc<dyn Bucket>, BucketError> {
        match &self.backend {
            Backend::Memory => Ok(Arc::new(InMemoryBucket::new(self.rates.clone())?)),
            #[cfg(feature = "sqlite")]
            Backend::Sqlite { path, .. } => {
                let pool = self
                    .pool
                    .get_or_try_init(|| drip_limit::sqlite::connect(path))
                    .await?;
                let bucket =
                    SqliteBucket::with_pool(self.rates.clone(), pool.clone(), &self.table, name)
                        .await?;
                Ok(Arc::new(bucket))
            }
        }
    }
}

#[async_trait]
impl BucketFactory for HostBucketFactory {
    async fn get(&self, name: &str) -> Result<Arc<dyn Bucket>, BucketError> {
        if let Some(bucket) = self.buckets.get(name) {
            return Ok(Arc::clone(bucket.value()));
        }

        // Created outside the map lock; a concurrent loser is simply dropped.
        let bucket = self.create(name).await?;
        let bucket = Arc::clone(
            self.buckets
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!(bucket = name, rates = ?self.rates, "Creating limiter bucket");
                    bucket
                })
                .value(),
        );
        Ok(bucket)
    }

    fn buckets(&self) -> Vec<Arc<dyn Bucket>> {
        self.buckets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
