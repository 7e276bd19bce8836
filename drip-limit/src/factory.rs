use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Bucket;
use crate::BucketError;

/// Resolves the bucket that accounts for a given name.
///
/// Factories may create buckets lazily, which is why resolution is async and
/// fallible: a persistent backend may need to open a connection first.
#[async_trait]
pub trait BucketFactory: Debug + Send + Sync {
    async fn get(&self, name: &str) -> Result<Arc<dyn Bucket>, BucketError>;

    /// Every bucket created so far.
    fn buckets(&self) -> Vec<Arc<dyn Bucket>>;
}

/// Routes every name to the same bucket.
#[derive(Debug, Clone)]
pub struct SingleBucketFactory {
    bucket: Arc<dyn Bucket>,
}

impl SingleBucketFactory {
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        Self { bucket }
    }
}

#[async_trait]
impl BucketFactory for SingleBucketFactory {
    async fn get(&self, _name: &str) -> Result<Arc<dyn Bucket>, BucketError> {
        Ok(Arc::clone(&self.bucket))
    }

    fn buckets(&self) -> Vec<Arc<dyn Bucket>> {
        vec![Arc::clone(&self.bucket)]
    }
}
