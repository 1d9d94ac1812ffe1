use std::sync::Arc;

use crate::domain::StorageUsageSnapshot;
use crate::error::Result;
use crate::repo::{StorageEstimate, StorageEstimator};

/// Diagnostic usage reporting. Never blocks a caller on a failed estimate.
#[derive(Clone)]
pub struct QuotaMonitor {
    estimator: Arc<dyn StorageEstimator>,
}

impl QuotaMonitor {
    pub fn new(estimator: Arc<dyn StorageEstimator>) -> Self {
        Self { estimator }
    }

    pub async fn get_storage_usage(&self) -> StorageUsageSnapshot {
        match self.estimator.estimate().await {
            Ok(est) => StorageUsageSnapshot::new(est.usage, est.quota.unwrap_or(0)),
            Err(e) => {
                tracing::warn!(error = %e, "storage estimate unavailable");
                StorageUsageSnapshot::default()
            }
        }
    }

    /// Raw estimate for write admission; errors are left to the caller.
    pub async fn estimate(&self) -> Result<StorageEstimate> {
        self.estimator.estimate().await
    }
}
