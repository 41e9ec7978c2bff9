use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::domain::entities::UserRecord;
use crate::infra::metrics::{OutcomeTallies, RequestSummary};

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserRecord>,
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
}

#[derive(Debug, Serialize)]
pub struct UserDeletedResponse {
    pub message: &'static str,
    pub id: i64,
    pub invalidation: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CacheClearedResponse {
    pub removed: u64,
}

#[derive(Debug, Deserialize)]
pub struct RecentRequestsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub outcomes: OutcomeTallies,
    pub requests: RequestSummary,
    /// Conditional reads answered without touching the repository.
    pub repository_reads_saved: u64,
    pub etag_strategy: &'static str,
    pub database: DatabaseMetrics,
    pub cache: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct DatabaseMetrics {
    pub total_users: Option<u64>,
}
