//! 应用共享状态

use axum::http::HeaderMap;
use bfit_database::DatabasePool;
use bfit_dicom::{SeriesAggregator, TagReader};
use bfit_jobs::{JobDispatcher, JobReconciler, JobRunner};
use bfit_storage::StorageManager;
use std::sync::Arc;

/// 各处理器共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub storage: Arc<StorageManager>,
    pub runner: Arc<dyn JobRunner>,
    pub dispatcher: Arc<JobDispatcher>,
    pub reconciler: Arc<JobReconciler>,
    pub aggregator: Arc<SeriesAggregator<Box<dyn TagReader>>>,
}

/// 调用方身份，取自X-Username请求头，缺省为admin
pub fn username(headers: &HeaderMap) -> String {
    headers
        .get("X-Username")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "admin".to_string())
}
