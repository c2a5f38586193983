//! Web服务器

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use bfit_core::Result;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers::{
    api_root, cancel_analysis, create_analysis, create_report, delete_analysis, delete_report,
    delete_series, delete_study, download_report, get_analysis, get_comment, get_report,
    get_study, get_summary, health, job_status, list_analyses, list_completed_analyses,
    list_instances, list_reports, list_studies, put_comment, put_summary, upload_studies,
};
use crate::state::AppState;

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(bfit_core::BfitError::Io)?;
        Ok(())
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // 根路径
        .route("/", get(api_root))
        // 健康检查
        .route("/health", get(health))
        // API路由
        .nest("/api/v1", api_routes())
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        // DICOM批次上传可能很大
        .layer(DefaultBodyLimit::max(512 * 1024 * 1024))
        .with_state(state)
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/studies", post(upload_studies).get(list_studies))
        .route("/studies/:study_id", get(get_study).delete(delete_study))
        .route(
            "/studies/:study_id/series/:series_id",
            delete(delete_series),
        )
        .route(
            "/studies/:study_id/series/:series_id/instances",
            get(list_instances),
        )
        .route("/analysis", post(create_analysis).get(list_analyses))
        .route("/analysis/completed", get(list_completed_analyses))
        .route("/analysis/:id", get(get_analysis).delete(delete_analysis))
        .route("/analysis/:id/cancel", post(cancel_analysis))
        .route("/analysis/:id/comment", get(get_comment).put(put_comment))
        .route("/analysis/:id/summary", get(get_summary).put(put_summary))
        .route("/jobs/status", get(job_status))
        .route("/reports", post(create_report).get(list_reports))
        .route("/reports/:id", get(get_report).delete(delete_report))
        .route("/reports/:id/download", get(download_report))
}
