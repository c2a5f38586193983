//! # BFIT Web API模块
//!
//! HTTP接口层：影像上传与浏览、分析作业管理、批注与报告。
//! 调用方身份取自X-Username请求头，缺省为admin。

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

// 重新导出主要类型
pub use error::ApiError;
pub use server::{create_app, WebServer};
pub use state::AppState;
