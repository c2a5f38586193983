//! # BFIT存储模块
//!
//! 负责二进制结果文件（DICOM实例、分割掩膜、中间产物、PDF报告）
//! 的生命周期管理。文件按确定性的
//! `{owner}/{category}/{parent-id}/{filename}` 方案寻址，该方案是
//! 对外契约：下游的报告下载依赖它生成content-disposition文件名。

pub mod paths;
pub mod storage;

pub use paths::{analysis_path, instance_path, report_path};
pub use storage::StorageManager;
