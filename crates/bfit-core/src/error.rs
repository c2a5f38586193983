//! 错误定义模块

use thiserror::Error;

/// BFIT系统统一错误类型
#[derive(Error, Debug)]
pub enum BfitError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("不支持的模态: {0}")]
    UnsupportedModality(String),

    #[error("推理服务错误: {0}")]
    Inference(String),

    #[error("作业不存在: {0}")]
    NoSuchJob(String),

    #[error("无效的作业操作: {0}")]
    InvalidJobOperation(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

/// BFIT系统统一结果类型
pub type Result<T> = std::result::Result<T, BfitError>;
