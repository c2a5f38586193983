//! # BFIT数据库模块
//!
//! 负责影像元数据与分析记录的存储，提供SQLite连接池和完整的
//! CRUD操作。并发摄取批次通过单事务内 检查→系列→实例 的固定
//! 加锁顺序串行化冲突写入。

pub mod connection;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use models::*;
pub use queries::DatabaseQueries;
