//! 结果文件存储管理

use bfit_core::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 存储管理器
///
/// 删除遵循先查后删：文件不存在时静默跳过。文件删除与数据库行
/// 删除之间不保证原子，崩溃可能留下引用缺失文件的孤儿行，这是
/// 可容忍、可检测的降级状态。
pub struct StorageManager {
    base_path: PathBuf,
}

impl StorageManager {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }

    /// 存储文件，必要时创建父目录；返回相对存储路径
    pub async fn store_file(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, data).await?;
        debug!("Stored {} bytes at {}", data.len(), path);
        Ok(path.to_string())
    }

    /// 读取文件
    pub async fn get_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = tokio::fs::read(self.full_path(path)).await?;
        Ok(data)
    }

    /// 文件是否存在
    pub async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.full_path(path))
            .await
            .unwrap_or(false)
    }

    /// 先查后删：存在则删除，不存在静默跳过
    pub async fn delete_if_exists(&self, path: &str) -> Result<()> {
        if self.exists(path).await {
            debug!("Deleting {}", path);
            tokio::fs::remove_file(self.full_path(path)).await?;
        }
        Ok(())
    }
}
