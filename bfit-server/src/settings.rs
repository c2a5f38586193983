//! 服务配置
//!
//! 配置来源：默认值 < 配置文件 < BFIT_前缀环境变量。

use bfit_core::{BfitError, Modality, Queue, Result};
use bfit_jobs::InferenceEndpoints;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct Settings {
    /// HTTP监听地址
    pub listen_addr: String,
    /// SQLite连接串
    pub database_url: String,
    /// 文件存储根目录
    pub storage_root: String,
    /// 协议规则表JSON文件，缺省使用内置规则
    pub rules_file: Option<String>,
    /// 单个分析作业的超时秒数
    pub job_timeout_secs: u64,
    /// 推理端点，键为 "队列/模态"，如 "abd/mr"
    #[serde(default)]
    pub inference_endpoints: HashMap<String, String>,
}

impl Settings {
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("listen_addr", "0.0.0.0:8000")
            .map_err(|e| BfitError::Config(e.to_string()))?
            .set_default("database_url", "sqlite://bfit.db")
            .map_err(|e| BfitError::Config(e.to_string()))?
            .set_default("storage_root", "./data/storage")
            .map_err(|e| BfitError::Config(e.to_string()))?
            .set_default("job_timeout_secs", 1800i64)
            .map_err(|e| BfitError::Config(e.to_string()))?;

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("BFIT"));

        builder
            .build()
            .map_err(|e| BfitError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| BfitError::Config(e.to_string()))
    }

    /// 解析推理端点配置
    pub fn endpoints(&self) -> Result<InferenceEndpoints> {
        let mut endpoints = InferenceEndpoints::new();
        for (key, url) in &self.inference_endpoints {
            let (queue, modality) = key.split_once('/').ok_or_else(|| {
                BfitError::Config(format!(
                    "inference endpoint key {:?} must be queue/modality",
                    key
                ))
            })?;
            endpoints.insert(Queue::parse(queue)?, Modality::parse(modality)?, url.clone());
        }
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_without_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.listen_addr, "0.0.0.0:8000");
        assert_eq!(settings.job_timeout_secs, 1800);
        assert!(settings.rules_file.is_none());
    }

    #[test]
    fn test_endpoint_key_parsing() {
        let mut settings = Settings::load(None).unwrap();
        settings.inference_endpoints.insert(
            "abd/mr".to_string(),
            "http://localhost:9001/predict".to_string(),
        );
        let endpoints = settings.endpoints().unwrap();
        assert_eq!(
            endpoints.get(Queue::Abdomen, Modality::Mr),
            Some("http://localhost:9001/predict")
        );

        settings
            .inference_endpoints
            .insert("bogus".to_string(), "http://x".to_string());
        assert!(settings.endpoints().is_err());
    }
}
