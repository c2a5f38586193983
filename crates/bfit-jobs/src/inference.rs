//! 推理服务客户端
//!
//! 输入文件base64编码后以 {"data": [...]} 批量提交给对应
//! (队列, 模态) 的推理端点，响应体即结果载荷。

use crate::reconciler::ResultPayload;
use crate::runner::JobSpec;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bfit_core::utils::truncate_for_log;
use bfit_core::{BfitError, Modality, Queue, Result};
use bfit_storage::StorageManager;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 推理端点配置
#[derive(Debug, Clone, Default)]
pub struct InferenceEndpoints {
    endpoints: HashMap<(Queue, Modality), String>,
}

impl InferenceEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, queue: Queue, modality: Modality, url: String) {
        self.endpoints.insert((queue, modality), url);
    }

    pub fn get(&self, queue: Queue, modality: Modality) -> Option<&str> {
        self.endpoints.get(&(queue, modality)).map(String::as_str)
    }
}

/// 推理执行器接口
#[async_trait]
pub trait InferenceExecutor: Send + Sync {
    /// 执行一次推理调用，返回结果载荷
    async fn run(&self, spec: &JobSpec) -> Result<ResultPayload>;
}

/// HTTP推理执行器
pub struct HttpInferenceExecutor {
    client: reqwest::Client,
    endpoints: InferenceEndpoints,
    storage: Arc<StorageManager>,
}

impl HttpInferenceExecutor {
    pub fn new(endpoints: InferenceEndpoints, storage: Arc<StorageManager>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            storage,
        }
    }
}

#[async_trait]
impl InferenceExecutor for HttpInferenceExecutor {
    async fn run(&self, spec: &JobSpec) -> Result<ResultPayload> {
        let url = self
            .endpoints
            .get(spec.queue, spec.modality)
            .ok_or_else(|| {
                BfitError::Inference(format!(
                    "no inference endpoint for queue {} modality {}",
                    spec.queue.as_str(),
                    spec.modality.as_str()
                ))
            })?;

        let mut encoded = Vec::with_capacity(spec.input_files.len());
        for path in &spec.input_files {
            let data = self.storage.get_file(path).await?;
            encoded.push(STANDARD.encode(data));
        }
        debug!(
            "Submitting {} files of job {} to {}",
            encoded.len(),
            spec.id,
            url
        );

        let mut body = json!({ "data": encoded });
        if let Some(params) = &spec.model_params {
            body["model_params"] = params.clone();
        }

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BfitError::Inference(format!("inference request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BfitError::Inference(format!(
                "inference service returned {}: {}",
                status,
                truncate_for_log(&body, 512)
            )));
        }

        let payload: ResultPayload = response
            .json()
            .await
            .map_err(|e| BfitError::Inference(format!("invalid inference response: {}", e)))?;
        info!("Inference for job {} returned", spec.id);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_lookup() {
        let mut endpoints = InferenceEndpoints::new();
        endpoints.insert(
            Queue::Abdomen,
            Modality::Mr,
            "http://localhost:9001/predict".to_string(),
        );

        assert_eq!(
            endpoints.get(Queue::Abdomen, Modality::Mr),
            Some("http://localhost:9001/predict")
        );
        assert!(endpoints.get(Queue::Thigh, Modality::Mr).is_none());
        assert!(endpoints.get(Queue::Abdomen, Modality::Ct).is_none());
    }
}
