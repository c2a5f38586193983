//! 作业状态协调
//!
//! 结果回写、失败落库与取消协调。分析记录以作业id为主键，回写
//! 就是对该行的终态写入；作业与记录之间出现的不一致在此处收敛。

use crate::inference::InferenceExecutor;
use crate::runner::{JobHandler, JobRunner, JobSpec, JobState};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bfit_core::{Analysis, AnalysisStatus, BfitError, Result};
use bfit_database::{DatabasePool, DatabaseQueries};
use bfit_storage::{analysis_path, StorageManager};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 结果文件载荷，内容为base64编码
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    pub filename: String,
    pub data: String,
}

/// 推理服务返回的结果载荷
///
/// segmentation与artifact按类型键入，每类一个文件。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub prediction: Option<serde_json::Value>,
    #[serde(default)]
    pub segmentation: Option<BTreeMap<String, FilePayload>>,
    #[serde(default)]
    pub artifact: Option<BTreeMap<String, FilePayload>>,
}

/// 作业结果协调器
pub struct JobReconciler {
    pool: DatabasePool,
    storage: Arc<StorageManager>,
}

impl JobReconciler {
    pub fn new(pool: DatabasePool, storage: Arc<StorageManager>) -> Self {
        Self { pool, storage }
    }

    /// 成功回写：存储结果文件、创建子记录、置为已完成
    ///
    /// 分析记录已被删除时只告警不报错，作业结果随之丢弃。
    pub async fn report_success(&self, job_id: &str, payload: ResultPayload) -> Result<()> {
        let queries = DatabaseQueries::new(&self.pool);
        let analysis = match queries.get_analysis_any_owner(job_id).await? {
            Some(analysis) => analysis,
            None => {
                warn!("Job {} finished but its analysis record is gone", job_id);
                return Ok(());
            }
        };
        let owner = &analysis.owner;

        if let Some(prediction) = &payload.prediction {
            queries.create_prediction_result(job_id, prediction).await?;
        }

        if let Some(segmentation) = &payload.segmentation {
            for (mask_type, file) in segmentation {
                let path = self.store_result_file(owner, job_id, file).await?;
                queries
                    .create_segmentation_result(job_id, &path, mask_type)
                    .await?;
            }
        }

        if let Some(artifacts) = &payload.artifact {
            for (artifact_type, file) in artifacts {
                let path = self.store_result_file(owner, job_id, file).await?;
                queries
                    .create_artifact(job_id, &path, artifact_type)
                    .await?;
            }
        }

        queries
            .update_analysis_status(job_id, AnalysisStatus::Completed)
            .await?;
        info!("Job {} completed, results stored", job_id);
        Ok(())
    }

    /// 失败落库：窄更新为失败态，本身绝不再失败
    pub async fn report_failure(&self, job_id: &str) {
        match DatabaseQueries::new(&self.pool)
            .update_analysis_status(job_id, AnalysisStatus::Failed)
            .await
        {
            Ok(0) => warn!("Job {} failed but its analysis record is gone", job_id),
            Ok(_) => info!("Job {} marked failed", job_id),
            Err(e) => error!("Failed to record failure of job {}: {}", job_id, e),
        }
    }

    /// 取消落库，用于停止与关停路径
    pub async fn mark_canceled(&self, job_id: &str) {
        match DatabaseQueries::new(&self.pool)
            .update_analysis_status(job_id, AnalysisStatus::Canceled)
            .await
        {
            Ok(0) => warn!("Job {} canceled but its analysis record is gone", job_id),
            Ok(_) => info!("Job {} marked canceled", job_id),
            Err(e) => error!("Failed to record cancel of job {}: {}", job_id, e),
        }
    }

    /// 取消分析作业
    ///
    /// 执行中的作业发送停止指令，排队中的作业直接撤销，作业在
    /// 队列侧已是终态时不再下发指令，三者都落库为已取消；重复
    /// 取消因此是幂等的。只有作业在队列侧已不存在或指令被拒绝
    /// 时，本地状态才收敛为失败。任何分支都先写本地状态再返回。
    pub async fn cancel(
        &self,
        runner: &dyn JobRunner,
        job_id: &str,
        owner: &str,
    ) -> Result<Analysis> {
        let queries = DatabaseQueries::new(&self.pool);
        queries
            .get_analysis(job_id, owner)
            .await?
            .ok_or_else(|| BfitError::NotFound(format!("analysis {}", job_id)))?;

        let status = match runner.fetch_state(job_id).await {
            Ok(JobState::Started) => match runner.stop(job_id).await {
                Ok(()) => AnalysisStatus::Canceled,
                Err(BfitError::InvalidJobOperation(_)) | Err(BfitError::NoSuchJob(_)) => {
                    AnalysisStatus::Failed
                }
                Err(e) => {
                    self.report_failure(job_id).await;
                    return Err(e);
                }
            },
            Ok(state) if state.is_pending() => match runner.cancel(job_id).await {
                Ok(()) => AnalysisStatus::Canceled,
                Err(BfitError::InvalidJobOperation(_)) | Err(BfitError::NoSuchJob(_)) => {
                    AnalysisStatus::Failed
                }
                Err(e) => {
                    self.report_failure(job_id).await;
                    return Err(e);
                }
            },
            // 队列侧已是终态：无指令可发，本地对齐为已取消
            Ok(state) => {
                info!(
                    "Job {} already terminal at runner ({}), recording canceled",
                    job_id,
                    state.as_str()
                );
                AnalysisStatus::Canceled
            }
            Err(BfitError::NoSuchJob(_)) => {
                warn!("Cancel of unknown job {}", job_id);
                AnalysisStatus::Failed
            }
            Err(e) => {
                self.report_failure(job_id).await;
                return Err(e);
            }
        };

        queries.update_analysis_status(job_id, status).await?;
        info!("Job {} cancel resolved to {}", job_id, status.as_str());
        queries
            .get_analysis(job_id, owner)
            .await?
            .ok_or_else(|| BfitError::NotFound(format!("analysis {}", job_id)))
    }

    async fn store_result_file(
        &self,
        owner: &str,
        job_id: &str,
        file: &FilePayload,
    ) -> Result<String> {
        let data = STANDARD
            .decode(&file.data)
            .map_err(|e| BfitError::Inference(format!("invalid base64 result file: {}", e)))?;
        let path = analysis_path(owner, job_id, &file.filename);
        self.storage.store_file(&path, &data).await
    }
}

/// 推理作业处理器：执行推理并经协调器落库
pub struct InferenceJobHandler {
    executor: Arc<dyn InferenceExecutor>,
    reconciler: Arc<JobReconciler>,
}

impl InferenceJobHandler {
    pub fn new(executor: Arc<dyn InferenceExecutor>, reconciler: Arc<JobReconciler>) -> Self {
        Self {
            executor,
            reconciler,
        }
    }
}

#[async_trait]
impl JobHandler for InferenceJobHandler {
    async fn execute(&self, spec: &JobSpec) -> Result<()> {
        let payload = self.executor.run(spec).await?;
        self.reconciler.report_success(&spec.id, payload).await
    }

    async fn on_failure(&self, spec: &JobSpec) {
        self.reconciler.report_failure(&spec.id).await;
    }

    async fn on_stopped(&self, spec: &JobSpec) {
        self.reconciler.mark_canceled(&spec.id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfit_core::{Anatomy, Modality, Queue};
    use bfit_database::{InstanceUpsert, NewAnalysis, SeriesUpsert, StudyUpsert};
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup() -> (DatabasePool, Arc<StorageManager>, TempDir) {
        let pool = DatabasePool::in_memory().await.unwrap();
        DatabaseQueries::new(&pool).create_tables().await.unwrap();
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::new(dir.path()));
        (pool, storage, dir)
    }

    async fn seed_analysis(pool: &DatabasePool, job_id: &str) {
        let queries = DatabaseQueries::new(pool);
        queries
            .ingest_batch(
                &[StudyUpsert {
                    study_id: "st1".to_string(),
                    patient_id: None,
                    patient_name: None,
                    study_date: None,
                    owner: "admin".to_string(),
                }],
                &[SeriesUpsert {
                    series_id: "se1".to_string(),
                    study_id: "st1".to_string(),
                    modality: Modality::Mr,
                    anatomy: Anatomy::Abd,
                    num_frames: 1,
                    owner: "admin".to_string(),
                }],
                &[InstanceUpsert {
                    instance_id: "i1".to_string(),
                    series_id: "se1".to_string(),
                    metadata: json!({}),
                    frame_number: 1,
                    file: "admin/studies/st1/series/se1/instances/a.dcm".to_string(),
                    owner: "admin".to_string(),
                }],
            )
            .await
            .unwrap();
        let serie = queries.get_series("se1", "admin").await.unwrap().unwrap();
        queries
            .create_analysis(&NewAnalysis {
                id: job_id.to_string(),
                queue: Queue::Abdomen,
                series_pk: serie.id,
                model_params: None,
                owner: "admin".to_string(),
            })
            .await
            .unwrap();
    }

    fn sample_payload() -> ResultPayload {
        let mut segmentation = BTreeMap::new();
        segmentation.insert(
            "VAT".to_string(),
            FilePayload {
                filename: "vat_mask.bin".to_string(),
                data: STANDARD.encode(b"vat-bytes"),
            },
        );
        let mut artifact = BTreeMap::new();
        artifact.insert(
            "volume_plot".to_string(),
            FilePayload {
                filename: "plot.png".to_string(),
                data: STANDARD.encode(b"png-bytes"),
            },
        );
        ResultPayload {
            prediction: Some(json!({"vat_volume": 1.5})),
            segmentation: Some(segmentation),
            artifact: Some(artifact),
        }
    }

    #[tokio::test]
    async fn test_report_success_stores_files_and_completes() {
        let (pool, storage, _dir) = setup().await;
        seed_analysis(&pool, "job-1").await;
        let reconciler = JobReconciler::new(pool.clone(), storage.clone());

        reconciler
            .report_success("job-1", sample_payload())
            .await
            .unwrap();

        let queries = DatabaseQueries::new(&pool);
        let analysis = queries.get_analysis("job-1", "admin").await.unwrap().unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Completed);

        let masks = queries.list_segmentation_results("job-1").await.unwrap();
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].mask_type, "VAT");
        assert_eq!(masks[0].segmentation_mask, "admin/analysis/job-1/vat_mask.bin");
        assert_eq!(
            storage.get_file(&masks[0].segmentation_mask).await.unwrap(),
            b"vat-bytes"
        );

        assert_eq!(queries.list_prediction_results("job-1").await.unwrap().len(), 1);
        assert_eq!(queries.list_artifacts("job-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_report_success_for_deleted_analysis_is_swallowed() {
        let (pool, storage, _dir) = setup().await;
        let reconciler = JobReconciler::new(pool.clone(), storage);

        // 记录不存在时不报错，结果丢弃
        reconciler
            .report_success("ghost", sample_payload())
            .await
            .unwrap();
        let queries = DatabaseQueries::new(&pool);
        assert!(queries.list_segmentation_results("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_failure_never_errors() {
        let (pool, storage, _dir) = setup().await;
        seed_analysis(&pool, "job-1").await;
        let reconciler = JobReconciler::new(pool.clone(), storage);

        reconciler.report_failure("job-1").await;
        reconciler.report_failure("ghost").await;

        let analysis = DatabaseQueries::new(&pool)
            .get_analysis("job-1", "admin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Failed);
    }

    struct StubRunner {
        state: Option<JobState>,
    }

    #[async_trait]
    impl JobRunner for StubRunner {
        async fn enqueue(&self, _spec: JobSpec) -> Result<()> {
            Ok(())
        }

        async fn fetch_state(&self, id: &str) -> Result<JobState> {
            self.state.ok_or_else(|| BfitError::NoSuchJob(id.to_string()))
        }

        async fn stop(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn cancel(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancel_started_job_marks_canceled() {
        let (pool, storage, _dir) = setup().await;
        seed_analysis(&pool, "job-1").await;
        let reconciler = JobReconciler::new(pool.clone(), storage);

        let runner = StubRunner {
            state: Some(JobState::Started),
        };
        let analysis = reconciler.cancel(&runner, "job-1", "admin").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_marks_canceled() {
        let (pool, storage, _dir) = setup().await;
        seed_analysis(&pool, "job-1").await;
        let reconciler = JobReconciler::new(pool.clone(), storage);

        let runner = StubRunner {
            state: Some(JobState::Queued),
        };
        let analysis = reconciler.cancel(&runner, "job-1", "admin").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_marks_failed() {
        let (pool, storage, _dir) = setup().await;
        seed_analysis(&pool, "job-1").await;
        let reconciler = JobReconciler::new(pool.clone(), storage);

        // 队列侧无此作业，本地状态收敛为失败
        let runner = StubRunner { state: None };
        let analysis = reconciler.cancel(&runner, "job-1", "admin").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_finished_job_marks_canceled() {
        let (pool, storage, _dir) = setup().await;
        seed_analysis(&pool, "job-1").await;
        let reconciler = JobReconciler::new(pool.clone(), storage);

        // 队列侧已是终态，无指令可发，本地仍对齐为已取消
        let runner = StubRunner {
            state: Some(JobState::Finished),
        };
        let analysis = reconciler.cancel(&runner, "job-1", "admin").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Canceled);
    }

    #[tokio::test]
    async fn test_repeated_cancel_keeps_canceled() {
        let (pool, storage, _dir) = setup().await;
        seed_analysis(&pool, "job-1").await;
        let reconciler = JobReconciler::new(pool.clone(), storage);

        let queued = StubRunner {
            state: Some(JobState::Queued),
        };
        let analysis = reconciler.cancel(&queued, "job-1", "admin").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Canceled);

        // 第二次取消时作业在队列侧已是canceled终态，记录保持已取消
        let canceled = StubRunner {
            state: Some(JobState::Canceled),
        };
        let analysis = reconciler.cancel(&canceled, "job-1", "admin").await.unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_missing_analysis_is_not_found() {
        let (pool, storage, _dir) = setup().await;
        let reconciler = JobReconciler::new(pool, storage);

        let runner = StubRunner {
            state: Some(JobState::Queued),
        };
        assert!(matches!(
            reconciler.cancel(&runner, "ghost", "admin").await,
            Err(BfitError::NotFound(_))
        ));
    }
}
