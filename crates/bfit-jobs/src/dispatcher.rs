//! 作业派发
//!
//! 按系列的解剖部位选择队列：腹部与大腿走各自的专用队列，
//! 其余部位回退到通用mmap队列。

use crate::runner::{JobRunner, JobSpec};
use bfit_core::{Anatomy, Analysis, BfitError, Queue, Result, Series};
use bfit_database::{DatabasePool, DatabaseQueries, NewAnalysis};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// 作业派发器
pub struct JobDispatcher {
    pool: DatabasePool,
    runner: Arc<dyn JobRunner>,
}

impl JobDispatcher {
    pub fn new(pool: DatabasePool, runner: Arc<dyn JobRunner>) -> Self {
        Self { pool, runner }
    }

    /// 解剖部位到队列的路由
    pub fn route(anatomy: &Anatomy) -> Queue {
        match anatomy {
            Anatomy::Abd => Queue::Abdomen,
            Anatomy::Thigh => Queue::Thigh,
            other => {
                debug!("Anatomy {} falls back to mmap queue", other.as_str());
                Queue::Mmap
            }
        }
    }

    /// 为系列派发一个分析作业
    ///
    /// 先入队再创建processing状态的分析记录，作业id即记录主键。
    /// 入队失败时不留下任何记录；入队成功而落库失败时队列侧留下
    /// 孤儿作业，其回写因记录缺失被丢弃。
    pub async fn dispatch(
        &self,
        series: &Series,
        model_params: Option<serde_json::Value>,
        owner: &str,
    ) -> Result<Analysis> {
        let queries = DatabaseQueries::new(&self.pool);
        let instances = queries.list_instances(series.id).await?;
        if instances.is_empty() {
            return Err(BfitError::Validation(format!(
                "series {} has no instances",
                series.series_id
            )));
        }
        let input_files: Vec<String> = instances.into_iter().map(|i| i.file).collect();

        let queue = Self::route(&series.anatomy);
        let job_id = Uuid::new_v4().to_string();
        self.runner
            .enqueue(JobSpec {
                id: job_id.clone(),
                queue,
                modality: series.modality,
                owner: owner.to_string(),
                input_files,
                model_params: model_params.clone(),
            })
            .await?;

        let analysis = queries
            .create_analysis(&NewAnalysis {
                id: job_id.clone(),
                queue,
                series_pk: series.id,
                model_params,
                owner: owner.to_string(),
            })
            .await?;

        info!(
            "Dispatched job {} for series {} to queue {}",
            job_id,
            series.series_id,
            queue.as_str()
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::JobState;
    use async_trait::async_trait;
    use bfit_core::{AnalysisStatus, Modality};
    use bfit_database::{InstanceUpsert, SeriesUpsert, StudyUpsert};
    use serde_json::json;
    use tokio::sync::Mutex;

    #[test]
    fn test_anatomy_routing() {
        assert_eq!(JobDispatcher::route(&Anatomy::Abd), Queue::Abdomen);
        assert_eq!(JobDispatcher::route(&Anatomy::Thigh), Queue::Thigh);
        assert_eq!(
            JobDispatcher::route(&Anatomy::Other("knee".to_string())),
            Queue::Mmap
        );
    }

    #[derive(Default)]
    struct CapturingRunner {
        specs: Mutex<Vec<JobSpec>>,
    }

    #[async_trait]
    impl JobRunner for CapturingRunner {
        async fn enqueue(&self, spec: JobSpec) -> Result<()> {
            self.specs.lock().await.push(spec);
            Ok(())
        }

        async fn fetch_state(&self, id: &str) -> Result<JobState> {
            Err(BfitError::NoSuchJob(id.to_string()))
        }

        async fn stop(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn cancel(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn seed_series(pool: &DatabasePool, anatomy: Anatomy) -> Series {
        let queries = DatabaseQueries::new(pool);
        queries.create_tables().await.unwrap();
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
                    anatomy,
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
        queries.get_series("se1", "admin").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_creates_processing_analysis_and_enqueues() {
        let pool = DatabasePool::in_memory().await.unwrap();
        let series = seed_series(&pool, Anatomy::Abd).await;
        let runner = Arc::new(CapturingRunner::default());
        let dispatcher = JobDispatcher::new(pool.clone(), runner.clone());

        let analysis = dispatcher
            .dispatch(&series, Some(json!({"model": "v2"})), "admin")
            .await
            .unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Processing);
        assert_eq!(analysis.queue, Queue::Abdomen);

        let specs = runner.specs.lock().await;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, analysis.id);
        assert_eq!(specs[0].queue, Queue::Abdomen);
        assert_eq!(
            specs[0].input_files,
            vec!["admin/studies/st1/series/se1/instances/a.dcm".to_string()]
        );
        assert_eq!(specs[0].model_params, Some(json!({"model": "v2"})));
    }

    struct RejectingRunner;

    #[async_trait]
    impl JobRunner for RejectingRunner {
        async fn enqueue(&self, spec: JobSpec) -> Result<()> {
            Err(BfitError::Internal(format!("queue {} is down", spec.queue.as_str())))
        }

        async fn fetch_state(&self, id: &str) -> Result<JobState> {
            Err(BfitError::NoSuchJob(id.to_string()))
        }

        async fn stop(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn cancel(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_enqueue_failure_leaves_no_record() {
        let pool = DatabasePool::in_memory().await.unwrap();
        let series = seed_series(&pool, Anatomy::Abd).await;
        let dispatcher = JobDispatcher::new(pool.clone(), Arc::new(RejectingRunner));

        assert!(dispatcher.dispatch(&series, None, "admin").await.is_err());

        // 入队失败后不得留下processing状态的孤儿记录
        let analyses = DatabaseQueries::new(&pool)
            .list_latest_analyses("admin", None, None)
            .await
            .unwrap();
        assert!(analyses.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_anatomy_falls_back_to_mmap() {
        let pool = DatabasePool::in_memory().await.unwrap();
        let series = seed_series(&pool, Anatomy::Other("knee".to_string())).await;
        let runner = Arc::new(CapturingRunner::default());
        let dispatcher = JobDispatcher::new(pool.clone(), runner.clone());

        let analysis = dispatcher.dispatch(&series, None, "admin").await.unwrap();
        assert_eq!(analysis.queue, Queue::Mmap);
    }
}
