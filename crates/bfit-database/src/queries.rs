//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::*;
use bfit_core::{
    Analysis, AnalysisArtifact, AnalysisStatus, BfitError, Comment, Instance, PredictionResult,
    Queue, Report, Result, SegmentationResult, Series, Study, Summary,
};
use chrono::Utc;

/// 数据库查询操作接口
pub struct DatabaseQueries<'a> {
    pool: &'a DatabasePool,
}

impl<'a> DatabaseQueries<'a> {
    pub fn new(pool: &'a DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS studies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                study_id TEXT NOT NULL,
                patient_id TEXT,
                patient_name TEXT,
                study_date DATE,
                created_at TEXT NOT NULL,
                owner TEXT NOT NULL,
                UNIQUE (study_id, owner)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS series (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                series_id TEXT NOT NULL,
                study_pk INTEGER NOT NULL REFERENCES studies(id),
                modality TEXT NOT NULL,
                anatomy TEXT NOT NULL,
                num_frames INTEGER,
                created_at TEXT NOT NULL,
                owner TEXT NOT NULL,
                UNIQUE (series_id, owner)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_id TEXT NOT NULL,
                series_pk INTEGER NOT NULL REFERENCES series(id),
                metadata TEXT NOT NULL DEFAULT '{}',
                frame_number INTEGER,
                file TEXT NOT NULL,
                owner TEXT NOT NULL,
                UNIQUE (instance_id, owner)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                series_pk INTEGER NOT NULL REFERENCES series(id),
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                model_params TEXT,
                owner TEXT NOT NULL,
                UNIQUE (id, owner)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS prediction_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id TEXT NOT NULL REFERENCES analyses(id),
                prediction TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS segmentation_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id TEXT NOT NULL REFERENCES analyses(id),
                segmentation_mask TEXT NOT NULL,
                mask_type TEXT NOT NULL,
                is_custom INTEGER NOT NULL DEFAULT 0,
                prediction_overrides TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS analysis_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id TEXT NOT NULL REFERENCES analyses(id),
                artifact TEXT NOT NULL,
                artifact_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id TEXT NOT NULL UNIQUE REFERENCES analyses(id),
                comment TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                analysis_id TEXT NOT NULL UNIQUE REFERENCES analyses(id),
                summary TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                study_id TEXT NOT NULL,
                series TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                file TEXT,
                created_at TEXT NOT NULL,
                owner TEXT NOT NULL
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        self.create_indexes().await?;
        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_studies_owner ON studies(owner)",
            "CREATE INDEX IF NOT EXISTS idx_series_study_pk ON series(study_pk)",
            "CREATE INDEX IF NOT EXISTS idx_series_owner ON series(owner)",
            "CREATE INDEX IF NOT EXISTS idx_instances_series_pk ON instances(series_pk)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_series_pk ON analyses(series_pk)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_owner ON analyses(owner)",
            "CREATE INDEX IF NOT EXISTS idx_analyses_status ON analyses(status)",
            "CREATE INDEX IF NOT EXISTS idx_prediction_results_analysis ON prediction_results(analysis_id)",
            "CREATE INDEX IF NOT EXISTS idx_segmentation_results_analysis ON segmentation_results(analysis_id)",
            "CREATE INDEX IF NOT EXISTS idx_analysis_artifacts_analysis ON analysis_artifacts(analysis_id)",
            "CREATE INDEX IF NOT EXISTS idx_reports_owner ON reports(owner)",
            "CREATE INDEX IF NOT EXISTS idx_reports_study ON reports(study_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        }
        Ok(())
    }

    // ========== 摄取批次 ==========

    /// 在单个立即事务中落库一个聚合批次
    ///
    /// BEGIN IMMEDIATE在第一条写入之前就取得写锁，并发批次直接
    /// 排队等锁而不是在锁升级时碰上SQLITE_BUSY。固定按
    /// 检查→系列→实例 顺序获取行，串行化同一属主并发批次的冲突
    /// 写入。检查为get-or-create；系列冲突时刷新缓存字段；实例
    /// 冲突时覆盖 元数据/文件/帧号。
    pub async fn ingest_batch(
        &self,
        studies: &[StudyUpsert],
        series: &[SeriesUpsert],
        instances: &[InstanceUpsert],
    ) -> Result<()> {
        let mut conn = self
            .pool
            .pool()
            .acquire()
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        match Self::ingest_batch_in(&mut conn, studies, series, instances).await {
            Ok(()) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| ())
                .map_err(|e| BfitError::Database(e.to_string())),
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn ingest_batch_in(
        tx: &mut sqlx::SqliteConnection,
        studies: &[StudyUpsert],
        series: &[SeriesUpsert],
        instances: &[InstanceUpsert],
    ) -> Result<()> {
        let now = Utc::now();

        for study in studies {
            sqlx::query(
                r#"
                INSERT INTO studies (study_id, patient_id, patient_name, study_date, created_at, owner)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (study_id, owner) DO NOTHING
                "#,
            )
            .bind(&study.study_id)
            .bind(&study.patient_id)
            .bind(&study.patient_name)
            .bind(study.study_date)
            .bind(now)
            .bind(&study.owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        for serie in series {
            let study_pk: i64 =
                sqlx::query_scalar("SELECT id FROM studies WHERE study_id = ? AND owner = ?")
                    .bind(&serie.study_id)
                    .bind(&serie.owner)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| BfitError::Database(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO series (series_id, study_pk, modality, anatomy, num_frames, created_at, owner)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (series_id, owner) DO UPDATE SET
                    modality = excluded.modality,
                    anatomy = excluded.anatomy,
                    num_frames = excluded.num_frames
                "#,
            )
            .bind(&serie.series_id)
            .bind(study_pk)
            .bind(serie.modality.as_str())
            .bind(serie.anatomy.as_str())
            .bind(serie.num_frames)
            .bind(now)
            .bind(&serie.owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        for instance in instances {
            let series_pk: i64 =
                sqlx::query_scalar("SELECT id FROM series WHERE series_id = ? AND owner = ?")
                    .bind(&instance.series_id)
                    .bind(&instance.owner)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| BfitError::Database(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO instances (instance_id, series_pk, metadata, frame_number, file, owner)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (instance_id, owner) DO UPDATE SET
                    series_pk = excluded.series_pk,
                    metadata = excluded.metadata,
                    frame_number = excluded.frame_number,
                    file = excluded.file
                "#,
            )
            .bind(&instance.instance_id)
            .bind(series_pk)
            .bind(instance.metadata.to_string())
            .bind(instance.frame_number)
            .bind(&instance.file)
            .bind(&instance.owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        Ok(())
    }

    // ========== 检查相关操作 ==========

    /// 根据检查UID查找检查
    pub async fn get_study(&self, study_id: &str, owner: &str) -> Result<Option<Study>> {
        let result = sqlx::query_as::<_, DbStudy>(
            "SELECT * FROM studies WHERE study_id = ? AND owner = ?",
        )
        .bind(study_id)
        .bind(owner)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(result.map(Study::from))
    }

    /// 获取属主的全部检查
    pub async fn list_studies(&self, owner: &str) -> Result<Vec<Study>> {
        let results = sqlx::query_as::<_, DbStudy>(
            "SELECT * FROM studies WHERE owner = ? ORDER BY created_at DESC",
        )
        .bind(owner)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(Study::from).collect())
    }

    /// 检查是否有处理中的分析作业挂在该检查下
    pub async fn has_processing_analyses(&self, study_pk: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM analyses
            WHERE status = 'processing'
              AND series_pk IN (SELECT id FROM series WHERE study_pk = ?)
            "#,
        )
        .bind(study_pk)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// 检查是否有处理中的分析作业挂在该系列下
    pub async fn has_processing_analyses_for_series(&self, series_pk: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM analyses WHERE status = 'processing' AND series_pk = ?",
        )
        .bind(series_pk)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// 收集检查名下所有记录引用的文件路径（实例、掩膜、产物）
    pub async fn study_file_paths(&self, study_pk: i64) -> Result<Vec<String>> {
        let pool = self.pool.pool();
        let mut paths: Vec<String> = sqlx::query_scalar(
            "SELECT file FROM instances WHERE series_pk IN (SELECT id FROM series WHERE study_pk = ?)",
        )
        .bind(study_pk)
        .fetch_all(pool)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        let masks: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT segmentation_mask FROM segmentation_results
            WHERE analysis_id IN (
                SELECT id FROM analyses
                WHERE series_pk IN (SELECT id FROM series WHERE study_pk = ?)
            )
            "#,
        )
        .bind(study_pk)
        .fetch_all(pool)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        paths.extend(masks);

        let artifacts: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT artifact FROM analysis_artifacts
            WHERE analysis_id IN (
                SELECT id FROM analyses
                WHERE series_pk IN (SELECT id FROM series WHERE study_pk = ?)
            )
            "#,
        )
        .bind(study_pk)
        .fetch_all(pool)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        paths.extend(artifacts);

        Ok(paths)
    }

    /// 删除检查及其全部后代行（文件应先于本调用删除）
    pub async fn delete_study_rows(&self, study_pk: i64) -> Result<()> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        let analysis_filter =
            "analysis_id IN (SELECT id FROM analyses WHERE series_pk IN (SELECT id FROM series WHERE study_pk = ?))";
        for table in [
            "prediction_results",
            "segmentation_results",
            "analysis_artifacts",
            "comments",
            "summaries",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE {analysis_filter}"))
                .bind(study_pk)
                .execute(&mut *tx)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        sqlx::query(
            "DELETE FROM analyses WHERE series_pk IN (SELECT id FROM series WHERE study_pk = ?)",
        )
        .bind(study_pk)
        .execute(&mut *tx)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        sqlx::query(
            "DELETE FROM instances WHERE series_pk IN (SELECT id FROM series WHERE study_pk = ?)",
        )
        .bind(study_pk)
        .execute(&mut *tx)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM series WHERE study_pk = ?")
            .bind(study_pk)
            .execute(&mut *tx)
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM studies WHERE id = ?")
            .bind(study_pk)
            .execute(&mut *tx)
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(())
    }

    // ========== 系列相关操作 ==========

    /// 根据系列UID查找系列
    pub async fn get_series(&self, series_id: &str, owner: &str) -> Result<Option<Series>> {
        let result = sqlx::query_as::<_, DbSeries>(
            "SELECT * FROM series WHERE series_id = ? AND owner = ?",
        )
        .bind(series_id)
        .bind(owner)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(result.map(Series::from))
    }

    /// 根据主键查找系列
    pub async fn get_series_by_pk(&self, series_pk: i64) -> Result<Option<Series>> {
        let result = sqlx::query_as::<_, DbSeries>("SELECT * FROM series WHERE id = ?")
            .bind(series_pk)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(result.map(Series::from))
    }

    /// 获取检查下的全部系列
    pub async fn list_series(&self, study_pk: i64) -> Result<Vec<Series>> {
        let results = sqlx::query_as::<_, DbSeries>(
            "SELECT * FROM series WHERE study_pk = ? ORDER BY created_at DESC",
        )
        .bind(study_pk)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(Series::from).collect())
    }

    /// 收集系列名下所有记录引用的文件路径
    pub async fn series_file_paths(&self, series_pk: i64) -> Result<Vec<String>> {
        let pool = self.pool.pool();
        let mut paths: Vec<String> =
            sqlx::query_scalar("SELECT file FROM instances WHERE series_pk = ?")
                .bind(series_pk)
                .fetch_all(pool)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;

        let masks: Vec<String> = sqlx::query_scalar(
            "SELECT segmentation_mask FROM segmentation_results WHERE analysis_id IN (SELECT id FROM analyses WHERE series_pk = ?)",
        )
        .bind(series_pk)
        .fetch_all(pool)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        paths.extend(masks);

        let artifacts: Vec<String> = sqlx::query_scalar(
            "SELECT artifact FROM analysis_artifacts WHERE analysis_id IN (SELECT id FROM analyses WHERE series_pk = ?)",
        )
        .bind(series_pk)
        .fetch_all(pool)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        paths.extend(artifacts);

        Ok(paths)
    }

    /// 删除系列及其全部后代行
    pub async fn delete_series_rows(&self, series_pk: i64) -> Result<()> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        let analysis_filter = "analysis_id IN (SELECT id FROM analyses WHERE series_pk = ?)";
        for table in [
            "prediction_results",
            "segmentation_results",
            "analysis_artifacts",
            "comments",
            "summaries",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE {analysis_filter}"))
                .bind(series_pk)
                .execute(&mut *tx)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        for sql in [
            "DELETE FROM analyses WHERE series_pk = ?",
            "DELETE FROM instances WHERE series_pk = ?",
            "DELETE FROM series WHERE id = ?",
        ] {
            sqlx::query(sql)
                .bind(series_pk)
                .execute(&mut *tx)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(())
    }

    // ========== 实例相关操作 ==========

    /// 获取系列下的全部实例，按帧号排序
    pub async fn list_instances(&self, series_pk: i64) -> Result<Vec<Instance>> {
        let results = sqlx::query_as::<_, DbInstance>(
            "SELECT * FROM instances WHERE series_pk = ? ORDER BY frame_number",
        )
        .bind(series_pk)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(Instance::from).collect())
    }

    // ========== 分析相关操作 ==========

    /// 创建新分析记录，初始状态为processing
    pub async fn create_analysis(&self, analysis: &NewAnalysis) -> Result<Analysis> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO analyses (id, queue, series_pk, status, created_at, ended_at, model_params, owner)
            VALUES (?, ?, ?, 'processing', ?, ?, ?, ?)
            "#,
        )
        .bind(&analysis.id)
        .bind(analysis.queue.as_str())
        .bind(analysis.series_pk)
        .bind(now)
        .bind(now)
        .bind(analysis.model_params.as_ref().map(|p| p.to_string()))
        .bind(&analysis.owner)
        .execute(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        self.get_analysis_any_owner(&analysis.id)
            .await?
            .ok_or_else(|| BfitError::Database("analysis row vanished after insert".to_string()))
    }

    /// 根据作业id查找分析记录
    pub async fn get_analysis(&self, id: &str, owner: &str) -> Result<Option<Analysis>> {
        let result = sqlx::query_as::<_, DbAnalysis>(
            "SELECT * FROM analyses WHERE id = ? AND owner = ?",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(result.map(Analysis::from))
    }

    /// 根据作业id查找分析记录（不限属主，供后台协调器使用）
    pub async fn get_analysis_any_owner(&self, id: &str) -> Result<Option<Analysis>> {
        let result = sqlx::query_as::<_, DbAnalysis>("SELECT * FROM analyses WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(result.map(Analysis::from))
    }

    /// 窄更新分析状态，刷新ended_at；返回受影响行数
    ///
    /// 单行UPDATE而非读-改-写：作业id即终态写入的互斥键，
    /// 并发写入方之间为last-write-wins。行不存在时返回0，不报错。
    pub async fn update_analysis_status(&self, id: &str, status: AnalysisStatus) -> Result<u64> {
        let result = sqlx::query("UPDATE analyses SET status = ?, ended_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// 列出属主每个 (系列, 队列) 组合的最新分析记录
    pub async fn list_latest_analyses(
        &self,
        owner: &str,
        series_id: Option<&str>,
        queue: Option<Queue>,
    ) -> Result<Vec<Analysis>> {
        let results = sqlx::query_as::<_, DbAnalysis>(
            r#"
            SELECT a.* FROM analyses a
            JOIN series s ON s.id = a.series_pk
            JOIN (
                SELECT series_pk, queue, MAX(ended_at) AS max_ended
                FROM analyses WHERE owner = ?
                GROUP BY series_pk, queue
            ) latest
              ON latest.series_pk = a.series_pk
             AND latest.queue = a.queue
             AND latest.max_ended = a.ended_at
            WHERE a.owner = ?
              AND (? IS NULL OR s.series_id = ?)
              AND (? IS NULL OR a.queue = ?)
            ORDER BY a.ended_at DESC
            "#,
        )
        .bind(owner)
        .bind(owner)
        .bind(series_id)
        .bind(series_id)
        .bind(queue.map(|q| q.as_str()))
        .bind(queue.map(|q| q.as_str()))
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(Analysis::from).collect())
    }

    /// 列出属主已完成的分析记录，可按检查/系列过滤
    pub async fn list_completed_analyses(
        &self,
        owner: &str,
        study_id: Option<&str>,
        series_id: Option<&str>,
    ) -> Result<Vec<Analysis>> {
        let results = sqlx::query_as::<_, DbAnalysis>(
            r#"
            SELECT a.* FROM analyses a
            JOIN series s ON s.id = a.series_pk
            JOIN studies st ON st.id = s.study_pk
            WHERE a.owner = ? AND a.status = 'completed'
              AND (? IS NULL OR st.study_id = ?)
              AND (? IS NULL OR s.series_id = ?)
            ORDER BY a.ended_at DESC
            "#,
        )
        .bind(owner)
        .bind(study_id)
        .bind(study_id)
        .bind(series_id)
        .bind(series_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(Analysis::from).collect())
    }

    /// 收集分析名下的结果文件路径
    pub async fn analysis_file_paths(&self, id: &str) -> Result<Vec<String>> {
        let pool = self.pool.pool();
        let mut paths: Vec<String> = sqlx::query_scalar(
            "SELECT segmentation_mask FROM segmentation_results WHERE analysis_id = ?",
        )
        .bind(id)
        .fetch_all(pool)
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        let artifacts: Vec<String> =
            sqlx::query_scalar("SELECT artifact FROM analysis_artifacts WHERE analysis_id = ?")
                .bind(id)
                .fetch_all(pool)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        paths.extend(artifacts);

        Ok(paths)
    }

    /// 删除分析及其全部子行
    pub async fn delete_analysis_rows(&self, id: &str, owner: &str) -> Result<u64> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        for table in [
            "prediction_results",
            "segmentation_results",
            "analysis_artifacts",
            "comments",
            "summaries",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE analysis_id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        }

        let result = sqlx::query("DELETE FROM analyses WHERE id = ? AND owner = ?")
            .bind(id)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    // ========== 分析结果相关操作 ==========

    /// 创建预测结果
    pub async fn create_prediction_result(
        &self,
        analysis_id: &str,
        prediction: &serde_json::Value,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO prediction_results (analysis_id, prediction, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(analysis_id)
        .bind(prediction.to_string())
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    /// 创建分割结果
    pub async fn create_segmentation_result(
        &self,
        analysis_id: &str,
        mask_path: &str,
        mask_type: &str,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO segmentation_results
                (analysis_id, segmentation_mask, mask_type, is_custom, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(analysis_id)
        .bind(mask_path)
        .bind(mask_type)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    /// 创建分析产物
    pub async fn create_artifact(
        &self,
        analysis_id: &str,
        artifact_path: &str,
        artifact_type: &str,
    ) -> Result<i64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO analysis_artifacts
                (analysis_id, artifact, artifact_type, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(analysis_id)
        .bind(artifact_path)
        .bind(artifact_type)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.last_insert_rowid())
    }

    /// 获取分析的预测结果
    pub async fn list_prediction_results(&self, analysis_id: &str) -> Result<Vec<PredictionResult>> {
        let results = sqlx::query_as::<_, DbPredictionResult>(
            "SELECT * FROM prediction_results WHERE analysis_id = ? ORDER BY created_at",
        )
        .bind(analysis_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(PredictionResult::from).collect())
    }

    /// 获取分析的分割结果
    pub async fn list_segmentation_results(
        &self,
        analysis_id: &str,
    ) -> Result<Vec<SegmentationResult>> {
        let results = sqlx::query_as::<_, DbSegmentationResult>(
            "SELECT * FROM segmentation_results WHERE analysis_id = ? ORDER BY created_at",
        )
        .bind(analysis_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(SegmentationResult::from).collect())
    }

    /// 获取分析的产物列表
    pub async fn list_artifacts(&self, analysis_id: &str) -> Result<Vec<AnalysisArtifact>> {
        let results = sqlx::query_as::<_, DbAnalysisArtifact>(
            "SELECT * FROM analysis_artifacts WHERE analysis_id = ? ORDER BY created_at",
        )
        .bind(analysis_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(AnalysisArtifact::from).collect())
    }

    // ========== 批注与小结 ==========

    /// 写入或更新分析批注
    pub async fn upsert_comment(&self, analysis_id: &str, text: &str) -> Result<Comment> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO comments (analysis_id, comment, created_at, modified_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (analysis_id) DO UPDATE SET
                comment = excluded.comment,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(analysis_id)
        .bind(text)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        self.get_comment(analysis_id)
            .await?
            .ok_or_else(|| BfitError::Database("comment row vanished after upsert".to_string()))
    }

    /// 获取分析批注
    pub async fn get_comment(&self, analysis_id: &str) -> Result<Option<Comment>> {
        let result =
            sqlx::query_as::<_, DbComment>("SELECT * FROM comments WHERE analysis_id = ?")
                .bind(analysis_id)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.map(Comment::from))
    }

    /// 写入或更新分析小结
    pub async fn upsert_summary(&self, analysis_id: &str, text: &str) -> Result<Summary> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO summaries (analysis_id, summary, created_at, modified_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (analysis_id) DO UPDATE SET
                summary = excluded.summary,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(analysis_id)
        .bind(text)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        self.get_summary(analysis_id)
            .await?
            .ok_or_else(|| BfitError::Database("summary row vanished after upsert".to_string()))
    }

    /// 获取分析小结
    pub async fn get_summary(&self, analysis_id: &str) -> Result<Option<Summary>> {
        let result =
            sqlx::query_as::<_, DbSummary>("SELECT * FROM summaries WHERE analysis_id = ?")
                .bind(analysis_id)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.map(Summary::from))
    }

    // ========== 报告相关操作 ==========

    /// 创建报告记录
    pub async fn create_report(&self, report: &NewReport) -> Result<Report> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, study_id, series, status, file, created_at, owner)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.study_id)
        .bind(serde_json::to_string(&report.series)?)
        .bind(report.status.as_str())
        .bind(&report.file)
        .bind(Utc::now())
        .bind(&report.owner)
        .execute(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        self.get_report(&report.id, &report.owner)
            .await?
            .ok_or_else(|| BfitError::Database("report row vanished after insert".to_string()))
    }

    /// 列出属主的报告，可按检查过滤
    pub async fn list_reports(&self, owner: &str, study_id: Option<&str>) -> Result<Vec<Report>> {
        let results = sqlx::query_as::<_, DbReport>(
            r#"
            SELECT * FROM reports
            WHERE owner = ? AND (? IS NULL OR study_id = ?)
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner)
        .bind(study_id)
        .bind(study_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| BfitError::Database(e.to_string()))?;

        Ok(results.into_iter().map(Report::from).collect())
    }

    /// 获取单个报告
    pub async fn get_report(&self, id: &str, owner: &str) -> Result<Option<Report>> {
        let result =
            sqlx::query_as::<_, DbReport>("SELECT * FROM reports WHERE id = ? AND owner = ?")
                .bind(id)
                .bind(owner)
                .fetch_optional(self.pool.pool())
                .await
                .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.map(Report::from))
    }

    /// 删除报告行
    pub async fn delete_report_rows(&self, id: &str, owner: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ? AND owner = ?")
            .bind(id)
            .bind(owner)
            .execute(self.pool.pool())
            .await
            .map_err(|e| BfitError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfit_core::{Anatomy, Modality};
    use serde_json::json;

    async fn setup() -> DatabasePool {
        let pool = DatabasePool::in_memory().await.unwrap();
        DatabaseQueries::new(&pool).create_tables().await.unwrap();
        pool
    }

    fn sample_batch() -> (Vec<StudyUpsert>, Vec<SeriesUpsert>, Vec<InstanceUpsert>) {
        let studies = vec![StudyUpsert {
            study_id: "st1".to_string(),
            patient_id: Some("P123".to_string()),
            patient_name: Some("Doe^John".to_string()),
            study_date: chrono::NaiveDate::from_ymd_opt(2023, 10, 15),
            owner: "admin".to_string(),
        }];
        let series = vec![SeriesUpsert {
            series_id: "se1".to_string(),
            study_id: "st1".to_string(),
            modality: Modality::Mr,
            anatomy: Anatomy::Abd,
            num_frames: 1,
            owner: "admin".to_string(),
        }];
        let instances = vec![InstanceUpsert {
            instance_id: "i1".to_string(),
            series_id: "se1".to_string(),
            metadata: json!({"Frame Number": 1}),
            frame_number: 1,
            file: "admin/studies/st1/series/se1/instances/a.dcm".to_string(),
            owner: "admin".to_string(),
        }];
        (studies, series, instances)
    }

    async fn count(pool: &DatabasePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_batch_upsert_is_idempotent() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);
        let (studies, series, mut instances) = sample_batch();

        queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .unwrap();
        // 重复摄取同一实例，元数据以最新为准
        instances[0].metadata = json!({"Frame Number": 2});
        instances[0].frame_number = 2;
        queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .unwrap();

        assert_eq!(count(&pool, "studies").await, 1);
        assert_eq!(count(&pool, "series").await, 1);
        assert_eq!(count(&pool, "instances").await, 1);

        let serie = queries.get_series("se1", "admin").await.unwrap().unwrap();
        let rows = queries.list_instances(serie.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].frame_number, Some(2));
        assert_eq!(rows[0].metadata["Frame Number"], json!(2));
    }

    #[tokio::test]
    async fn test_ingest_batch_rolls_back_on_error() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);
        let (studies, mut series, instances) = sample_batch();
        // 系列指向批次中不存在的检查，整个事务回滚
        series[0].study_id = "missing".to_string();

        assert!(queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .is_err());
        assert_eq!(count(&pool, "studies").await, 0);
        assert_eq!(count(&pool, "series").await, 0);
        assert_eq!(count(&pool, "instances").await, 0);
    }

    #[tokio::test]
    async fn test_analysis_lifecycle_and_narrow_update() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);
        let (studies, series, instances) = sample_batch();
        queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .unwrap();
        let serie = queries.get_series("se1", "admin").await.unwrap().unwrap();

        let analysis = queries
            .create_analysis(&NewAnalysis {
                id: "job-1".to_string(),
                queue: Queue::Abdomen,
                series_pk: serie.id,
                model_params: None,
                owner: "admin".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Processing);

        let affected = queries
            .update_analysis_status("job-1", AnalysisStatus::Completed)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let updated = queries.get_analysis("job-1", "admin").await.unwrap().unwrap();
        assert_eq!(updated.status, AnalysisStatus::Completed);
        assert!(updated.ended_at >= updated.created_at);

        // 行不存在时的窄更新是无操作而非错误
        let missing = queries
            .update_analysis_status("no-such-job", AnalysisStatus::Failed)
            .await
            .unwrap();
        assert_eq!(missing, 0);
    }

    #[tokio::test]
    async fn test_latest_analysis_per_series_and_queue() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);
        let (studies, series, instances) = sample_batch();
        queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .unwrap();
        let serie = queries.get_series("se1", "admin").await.unwrap().unwrap();

        for id in ["job-1", "job-2"] {
            queries
                .create_analysis(&NewAnalysis {
                    id: id.to_string(),
                    queue: Queue::Abdomen,
                    series_pk: serie.id,
                    model_params: None,
                    owner: "admin".to_string(),
                })
                .await
                .unwrap();
        }
        // 触发job-2的保存，使其ended_at更新
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        queries
            .update_analysis_status("job-2", AnalysisStatus::Completed)
            .await
            .unwrap();

        let latest = queries
            .list_latest_analyses("admin", None, None)
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "job-2");

        let filtered = queries
            .list_latest_analyses("admin", Some("se1"), Some(Queue::Thigh))
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_study_delete_cascades_and_collects_files() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);
        let (studies, series, instances) = sample_batch();
        queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .unwrap();
        let serie = queries.get_series("se1", "admin").await.unwrap().unwrap();
        let study = queries.get_study("st1", "admin").await.unwrap().unwrap();

        queries
            .create_analysis(&NewAnalysis {
                id: "job-1".to_string(),
                queue: Queue::Abdomen,
                series_pk: serie.id,
                model_params: None,
                owner: "admin".to_string(),
            })
            .await
            .unwrap();
        queries
            .update_analysis_status("job-1", AnalysisStatus::Completed)
            .await
            .unwrap();
        queries
            .create_segmentation_result("job-1", "admin/analysis/job-1/mask.bin", "VAT")
            .await
            .unwrap();
        queries
            .create_artifact("job-1", "admin/analysis/job-1/plot.png", "volume_plot")
            .await
            .unwrap();

        let files = queries.study_file_paths(study.id).await.unwrap();
        assert!(files.contains(&"admin/studies/st1/series/se1/instances/a.dcm".to_string()));
        assert!(files.contains(&"admin/analysis/job-1/mask.bin".to_string()));
        assert!(files.contains(&"admin/analysis/job-1/plot.png".to_string()));

        queries.delete_study_rows(study.id).await.unwrap();
        for table in [
            "studies",
            "series",
            "instances",
            "analyses",
            "segmentation_results",
            "analysis_artifacts",
        ] {
            assert_eq!(count(&pool, table).await, 0, "table {table} not empty");
        }
    }

    #[tokio::test]
    async fn test_has_processing_analyses() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);
        let (studies, series, instances) = sample_batch();
        queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .unwrap();
        let serie = queries.get_series("se1", "admin").await.unwrap().unwrap();
        let study = queries.get_study("st1", "admin").await.unwrap().unwrap();

        assert!(!queries.has_processing_analyses(study.id).await.unwrap());

        queries
            .create_analysis(&NewAnalysis {
                id: "job-1".to_string(),
                queue: Queue::Abdomen,
                series_pk: serie.id,
                model_params: None,
                owner: "admin".to_string(),
            })
            .await
            .unwrap();
        assert!(queries.has_processing_analyses(study.id).await.unwrap());

        queries
            .update_analysis_status("job-1", AnalysisStatus::Canceled)
            .await
            .unwrap();
        assert!(!queries.has_processing_analyses(study.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_comment_upsert_is_one_to_one() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);
        let (studies, series, instances) = sample_batch();
        queries
            .ingest_batch(&studies, &series, &instances)
            .await
            .unwrap();
        let serie = queries.get_series("se1", "admin").await.unwrap().unwrap();
        queries
            .create_analysis(&NewAnalysis {
                id: "job-1".to_string(),
                queue: Queue::Abdomen,
                series_pk: serie.id,
                model_params: None,
                owner: "admin".to_string(),
            })
            .await
            .unwrap();

        queries.upsert_comment("job-1", "first").await.unwrap();
        let updated = queries.upsert_comment("job-1", "second").await.unwrap();
        assert_eq!(updated.comment, "second");
        assert_eq!(count(&pool, "comments").await, 1);
    }

    #[tokio::test]
    async fn test_report_crud() {
        let pool = setup().await;
        let queries = DatabaseQueries::new(&pool);

        let report = queries
            .create_report(&NewReport {
                id: "r-1".to_string(),
                study_id: "st1".to_string(),
                series: vec!["se1".to_string()],
                status: AnalysisStatus::Completed,
                file: Some("admin/reports/r-1/report.pdf".to_string()),
                owner: "admin".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(report.series, vec!["se1".to_string()]);

        let listed = queries.list_reports("admin", Some("st1")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(queries
            .list_reports("admin", Some("other"))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(queries.delete_report_rows("r-1", "admin").await.unwrap(), 1);
        assert!(queries.get_report("r-1", "admin").await.unwrap().is_none());
    }
}
