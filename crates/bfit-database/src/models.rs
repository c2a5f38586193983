//! 数据库模型

use bfit_core::models::*;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

// 数据库表模型 - 使用FromRow trait用于SQL查询

fn parse_json(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or(serde_json::Value::Null)
}

fn parse_json_opt(text: Option<&str>) -> Option<serde_json::Value> {
    text.map(parse_json)
}

/// 数据库检查表
#[derive(Debug, FromRow)]
pub struct DbStudy {
    pub id: i64,
    pub study_id: String,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub owner: String,
}

impl From<DbStudy> for Study {
    fn from(row: DbStudy) -> Self {
        Study {
            id: row.id,
            study_id: row.study_id,
            patient_id: row.patient_id,
            patient_name: row.patient_name,
            study_date: row.study_date,
            created_at: row.created_at,
            owner: row.owner,
        }
    }
}

/// 数据库系列表
#[derive(Debug, FromRow)]
pub struct DbSeries {
    pub id: i64,
    pub series_id: String,
    pub study_pk: i64,
    pub modality: String, // 存储为字符串，转换为Modality枚举
    pub anatomy: String,
    pub num_frames: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub owner: String,
}

impl From<DbSeries> for Series {
    fn from(row: DbSeries) -> Self {
        Series {
            id: row.id,
            series_id: row.series_id,
            study_pk: row.study_pk,
            modality: Modality::parse(&row.modality).unwrap_or(Modality::Mr),
            anatomy: Anatomy::from(row.anatomy.as_str()),
            num_frames: row.num_frames,
            created_at: row.created_at,
            owner: row.owner,
        }
    }
}

/// 数据库实例表
#[derive(Debug, FromRow)]
pub struct DbInstance {
    pub id: i64,
    pub instance_id: String,
    pub series_pk: i64,
    pub metadata: String, // JSON文本
    pub frame_number: Option<i64>,
    pub file: String,
    pub owner: String,
}

impl From<DbInstance> for Instance {
    fn from(row: DbInstance) -> Self {
        Instance {
            id: row.id,
            instance_id: row.instance_id,
            series_pk: row.series_pk,
            metadata: parse_json(&row.metadata),
            frame_number: row.frame_number,
            file: row.file,
            owner: row.owner,
        }
    }
}

/// 数据库分析表
#[derive(Debug, FromRow)]
pub struct DbAnalysis {
    pub id: String,
    pub queue: String,
    pub series_pk: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub model_params: Option<String>,
    pub owner: String,
}

impl From<DbAnalysis> for Analysis {
    fn from(row: DbAnalysis) -> Self {
        Analysis {
            id: row.id,
            queue: Queue::parse(&row.queue).unwrap_or(Queue::Mmap),
            series_pk: row.series_pk,
            status: AnalysisStatus::parse(&row.status).unwrap_or(AnalysisStatus::Processing),
            created_at: row.created_at,
            ended_at: row.ended_at,
            model_params: parse_json_opt(row.model_params.as_deref()),
            owner: row.owner,
        }
    }
}

/// 数据库预测结果表
#[derive(Debug, FromRow)]
pub struct DbPredictionResult {
    pub id: i64,
    pub analysis_id: String,
    pub prediction: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbPredictionResult> for PredictionResult {
    fn from(row: DbPredictionResult) -> Self {
        PredictionResult {
            id: row.id,
            analysis_id: row.analysis_id,
            prediction: parse_json(&row.prediction),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库分割结果表
#[derive(Debug, FromRow)]
pub struct DbSegmentationResult {
    pub id: i64,
    pub analysis_id: String,
    pub segmentation_mask: String,
    pub mask_type: String,
    pub is_custom: bool,
    pub prediction_overrides: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbSegmentationResult> for SegmentationResult {
    fn from(row: DbSegmentationResult) -> Self {
        SegmentationResult {
            id: row.id,
            analysis_id: row.analysis_id,
            segmentation_mask: row.segmentation_mask,
            mask_type: row.mask_type,
            is_custom: row.is_custom,
            prediction_overrides: parse_json_opt(row.prediction_overrides.as_deref()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库分析产物表
#[derive(Debug, FromRow)]
pub struct DbAnalysisArtifact {
    pub id: i64,
    pub analysis_id: String,
    pub artifact: String,
    pub artifact_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbAnalysisArtifact> for AnalysisArtifact {
    fn from(row: DbAnalysisArtifact) -> Self {
        AnalysisArtifact {
            id: row.id,
            analysis_id: row.analysis_id,
            artifact: row.artifact,
            artifact_type: row.artifact_type,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库批注表
#[derive(Debug, FromRow)]
pub struct DbComment {
    pub id: i64,
    pub analysis_id: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl From<DbComment> for Comment {
    fn from(row: DbComment) -> Self {
        Comment {
            id: row.id,
            analysis_id: row.analysis_id,
            comment: row.comment,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

/// 数据库小结表
#[derive(Debug, FromRow)]
pub struct DbSummary {
    pub id: i64,
    pub analysis_id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl From<DbSummary> for Summary {
    fn from(row: DbSummary) -> Self {
        Summary {
            id: row.id,
            analysis_id: row.analysis_id,
            summary: row.summary,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

/// 数据库报告表
#[derive(Debug, FromRow)]
pub struct DbReport {
    pub id: String,
    pub study_id: String,
    pub series: String, // JSON数组文本
    pub status: String,
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub owner: String,
}

impl From<DbReport> for Report {
    fn from(row: DbReport) -> Self {
        Report {
            id: row.id,
            study_id: row.study_id,
            series: serde_json::from_str(&row.series).unwrap_or_default(),
            status: AnalysisStatus::parse(&row.status).unwrap_or(AnalysisStatus::Processing),
            file: row.file,
            created_at: row.created_at,
            owner: row.owner,
        }
    }
}

// 插入/更新模型

/// 检查upsert模型（按 (study_id, owner) 匹配，已存在时不覆盖）
#[derive(Debug, Clone)]
pub struct StudyUpsert {
    pub study_id: String,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_date: Option<NaiveDate>,
    pub owner: String,
}

/// 系列upsert模型（按 (series_id, owner) 匹配，冲突时刷新
/// 模态/部位/帧数缓存）
#[derive(Debug, Clone)]
pub struct SeriesUpsert {
    pub series_id: String,
    pub study_id: String,
    pub modality: Modality,
    pub anatomy: Anatomy,
    pub num_frames: i64,
    pub owner: String,
}

/// 实例upsert模型（按 (instance_id, owner) 匹配，冲突时覆盖
/// 元数据/文件/帧号）
#[derive(Debug, Clone)]
pub struct InstanceUpsert {
    pub instance_id: String,
    pub series_id: String,
    pub metadata: serde_json::Value,
    pub frame_number: i64,
    pub file: String,
    pub owner: String,
}

/// 新分析记录插入模型
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub id: String,
    pub queue: Queue,
    pub series_pk: i64,
    pub model_params: Option<serde_json::Value>,
    pub owner: String,
}

/// 新报告插入模型
#[derive(Debug, Clone)]
pub struct NewReport {
    pub id: String,
    pub study_id: String,
    pub series: Vec<String>,
    pub status: AnalysisStatus,
    pub file: Option<String>,
    pub owner: String,
}
