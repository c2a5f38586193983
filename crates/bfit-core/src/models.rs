//! 核心数据模型定义

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BfitError, Result};

/// 采集模态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Modality {
    #[serde(rename = "ct")]
    Ct,
    #[serde(rename = "mr")]
    Mr,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ct => "ct",
            Self::Mr => "mr",
        }
    }

    /// 从DICOM Modality标签值解析（大小写不敏感）
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "ct" => Ok(Self::Ct),
            "mr" => Ok(Self::Mr),
            other => Err(BfitError::UnsupportedModality(other.to_string())),
        }
    }
}

/// 解剖部位标签
///
/// 已知部位为腹部和大腿，规则表可扩展出其它标签值。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Anatomy {
    Abd,
    Thigh,
    Other(String),
}

impl Anatomy {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Abd => "abd",
            Self::Thigh => "thigh",
            Self::Other(tag) => tag.as_str(),
        }
    }
}

impl From<&str> for Anatomy {
    fn from(value: &str) -> Self {
        match value {
            "abd" => Self::Abd,
            "thigh" => Self::Thigh,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for Anatomy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Anatomy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Anatomy::from(s.as_str()))
    }
}

/// 分析作业所属的命名队列
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Queue {
    #[serde(rename = "abd")]
    Abdomen,
    #[serde(rename = "thigh")]
    Thigh,
    #[serde(rename = "mmap")]
    Mmap,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abdomen => "abd",
            Self::Thigh => "thigh",
            Self::Mmap => "mmap",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "abd" => Ok(Self::Abdomen),
            "thigh" => Ok(Self::Thigh),
            "mmap" => Ok(Self::Mmap),
            other => Err(BfitError::Validation(format!("unknown queue {other}"))),
        }
    }
}

/// 分析记录状态
///
/// 状态机: PROCESSING -> {COMPLETED, FAILED, CANCELED}，终态之后
/// 不再发生自动转换。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnalysisStatus {
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "canceled")]
    Canceled,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(BfitError::Validation(format!("unknown status {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// 检查信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Study {
    pub id: i64,
    pub study_id: String, // DICOM Study Instance UID
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub owner: String,
}

/// 系列信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub id: i64,
    pub series_id: String, // DICOM Series Instance UID
    pub study_pk: i64,
    pub modality: Modality,
    pub anatomy: Anatomy,
    pub num_frames: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub owner: String,
}

/// 影像实例信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub instance_id: String, // DICOM SOP Instance UID
    pub series_pk: i64,
    pub metadata: serde_json::Value,
    pub frame_number: Option<i64>,
    pub file: String,
    pub owner: String,
}

/// 分析作业记录
///
/// 主键为外部作业执行器在提交时分配的不透明作业id。
/// `ended_at` 在每次保存时刷新，是最后写入时间而非完成时间。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub queue: Queue,
    pub series_pk: i64,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub model_params: Option<serde_json::Value>,
    pub owner: String,
}

/// 预测结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: i64,
    pub analysis_id: String,
    pub prediction: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 分割结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub id: i64,
    pub analysis_id: String,
    pub segmentation_mask: String,
    pub mask_type: String,
    pub is_custom: bool,
    pub prediction_overrides: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 分析中间产物 (PNG、CSV等)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub id: i64,
    pub analysis_id: String,
    pub artifact: String,
    pub artifact_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 分析的自由文本批注，与分析记录一对一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub analysis_id: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// 分析的自由文本小结，与分析记录一对一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub analysis_id: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// PDF报告
///
/// `study_id` 按值引用检查记录，不施加外键约束——删除检查不要求
/// 级联删除其报告。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub study_id: String,
    pub series: Vec<String>,
    pub status: AnalysisStatus,
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub owner: String,
}
