//! 作业运行器接口
//!
//! 定义队列后端的最小原语集：入队、查询、停止执行中作业、
//! 撤销排队中作业。状态协调逻辑在reconciler中组合这些原语。

use async_trait::async_trait;
use bfit_core::{Modality, Queue, Result};
use serde::{Deserialize, Serialize};

/// 作业生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "deferred")]
    Deferred,
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "canceled")]
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Deferred => "deferred",
            Self::Scheduled => "scheduled",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// 尚未开始执行的状态，可直接撤销
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Deferred | Self::Scheduled)
    }
}

/// 作业描述
///
/// 输入文件以存储相对路径引用，实际读取发生在工作协程内。
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub queue: Queue,
    pub modality: Modality,
    pub owner: String,
    pub input_files: Vec<String>,
    pub model_params: Option<serde_json::Value>,
}

/// 作业队列后端
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// 将作业放入其队列
    async fn enqueue(&self, spec: JobSpec) -> Result<()>;

    /// 查询作业状态；作业未知时返回NoSuchJob
    async fn fetch_state(&self, id: &str) -> Result<JobState>;

    /// 向执行中的作业发送停止指令；仅对Started状态有效
    async fn stop(&self, id: &str) -> Result<()>;

    /// 撤销尚未开始的作业；已开始或已结束时返回InvalidJobOperation
    async fn cancel(&self, id: &str) -> Result<()>;
}

/// 作业执行回调
///
/// 运行器只管生命周期，执行与落库由handler承担。
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 执行作业并落库结果；返回错误视为作业失败
    async fn execute(&self, spec: &JobSpec) -> Result<()>;

    /// 作业失败（执行错误或超时）时的落库，不得再失败
    async fn on_failure(&self, spec: &JobSpec);

    /// 作业被停止（显式停止或服务关停）时的落库
    async fn on_stopped(&self, spec: &JobSpec);
}
