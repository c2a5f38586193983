//! # BFIT分析作业模块
//!
//! 负责分割分析作业的派发、执行与状态协调：
//! - 按解剖部位路由到对应队列
//! - 进程内队列执行器，每队列单作业串行执行
//! - 推理服务HTTP客户端
//! - 作业结果回写与取消协调

pub mod dispatcher;
pub mod inference;
pub mod local;
pub mod reconciler;
pub mod runner;

// 重新导出主要类型
pub use dispatcher::JobDispatcher;
pub use inference::{HttpInferenceExecutor, InferenceEndpoints, InferenceExecutor};
pub use local::LocalJobRunner;
pub use reconciler::{FilePayload, InferenceJobHandler, JobReconciler, ResultPayload};
pub use runner::{JobHandler, JobRunner, JobSpec, JobState};
