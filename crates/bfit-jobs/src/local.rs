//! 进程内作业队列
//!
//! 每个队列一个工作协程，同一队列的作业严格串行执行。作业超时
//! 按失败处理；服务关停时执行中的作业被停止并按取消落库。

use crate::runner::{JobHandler, JobRunner, JobSpec, JobState};
use async_trait::async_trait;
use bfit_core::{BfitError, Queue, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

type StateMap = Arc<RwLock<HashMap<String, JobState>>>;
type StopMap = Arc<Mutex<HashMap<String, Arc<Notify>>>>;

/// 终态条目在状态表中的缺省保留时长
const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(500);

/// 进程内作业运行器
pub struct LocalJobRunner {
    states: StateMap,
    stops: StopMap,
    senders: HashMap<Queue, mpsc::UnboundedSender<JobSpec>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalJobRunner {
    /// 创建运行器并为每个队列启动一个工作协程
    pub fn new(handler: Arc<dyn JobHandler>, job_timeout: Duration) -> Self {
        Self::with_result_ttl(handler, job_timeout, DEFAULT_RESULT_TTL)
    }

    /// 同上，终态条目保留时长可配置
    ///
    /// 到达终态的作业在保留时长后从状态表中剔除，此后的状态查询
    /// 按作业不存在处理。
    pub fn with_result_ttl(
        handler: Arc<dyn JobHandler>,
        job_timeout: Duration,
        result_ttl: Duration,
    ) -> Self {
        let states: StateMap = Arc::new(RwLock::new(HashMap::new()));
        let stops: StopMap = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut senders = HashMap::new();
        let mut workers = Vec::new();
        for queue in [Queue::Abdomen, Queue::Thigh, Queue::Mmap] {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(queue, tx);
            workers.push(tokio::spawn(worker_loop(
                queue,
                rx,
                states.clone(),
                stops.clone(),
                handler.clone(),
                job_timeout,
                result_ttl,
                shutdown_rx.clone(),
            )));
        }

        Self {
            states,
            stops,
            senders,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    /// 关停所有工作协程
    ///
    /// 执行中的作业被停止并按取消落库，排队中的作业原样丢弃。
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(e) = worker.await {
                warn!("Job worker exited abnormally: {}", e);
            }
        }
        info!("All job workers stopped");
    }
}

#[async_trait]
impl JobRunner for LocalJobRunner {
    async fn enqueue(&self, spec: JobSpec) -> Result<()> {
        let sender = self
            .senders
            .get(&spec.queue)
            .ok_or_else(|| BfitError::Internal(format!("no worker for queue {}", spec.queue.as_str())))?;

        self.states
            .write()
            .await
            .insert(spec.id.clone(), JobState::Queued);
        info!("Enqueued job {} on queue {}", spec.id, spec.queue.as_str());

        sender
            .send(spec)
            .map_err(|e| BfitError::Internal(format!("job queue closed: {}", e)))
    }

    async fn fetch_state(&self, id: &str) -> Result<JobState> {
        self.states
            .read()
            .await
            .get(id)
            .copied()
            .ok_or_else(|| BfitError::NoSuchJob(id.to_string()))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        let state = self.fetch_state(id).await?;
        if state != JobState::Started {
            return Err(BfitError::InvalidJobOperation(format!(
                "job {} is {}, only started jobs can be stopped",
                id,
                state.as_str()
            )));
        }
        if let Some(stop) = self.stops.lock().await.get(id) {
            stop.notify_one();
        }
        Ok(())
    }

    async fn cancel(&self, id: &str) -> Result<()> {
        let mut states = self.states.write().await;
        let state = states
            .get(id)
            .copied()
            .ok_or_else(|| BfitError::NoSuchJob(id.to_string()))?;
        if !state.is_pending() {
            return Err(BfitError::InvalidJobOperation(format!(
                "job {} is {}, only pending jobs can be canceled",
                id,
                state.as_str()
            )));
        }
        states.insert(id.to_string(), JobState::Canceled);
        Ok(())
    }
}

/// 保留时长过后剔除仍处于终态的条目
fn schedule_eviction(states: StateMap, id: String, ttl: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        let mut states = states.write().await;
        let terminal = states
            .get(&id)
            .map(|s| !s.is_pending() && *s != JobState::Started)
            .unwrap_or(false);
        if terminal {
            states.remove(&id);
        }
    });
}

async fn worker_loop(
    queue: Queue,
    mut rx: mpsc::UnboundedReceiver<JobSpec>,
    states: StateMap,
    stops: StopMap,
    handler: Arc<dyn JobHandler>,
    job_timeout: Duration,
    result_ttl: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Job worker started for queue {}", queue.as_str());
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let spec = tokio::select! {
            _ = shutdown_rx.changed() => break,
            msg = rx.recv() => match msg {
                Some(spec) => spec,
                None => break,
            },
        };

        // 入队后被撤销的作业直接跳过
        if states.read().await.get(&spec.id) == Some(&JobState::Canceled) {
            info!("Skipping canceled job {}", spec.id);
            schedule_eviction(states.clone(), spec.id.clone(), result_ttl);
            continue;
        }

        states
            .write()
            .await
            .insert(spec.id.clone(), JobState::Started);
        let stop = Arc::new(Notify::new());
        stops.lock().await.insert(spec.id.clone(), stop.clone());
        info!("Job {} started on queue {}", spec.id, queue.as_str());

        let final_state = tokio::select! {
            result = handler.execute(&spec) => match result {
                Ok(()) => JobState::Finished,
                Err(e) => {
                    warn!("Job {} failed: {}", spec.id, e);
                    handler.on_failure(&spec).await;
                    JobState::Failed
                }
            },
            _ = stop.notified() => {
                info!("Job {} stopped", spec.id);
                handler.on_stopped(&spec).await;
                JobState::Canceled
            },
            _ = shutdown_rx.changed() => {
                info!("Job {} stopped by shutdown", spec.id);
                handler.on_stopped(&spec).await;
                JobState::Canceled
            },
            _ = tokio::time::sleep(job_timeout) => {
                warn!("Job {} timed out after {:?}", spec.id, job_timeout);
                handler.on_failure(&spec).await;
                JobState::Failed
            },
        };

        states.write().await.insert(spec.id.clone(), final_state);
        stops.lock().await.remove(&spec.id);
        schedule_eviction(states.clone(), spec.id.clone(), result_ttl);
    }
    info!("Job worker stopped for queue {}", queue.as_str());
}
